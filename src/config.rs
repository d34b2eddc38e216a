//! Configuration for the fleetguard coordinator

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Settings key for the primary election voting window, in seconds
pub const SETTING_ELECTION_TIMEOUT: &str = "primary-election-timeout";

/// Settings key for the heartbeat delay allowance, in seconds
pub const SETTING_DELAY_ALLOWANCE: &str = "heartbeat-delay-allowance";

/// Settings key for the maximum consecutive heartbeat loss count
pub const SETTING_MAX_LOSS_COUNT: &str = "heartbeat-loss-count";

/// Settings key for the out-of-sync recovery countdown
pub const SETTING_SYNC_RECOVERY_COUNT: &str = "sync-recovery-count";

/// Settings key for the scaling group eligible for primary election
pub const SETTING_PRIMARY_SCALING_GROUP: &str = "primary-scaling-group-name";

/// Settings key for the terminate-unhealthy-vm policy flag
pub const SETTING_TERMINATE_UNHEALTHY_VM: &str = "terminate-unhealthy-vm";

/// Configuration for the fleetguard coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Coordinator identifier
    pub coordinator_id: String,

    /// Endpoint for the heartbeat HTTP surface
    pub listen_endpoint: String,

    /// Fleet policy settings
    pub fleet: FleetConfig,

    /// Heartbeat evaluation settings
    pub heartbeat: HeartbeatConfig,

    /// Primary election settings
    pub election: ElectionConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            coordinator_id: uuid::Uuid::new_v4().to_string(),
            listen_endpoint: "0.0.0.0:8087".to_string(),
            fleet: FleetConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            election: ElectionConfig::default(),
        }
    }
}

/// Fleet policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    /// Scaling group whose members are eligible for primary election
    pub preferred_scaling_group: String,

    /// Terminate unhealthy VMs instead of waiting for recovery
    pub terminate_unhealthy_vm: bool,

    /// VMs seeded into the in-memory platform for local runs
    pub seed_vms: Vec<SeedVmConfig>,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            preferred_scaling_group: "fw-primary-group".to_string(),
            terminate_unhealthy_vm: false,
            seed_vms: Vec::new(),
        }
    }
}

/// A VM pre-registered for local runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedVmConfig {
    /// VM identifier
    pub vm_id: String,

    /// Private IP address
    pub ip: String,

    /// Scaling group name; defaults to the preferred group
    pub scaling_group_name: Option<String>,
}

/// Heartbeat evaluation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Default heartbeat interval in milliseconds
    pub default_interval_ms: u64,

    /// Jitter buffer before a heartbeat is deemed late, in seconds
    pub delay_allowance_secs: u64,

    /// Late heartbeats tolerated before a VM goes out of sync
    pub max_loss_count: u32,

    /// Consecutive on-time heartbeats required to exit out-of-sync
    pub sync_recovery_count: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            default_interval_ms: 30_000,
            delay_allowance_secs: 2,
            max_loss_count: 3,
            sync_recovery_count: 3,
        }
    }
}

/// Primary election configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionConfig {
    /// Voting window for a provisional primary, in seconds
    pub election_duration_secs: u64,

    /// Election strategy to run at the coordinator
    pub strategy: ElectionStrategyKind,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            election_duration_secs: 120,
            strategy: ElectionStrategyKind::PreferredGroup,
        }
    }
}

/// Selectable election strategies
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ElectionStrategyKind {
    /// First successful conditional write wins
    PreferredGroup,
    /// Deterministic ranking of healthy candidates before the write
    WeightedScore,
}

/// Immutable snapshot of the platform settings map
///
/// Resolved once at the start of each invocation; nothing reads settings
/// from the platform mid-invocation.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    /// Voting window for a provisional primary, in seconds
    pub election_duration_secs: u64,

    /// Jitter buffer before a heartbeat is deemed late, in milliseconds
    pub delay_allowance_ms: u64,

    /// Late heartbeats tolerated before a VM goes out of sync
    pub max_loss_count: u32,

    /// Consecutive on-time heartbeats required to exit out-of-sync
    pub sync_recovery_count: u32,

    /// Scaling group whose members are eligible for primary election
    pub preferred_scaling_group: String,

    /// Terminate unhealthy VMs instead of waiting for recovery
    pub terminate_unhealthy_vm: bool,
}

impl RuntimeSettings {
    /// Resolve a snapshot from the platform settings map
    ///
    /// Missing or malformed keys fall back to the coordinator configuration
    /// rather than failing the heartbeat.
    pub fn from_map(settings: &HashMap<String, String>, config: &CoordinatorConfig) -> Self {
        Self {
            election_duration_secs: parse_setting(settings, SETTING_ELECTION_TIMEOUT)
                .unwrap_or(config.election.election_duration_secs),
            delay_allowance_ms: parse_setting::<u64>(settings, SETTING_DELAY_ALLOWANCE)
                .map(|secs| secs * 1_000)
                .unwrap_or(config.heartbeat.delay_allowance_secs * 1_000),
            max_loss_count: parse_setting(settings, SETTING_MAX_LOSS_COUNT)
                .unwrap_or(config.heartbeat.max_loss_count),
            sync_recovery_count: parse_setting(settings, SETTING_SYNC_RECOVERY_COUNT)
                .unwrap_or(config.heartbeat.sync_recovery_count),
            preferred_scaling_group: settings
                .get(SETTING_PRIMARY_SCALING_GROUP)
                .cloned()
                .unwrap_or_else(|| config.fleet.preferred_scaling_group.clone()),
            terminate_unhealthy_vm: parse_setting(settings, SETTING_TERMINATE_UNHEALTHY_VM)
                .unwrap_or(config.fleet.terminate_unhealthy_vm),
        }
    }

    /// Export this snapshot as a platform settings map
    pub fn to_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert(
            SETTING_ELECTION_TIMEOUT.to_string(),
            self.election_duration_secs.to_string(),
        );
        map.insert(
            SETTING_DELAY_ALLOWANCE.to_string(),
            (self.delay_allowance_ms / 1_000).to_string(),
        );
        map.insert(
            SETTING_MAX_LOSS_COUNT.to_string(),
            self.max_loss_count.to_string(),
        );
        map.insert(
            SETTING_SYNC_RECOVERY_COUNT.to_string(),
            self.sync_recovery_count.to_string(),
        );
        map.insert(
            SETTING_PRIMARY_SCALING_GROUP.to_string(),
            self.preferred_scaling_group.clone(),
        );
        map.insert(
            SETTING_TERMINATE_UNHEALTHY_VM.to_string(),
            self.terminate_unhealthy_vm.to_string(),
        );
        map
    }
}

impl From<&CoordinatorConfig> for RuntimeSettings {
    fn from(config: &CoordinatorConfig) -> Self {
        Self {
            election_duration_secs: config.election.election_duration_secs,
            delay_allowance_ms: config.heartbeat.delay_allowance_secs * 1_000,
            max_loss_count: config.heartbeat.max_loss_count,
            sync_recovery_count: config.heartbeat.sync_recovery_count,
            preferred_scaling_group: config.fleet.preferred_scaling_group.clone(),
            terminate_unhealthy_vm: config.fleet.terminate_unhealthy_vm,
        }
    }
}

fn parse_setting<T: std::str::FromStr>(
    settings: &HashMap<String, String>,
    key: &str,
) -> Option<T> {
    settings.get(key).and_then(|value| value.parse().ok())
}
