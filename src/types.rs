//! Types for the fleetguard coordinator

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Get current timestamp in milliseconds
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Lifecycle state of a fleet member VM
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum VmState {
    Pending,
    Running,
    Stopping,
    Stopped,
    Terminated,
}

/// Identity of a fleet member
///
/// Created and destroyed entirely by the external scaling group; the
/// coordinator only reads it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VirtualMachine {
    /// Unique VM identifier
    pub vm_id: String,

    /// Scaling group this VM belongs to
    pub scaling_group_name: String,

    /// Primary private IP address
    pub primary_private_ip: String,

    /// Primary public IP address, if assigned
    pub primary_public_ip: Option<String>,

    /// Virtual network identifier
    pub virtual_network_id: String,

    /// Subnet identifier
    pub subnet_id: String,

    /// Current lifecycle state
    pub state: VmState,
}

/// Heartbeat cadence state of a VM
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SyncState {
    /// Healthy cadence, eligible for primary election
    InSync,
    /// Excluded from election pending recovery
    OutOfSync,
}

/// Per-VM liveness record, keyed by `vm_id`
///
/// Created on the first heartbeat from a VM and mutated on every subsequent
/// one. `seq` strictly increases on every successfully processed heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthCheckRecord {
    /// Owning VM identifier
    pub vm_id: String,

    /// Scaling group of the owning VM
    pub scaling_group_name: String,

    /// VM's own IP address
    pub ip: String,

    /// Primary IP as last told to this VM
    pub primary_ip: Option<String>,

    /// Heartbeat interval in milliseconds
    pub heartbeat_interval: u64,

    /// Consecutive late-heartbeat count
    pub heartbeat_loss_count: u32,

    /// Expected arrival time of the next heartbeat (epoch ms)
    pub next_heartbeat_time: u64,

    /// Cadence state
    pub sync_state: SyncState,

    /// Remaining on-time heartbeats required to exit OutOfSync
    pub sync_recovery_count: u32,

    /// Monotonically increasing per-VM sequence
    pub seq: u64,

    /// Whether this VM is eligible for primary election
    pub healthy: bool,

    /// True only if the record reflects the outcome of the current
    /// heartbeat, not a re-read after a persistence failure
    #[serde(default = "default_up_to_date")]
    pub up_to_date: bool,
}

fn default_up_to_date() -> bool {
    true
}

/// Voting lifecycle of a primary record
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum VoteState {
    Pending,
    Done,
    Timeout,
}

/// The fleet's single primary slot
///
/// At most one record may be semantically current; uniqueness is enforced by
/// the record store's conditional-create contract, not by this type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrimaryRecord {
    /// Election identifier, derived from the candidate that created it
    pub id: String,

    /// Primary VM identifier
    pub vm_id: String,

    /// Primary VM IP address
    pub ip: String,

    /// Scaling group of the primary VM
    pub scaling_group_name: String,

    /// Virtual network of the primary VM
    pub virtual_network_id: String,

    /// Subnet of the primary VM
    pub subnet_id: String,

    /// End of the voting window (epoch ms); meaningful only while Pending
    pub vote_end_time: u64,

    /// Stored voting state
    pub vote_state: VoteState,
}

impl PrimaryRecord {
    /// Derive the election id for a candidate
    pub fn election_id(scaling_group_name: &str, vm_id: &str) -> String {
        format!("{}:{}", scaling_group_name, vm_id)
    }

    /// Voting state with the expiry of a Pending vote applied
    ///
    /// A Pending record whose voting window has passed is logically Timeout;
    /// no background process ever writes that state.
    pub fn effective_vote_state(&self, now: u64) -> VoteState {
        if self.vote_state == VoteState::Pending && now > self.vote_end_time {
            VoteState::Timeout
        } else {
            self.vote_state
        }
    }
}

/// Outcome category of one processed heartbeat
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum HealthCheckResult {
    /// Arrived within the allowance window
    OnTime,
    /// Arrived late but below the loss-count maximum
    Late,
    /// Arrived late and pushed the loss count to the maximum
    TooLate,
    /// Not counted: sender already out of sync, or persistence failed
    Dropped,
}

/// Diagnostic detail of one heartbeat evaluation
///
/// Used for notification payloads only, never for control flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResultDetail {
    pub seq: u64,
    pub expected_arrive_time: u64,
    pub actual_arrive_time: u64,
    pub old_interval_ms: u64,
    pub new_interval_ms: u64,
    pub old_loss_count: u32,
    pub new_loss_count: u32,
    pub delay_allowance_ms: u64,
    pub calculated_delay_ms: i64,
    pub sync_recovery_count: u32,
}

/// Transient election context
///
/// Constructed fresh per heartbeat invocation that enters the election path,
/// consumed synchronously, discarded after the coordinator reads its result.
/// A flat value object with plain identifiers, no back-references.
#[derive(Debug, Clone)]
pub struct PrimaryElection {
    /// The VM this invocation nominates
    pub candidate: VirtualMachine,

    /// The candidate's committed health-check record, if any
    pub candidate_health_check: Option<HealthCheckRecord>,

    /// Primary VM known before the election, if any
    pub old_primary: Option<VirtualMachine>,

    /// Primary record known before the election, if any
    pub old_primary_record: Option<PrimaryRecord>,

    /// Primary VM established by the election
    pub new_primary: Option<VirtualMachine>,

    /// Primary record established by the election
    pub new_primary_record: Option<PrimaryRecord>,

    /// True only if this invocation's conditional create won
    pub elected_here: bool,

    /// Voting window length in seconds
    pub election_duration: u64,

    /// Human-diagnostic correlation value
    pub signature: String,
}

impl PrimaryElection {
    /// Create a new election context for a candidate
    pub fn new(candidate: VirtualMachine, election_duration: u64) -> Self {
        Self {
            candidate,
            candidate_health_check: None,
            old_primary: None,
            old_primary_record: None,
            new_primary: None,
            new_primary_record: None,
            elected_here: false,
            election_duration,
            signature: uuid::Uuid::new_v4().to_string(),
        }
    }
}

/// Inbound heartbeat request body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    /// Sender VM identifier
    pub vm_id: String,

    /// Requested heartbeat interval in milliseconds
    pub interval_ms: Option<u64>,
}

/// Heartbeat response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    /// Sender VM identifier
    pub vm_id: String,

    /// Evaluation outcome of this heartbeat
    pub result: HealthCheckResult,

    /// Primary IP the sender should steer traffic through
    pub primary_ip: Option<String>,

    /// Interval the sender should heartbeat at, in milliseconds
    pub interval_ms: u64,
}
