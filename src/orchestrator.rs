//! Autoscale coordination
//!
//! `AutoscaleCoordinator` drives one heartbeat invocation to completion:
//! evaluate the heartbeat, advance the primary election state machine,
//! reconcile the advertised primary IP, and hand unhealthy members to the
//! fleet policy. Invocations from different fleet members run concurrently
//! and synchronize only through the record store's conditional create.

use crate::config::{CoordinatorConfig, ElectionStrategyKind, RuntimeSettings};
use crate::election::{
    ElectionOutcome, PreferredGroupElection, PrimaryElectionStrategy, WeightedScoreElection,
};
use crate::error::FleetError;
use crate::heartbeat::HeartbeatChecker;
use crate::platform::Platform;
use crate::types::{
    current_timestamp, HealthCheckRecord, HealthCheckResult, HeartbeatRequest, HeartbeatResponse,
    PrimaryElection, PrimaryRecord, SyncState, VirtualMachine, VoteState,
};
use crate::unhealthy::UnhealthyVmHandler;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Primary state established by one pass of the election dispatcher
struct ElectionResolution {
    primary_vm: Option<VirtualMachine>,
    primary_record: Option<PrimaryRecord>,
    /// True when this invocation created or confirmed the primary record
    newly_elected: bool,
    old_primary: Option<VirtualMachine>,
}

impl ElectionResolution {
    fn unchanged(primary_vm: Option<VirtualMachine>, primary_record: Option<PrimaryRecord>) -> Self {
        Self {
            primary_vm,
            primary_record,
            newly_elected: false,
            old_primary: None,
        }
    }
}

/// Per-heartbeat control loop for an autoscaled firewall fleet
pub struct AutoscaleCoordinator {
    config: CoordinatorConfig,
    platform: Arc<dyn Platform>,
}

impl AutoscaleCoordinator {
    /// Create a coordinator over a platform
    pub fn new(config: CoordinatorConfig, platform: Arc<dyn Platform>) -> Self {
        Self { config, platform }
    }

    /// The platform this coordinator drives
    pub fn platform(&self) -> Arc<dyn Platform> {
        self.platform.clone()
    }

    /// Process one heartbeat from a fleet member
    pub async fn handle_heartbeat_sync(
        &self,
        request: HeartbeatRequest,
    ) -> Result<HeartbeatResponse, FleetError> {
        // Captured once at entry; every timing comparison uses this value.
        let arrive_time = current_timestamp();

        let settings =
            RuntimeSettings::from_map(&self.platform.get_settings().await?, &self.config);
        let interval_ms = request
            .interval_ms
            .unwrap_or(self.config.heartbeat.default_interval_ms);

        let target = self
            .platform
            .get_target_vm(&request.vm_id)
            .await?
            .ok_or_else(|| FleetError::UnknownVm(request.vm_id.clone()))?;

        let checker = HeartbeatChecker::new(self.platform.clone(), settings.clone());
        let outcome = checker.apply(&target, interval_ms, arrive_time).await?;

        // After a persistence failure the in-memory record is stale; fall
        // back to whatever the store last committed.
        let mut record = if outcome.record.up_to_date {
            outcome.record.clone()
        } else {
            self.platform
                .get_health_check_record(&target.vm_id)
                .await?
                .unwrap_or_else(|| outcome.record.clone())
        };

        if outcome.first_heartbeat && outcome.result != HealthCheckResult::Dropped {
            self.on_vm_fully_configured(&target).await;
        }

        match outcome.result {
            HealthCheckResult::Dropped => {
                return Ok(HeartbeatResponse {
                    vm_id: target.vm_id,
                    result: outcome.result,
                    primary_ip: record.primary_ip,
                    interval_ms: record.heartbeat_interval,
                });
            }
            HealthCheckResult::Late | HealthCheckResult::TooLate => {
                let message = format!(
                    "Heartbeat {} from VM {} arrived {}ms past the allowance window; \
                     loss count {} of {}.",
                    outcome.detail.seq,
                    target.vm_id,
                    outcome.detail.calculated_delay_ms,
                    outcome.detail.new_loss_count,
                    settings.max_loss_count
                );
                if let Err(e) = self
                    .platform
                    .notify(&target, "Late heartbeat", &message)
                    .await
                {
                    warn!(vm_id = %target.vm_id, error = %e, "Late-heartbeat notification failed");
                }
            }
            HealthCheckResult::OnTime => {}
        }

        let primary_vm = self.platform.get_primary_vm().await?;
        let primary_record = self.platform.get_primary_record().await?;

        // A candidate with no record committed before this invocation is
        // still bootstrapping; it enters the election without one and gets
        // the provisional voting window instead of an immediate Done.
        let candidate_health_check = if outcome.first_heartbeat {
            None
        } else {
            Some(&record)
        };

        let resolution = self
            .handle_primary_election(
                &target,
                &record,
                candidate_health_check,
                primary_vm,
                primary_record,
                &settings,
                arrive_time,
            )
            .await?;

        // Collect unhealthy members: a just-replaced unhealthy old primary,
        // and the target itself, deduplicated by identity.
        let mut unhealthy: Vec<VirtualMachine> = Vec::new();
        if resolution.newly_elected {
            if let Some(old) = &resolution.old_primary {
                if !self
                    .platform
                    .vm_equals(Some(old), resolution.primary_vm.as_ref())
                {
                    let old_health = self.platform.get_health_check_record(&old.vm_id).await?;
                    if old_health.map(|r| !r.healthy).unwrap_or(false) {
                        unhealthy.push(old.clone());
                    }
                }
            }
        }
        if !record.healthy && !unhealthy.iter().any(|vm| vm.vm_id == target.vm_id) {
            unhealthy.push(target.clone());
        }

        if !unhealthy.is_empty() {
            UnhealthyVmHandler::new(self.platform.clone(), settings.clone())
                .handle_all(&unhealthy)
                .await;
        }

        // Unhealthy members are not told about primary changes.
        if !record.healthy {
            return Ok(HeartbeatResponse {
                vm_id: target.vm_id,
                result: outcome.result,
                primary_ip: record.primary_ip,
                interval_ms: record.heartbeat_interval,
            });
        }

        let mut reported_primary_ip = record.primary_ip.clone();
        if let (Some(primary), Some(primary_record)) =
            (&resolution.primary_vm, &resolution.primary_record)
        {
            let ip_changed = record.primary_ip.as_deref() != Some(primary_record.ip.as_str());
            if resolution.newly_elected || ip_changed {
                let primary_healthy = if resolution.newly_elected {
                    true
                } else {
                    self.platform
                        .get_health_check_record(&primary.vm_id)
                        .await?
                        .map(|r| r.healthy)
                        .unwrap_or(false)
                };
                if primary_healthy {
                    let mut updated = record.clone();
                    updated.primary_ip = Some(primary_record.ip.clone());
                    match self.platform.update_health_check_record(&updated).await {
                        Ok(()) => {
                            record = updated;
                            reported_primary_ip = Some(primary_record.ip.clone());
                        }
                        Err(e) => {
                            warn!(
                                vm_id = %target.vm_id,
                                error = %e,
                                "Primary IP assignment failed; the next heartbeat retries"
                            );
                        }
                    }
                }
            }
        }

        if resolution.newly_elected {
            if let Some(primary) = &resolution.primary_vm {
                if let Err(e) = self.platform.tag_as_primary(&primary.vm_id).await {
                    warn!(vm_id = %primary.vm_id, error = %e, "Primary tagging failed");
                }
                if let Err(e) = self.platform.update_egress_route(primary).await {
                    error!(vm_id = %primary.vm_id, error = %e, "Egress route update failed");
                }
            }
        }

        Ok(HeartbeatResponse {
            vm_id: target.vm_id,
            result: outcome.result,
            primary_ip: reported_primary_ip,
            interval_ms: record.heartbeat_interval,
        })
    }

    /// Advance the primary election state machine for one heartbeat
    ///
    /// Dispatches on the stored vote state, with a Pending record past its
    /// voting window read as Timeout.
    async fn handle_primary_election(
        &self,
        target: &VirtualMachine,
        target_record: &HealthCheckRecord,
        candidate_health_check: Option<&HealthCheckRecord>,
        primary_vm: Option<VirtualMachine>,
        primary_record: Option<PrimaryRecord>,
        settings: &RuntimeSettings,
        now: u64,
    ) -> Result<ElectionResolution, FleetError> {
        let Some(stored) = primary_record else {
            return self
                .run_election(target, candidate_health_check, None, None, settings)
                .await;
        };

        let Some(primary) = primary_vm else {
            // The record points at a VM the scaling group no longer knows;
            // the stored record is still the expected value to replace.
            return self
                .run_election(target, candidate_health_check, None, Some(stored), settings)
                .await;
        };

        match stored.effective_vote_state(now) {
            VoteState::Pending => {
                let target_is_pending_primary =
                    self.platform.vm_equals(Some(&primary), Some(target));
                if target_is_pending_primary
                    && target_record.healthy
                    && target_record.sync_state == SyncState::InSync
                {
                    let mut promoted = stored.clone();
                    promoted.vote_state = VoteState::Done;
                    match self.platform.update_primary_record(&promoted).await {
                        Ok(()) => {
                            info!(vm_id = %primary.vm_id, "Pending primary confirmed");
                            Ok(ElectionResolution {
                                primary_vm: Some(primary),
                                primary_record: Some(promoted),
                                newly_elected: true,
                                old_primary: None,
                            })
                        }
                        Err(e) => {
                            // Leave it pending; a later heartbeat confirms it.
                            warn!(
                                vm_id = %primary.vm_id,
                                error = %e,
                                "Pending primary confirmation write failed"
                            );
                            Ok(ElectionResolution::unchanged(
                                Some(primary),
                                Some(stored),
                            ))
                        }
                    }
                } else {
                    Ok(ElectionResolution::unchanged(Some(primary), Some(stored)))
                }
            }
            VoteState::Timeout => {
                // An expired vote is treated as if no primary ever existed.
                info!(
                    vm_id = %stored.vm_id,
                    "Pending primary vote expired, re-running election"
                );
                self.run_election(target, candidate_health_check, None, Some(stored), settings)
                    .await
            }
            VoteState::Done => {
                let primary_health = self
                    .platform
                    .get_health_check_record(&primary.vm_id)
                    .await?;
                let primary_unhealthy = primary_health.map(|r| !r.healthy).unwrap_or(false);
                let target_is_primary = self.platform.vm_equals(Some(&primary), Some(target));

                // A primary never demotes itself while its own
                // unhealthiness is being evaluated.
                if primary_unhealthy && !target_is_primary {
                    self.run_election(
                        target,
                        candidate_health_check,
                        Some(primary),
                        Some(stored),
                        settings,
                    )
                    .await
                } else {
                    Ok(ElectionResolution::unchanged(Some(primary), Some(stored)))
                }
            }
        }
    }

    /// Run the configured election strategy for this invocation
    ///
    /// `candidate_health_check` is the candidate's committed record; a
    /// bootstrapping candidate has none and is elected provisionally.
    async fn run_election(
        &self,
        target: &VirtualMachine,
        candidate_health_check: Option<&HealthCheckRecord>,
        old_primary: Option<VirtualMachine>,
        old_primary_record: Option<PrimaryRecord>,
        settings: &RuntimeSettings,
    ) -> Result<ElectionResolution, FleetError> {
        let mut election =
            PrimaryElection::new(target.clone(), settings.election_duration_secs);
        election.candidate_health_check = candidate_health_check.cloned();
        election.old_primary = old_primary;
        election.old_primary_record = old_primary_record;

        let mut strategy = self.make_strategy(settings);
        strategy.prepare(election);

        match strategy.apply().await? {
            ElectionOutcome::ShouldStop => Err(FleetError::Election(
                "no primary recoverable after a conditional-create conflict".to_string(),
            )),
            ElectionOutcome::ShouldContinue => {
                let result = strategy.result().ok_or_else(|| {
                    FleetError::Election("election finished without a result".to_string())
                })?;
                Ok(ElectionResolution {
                    primary_vm: result.new_primary,
                    primary_record: result.new_primary_record,
                    newly_elected: result.elected_here,
                    old_primary: result.old_primary,
                })
            }
        }
    }

    fn make_strategy(&self, settings: &RuntimeSettings) -> Box<dyn PrimaryElectionStrategy> {
        match self.config.election.strategy {
            ElectionStrategyKind::PreferredGroup => Box::new(PreferredGroupElection::new(
                self.platform.clone(),
                settings.clone(),
            )),
            ElectionStrategyKind::WeightedScore => Box::new(WeightedScoreElection::new(
                self.platform.clone(),
                settings.clone(),
            )),
        }
    }

    /// One-time hook after a VM's first successful heartbeat
    async fn on_vm_fully_configured(&self, vm: &VirtualMachine) {
        info!(vm_id = %vm.vm_id, "VM completed bootstrap and joined the fleet");
        let message = format!(
            "VM {} ({}) sent its first heartbeat and is fully configured.",
            vm.vm_id, vm.primary_private_ip
        );
        if let Err(e) = self.platform.notify(vm, "VM fully configured", &message).await {
            warn!(vm_id = %vm.vm_id, error = %e, "Bootstrap notification failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::InMemoryPlatform;

    const GROUP: &str = "fw-primary-group";

    fn coordinator(platform: Arc<InMemoryPlatform>) -> AutoscaleCoordinator {
        let config = CoordinatorConfig::default();
        AutoscaleCoordinator::new(config, platform)
    }

    async fn fleet() -> (Arc<InMemoryPlatform>, AutoscaleCoordinator) {
        let platform = Arc::new(InMemoryPlatform::new());
        platform.insert_running_vm("vm-1", GROUP, "10.0.1.1").await;
        platform.insert_running_vm("vm-2", GROUP, "10.0.1.2").await;
        let coordinator = coordinator(platform.clone());
        (platform, coordinator)
    }

    fn heartbeat(vm_id: &str) -> HeartbeatRequest {
        HeartbeatRequest {
            vm_id: vm_id.to_string(),
            interval_ms: Some(30_000),
        }
    }

    async fn establish_primary(coordinator: &AutoscaleCoordinator, vm_id: &str) {
        // The first heartbeat opens the voting window, the second confirms it
        coordinator
            .handle_heartbeat_sync(heartbeat(vm_id))
            .await
            .unwrap();
        coordinator
            .handle_heartbeat_sync(heartbeat(vm_id))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unknown_vm_fails_the_request() {
        let (_platform, coordinator) = fleet().await;
        let result = coordinator
            .handle_heartbeat_sync(heartbeat("vm-missing"))
            .await;
        assert!(matches!(result, Err(FleetError::UnknownVm(_))));
    }

    #[tokio::test]
    async fn test_first_heartbeat_opens_voting_window() {
        let (platform, coordinator) = fleet().await;

        let response = coordinator
            .handle_heartbeat_sync(heartbeat("vm-1"))
            .await
            .unwrap();

        assert_eq!(response.result, HealthCheckResult::OnTime);
        assert_eq!(response.interval_ms, 30_000);

        // A bootstrapping candidate is elected provisionally, never Done in
        // a single pass
        let primary = platform.get_primary_record().await.unwrap().unwrap();
        assert_eq!(primary.vm_id, "vm-1");
        assert_eq!(primary.vote_state, VoteState::Pending);
        assert!(primary.vote_end_time > current_timestamp());
    }

    #[tokio::test]
    async fn test_second_heartbeat_confirms_bootstrap_primary() {
        let (platform, coordinator) = fleet().await;

        coordinator
            .handle_heartbeat_sync(heartbeat("vm-1"))
            .await
            .unwrap();
        let pending = platform.get_primary_record().await.unwrap().unwrap();
        assert_eq!(pending.vote_state, VoteState::Pending);

        let response = coordinator
            .handle_heartbeat_sync(heartbeat("vm-1"))
            .await
            .unwrap();
        assert_eq!(response.primary_ip.as_deref(), Some("10.0.1.1"));

        // The pending record was confirmed in place, not re-created
        let promoted = platform.get_primary_record().await.unwrap().unwrap();
        assert_eq!(promoted.vote_state, VoteState::Done);
        assert_eq!(promoted.id, pending.id);

        assert!(platform.primary_tags().await.contains(&"vm-1".to_string()));
        assert_eq!(
            platform.egress_routes().await.last().map(String::as_str),
            Some("10.0.1.1")
        );
    }

    #[tokio::test]
    async fn test_second_vm_learns_the_primary_ip() {
        let (platform, coordinator) = fleet().await;

        establish_primary(&coordinator, "vm-1").await;
        let tags_before = platform.primary_tags().await.len();

        let response = coordinator
            .handle_heartbeat_sync(heartbeat("vm-2"))
            .await
            .unwrap();

        assert_eq!(response.primary_ip.as_deref(), Some("10.0.1.1"));
        let record = platform
            .get_health_check_record("vm-2")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.primary_ip.as_deref(), Some("10.0.1.1"));

        // No second election took place
        assert_eq!(platform.primary_tags().await.len(), tags_before);
    }

    #[tokio::test]
    async fn test_pending_primary_left_alone_by_other_members() {
        let (platform, coordinator) = fleet().await;

        coordinator
            .handle_heartbeat_sync(heartbeat("vm-1"))
            .await
            .unwrap();
        coordinator
            .handle_heartbeat_sync(heartbeat("vm-2"))
            .await
            .unwrap();

        // Only the pending primary's own heartbeat may confirm the vote
        let stored = platform.get_primary_record().await.unwrap().unwrap();
        assert_eq!(stored.vote_state, VoteState::Pending);
        assert_eq!(stored.vm_id, "vm-1");
    }

    #[tokio::test]
    async fn test_expired_pending_vote_triggers_reelection() {
        let (platform, coordinator) = fleet().await;

        // vm-1 holds the pending slot; vm-2 is an in-service member
        coordinator
            .handle_heartbeat_sync(heartbeat("vm-1"))
            .await
            .unwrap();
        coordinator
            .handle_heartbeat_sync(heartbeat("vm-2"))
            .await
            .unwrap();

        let mut expired = platform.get_primary_record().await.unwrap().unwrap();
        assert_eq!(expired.vote_state, VoteState::Pending);
        expired.vote_end_time = current_timestamp().saturating_sub(1_000);
        platform.put_primary_record(Some(expired)).await;

        let response = coordinator
            .handle_heartbeat_sync(heartbeat("vm-2"))
            .await
            .unwrap();

        let stored = platform.get_primary_record().await.unwrap().unwrap();
        assert_eq!(stored.vm_id, "vm-2");
        assert_eq!(stored.vote_state, VoteState::Done);
        assert_eq!(response.primary_ip.as_deref(), Some("10.0.1.2"));
    }

    #[tokio::test]
    async fn test_unhealthy_primary_replaced_by_peer_heartbeat() {
        let (platform, coordinator) = fleet().await;

        establish_primary(&coordinator, "vm-1").await;
        coordinator
            .handle_heartbeat_sync(heartbeat("vm-2"))
            .await
            .unwrap();

        // The primary goes out of sync
        let mut record = platform
            .get_health_check_record("vm-1")
            .await
            .unwrap()
            .unwrap();
        record.sync_state = SyncState::OutOfSync;
        record.healthy = false;
        record.sync_recovery_count = 3;
        platform.put_health_check_record(record).await;

        let response = coordinator
            .handle_heartbeat_sync(heartbeat("vm-2"))
            .await
            .unwrap();

        let stored = platform.get_primary_record().await.unwrap().unwrap();
        assert_eq!(stored.vm_id, "vm-2");
        assert_eq!(response.primary_ip.as_deref(), Some("10.0.1.2"));

        // The displaced unhealthy primary was reported to the fleet policy
        let notified: Vec<_> = platform
            .notifications()
            .await
            .into_iter()
            .filter(|n| n.subject == "Unhealthy VM excluded from election")
            .collect();
        assert_eq!(notified.len(), 1);
        assert_eq!(notified[0].vm_id, "vm-1");
    }

    #[tokio::test]
    async fn test_primary_does_not_demote_itself() {
        let (platform, coordinator) = fleet().await;

        establish_primary(&coordinator, "vm-1").await;

        // The primary itself goes out of sync; its own heartbeat must not
        // re-run the election.
        let mut record = platform
            .get_health_check_record("vm-1")
            .await
            .unwrap()
            .unwrap();
        record.sync_state = SyncState::OutOfSync;
        record.healthy = false;
        record.sync_recovery_count = 3;
        platform.put_health_check_record(record).await;

        let response = coordinator
            .handle_heartbeat_sync(heartbeat("vm-1"))
            .await
            .unwrap();
        assert_eq!(response.result, HealthCheckResult::Dropped);

        let stored = platform.get_primary_record().await.unwrap().unwrap();
        assert_eq!(stored.vm_id, "vm-1");
    }

    #[tokio::test]
    async fn test_too_late_heartbeat_excludes_target_without_ip_write() {
        let (platform, coordinator) = fleet().await;

        establish_primary(&coordinator, "vm-1").await;
        coordinator
            .handle_heartbeat_sync(heartbeat("vm-2"))
            .await
            .unwrap();

        // vm-2 one loss below the limit, then a very late heartbeat
        let mut record = platform
            .get_health_check_record("vm-2")
            .await
            .unwrap()
            .unwrap();
        record.heartbeat_loss_count = 2;
        record.next_heartbeat_time = current_timestamp().saturating_sub(60_000);
        platform.put_health_check_record(record).await;

        let response = coordinator
            .handle_heartbeat_sync(heartbeat("vm-2"))
            .await
            .unwrap();
        assert_eq!(response.result, HealthCheckResult::TooLate);

        let stored = platform
            .get_health_check_record("vm-2")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.sync_state, SyncState::OutOfSync);

        // Excluded members get the policy notification and no primary-IP
        // refresh
        let subjects: Vec<_> = platform
            .notifications()
            .await
            .into_iter()
            .filter(|n| n.vm_id == "vm-2")
            .map(|n| n.subject)
            .collect();
        assert!(subjects.contains(&"Unhealthy VM excluded from election".to_string()));
    }

    #[tokio::test]
    async fn test_terminate_policy_removes_unhealthy_member() {
        let platform = Arc::new(InMemoryPlatform::new());
        platform.insert_running_vm("vm-1", GROUP, "10.0.1.1").await;
        platform.insert_running_vm("vm-2", GROUP, "10.0.1.2").await;
        let mut config = CoordinatorConfig::default();
        config.fleet.terminate_unhealthy_vm = true;
        let coordinator = AutoscaleCoordinator::new(config, platform.clone());

        establish_primary(&coordinator, "vm-1").await;
        coordinator
            .handle_heartbeat_sync(heartbeat("vm-2"))
            .await
            .unwrap();

        let mut record = platform
            .get_health_check_record("vm-2")
            .await
            .unwrap()
            .unwrap();
        record.heartbeat_loss_count = 2;
        record.next_heartbeat_time = current_timestamp().saturating_sub(60_000);
        platform.put_health_check_record(record).await;

        coordinator
            .handle_heartbeat_sync(heartbeat("vm-2"))
            .await
            .unwrap();

        assert_eq!(platform.deleted_vms().await, vec!["vm-2".to_string()]);
    }

    #[tokio::test]
    async fn test_dropped_heartbeat_short_circuits() {
        let (platform, coordinator) = fleet().await;

        establish_primary(&coordinator, "vm-1").await;
        let routes_before = platform.egress_routes().await.len();

        platform.set_fail_record_update(true);
        let response = coordinator
            .handle_heartbeat_sync(heartbeat("vm-1"))
            .await
            .unwrap();
        platform.set_fail_record_update(false);

        assert_eq!(response.result, HealthCheckResult::Dropped);
        // The committed record was reported, not the stale in-memory one
        let stored = platform
            .get_health_check_record("vm-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.primary_ip, stored.primary_ip);
        // No election side effects ran
        assert_eq!(platform.egress_routes().await.len(), routes_before);
    }

    #[tokio::test]
    async fn test_out_of_group_member_cannot_take_the_slot() {
        let (platform, coordinator) = fleet().await;
        platform
            .insert_running_vm("vm-edge", "fw-standby-group", "10.0.2.1")
            .await;

        let response = coordinator
            .handle_heartbeat_sync(heartbeat("vm-edge"))
            .await
            .unwrap();

        assert_eq!(response.result, HealthCheckResult::OnTime);
        assert!(response.primary_ip.is_none());
        assert!(platform.get_primary_record().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_late_heartbeat_emits_diagnostic_notification() {
        let (platform, coordinator) = fleet().await;

        coordinator
            .handle_heartbeat_sync(heartbeat("vm-1"))
            .await
            .unwrap();
        let mut record = platform
            .get_health_check_record("vm-1")
            .await
            .unwrap()
            .unwrap();
        record.next_heartbeat_time = current_timestamp().saturating_sub(10_000);
        platform.put_health_check_record(record).await;

        let response = coordinator
            .handle_heartbeat_sync(heartbeat("vm-1"))
            .await
            .unwrap();
        assert_eq!(response.result, HealthCheckResult::Late);

        let subjects: Vec<_> = platform
            .notifications()
            .await
            .into_iter()
            .map(|n| n.subject)
            .collect();
        assert!(subjects.contains(&"Late heartbeat".to_string()));
    }
}
