//! Primary election strategies
//!
//! A strategy decides whether a candidate becomes the fleet's primary and
//! persists the winning record. The only cross-invocation synchronization is
//! the store's conditional create; concurrent invocations racing for the
//! primary slot are reconciled by adopting whichever record won.

use crate::config::RuntimeSettings;
use crate::error::FleetError;
use crate::platform::{ConditionalCreateOutcome, Platform};
use crate::types::{current_timestamp, PrimaryElection, PrimaryRecord, VoteState};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Whether the coordinator can proceed after an election pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionOutcome {
    /// A definitive result was established, possibly "no new primary"
    ShouldContinue,
    /// Unrecoverable store inconsistency; fail the invocation
    ShouldStop,
}

/// Contract for a primary election strategy
///
/// One instance serves one coordinator invocation; `prepare` must be called
/// before `apply`.
#[async_trait]
pub trait PrimaryElectionStrategy: Send + Sync {
    /// Load the election context for this invocation
    fn prepare(&mut self, election: PrimaryElection);

    /// Run the election against the record store
    async fn apply(&mut self) -> Result<ElectionOutcome, FleetError>;

    /// The election context with its result filled in
    fn result(&self) -> Option<PrimaryElection>;
}

/// Build the candidate's primary record for an election
///
/// A candidate that already holds a healthy health-check record is an
/// in-service member, so its election is decided immediately; anything else
/// gets a provisional record with a voting window.
fn build_candidate_record(election: &PrimaryElection, now: u64) -> PrimaryRecord {
    let candidate_healthy = election
        .candidate_health_check
        .as_ref()
        .map(|record| record.healthy)
        .unwrap_or(false);

    let (vote_state, vote_end_time) = if candidate_healthy {
        (VoteState::Done, now)
    } else {
        (
            VoteState::Pending,
            now + election.election_duration * 1_000,
        )
    };

    PrimaryRecord {
        id: PrimaryRecord::election_id(
            &election.candidate.scaling_group_name,
            &election.candidate.vm_id,
        ),
        vm_id: election.candidate.vm_id.clone(),
        ip: election.candidate.primary_private_ip.clone(),
        scaling_group_name: election.candidate.scaling_group_name.clone(),
        virtual_network_id: election.candidate.virtual_network_id.clone(),
        subnet_id: election.candidate.subnet_id.clone(),
        vote_end_time,
        vote_state,
    }
}

/// Commit a candidate record through the store's conditional create,
/// adopting the winner on conflict
async fn commit_record(
    platform: &Arc<dyn Platform>,
    election: &mut PrimaryElection,
    record: PrimaryRecord,
) -> Result<ElectionOutcome, FleetError> {
    let outcome = platform
        .create_primary_record(&record, election.old_primary_record.as_ref())
        .await?;

    match outcome {
        ConditionalCreateOutcome::Created => {
            info!(
                vm_id = %record.vm_id,
                vote_state = ?record.vote_state,
                signature = %election.signature,
                "Primary record created"
            );
            election.new_primary = Some(election.candidate.clone());
            election.new_primary_record = Some(record);
            election.elected_here = true;
            Ok(ElectionOutcome::ShouldContinue)
        }
        ConditionalCreateOutcome::Conflict => {
            // Another invocation's create won; adopt its record instead of
            // reporting this candidate as primary.
            let current_record = platform.get_primary_record().await?;
            let current_vm = platform.get_primary_vm().await?;

            if current_record.is_none() && current_vm.is_none() {
                warn!(
                    signature = %election.signature,
                    "Conditional create conflicted but no primary is recoverable"
                );
                return Ok(ElectionOutcome::ShouldStop);
            }

            info!(
                winner = ?current_record.as_ref().map(|r| r.vm_id.clone()),
                signature = %election.signature,
                "Adopting the primary that won the race"
            );
            election.new_primary = current_vm;
            election.new_primary_record = current_record;
            Ok(ElectionOutcome::ShouldContinue)
        }
    }
}

/// First-successful-write election restricted to the preferred scaling group
pub struct PreferredGroupElection {
    platform: Arc<dyn Platform>,
    settings: RuntimeSettings,
    election: Option<PrimaryElection>,
}

impl PreferredGroupElection {
    /// Create a strategy bound to one invocation's settings snapshot
    pub fn new(platform: Arc<dyn Platform>, settings: RuntimeSettings) -> Self {
        Self {
            platform,
            settings,
            election: None,
        }
    }
}

#[async_trait]
impl PrimaryElectionStrategy for PreferredGroupElection {
    fn prepare(&mut self, election: PrimaryElection) {
        self.election = Some(election);
    }

    async fn apply(&mut self) -> Result<ElectionOutcome, FleetError> {
        let mut election = self
            .election
            .take()
            .ok_or_else(|| FleetError::Election("apply called before prepare".to_string()))?;

        // A candidate outside the preferred group can never become primary.
        if election.candidate.scaling_group_name != self.settings.preferred_scaling_group {
            info!(
                vm_id = %election.candidate.vm_id,
                scaling_group = %election.candidate.scaling_group_name,
                "Candidate is outside the preferred scaling group"
            );
            self.election = Some(election);
            return Ok(ElectionOutcome::ShouldContinue);
        }

        let record = build_candidate_record(&election, current_timestamp());
        let outcome = commit_record(&self.platform, &mut election, record).await?;
        self.election = Some(election);
        Ok(outcome)
    }

    fn result(&self) -> Option<PrimaryElection> {
        self.election.clone()
    }
}

/// Deterministic ranking election
///
/// Ranks all in-sync, healthy members of the preferred group by cadence
/// freshness, loss count and incumbency, then commits the best through the
/// same conditional create as the first-write strategy, so the single-winner
/// guarantee stays store-enforced.
pub struct WeightedScoreElection {
    platform: Arc<dyn Platform>,
    settings: RuntimeSettings,
    election: Option<PrimaryElection>,
}

impl WeightedScoreElection {
    /// Create a strategy bound to one invocation's settings snapshot
    pub fn new(platform: Arc<dyn Platform>, settings: RuntimeSettings) -> Self {
        Self {
            platform,
            settings,
            election: None,
        }
    }
}

#[async_trait]
impl PrimaryElectionStrategy for WeightedScoreElection {
    fn prepare(&mut self, election: PrimaryElection) {
        self.election = Some(election);
    }

    async fn apply(&mut self) -> Result<ElectionOutcome, FleetError> {
        let mut election = self
            .election
            .take()
            .ok_or_else(|| FleetError::Election("apply called before prepare".to_string()))?;

        let mut ranked: Vec<_> = self
            .platform
            .list_health_check_records()
            .await?
            .into_iter()
            .filter(|record| {
                record.healthy && record.scaling_group_name == self.settings.preferred_scaling_group
            })
            .collect();

        let incumbent = election
            .old_primary_record
            .as_ref()
            .map(|record| record.vm_id.clone());
        ranked.sort_by(|a, b| {
            let a_incumbent = Some(&a.vm_id) == incumbent.as_ref();
            let b_incumbent = Some(&b.vm_id) == incumbent.as_ref();
            b_incumbent
                .cmp(&a_incumbent)
                .then(a.heartbeat_loss_count.cmp(&b.heartbeat_loss_count))
                .then(b.next_heartbeat_time.cmp(&a.next_heartbeat_time))
                .then(a.vm_id.cmp(&b.vm_id))
        });

        let winner_vm = match ranked.first() {
            Some(best) => self.platform.get_target_vm(&best.vm_id).await?,
            None => None,
        };

        let (winner, winner_health) = match (winner_vm, ranked.into_iter().next()) {
            (Some(vm), Some(health)) => (vm, Some(health)),
            _ => {
                // No rankable member; fall back to nominating the candidate
                // itself, provisionally, if it is in the preferred group.
                if election.candidate.scaling_group_name != self.settings.preferred_scaling_group {
                    info!(
                        vm_id = %election.candidate.vm_id,
                        "No rankable member and the candidate is outside the preferred group"
                    );
                    self.election = Some(election);
                    return Ok(ElectionOutcome::ShouldContinue);
                }
                let record = build_candidate_record(&election, current_timestamp());
                let outcome = commit_record(&self.platform, &mut election, record).await?;
                self.election = Some(election);
                return Ok(outcome);
            }
        };

        // Nominate the ranked winner in place of the original candidate.
        election.candidate = winner;
        election.candidate_health_check = winner_health;
        let record = build_candidate_record(&election, current_timestamp());
        let outcome = commit_record(&self.platform, &mut election, record).await?;
        self.election = Some(election);
        Ok(outcome)
    }

    fn result(&self) -> Option<PrimaryElection> {
        self.election.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoordinatorConfig;
    use crate::platform::InMemoryPlatform;
    use crate::types::{HealthCheckRecord, SyncState, VirtualMachine};

    fn settings() -> RuntimeSettings {
        RuntimeSettings::from(&CoordinatorConfig::default())
    }

    fn healthy_record(vm_id: &str, scaling_group: &str) -> HealthCheckRecord {
        HealthCheckRecord {
            vm_id: vm_id.to_string(),
            scaling_group_name: scaling_group.to_string(),
            ip: "10.0.0.1".to_string(),
            primary_ip: None,
            heartbeat_interval: 30_000,
            heartbeat_loss_count: 0,
            next_heartbeat_time: current_timestamp() + 30_000,
            sync_state: SyncState::InSync,
            sync_recovery_count: 0,
            seq: 5,
            healthy: true,
            up_to_date: true,
        }
    }

    async fn fleet_vm(platform: &InMemoryPlatform, vm_id: &str, group: &str) -> VirtualMachine {
        platform.insert_running_vm(vm_id, group, "10.0.0.9").await;
        platform.get_target_vm(vm_id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_healthy_candidate_elected_done_in_one_pass() {
        let platform = Arc::new(InMemoryPlatform::new());
        let candidate = fleet_vm(&platform, "vm-1", "fw-primary-group").await;

        let mut election = PrimaryElection::new(candidate.clone(), 120);
        election.candidate_health_check = Some(healthy_record("vm-1", "fw-primary-group"));

        let mut strategy = PreferredGroupElection::new(platform.clone(), settings());
        strategy.prepare(election);
        let outcome = strategy.apply().await.unwrap();
        assert_eq!(outcome, ElectionOutcome::ShouldContinue);

        let result = strategy.result().unwrap();
        assert_eq!(result.new_primary.unwrap().vm_id, "vm-1");
        assert!(result.elected_here);
        let record = result.new_primary_record.unwrap();
        assert_eq!(record.vote_state, VoteState::Done);

        let stored = platform.get_primary_record().await.unwrap().unwrap();
        assert_eq!(stored.vm_id, "vm-1");
    }

    #[tokio::test]
    async fn test_unknown_candidate_gets_pending_window() {
        let platform = Arc::new(InMemoryPlatform::new());
        let candidate = fleet_vm(&platform, "vm-1", "fw-primary-group").await;

        let before = current_timestamp();
        let mut strategy = PreferredGroupElection::new(platform.clone(), settings());
        strategy.prepare(PrimaryElection::new(candidate, 120));
        strategy.apply().await.unwrap();

        let record = strategy.result().unwrap().new_primary_record.unwrap();
        assert_eq!(record.vote_state, VoteState::Pending);
        assert!(record.vote_end_time >= before + 120_000);
    }

    #[tokio::test]
    async fn test_candidate_outside_preferred_group_rejected() {
        let platform = Arc::new(InMemoryPlatform::new());
        let candidate = fleet_vm(&platform, "vm-1", "fw-standby-group").await;

        let mut strategy = PreferredGroupElection::new(platform.clone(), settings());
        strategy.prepare(PrimaryElection::new(candidate, 120));
        let outcome = strategy.apply().await.unwrap();
        assert_eq!(outcome, ElectionOutcome::ShouldContinue);

        let result = strategy.result().unwrap();
        assert!(result.new_primary.is_none());
        assert!(result.new_primary_record.is_none());
        assert!(platform.get_primary_record().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_apply_before_prepare_is_an_error() {
        let platform: Arc<dyn Platform> = Arc::new(InMemoryPlatform::new());
        let mut strategy = PreferredGroupElection::new(platform, settings());
        assert!(strategy.apply().await.is_err());
    }

    #[tokio::test]
    async fn test_losing_candidate_adopts_winner() {
        let platform = Arc::new(InMemoryPlatform::new());
        let winner = fleet_vm(&platform, "vm-1", "fw-primary-group").await;
        let loser = fleet_vm(&platform, "vm-2", "fw-primary-group").await;

        // Both candidates observed a null prior record
        let mut first = PreferredGroupElection::new(platform.clone(), settings());
        first.prepare(PrimaryElection::new(winner, 120));
        first.apply().await.unwrap();

        let mut second = PreferredGroupElection::new(platform.clone(), settings());
        second.prepare(PrimaryElection::new(loser, 120));
        let outcome = second.apply().await.unwrap();
        assert_eq!(outcome, ElectionOutcome::ShouldContinue);

        let result = second.result().unwrap();
        assert!(!result.elected_here);
        assert_eq!(result.new_primary.unwrap().vm_id, "vm-1");
        assert_eq!(result.new_primary_record.unwrap().vm_id, "vm-1");
    }

    #[tokio::test]
    async fn test_concurrent_candidates_produce_one_winner() {
        let platform = Arc::new(InMemoryPlatform::new());
        let a = fleet_vm(&platform, "vm-a", "fw-primary-group").await;
        let b = fleet_vm(&platform, "vm-b", "fw-primary-group").await;

        let mut handles = Vec::new();
        for candidate in [a, b] {
            let platform = platform.clone();
            handles.push(tokio::spawn(async move {
                let mut strategy = PreferredGroupElection::new(
                    platform as Arc<dyn Platform>,
                    settings(),
                );
                strategy.prepare(PrimaryElection::new(candidate, 120));
                strategy.apply().await.unwrap();
                strategy.result().unwrap()
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }

        let winners: Vec<_> = results.iter().filter(|r| r.elected_here).collect();
        assert_eq!(winners.len(), 1);

        let stored = platform.get_primary_record().await.unwrap().unwrap();
        for result in &results {
            // Everyone, winner or loser, reports the same stored primary
            assert_eq!(result.new_primary_record.as_ref().unwrap().id, stored.id);
        }
    }

    #[tokio::test]
    async fn test_conflict_with_no_recoverable_primary_stops() {
        let platform = Arc::new(InMemoryPlatform::new());
        let candidate = fleet_vm(&platform, "vm-1", "fw-primary-group").await;

        // The expected prior record no longer exists in the store, and
        // nothing replaced it: the store is inconsistent.
        let phantom = PrimaryRecord {
            id: PrimaryRecord::election_id("fw-primary-group", "vm-9"),
            vm_id: "vm-9".to_string(),
            ip: "10.0.0.99".to_string(),
            scaling_group_name: "fw-primary-group".to_string(),
            virtual_network_id: "vnet-default".to_string(),
            subnet_id: "subnet-default".to_string(),
            vote_end_time: 0,
            vote_state: VoteState::Done,
        };

        let mut election = PrimaryElection::new(candidate, 120);
        election.old_primary_record = Some(phantom);

        let mut strategy = PreferredGroupElection::new(platform.clone(), settings());
        strategy.prepare(election);
        let outcome = strategy.apply().await.unwrap();
        assert_eq!(outcome, ElectionOutcome::ShouldStop);
    }

    #[tokio::test]
    async fn test_weighted_election_prefers_lowest_loss_count() {
        let platform = Arc::new(InMemoryPlatform::new());
        let candidate = fleet_vm(&platform, "vm-1", "fw-primary-group").await;
        fleet_vm(&platform, "vm-2", "fw-primary-group").await;

        let mut worse = healthy_record("vm-1", "fw-primary-group");
        worse.heartbeat_loss_count = 2;
        platform.put_health_check_record(worse).await;
        platform
            .put_health_check_record(healthy_record("vm-2", "fw-primary-group"))
            .await;

        let mut strategy = WeightedScoreElection::new(platform.clone(), settings());
        strategy.prepare(PrimaryElection::new(candidate, 120));
        strategy.apply().await.unwrap();

        let result = strategy.result().unwrap();
        assert_eq!(result.new_primary.unwrap().vm_id, "vm-2");
        assert!(result.elected_here);
    }

    #[tokio::test]
    async fn test_weighted_election_keeps_healthy_incumbent() {
        let platform = Arc::new(InMemoryPlatform::new());
        let candidate = fleet_vm(&platform, "vm-1", "fw-primary-group").await;
        let incumbent = fleet_vm(&platform, "vm-2", "fw-primary-group").await;

        platform
            .put_health_check_record(healthy_record("vm-1", "fw-primary-group"))
            .await;
        platform
            .put_health_check_record(healthy_record("vm-2", "fw-primary-group"))
            .await;

        let incumbent_record = PrimaryRecord {
            id: PrimaryRecord::election_id("fw-primary-group", &incumbent.vm_id),
            vm_id: incumbent.vm_id.clone(),
            ip: incumbent.primary_private_ip.clone(),
            scaling_group_name: incumbent.scaling_group_name.clone(),
            virtual_network_id: incumbent.virtual_network_id.clone(),
            subnet_id: incumbent.subnet_id.clone(),
            vote_end_time: 0,
            vote_state: VoteState::Done,
        };
        platform
            .put_primary_record(Some(incumbent_record.clone()))
            .await;

        let mut election = PrimaryElection::new(candidate, 120);
        election.old_primary = Some(incumbent);
        election.old_primary_record = Some(incumbent_record);

        let mut strategy = WeightedScoreElection::new(platform.clone(), settings());
        strategy.prepare(election);
        strategy.apply().await.unwrap();

        let result = strategy.result().unwrap();
        assert_eq!(result.new_primary.unwrap().vm_id, "vm-2");
    }

    #[tokio::test]
    async fn test_weighted_election_falls_back_to_provisional_candidate() {
        let platform = Arc::new(InMemoryPlatform::new());
        let candidate = fleet_vm(&platform, "vm-1", "fw-primary-group").await;

        // No health records exist yet
        let mut strategy = WeightedScoreElection::new(platform.clone(), settings());
        strategy.prepare(PrimaryElection::new(candidate, 120));
        strategy.apply().await.unwrap();

        let record = strategy.result().unwrap().new_primary_record.unwrap();
        assert_eq!(record.vm_id, "vm-1");
        assert_eq!(record.vote_state, VoteState::Pending);
    }
}
