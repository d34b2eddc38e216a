//! Heartbeat health-check engine
//!
//! Converts one inbound heartbeat into an updated health-check record:
//! timing against the expected arrival, loss counting, the
//! in-sync/out-of-sync transition and the recovery countdown.

use crate::config::RuntimeSettings;
use crate::error::FleetError;
use crate::platform::Platform;
use crate::types::{
    HealthCheckRecord, HealthCheckResult, HealthCheckResultDetail, SyncState, VirtualMachine,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Re-read attempts confirming a forced out-of-sync transition
const FORCE_CONFIRM_ATTEMPTS: u32 = 3;

/// Pause between confirmation re-reads
const FORCE_CONFIRM_INTERVAL: Duration = Duration::from_millis(500);

/// Outcome of one heartbeat evaluation
#[derive(Debug, Clone)]
pub struct HeartbeatOutcome {
    /// The record as this evaluation left it; check `up_to_date` before
    /// trusting it over the store
    pub record: HealthCheckRecord,

    /// Evaluation result
    pub result: HealthCheckResult,

    /// True when this was the VM's first heartbeat
    pub first_heartbeat: bool,

    /// Diagnostic detail for notifications
    pub detail: HealthCheckResultDetail,
}

/// Per-invocation heartbeat evaluator
pub struct HeartbeatChecker {
    platform: Arc<dyn Platform>,
    settings: RuntimeSettings,
}

impl HeartbeatChecker {
    /// Create a checker bound to one invocation's settings snapshot
    pub fn new(platform: Arc<dyn Platform>, settings: RuntimeSettings) -> Self {
        Self { platform, settings }
    }

    /// Evaluate one heartbeat from `target`
    ///
    /// `arrive_time` must be the invocation's start timestamp, captured once
    /// at entry, not the wall clock at comparison time.
    pub async fn apply(
        &self,
        target: &VirtualMachine,
        interval_ms: u64,
        arrive_time: u64,
    ) -> Result<HeartbeatOutcome, FleetError> {
        let existing = self
            .platform
            .get_health_check_record(&target.vm_id)
            .await?;

        match existing {
            None => self.apply_first(target, interval_ms, arrive_time).await,
            Some(old) => {
                self.apply_subsequent(target, old, interval_ms, arrive_time)
                    .await
            }
        }
    }

    /// First heartbeat from a VM: create its record
    async fn apply_first(
        &self,
        target: &VirtualMachine,
        interval_ms: u64,
        arrive_time: u64,
    ) -> Result<HeartbeatOutcome, FleetError> {
        let mut record = HealthCheckRecord {
            vm_id: target.vm_id.clone(),
            scaling_group_name: target.scaling_group_name.clone(),
            ip: target.primary_private_ip.clone(),
            primary_ip: None,
            heartbeat_interval: interval_ms,
            heartbeat_loss_count: 0,
            next_heartbeat_time: arrive_time + interval_ms,
            sync_state: SyncState::InSync,
            sync_recovery_count: 0,
            seq: 1,
            healthy: true,
            up_to_date: true,
        };

        let mut result = HealthCheckResult::OnTime;
        if let Err(e) = self.platform.create_health_check_record(&record).await {
            warn!(
                vm_id = %target.vm_id,
                error = %e,
                "First heartbeat record create failed, dropping heartbeat"
            );
            record.up_to_date = false;
            result = HealthCheckResult::Dropped;
        } else {
            info!(vm_id = %target.vm_id, "First heartbeat received");
        }

        let detail = HealthCheckResultDetail {
            seq: record.seq,
            expected_arrive_time: arrive_time,
            actual_arrive_time: arrive_time,
            old_interval_ms: interval_ms,
            new_interval_ms: interval_ms,
            old_loss_count: 0,
            new_loss_count: 0,
            delay_allowance_ms: self.settings.delay_allowance_ms,
            calculated_delay_ms: 0,
            sync_recovery_count: 0,
        };

        Ok(HeartbeatOutcome {
            record,
            result,
            first_heartbeat: true,
            detail,
        })
    }

    /// Subsequent heartbeat: evaluate timing and advance the record
    async fn apply_subsequent(
        &self,
        target: &VirtualMachine,
        old: HealthCheckRecord,
        interval_ms: u64,
        arrive_time: u64,
    ) -> Result<HeartbeatOutcome, FleetError> {
        let delay = arrive_time as i64
            - old.next_heartbeat_time as i64
            - self.settings.delay_allowance_ms as i64;
        let late = delay >= 0;

        let mut record = old.clone();
        let mut result;

        match old.sync_state {
            SyncState::OutOfSync => {
                // Already excluded from election; the heartbeat itself is
                // not counted.
                result = HealthCheckResult::Dropped;

                if !self.settings.terminate_unhealthy_vm {
                    if late {
                        record.sync_recovery_count = self.settings.sync_recovery_count;
                        debug!(
                            vm_id = %target.vm_id,
                            "Late heartbeat while out of sync, recovery countdown reset"
                        );
                    } else {
                        record.sync_recovery_count = old.sync_recovery_count.saturating_sub(1);
                        if record.sync_recovery_count == 0 {
                            record.heartbeat_loss_count = 0;
                            record.sync_state = SyncState::InSync;
                            record.healthy = true;
                            result = HealthCheckResult::OnTime;
                            info!(vm_id = %target.vm_id, "VM recovered, back in sync");
                        }
                    }
                }
            }
            SyncState::InSync => {
                if late {
                    record.heartbeat_loss_count = old.heartbeat_loss_count + 1;
                    if record.heartbeat_loss_count >= self.settings.max_loss_count {
                        record.sync_state = SyncState::OutOfSync;
                        record.healthy = false;
                        record.sync_recovery_count = self.settings.sync_recovery_count;
                        result = HealthCheckResult::TooLate;
                        warn!(
                            vm_id = %target.vm_id,
                            loss_count = record.heartbeat_loss_count,
                            "Heartbeat loss limit reached, VM out of sync"
                        );
                    } else {
                        result = HealthCheckResult::Late;
                        debug!(
                            vm_id = %target.vm_id,
                            loss_count = record.heartbeat_loss_count,
                            delay_ms = delay,
                            "Late heartbeat"
                        );
                    }
                } else {
                    record.heartbeat_loss_count = 0;
                    record.healthy = true;
                    result = HealthCheckResult::OnTime;
                }
            }
        }

        record.seq = old.seq + 1;
        record.heartbeat_interval = interval_ms;
        record.next_heartbeat_time = arrive_time + interval_ms;
        record.up_to_date = true;

        if let Err(e) = self.platform.update_health_check_record(&record).await {
            warn!(
                vm_id = %target.vm_id,
                error = %e,
                "Health-check record update failed, dropping heartbeat"
            );
            record.up_to_date = false;
            result = HealthCheckResult::Dropped;
        }

        let detail = HealthCheckResultDetail {
            seq: record.seq,
            expected_arrive_time: old.next_heartbeat_time + self.settings.delay_allowance_ms,
            actual_arrive_time: arrive_time,
            old_interval_ms: old.heartbeat_interval,
            new_interval_ms: interval_ms,
            old_loss_count: old.heartbeat_loss_count,
            new_loss_count: record.heartbeat_loss_count,
            delay_allowance_ms: self.settings.delay_allowance_ms,
            calculated_delay_ms: delay,
            sync_recovery_count: record.sync_recovery_count,
        };

        Ok(HeartbeatOutcome {
            record,
            result,
            first_heartbeat: false,
            detail,
        })
    }

    /// Force a VM out of sync so it is excluded from future elections
    ///
    /// Idempotent: a VM already out of sync is left untouched. The written
    /// transition is confirmed by bounded re-reads; returns false on
    /// exhaustion or any store error.
    pub async fn force_out_of_sync(&self, vm: &VirtualMachine) -> bool {
        let record = match self.platform.get_health_check_record(&vm.vm_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!(vm_id = %vm.vm_id, "No health-check record to force out of sync");
                return false;
            }
            Err(e) => {
                warn!(vm_id = %vm.vm_id, error = %e, "Health-check record read failed");
                return false;
            }
        };

        if record.sync_state == SyncState::OutOfSync {
            return true;
        }

        let mut updated = record;
        updated.sync_state = SyncState::OutOfSync;
        updated.healthy = false;
        updated.sync_recovery_count = self.settings.sync_recovery_count;
        if let Err(e) = self.platform.update_health_check_record(&updated).await {
            warn!(vm_id = %vm.vm_id, error = %e, "Forced out-of-sync write failed");
            return false;
        }

        for attempt in 1..=FORCE_CONFIRM_ATTEMPTS {
            match self.platform.get_health_check_record(&vm.vm_id).await {
                Ok(Some(current)) if current.sync_state == SyncState::OutOfSync => {
                    info!(vm_id = %vm.vm_id, "VM forced out of sync");
                    return true;
                }
                Ok(_) => {
                    debug!(
                        vm_id = %vm.vm_id,
                        attempt,
                        "Forced out-of-sync transition not visible yet"
                    );
                }
                Err(e) => {
                    warn!(vm_id = %vm.vm_id, error = %e, "Confirmation read failed");
                    return false;
                }
            }
            if attempt < FORCE_CONFIRM_ATTEMPTS {
                tokio::time::sleep(FORCE_CONFIRM_INTERVAL).await;
            }
        }

        warn!(
            vm_id = %vm.vm_id,
            attempts = FORCE_CONFIRM_ATTEMPTS,
            "Forced out-of-sync transition never confirmed"
        );
        false
    }
}
