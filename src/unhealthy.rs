//! Unhealthy-VM handling
//!
//! Decides terminate-vs-warn per fleet policy for VMs flagged unhealthy by a
//! heartbeat invocation. Each VM is handled in its own task; one VM's
//! failure never blocks the others, and deletion failures are left for a
//! later invocation to re-detect.

use crate::config::RuntimeSettings;
use crate::error::FleetError;
use crate::heartbeat::HeartbeatChecker;
use crate::platform::Platform;
use crate::types::VirtualMachine;
use std::sync::Arc;
use tracing::{info, warn};

/// Handler for VMs excluded from primary eligibility
pub struct UnhealthyVmHandler {
    platform: Arc<dyn Platform>,
    settings: RuntimeSettings,
}

impl UnhealthyVmHandler {
    /// Create a handler bound to one invocation's settings snapshot
    pub fn new(platform: Arc<dyn Platform>, settings: RuntimeSettings) -> Self {
        Self { platform, settings }
    }

    /// Handle every unhealthy VM, fanning out one task per VM and joining
    /// before returning
    pub async fn handle_all(&self, vms: &[VirtualMachine]) {
        let mut handles = Vec::with_capacity(vms.len());
        for vm in vms {
            let platform = self.platform.clone();
            let settings = self.settings.clone();
            let vm = vm.clone();
            handles.push(tokio::spawn(async move {
                if let Err(e) = handle_one(&platform, &settings, &vm).await {
                    warn!(vm_id = %vm.vm_id, error = %e, "Unhealthy-VM handling failed");
                }
            }));
        }
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Unhealthy-VM handling task panicked");
            }
        }
    }
}

async fn handle_one(
    platform: &Arc<dyn Platform>,
    settings: &RuntimeSettings,
    vm: &VirtualMachine,
) -> Result<(), FleetError> {
    if settings.terminate_unhealthy_vm {
        // Pin the record out of sync before the scaling-group delete; a
        // failed delete must not leave the VM electable.
        let checker = HeartbeatChecker::new(platform.clone(), settings.clone());
        if !checker.force_out_of_sync(vm).await {
            warn!(
                vm_id = %vm.vm_id,
                "Out-of-sync transition not confirmed before termination"
            );
        }
        match platform.delete_vm_from_scaling_group(&vm.vm_id).await {
            Ok(()) => {
                info!(vm_id = %vm.vm_id, "Unhealthy VM terminated");
                let message = format!(
                    "VM {} ({}) fell out of sync and was automatically terminated; \
                     the scaling group will replace it.",
                    vm.vm_id, vm.primary_private_ip
                );
                if let Err(e) = platform
                    .notify(vm, "Unhealthy VM terminated", &message)
                    .await
                {
                    warn!(vm_id = %vm.vm_id, error = %e, "Termination notification failed");
                }
            }
            Err(e) => {
                // No retry here; a future invocation re-detects the VM as
                // unhealthy.
                warn!(
                    vm_id = %vm.vm_id,
                    error = %e,
                    "Unhealthy VM deletion failed, leaving it in place"
                );
            }
        }
    } else {
        let recovery_count = platform
            .get_health_check_record(&vm.vm_id)
            .await
            .ok()
            .flatten()
            .map(|record| record.sync_recovery_count)
            .unwrap_or(settings.sync_recovery_count);

        let message = format!(
            "VM {} ({}) is out of sync and excluded from primary eligibility; \
             {} consecutive on-time heartbeats are required for recovery.",
            vm.vm_id, vm.primary_private_ip, recovery_count
        );
        if let Err(e) = platform
            .notify(vm, "Unhealthy VM excluded from election", &message)
            .await
        {
            warn!(vm_id = %vm.vm_id, error = %e, "Exclusion notification failed");
        }
    }

    Ok(())
}
