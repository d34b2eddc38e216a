//! Platform collaborator contract
//!
//! The coordinator consumes every external concern through this single
//! abstract contract: VM lookup, settings, the record stores, scaling-group
//! actions, notification delivery, tagging and egress routing. Cloud-specific
//! adapters live behind it; the shipped implementation is in-memory.

pub mod memory;

use crate::error::FleetError;
use crate::types::{HealthCheckRecord, PrimaryRecord, VirtualMachine};
use async_trait::async_trait;
use std::collections::HashMap;

pub use memory::InMemoryPlatform;

/// Outcome of a conditional primary-record create
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionalCreateOutcome {
    /// The record was written; this caller owns the primary slot
    Created,
    /// Another caller's create won the race; re-read to adopt the winner
    Conflict,
}

/// Contract for the platform backing a fleet
#[async_trait]
pub trait Platform: Send + Sync {
    /// Look up a fleet member by id
    async fn get_target_vm(&self, vm_id: &str) -> Result<Option<VirtualMachine>, FleetError>;

    /// Look up the VM named by the current primary record
    async fn get_primary_vm(&self) -> Result<Option<VirtualMachine>, FleetError>;

    /// Fetch the fleet settings map
    async fn get_settings(&self) -> Result<HashMap<String, String>, FleetError>;

    /// Read a VM's health-check record
    async fn get_health_check_record(
        &self,
        vm_id: &str,
    ) -> Result<Option<HealthCheckRecord>, FleetError>;

    /// List all health-check records in the fleet
    async fn list_health_check_records(&self) -> Result<Vec<HealthCheckRecord>, FleetError>;

    /// Create a VM's health-check record
    async fn create_health_check_record(
        &self,
        record: &HealthCheckRecord,
    ) -> Result<(), FleetError>;

    /// Update a VM's health-check record; last writer wins per `vm_id`
    async fn update_health_check_record(
        &self,
        record: &HealthCheckRecord,
    ) -> Result<(), FleetError>;

    /// Read the current primary record
    async fn get_primary_record(&self) -> Result<Option<PrimaryRecord>, FleetError>;

    /// Atomically replace the primary record if the stored value still
    /// matches `expected_old`
    ///
    /// This is the single cross-invocation synchronization point; the store
    /// must honor it atomically.
    async fn create_primary_record(
        &self,
        record: &PrimaryRecord,
        expected_old: Option<&PrimaryRecord>,
    ) -> Result<ConditionalCreateOutcome, FleetError>;

    /// Update the primary record unconditionally
    async fn update_primary_record(&self, record: &PrimaryRecord) -> Result<(), FleetError>;

    /// Remove a VM from its scaling group
    async fn delete_vm_from_scaling_group(&self, vm_id: &str) -> Result<(), FleetError>;

    /// Deliver a notification about a VM; best-effort
    async fn notify(
        &self,
        vm: &VirtualMachine,
        subject: &str,
        message: &str,
    ) -> Result<(), FleetError>;

    /// Tag a VM with the primary role metadata
    async fn tag_as_primary(&self, vm_id: &str) -> Result<(), FleetError>;

    /// Steer egress traffic through the given primary
    async fn update_egress_route(&self, primary: &VirtualMachine) -> Result<(), FleetError>;

    /// Identity comparison between two optional VMs
    fn vm_equals(&self, a: Option<&VirtualMachine>, b: Option<&VirtualMachine>) -> bool {
        match (a, b) {
            (Some(a), Some(b)) => a.vm_id == b.vm_id,
            (None, None) => true,
            _ => false,
        }
    }
}
