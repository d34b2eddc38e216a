//! In-memory platform backend
//!
//! Backs local runs and tests. The record stores are plain maps behind
//! `RwLock`s; the conditional primary create compares and swaps inside one
//! write-lock section so racing callers observe exactly one winner. Failure
//! injection switches let tests exercise the persistence-failure paths.

use crate::config::RuntimeSettings;
use crate::error::FleetError;
use crate::platform::{ConditionalCreateOutcome, Platform};
use crate::types::{HealthCheckRecord, PrimaryRecord, VirtualMachine, VmState};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

/// One delivered notification, kept for inspection
#[derive(Debug, Clone)]
pub struct NotificationEntry {
    pub vm_id: String,
    pub subject: String,
    pub message: String,
}

/// In-memory implementation of the platform contract
#[derive(Default)]
pub struct InMemoryPlatform {
    vms: RwLock<HashMap<String, VirtualMachine>>,
    settings: RwLock<HashMap<String, String>>,
    health_records: RwLock<HashMap<String, HealthCheckRecord>>,
    primary_record: RwLock<Option<PrimaryRecord>>,
    notifications: RwLock<Vec<NotificationEntry>>,
    primary_tags: RwLock<Vec<String>>,
    egress_routes: RwLock<Vec<String>>,
    deleted_vms: RwLock<Vec<String>>,
    fail_record_create: AtomicBool,
    fail_record_update: AtomicBool,
    fail_vm_delete: AtomicBool,
    fail_notify: AtomicBool,
}

impl InMemoryPlatform {
    /// Create an empty platform
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a platform pre-loaded with a settings snapshot
    pub fn with_settings(settings: &RuntimeSettings) -> Self {
        Self {
            settings: RwLock::new(settings.to_map()),
            ..Self::default()
        }
    }

    /// Register a fleet member
    pub async fn insert_vm(&self, vm: VirtualMachine) {
        self.vms.write().await.insert(vm.vm_id.clone(), vm);
    }

    /// Register a running fleet member with the common fields defaulted
    pub async fn insert_running_vm(&self, vm_id: &str, scaling_group: &str, ip: &str) {
        self.insert_vm(VirtualMachine {
            vm_id: vm_id.to_string(),
            scaling_group_name: scaling_group.to_string(),
            primary_private_ip: ip.to_string(),
            primary_public_ip: None,
            virtual_network_id: "vnet-default".to_string(),
            subnet_id: "subnet-default".to_string(),
            state: VmState::Running,
        })
        .await;
    }

    /// Replace the settings map
    pub async fn put_settings(&self, settings: HashMap<String, String>) {
        *self.settings.write().await = settings;
    }

    /// Seed a health-check record directly, bypassing the heartbeat path
    pub async fn put_health_check_record(&self, record: HealthCheckRecord) {
        self.health_records
            .write()
            .await
            .insert(record.vm_id.clone(), record);
    }

    /// Seed the primary record directly
    pub async fn put_primary_record(&self, record: Option<PrimaryRecord>) {
        *self.primary_record.write().await = record;
    }

    /// Notifications delivered so far
    pub async fn notifications(&self) -> Vec<NotificationEntry> {
        self.notifications.read().await.clone()
    }

    /// VM ids tagged as primary so far
    pub async fn primary_tags(&self) -> Vec<String> {
        self.primary_tags.read().await.clone()
    }

    /// Primary IPs the egress route was pointed at so far
    pub async fn egress_routes(&self) -> Vec<String> {
        self.egress_routes.read().await.clone()
    }

    /// VM ids deleted from the scaling group so far
    pub async fn deleted_vms(&self) -> Vec<String> {
        self.deleted_vms.read().await.clone()
    }

    /// Make health-record creates fail until cleared
    pub fn set_fail_record_create(&self, fail: bool) {
        self.fail_record_create.store(fail, Ordering::SeqCst);
    }

    /// Make health-record updates fail until cleared
    pub fn set_fail_record_update(&self, fail: bool) {
        self.fail_record_update.store(fail, Ordering::SeqCst);
    }

    /// Make scaling-group deletes fail until cleared
    pub fn set_fail_vm_delete(&self, fail: bool) {
        self.fail_vm_delete.store(fail, Ordering::SeqCst);
    }

    /// Make notification delivery fail until cleared
    pub fn set_fail_notify(&self, fail: bool) {
        self.fail_notify.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Platform for InMemoryPlatform {
    async fn get_target_vm(&self, vm_id: &str) -> Result<Option<VirtualMachine>, FleetError> {
        Ok(self.vms.read().await.get(vm_id).cloned())
    }

    async fn get_primary_vm(&self) -> Result<Option<VirtualMachine>, FleetError> {
        let vm_id = match self.primary_record.read().await.as_ref() {
            Some(record) => record.vm_id.clone(),
            None => return Ok(None),
        };
        Ok(self.vms.read().await.get(&vm_id).cloned())
    }

    async fn get_settings(&self) -> Result<HashMap<String, String>, FleetError> {
        Ok(self.settings.read().await.clone())
    }

    async fn get_health_check_record(
        &self,
        vm_id: &str,
    ) -> Result<Option<HealthCheckRecord>, FleetError> {
        Ok(self.health_records.read().await.get(vm_id).cloned())
    }

    async fn list_health_check_records(&self) -> Result<Vec<HealthCheckRecord>, FleetError> {
        let mut records: Vec<_> = self.health_records.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.vm_id.cmp(&b.vm_id));
        Ok(records)
    }

    async fn create_health_check_record(
        &self,
        record: &HealthCheckRecord,
    ) -> Result<(), FleetError> {
        if self.fail_record_create.load(Ordering::SeqCst) {
            return Err(FleetError::RecordStore(
                "health-check record create rejected".to_string(),
            ));
        }
        let mut records = self.health_records.write().await;
        if records.contains_key(&record.vm_id) {
            return Err(FleetError::RecordStore(format!(
                "health-check record already exists for {}",
                record.vm_id
            )));
        }
        records.insert(record.vm_id.clone(), record.clone());
        Ok(())
    }

    async fn update_health_check_record(
        &self,
        record: &HealthCheckRecord,
    ) -> Result<(), FleetError> {
        if self.fail_record_update.load(Ordering::SeqCst) {
            return Err(FleetError::RecordStore(
                "health-check record update rejected".to_string(),
            ));
        }
        self.health_records
            .write()
            .await
            .insert(record.vm_id.clone(), record.clone());
        Ok(())
    }

    async fn get_primary_record(&self) -> Result<Option<PrimaryRecord>, FleetError> {
        Ok(self.primary_record.read().await.clone())
    }

    async fn create_primary_record(
        &self,
        record: &PrimaryRecord,
        expected_old: Option<&PrimaryRecord>,
    ) -> Result<ConditionalCreateOutcome, FleetError> {
        // Compare and swap under one write lock; racing callers serialize
        // here and exactly one observes a match.
        let mut current = self.primary_record.write().await;
        let matches = match (current.as_ref(), expected_old) {
            (None, None) => true,
            (Some(stored), Some(expected)) => {
                stored.id == expected.id && stored.vote_state == expected.vote_state
            }
            _ => false,
        };
        if !matches {
            debug!(
                election_id = %record.id,
                "Conditional primary create lost the race"
            );
            return Ok(ConditionalCreateOutcome::Conflict);
        }
        *current = Some(record.clone());
        Ok(ConditionalCreateOutcome::Created)
    }

    async fn update_primary_record(&self, record: &PrimaryRecord) -> Result<(), FleetError> {
        *self.primary_record.write().await = Some(record.clone());
        Ok(())
    }

    async fn delete_vm_from_scaling_group(&self, vm_id: &str) -> Result<(), FleetError> {
        if self.fail_vm_delete.load(Ordering::SeqCst) {
            return Err(FleetError::ScalingGroup(format!(
                "scaling group refused to delete {}",
                vm_id
            )));
        }
        let removed = self.vms.write().await.remove(vm_id);
        if removed.is_none() {
            return Err(FleetError::UnknownVm(vm_id.to_string()));
        }
        self.health_records.write().await.remove(vm_id);
        self.deleted_vms.write().await.push(vm_id.to_string());
        Ok(())
    }

    async fn notify(
        &self,
        vm: &VirtualMachine,
        subject: &str,
        message: &str,
    ) -> Result<(), FleetError> {
        if self.fail_notify.load(Ordering::SeqCst) {
            return Err(FleetError::NotificationFailed(format!(
                "notification channel unavailable for {}",
                vm.vm_id
            )));
        }
        self.notifications.write().await.push(NotificationEntry {
            vm_id: vm.vm_id.clone(),
            subject: subject.to_string(),
            message: message.to_string(),
        });
        Ok(())
    }

    async fn tag_as_primary(&self, vm_id: &str) -> Result<(), FleetError> {
        self.primary_tags.write().await.push(vm_id.to_string());
        Ok(())
    }

    async fn update_egress_route(&self, primary: &VirtualMachine) -> Result<(), FleetError> {
        self.egress_routes
            .write()
            .await
            .push(primary.primary_private_ip.clone());
        Ok(())
    }
}
