//! Error types for the fleetguard coordinator

use thiserror::Error;

/// Error type for coordinator operations
#[derive(Error, Debug)]
pub enum FleetError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unknown VM: {0}")]
    UnknownVm(String),

    #[error("Record store error: {0}")]
    RecordStore(String),

    #[error("Primary election error: {0}")]
    Election(String),

    #[error("Scaling group error: {0}")]
    ScalingGroup(String),

    #[error("Notification failed: {0}")]
    NotificationFailed(String),
}
