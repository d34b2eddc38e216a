//! Fleetguard - Autoscale coordinator for firewall VM fleets

pub mod config;
pub mod election;
pub mod error;
pub mod heartbeat;
pub mod http;
pub mod orchestrator;
pub mod platform;
pub mod types;
pub mod unhealthy;

/// Coordinator version
pub const COORDINATOR_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Coordinator name
pub const COORDINATOR_NAME: &str = "fleetguard";

/// Default heartbeat listen endpoint
pub const DEFAULT_LISTEN_ENDPOINT: &str = "0.0.0.0:8087";

// Re-export main types for convenience
pub use config::{CoordinatorConfig, RuntimeSettings};
pub use error::FleetError;
pub use orchestrator::AutoscaleCoordinator;
pub use platform::{InMemoryPlatform, Platform};
pub use types::*;

/// Result type for coordinator operations
pub type FleetResult<T> = Result<T, FleetError>;

/// Initialize a coordinator over a platform
pub fn init_coordinator(
    config: CoordinatorConfig,
    platform: std::sync::Arc<dyn Platform>,
) -> AutoscaleCoordinator {
    tracing::info!("Initializing fleetguard coordinator v{}", COORDINATOR_VERSION);
    AutoscaleCoordinator::new(config, platform)
}
