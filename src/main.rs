//! Fleetguard main binary

use fleetguard::{
    config::CoordinatorConfig, error::FleetError, http::HttpServer, InMemoryPlatform,
    RuntimeSettings, VirtualMachine, VmState,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting fleetguard v{}", fleetguard::COORDINATOR_VERSION);

    // Load configuration
    let config = load_config()?;
    info!("Configuration loaded successfully");

    // Build the platform and seed the fleet for local runs
    let platform = Arc::new(build_platform(&config).await);
    let coordinator = Arc::new(fleetguard::init_coordinator(config.clone(), platform));

    // Create HTTP server
    let http_server = HttpServer::new(coordinator);
    let app = http_server.create_router();
    let addr: std::net::SocketAddr = config.listen_endpoint.parse().map_err(|e| {
        FleetError::Configuration(format!(
            "invalid listen endpoint {}: {}",
            config.listen_endpoint, e
        ))
    })?;

    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    let server = axum::serve(listener, app);

    // Handle shutdown signals
    let graceful_shutdown = server.with_graceful_shutdown(shutdown_signal());

    if let Err(e) = graceful_shutdown.await {
        error!("HTTP server error: {}", e);
    }

    info!("Fleetguard shutdown completed");
    Ok(())
}

/// Build the in-memory platform, seeded from the fleet configuration
async fn build_platform(config: &CoordinatorConfig) -> InMemoryPlatform {
    let platform = InMemoryPlatform::with_settings(&RuntimeSettings::from(config));
    for seed in &config.fleet.seed_vms {
        platform
            .insert_vm(VirtualMachine {
                vm_id: seed.vm_id.clone(),
                scaling_group_name: seed
                    .scaling_group_name
                    .clone()
                    .unwrap_or_else(|| config.fleet.preferred_scaling_group.clone()),
                primary_private_ip: seed.ip.clone(),
                primary_public_ip: None,
                virtual_network_id: "vnet-default".to_string(),
                subnet_id: "subnet-default".to_string(),
                state: VmState::Running,
            })
            .await;
        info!(vm_id = %seed.vm_id, ip = %seed.ip, "Seeded fleet member");
    }
    platform
}

/// Load configuration from environment or file
fn load_config() -> Result<CoordinatorConfig, FleetError> {
    // Try to load from environment variables first
    if let Ok(coordinator_id) = std::env::var("FLEETGUARD_COORDINATOR_ID") {
        let config = CoordinatorConfig {
            coordinator_id,
            listen_endpoint: std::env::var("FLEETGUARD_LISTEN_ENDPOINT")
                .unwrap_or_else(|_| fleetguard::DEFAULT_LISTEN_ENDPOINT.to_string()),
            ..Default::default()
        };
        return Ok(config);
    }

    // Try to load from config file
    let config_path = std::env::var("FLEETGUARD_CONFIG_PATH")
        .unwrap_or_else(|_| "config/fleetguard.toml".to_string());

    if let Ok(config_content) = std::fs::read_to_string(&config_path) {
        match toml::from_str::<CoordinatorConfig>(&config_content) {
            Ok(config) => return Ok(config),
            Err(e) => warn!("Failed to parse config file: {}", e),
        }
    }

    // Use default configuration
    info!("Using default configuration");
    Ok(CoordinatorConfig::default())
}

/// Handle shutdown signals
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received terminate signal");
        }
    }

    info!("Shutdown signal received");
}
