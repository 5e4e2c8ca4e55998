//! Service router server
//!
//! Loads the server configuration, sets up logging, loads the services
//! document and starts the HTTP front end (and the metrics endpoint when
//! enabled).

use anyhow::Context;
use service_router::{AppContext, MetricsEndpoint, RouterServer, ServerConfig};
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

/// # Usage
/// ```bash
/// # Start with default config (config.yaml)
/// service-router
///
/// # Start with custom config
/// service-router /path/to/config.yaml
/// ```
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());

    let config = ServerConfig::from_file(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;

    tracing_subscriber::fmt()
        .with_max_level(config.tracing_level()?)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Starting service router");
    info!("Configuration loaded from: {}", config_path);
    info!("  - Listen address: {}", config.listen_address);
    info!("  - Services file: {}", config.services_file);
    info!("  - Swallow generator errors: {}", config.swallow_generator_errors);
    info!("  - Expires: {} seconds", config.expires_secs);
    info!("  - Template cache scope: {:?}", config.template_cache_scope);
    info!("  - Compression enabled: {}", config.enable_compression);
    if config.control_key().is_none() {
        warn!("No control key configured, control parameters are open to every caller");
    }

    let addr: SocketAddr = config
        .listen_address
        .parse()
        .context("Invalid listen address")?;
    let metrics_config = config.metrics_endpoint.clone();

    let app = Arc::new(AppContext::new(config)?);
    match app.load_services().await {
        Ok(warnings) => {
            info!(
                "Services loaded: {} registrations, {} warning(s)",
                app.registry().len(),
                warnings.len()
            );
        }
        Err(e) => {
            error!("Failed to load services: {}", e);
            std::process::exit(1);
        }
    }

    if let Some(metrics_config) = metrics_config.filter(|m| m.enabled) {
        let metrics_addr: SocketAddr = metrics_config
            .address
            .parse()
            .context("Invalid metrics endpoint address")?;
        let endpoint = MetricsEndpoint::new(Arc::clone(app.metrics()), metrics_addr)
            .with_control_metrics(Arc::clone(app.control_metrics()));
        tokio::spawn(async move {
            if let Err(e) = endpoint.start().await {
                error!("Metrics endpoint stopped: {}", e);
            }
        });
    }

    RouterServer::new(app, addr)
        .start()
        .await
        .context("Server stopped")?;
    Ok(())
}
