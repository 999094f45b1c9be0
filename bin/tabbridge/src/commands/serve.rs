//! Server startup and shutdown orchestration.

use std::sync::Arc;
use tracing::info;

use tabbridge_browser::{bridge::Bridge, launcher, state};
use tabbridge_core::{Config, Result};

use crate::handlers::{self, AppState};

pub async fn run(port_override: Option<u16>, headless: bool) -> Result<()> {
    let mut config = Config::load()?;
    if let Some(port) = port_override {
        config.port = port;
    }
    if headless {
        config.headless = true;
    }
    std::fs::create_dir_all(&config.state_dir)?;

    // Browser first: a missing browser is fatal at startup.
    let browser = launcher::start(&config).await?;
    let bridge = Arc::new(Bridge::connect(config.clone(), &browser.ws_url).await?);
    bridge.list_targets().await?;

    state::restore(&bridge).await;

    let reaper = tokio::spawn(Arc::clone(&bridge).reap_loop(config.reap_interval()));

    let app = handlers::router(AppState {
        bridge: Arc::clone(&bridge),
    });

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("tabbridge running on http://localhost:{}", config.port);
    if !config.cdp_url.is_empty() {
        info!("CDP target: {}", config.cdp_url);
    }
    if config.token.is_empty() {
        info!("Auth: none (set BRIDGE_TOKEN to enable)");
    } else {
        info!("Auth: Bearer token required");
    }

    let shutdown_bridge = Arc::clone(&bridge);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutting down, saving state...");
                    shutdown_bridge.shutdown().await;
                }
                // The /shutdown route cancels the root token itself.
                _ = shutdown_bridge.root_token().cancelled() => {}
            }
        })
        .await?;

    bridge.shutdown().await;
    reaper.abort();
    drop(browser);
    Ok(())
}
