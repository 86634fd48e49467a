//! PCBU unlock server entry point.
//!
//! Wires together the infrastructure and starts the Tokio runtime:
//!
//! ```text
//! main()
//!  └─ load_config()          -- TOML config: bind address + paired locks
//!  └─ AppState::new()        -- manager + state feed
//!  └─ register locks         -- one refresh per configured port
//!  └─ state feed logger      -- Tokio task
//!  └─ Ctrl-C                 -- shutdown: retire every listener
//! ```

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use pcbu_server::infrastructure::entity_bridge::{self, AppState};
use pcbu_server::infrastructure::protocol::handshake::PlaintextHandshake;
use pcbu_server::infrastructure::storage::config::load_config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;

    // Initialise structured logging. `RUST_LOG` overrides the config value.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.server.log_level.clone())),
        )
        .init();

    info!("PCBU unlock server starting");

    let bind_addr = config
        .server
        .bind_address
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid bind_address in config: {e}"))?;
    let protocol = Arc::new(PlaintextHandshake::new(config.server.desktop_unlock_port));
    let (state, mut state_feed) = AppState::new(bind_addr, protocol);

    // Register every persisted lock; a failed port keeps the rest alive.
    for entry in config.locks {
        let record = entry.into();
        let result = entity_bridge::add_lock(Arc::clone(&state), record).await;
        if let Some(e) = result.error {
            error!("could not register configured lock: {e}");
        }
    }
    {
        let manager = state.manager.lock().await;
        info!(
            locks = manager.registry().len(),
            listeners = manager.runtime_count(),
            "registration complete"
        );
    }

    // ── State feed logger ─────────────────────────────────────────────────────
    // Stands in for the entity framework's subscriber: surfaces every
    // availability change as a log line.
    tokio::spawn(async move {
        while let Some(snapshot) = state_feed.recv().await {
            info!(
                pairing_id = %snapshot.pairing_id,
                name = %snapshot.name,
                available = snapshot.available,
                locked = snapshot.locked,
                "lock state changed"
            );
        }
    });

    info!("PCBU unlock server ready.  Press Ctrl-C to exit.");

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("could not listen for shutdown signal: {e}");
    }
    info!("shutdown signal received");

    state.shutdown().await;
    info!("PCBU unlock server stopped");
    Ok(())
}
