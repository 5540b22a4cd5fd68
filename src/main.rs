//! Deriv session manager
//!
//!   control surface ──→ SessionRegistry ──spawn──→ ConnectionManager (one per user)
//!                                                        │
//!                                          venue WS ◄────┘──→ writer queue ──→ SQLite
//!
//! Boot: load env → open store → restore active sessions → serve until Ctrl-C.

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use deriv_trader::admin::serve_admin;
use deriv_trader::store::SqliteStore;
use deriv_trader::trading::venue::WsConnector;
use deriv_trader::{AppConfig, SessionDeps, SessionRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cfg = AppConfig::from_env();
    let _log_guard = init_tracing(&cfg);

    info!(
        ws = %cfg.ws_url,
        store = %cfg.store_path.display(),
        reconnect_ms = cfg.engine.reconnect_delay.as_millis() as u64,
        atr_period = cfg.engine.signal.atr_period,
        "🚀 Deriv session manager starting"
    );

    let store = Arc::new(SqliteStore::open(&cfg.store_path)?);
    let connector = Arc::new(WsConnector::new(cfg.ws_url.clone(), cfg.engine.connect_timeout));
    let registry = Arc::new(SessionRegistry::new(SessionDeps::new(
        connector,
        store,
        cfg.engine.clone(),
    )));

    let restored = registry.restore_all().await;
    info!(restored, "♻️ Sessions restored");

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("ctrl_c listener failed: {}", e);
        }
        info!("⚡ Shutdown requested");
    };
    let served = serve_admin(Arc::clone(&registry), cfg.admin_addr, shutdown).await;

    registry.shutdown().await;
    served?;
    info!("👋 Bye");
    Ok(())
}

/// Console always; a daily rolling file too when `DT_LOG_DIR` is set.
/// The returned guard flushes the file writer and must outlive `main`'s work.
fn init_tracing(cfg: &AppConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = tracing_subscriber::fmt::layer();

    match &cfg.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "deriv_trader.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(console).init();
            None
        }
    }
}
