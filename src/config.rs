//! Process configuration, read from the environment after `.env` is loaded.
//! Unparseable values keep their defaults.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::trading::candles::WINDOW_CAPACITY;
use crate::trading::signal::SignalConfig;

pub const DEFAULT_WS_URL: &str = "wss://ws.binaryws.com/websockets/v3?app_id=1089";

// ─────────────────────────────────────────────────────────
// Engine tunables
// ─────────────────────────────────────────────────────────

/// Knobs shared by every session the registry spawns.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub window_capacity: usize,
    pub signal: SignalConfig,
    /// Fixed delay between a lost connection and the next attempt.
    pub reconnect_delay: Duration,
    pub connect_timeout: Duration,
    /// How long `stop` waits for a session task before aborting it.
    pub stop_grace: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            window_capacity: WINDOW_CAPACITY,
            signal: SignalConfig::default(),
            reconnect_delay: Duration::from_millis(3000),
            connect_timeout: Duration::from_secs(10),
            stop_grace: Duration::from_secs(5),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let mut c = Self::default();
        if let Ok(v) = std::env::var("DT_RECONNECT_DELAY_MS")   { if let Ok(ms) = v.parse() { c.reconnect_delay = Duration::from_millis(ms); } }
        if let Ok(v) = std::env::var("DT_CONNECT_TIMEOUT_SECS") { if let Ok(s) = v.parse() { c.connect_timeout = Duration::from_secs(s); } }
        if let Ok(v) = std::env::var("DT_ATR_PERIOD") {
            if let Ok(n) = v.parse::<usize>() {
                if n > 0 { c.signal.atr_period = n; }
            }
        }
        c
    }
}

// ─────────────────────────────────────────────────────────
// Process
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub ws_url: String,
    pub store_path: PathBuf,
    pub admin_addr: SocketAddr,
    /// Daily rolling log files go here when set.
    pub log_dir: Option<PathBuf>,
    pub engine: EngineConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ws_url: DEFAULT_WS_URL.to_string(),
            store_path: PathBuf::from("./trader_state.db"),
            admin_addr: SocketAddr::from(([127, 0, 0, 1], 8088)),
            log_dir: None,
            engine: EngineConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let mut c = Self::default();
        if let Ok(v) = std::env::var("DERIV_WS_URL") { if !v.trim().is_empty() { c.ws_url = v.trim().to_string(); } }
        if let Ok(v) = std::env::var("DT_STORE_PATH") { if !v.trim().is_empty() { c.store_path = PathBuf::from(v.trim()); } }
        if let Ok(v) = std::env::var("DT_ADMIN_ADDR") { if let Ok(a) = v.parse() { c.admin_addr = a; } }
        if let Ok(v) = std::env::var("DT_LOG_DIR")    { if !v.trim().is_empty() { c.log_dir = Some(PathBuf::from(v.trim())); } }
        c.engine = EngineConfig::from_env();
        c
    }
}
