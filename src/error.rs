//! Error taxonomy for the session manager.
//!
//! Only `Config` ever reaches the caller of `start()` synchronously.
//! Everything else is reported through the session's status snapshot
//! (`lastError` / `lastSignal`) and never tears the session down on its own.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TradeError {
    /// Missing or invalid settings / credential. No session is created.
    #[error("config error: {0}")]
    Config(String),

    /// The session has no venue token to authenticate with.
    #[error("credential error: {0}")]
    Credential(String),

    /// Transport failure. Triggers a reconnect, never fatal.
    #[error("connection error: {0}")]
    Connection(String),

    /// Malformed or error-flagged venue message. Only that message is dropped.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Durable write failed. Logged and swallowed by the session.
    #[error("persistence error: {0}")]
    Persistence(#[from] StoreError),
}

/// Failures raised by the storage collaborators.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("trade {0} not found")]
    UnknownTrade(String),

    #[error("trade {0} already settled")]
    AlreadySettled(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}
