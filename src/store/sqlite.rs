//! SQLite-backed store: settings, credentials, session snapshots and the
//! trade ledger in one database file.
//!
//! Every call is blocking. Async callers go through [`super::blocking`] or the
//! [`super::StoreWriter`] queue, never straight from a session task.

use std::fs;
use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use super::{lock, SessionStore, SettingsSource, TradeLedger};
use crate::error::StoreError;
use crate::trading::types::{
    AccountType, SessionStatus, Settlement, TradeRecord, TradingSettings, UserId,
};

const BUSY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

fn ensure_tables(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS trading_settings (
             user_id       TEXT PRIMARY KEY,
             settings_json TEXT NOT NULL
         );
         CREATE TABLE IF NOT EXISTS api_credentials (
             user_id      TEXT NOT NULL,
             account_type TEXT NOT NULL,
             token        TEXT NOT NULL,
             PRIMARY KEY (user_id, account_type)
         );
         CREATE TABLE IF NOT EXISTS live_sessions (
             user_id     TEXT PRIMARY KEY,
             is_active   INTEGER NOT NULL,
             status_json TEXT    NOT NULL
         );
         CREATE TABLE IF NOT EXISTS trades (
             id             TEXT PRIMARY KEY,
             user_id        TEXT    NOT NULL,
             entry_time_us  INTEGER NOT NULL,
             result         TEXT    NOT NULL,
             record_json    TEXT    NOT NULL
         );
         CREATE INDEX IF NOT EXISTS trades_by_user ON trades (user_id, entry_time_us DESC);",
    )?;
    Ok(())
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        ensure_tables(&conn)?;
        info!(path = %path.display(), "🗄️ Store opened");
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn put_settings(&self, user_id: &str, settings: &TradingSettings) -> Result<(), StoreError> {
        let json = serde_json::to_string(settings)?;
        lock(&self.conn)?.execute(
            "INSERT INTO trading_settings (user_id, settings_json) VALUES (?1, ?2)
             ON CONFLICT(user_id) DO UPDATE SET settings_json = excluded.settings_json",
            params![user_id, json],
        )?;
        Ok(())
    }

    pub fn put_credential(
        &self,
        user_id: &str,
        account: AccountType,
        token: &str,
    ) -> Result<(), StoreError> {
        lock(&self.conn)?.execute(
            "INSERT INTO api_credentials (user_id, account_type, token) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id, account_type) DO UPDATE SET token = excluded.token",
            params![user_id, account.as_str(), token],
        )?;
        Ok(())
    }
}

impl SettingsSource for SqliteStore {
    fn load_settings(&self, user_id: &str) -> Result<Option<TradingSettings>, StoreError> {
        let json: Option<String> = lock(&self.conn)?
            .query_row(
                "SELECT settings_json FROM trading_settings WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        json.map(|j| serde_json::from_str(&j)).transpose().map_err(StoreError::from)
    }

    fn load_credential(
        &self,
        user_id: &str,
        account: AccountType,
    ) -> Result<Option<String>, StoreError> {
        let token: Option<String> = lock(&self.conn)?
            .query_row(
                "SELECT token FROM api_credentials WHERE user_id = ?1 AND account_type = ?2",
                params![user_id, account.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(token.filter(|t| !t.trim().is_empty()))
    }
}

impl SessionStore for SqliteStore {
    fn save_status(&self, user_id: &str, status: &SessionStatus) -> Result<(), StoreError> {
        let json = serde_json::to_string(status)?;
        lock(&self.conn)?.execute(
            "INSERT INTO live_sessions (user_id, is_active, status_json) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE
                 SET is_active = excluded.is_active, status_json = excluded.status_json",
            params![user_id, status.is_active, json],
        )?;
        Ok(())
    }

    fn load_status(&self, user_id: &str) -> Result<Option<SessionStatus>, StoreError> {
        let json: Option<String> = lock(&self.conn)?
            .query_row(
                "SELECT status_json FROM live_sessions WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        json.map(|j| serde_json::from_str(&j)).transpose().map_err(StoreError::from)
    }

    fn active_users(&self) -> Result<Vec<UserId>, StoreError> {
        let conn = lock(&self.conn)?;
        let mut stmt =
            conn.prepare("SELECT user_id FROM live_sessions WHERE is_active = 1 ORDER BY user_id")?;
        let users = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<UserId>, _>>()?;
        Ok(users)
    }
}

impl TradeLedger for SqliteStore {
    fn open_trade(&self, record: &TradeRecord) -> Result<(), StoreError> {
        let json = serde_json::to_string(record)?;
        lock(&self.conn)?.execute(
            "INSERT INTO trades (id, user_id, entry_time_us, result, record_json)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE
                 SET result = excluded.result, record_json = excluded.record_json",
            params![
                record.id,
                record.user_id,
                record.entry_time.timestamp_micros(),
                record.result.as_str(),
                json
            ],
        )?;
        Ok(())
    }

    fn settle_trade(
        &self,
        trade_id: &str,
        settlement: &Settlement,
    ) -> Result<TradeRecord, StoreError> {
        let mut conn = lock(&self.conn)?;
        let tx = conn.transaction()?;
        let json: String = tx
            .query_row(
                "SELECT record_json FROM trades WHERE id = ?1",
                params![trade_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| StoreError::UnknownTrade(trade_id.to_string()))?;

        let mut trade: TradeRecord = serde_json::from_str(&json)?;
        if trade.is_settled() {
            return Err(StoreError::AlreadySettled(trade_id.to_string()));
        }
        trade.apply_settlement(settlement);

        tx.execute(
            "UPDATE trades SET result = ?2, record_json = ?3 WHERE id = ?1",
            params![trade_id, trade.result.as_str(), serde_json::to_string(&trade)?],
        )?;
        tx.commit()?;
        Ok(trade)
    }

    fn trades_for(&self, user_id: &str) -> Result<Vec<TradeRecord>, StoreError> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT record_json FROM trades WHERE user_id = ?1 ORDER BY entry_time_us DESC",
        )?;
        let rows = stmt
            .query_map(params![user_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.iter()
            .map(|j| serde_json::from_str(j).map_err(StoreError::from))
            .collect()
    }
}
