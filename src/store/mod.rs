//! Durable collaborators: settings/credential source, session snapshots and
//! the trade ledger.
//!
//! The traits are synchronous. Sessions never call them directly: writes go
//! through [`StoreWriter`] and are fire-and-forget (a failure is logged, never
//! acted on).

mod sqlite;
mod writer;

pub use sqlite::SqliteStore;
pub use writer::{blocking, StoreWriter};

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::error::StoreError;
use crate::trading::types::{
    AccountType, SessionStatus, Settlement, TradeRecord, TradingSettings, UserId,
};

pub trait SettingsSource: Send + Sync {
    fn load_settings(&self, user_id: &str) -> Result<Option<TradingSettings>, StoreError>;
    fn load_credential(
        &self,
        user_id: &str,
        account: AccountType,
    ) -> Result<Option<String>, StoreError>;
}

pub trait SessionStore: Send + Sync {
    fn save_status(&self, user_id: &str, status: &SessionStatus) -> Result<(), StoreError>;
    fn load_status(&self, user_id: &str) -> Result<Option<SessionStatus>, StoreError>;
    /// Users whose last snapshot says the session is active.
    fn active_users(&self) -> Result<Vec<UserId>, StoreError>;
}

pub trait TradeLedger: Send + Sync {
    fn open_trade(&self, record: &TradeRecord) -> Result<(), StoreError>;
    /// Settle a PENDING trade. Fails if unknown or already settled.
    fn settle_trade(&self, trade_id: &str, settlement: &Settlement)
        -> Result<TradeRecord, StoreError>;
    /// Newest first.
    fn trades_for(&self, user_id: &str) -> Result<Vec<TradeRecord>, StoreError>;
}

/// Everything a session registry needs from storage.
pub trait Store: SettingsSource + SessionStore + TradeLedger {}

impl<T: SettingsSource + SessionStore + TradeLedger> Store for T {}

// ─────────────────────────────────────────────────────────
// In-memory model
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
struct StoreData {
    settings: HashMap<UserId, TradingSettings>,
    /// user → account type ("demo" / "live") → token
    credentials: HashMap<UserId, BTreeMap<String, String>>,
    sessions: HashMap<UserId, SessionStatus>,
    trades: Vec<TradeRecord>,
}

impl StoreData {
    fn credential(&self, user_id: &str, account: AccountType) -> Option<String> {
        self.credentials
            .get(user_id)
            .and_then(|m| m.get(account.as_str()))
            .filter(|t| !t.trim().is_empty())
            .cloned()
    }

    fn set_credential(&mut self, user_id: &str, account: AccountType, token: String) {
        self.credentials
            .entry(user_id.to_string())
            .or_default()
            .insert(account.as_str().to_string(), token);
    }

    fn active_users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.is_active)
            .map(|(u, _)| u.clone())
            .collect();
        users.sort();
        users
    }

    fn open_trade(&mut self, record: &TradeRecord) {
        match self.trades.iter_mut().find(|t| t.id == record.id) {
            Some(existing) => *existing = record.clone(),
            None => self.trades.push(record.clone()),
        }
    }

    fn settle_trade(
        &mut self,
        trade_id: &str,
        settlement: &Settlement,
    ) -> Result<TradeRecord, StoreError> {
        let trade = self
            .trades
            .iter_mut()
            .find(|t| t.id == trade_id)
            .ok_or_else(|| StoreError::UnknownTrade(trade_id.to_string()))?;
        if trade.is_settled() {
            return Err(StoreError::AlreadySettled(trade_id.to_string()));
        }
        trade.apply_settlement(settlement);
        Ok(trade.clone())
    }

    fn trades_for(&self, user_id: &str) -> Vec<TradeRecord> {
        let mut trades: Vec<TradeRecord> = self
            .trades
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        trades.sort_by(|a, b| b.entry_time.cmp(&a.entry_time));
        trades
    }
}

pub(crate) fn lock<T>(m: &Mutex<T>) -> Result<MutexGuard<'_, T>, StoreError> {
    m.lock()
        .map_err(|_| StoreError::Unavailable("store lock poisoned".into()))
}

// ─────────────────────────────────────────────────────────
// In-memory store
// ─────────────────────────────────────────────────────────

/// Process-local store. Writes can be made to fail for fault-injection.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<StoreData>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_settings(&self, user_id: &str, settings: TradingSettings) {
        if let Ok(mut d) = lock(&self.data) {
            d.settings.insert(user_id.to_string(), settings);
        }
    }

    pub fn put_credential(&self, user_id: &str, account: AccountType, token: &str) {
        if let Ok(mut d) = lock(&self.data) {
            d.set_credential(user_id, account, token.to_string());
        }
    }

    /// Make every subsequent write fail with [`StoreError::Unavailable`].
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".into()));
        }
        Ok(())
    }
}

impl SettingsSource for MemoryStore {
    fn load_settings(&self, user_id: &str) -> Result<Option<TradingSettings>, StoreError> {
        Ok(lock(&self.data)?.settings.get(user_id).cloned())
    }

    fn load_credential(
        &self,
        user_id: &str,
        account: AccountType,
    ) -> Result<Option<String>, StoreError> {
        Ok(lock(&self.data)?.credential(user_id, account))
    }
}

impl SessionStore for MemoryStore {
    fn save_status(&self, user_id: &str, status: &SessionStatus) -> Result<(), StoreError> {
        self.check_writable()?;
        lock(&self.data)?
            .sessions
            .insert(user_id.to_string(), status.clone());
        Ok(())
    }

    fn load_status(&self, user_id: &str) -> Result<Option<SessionStatus>, StoreError> {
        Ok(lock(&self.data)?.sessions.get(user_id).cloned())
    }

    fn active_users(&self) -> Result<Vec<UserId>, StoreError> {
        Ok(lock(&self.data)?.active_users())
    }
}

impl TradeLedger for MemoryStore {
    fn open_trade(&self, record: &TradeRecord) -> Result<(), StoreError> {
        self.check_writable()?;
        lock(&self.data)?.open_trade(record);
        Ok(())
    }

    fn settle_trade(
        &self,
        trade_id: &str,
        settlement: &Settlement,
    ) -> Result<TradeRecord, StoreError> {
        self.check_writable()?;
        lock(&self.data)?.settle_trade(trade_id, settlement)
    }

    fn trades_for(&self, user_id: &str) -> Result<Vec<TradeRecord>, StoreError> {
        Ok(lock(&self.data)?.trades_for(user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading::types::{Direction, TradeResult};
    use chrono::{Duration, Utc};

    pub(crate) fn pending_trade(id: &str, user: &str, minutes_ago: i64) -> TradeRecord {
        TradeRecord {
            id: id.to_string(),
            user_id: user.to_string(),
            contract_id: Some("1".into()),
            market: "R_10".into(),
            direction: Direction::Rise,
            stake: 1.0,
            account_type: AccountType::Demo,
            entry_time: Utc::now() - Duration::minutes(minutes_ago),
            result: TradeResult::Pending,
            exit_time: None,
            exit_price: None,
            profit: None,
            sma5: None,
            sma6: None,
            atr: None,
        }
    }

    fn loss() -> Settlement {
        Settlement {
            result: TradeResult::Loss,
            profit: -1.0,
            exit_price: 1.2,
            exit_time: Utc::now(),
        }
    }

    #[test]
    fn credential_matches_account_type() {
        let store = MemoryStore::new();
        store.put_credential("u1", AccountType::Demo, "demo-token");
        assert_eq!(
            store.load_credential("u1", AccountType::Demo).unwrap().as_deref(),
            Some("demo-token")
        );
        assert_eq!(store.load_credential("u1", AccountType::Live).unwrap(), None);

        store.put_credential("u1", AccountType::Live, "   ");
        assert_eq!(store.load_credential("u1", AccountType::Live).unwrap(), None);
    }

    #[test]
    fn trade_settles_exactly_once() {
        let store = MemoryStore::new();
        store.open_trade(&pending_trade("t1", "u1", 0)).unwrap();

        let settled = store.settle_trade("t1", &loss()).unwrap();
        assert_eq!(settled.result, TradeResult::Loss);
        assert_eq!(settled.profit, Some(-1.0));

        assert!(matches!(
            store.settle_trade("t1", &loss()),
            Err(StoreError::AlreadySettled(_))
        ));
        assert!(matches!(
            store.settle_trade("nope", &loss()),
            Err(StoreError::UnknownTrade(_))
        ));
    }

    #[test]
    fn trades_listed_newest_first_per_user() {
        let store = MemoryStore::new();
        store.open_trade(&pending_trade("old", "u1", 10)).unwrap();
        store.open_trade(&pending_trade("new", "u1", 1)).unwrap();
        store.open_trade(&pending_trade("other", "u2", 0)).unwrap();

        let ids: Vec<String> = store.trades_for("u1").unwrap().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["new".to_string(), "old".to_string()]);
    }

    #[test]
    fn active_users_follow_snapshots() {
        let store = MemoryStore::new();
        let mut running = SessionStatus::starting(&TradingSettings::default(), None);
        store.save_status("b", &running).unwrap();
        store.save_status("a", &running).unwrap();
        running.mark_stopped("Trading stopped");
        store.save_status("c", &running).unwrap();
        assert_eq!(store.active_users().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn injected_write_failure() {
        let store = MemoryStore::new();
        store.fail_writes(true);
        assert!(store.save_status("u1", &SessionStatus::default()).is_err());
        assert!(store.open_trade(&pending_trade("t", "u1", 0)).is_err());
        store.fail_writes(false);
        assert!(store.save_status("u1", &SessionStatus::default()).is_ok());
    }
}
