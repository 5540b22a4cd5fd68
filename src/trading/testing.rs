//! In-process venue and store doubles for session tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::types::{AccountType, SessionStatus, Settlement, TradeRecord, TradingSettings, UserId};
use super::venue::{Connector, VenueEndpoint, VenueLink};
use crate::error::{StoreError, TradeError};
use crate::store::{MemoryStore, SessionStore, SettingsSource, TradeLedger};

/// Every `connect` hands the far end of a fresh link to the test.
pub(crate) struct FakeVenue {
    endpoints: mpsc::UnboundedSender<VenueEndpoint>,
    attempts: AtomicUsize,
}

impl FakeVenue {
    pub(crate) fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<VenueEndpoint>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { endpoints: tx, attempts: AtomicUsize::new(0) }), rx)
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeVenue {
    async fn connect(&self) -> Result<VenueLink, TradeError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let (link, endpoint) = VenueLink::pair(64);
        self.endpoints
            .send(endpoint)
            .map_err(|_| TradeError::Connection("venue gone".into()))?;
        Ok(link)
    }
}

/// Memory store whose writes block the calling thread for `delay`.
pub(crate) struct SlowStore {
    inner: Arc<MemoryStore>,
    delay: Duration,
}

impl SlowStore {
    pub(crate) fn new(inner: Arc<MemoryStore>, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

impl SettingsSource for SlowStore {
    fn load_settings(&self, user_id: &str) -> Result<Option<TradingSettings>, StoreError> {
        self.inner.load_settings(user_id)
    }

    fn load_credential(&self, user_id: &str, account: AccountType) -> Result<Option<String>, StoreError> {
        self.inner.load_credential(user_id, account)
    }
}

impl SessionStore for SlowStore {
    fn save_status(&self, user_id: &str, status: &SessionStatus) -> Result<(), StoreError> {
        std::thread::sleep(self.delay);
        self.inner.save_status(user_id, status)
    }

    fn load_status(&self, user_id: &str) -> Result<Option<SessionStatus>, StoreError> {
        self.inner.load_status(user_id)
    }

    fn active_users(&self) -> Result<Vec<UserId>, StoreError> {
        self.inner.active_users()
    }
}

impl TradeLedger for SlowStore {
    fn open_trade(&self, record: &TradeRecord) -> Result<(), StoreError> {
        std::thread::sleep(self.delay);
        self.inner.open_trade(record)
    }

    fn settle_trade(&self, trade_id: &str, settlement: &Settlement) -> Result<TradeRecord, StoreError> {
        std::thread::sleep(self.delay);
        self.inner.settle_trade(trade_id, settlement)
    }

    fn trades_for(&self, user_id: &str) -> Result<Vec<TradeRecord>, StoreError> {
        self.inner.trades_for(user_id)
    }
}
