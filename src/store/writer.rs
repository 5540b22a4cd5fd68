//! Write-behind queue in front of the store.
//!
//! Sessions only enqueue. One writer task per registry drains the queue and
//! runs each write on the blocking pool. Writes land in the order they were
//! enqueued.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{SessionStore, Store, TradeLedger};
use crate::error::StoreError;
use crate::trading::types::{SessionStatus, Settlement, TradeRecord, UserId};

enum StoreWrite {
    Status { user_id: UserId, status: SessionStatus },
    OpenTrade(TradeRecord),
    SettleTrade { trade_id: String, settlement: Settlement },
    /// Answered once every write queued before it has been applied.
    Flush(oneshot::Sender<()>),
}

impl StoreWrite {
    fn apply(&self, store: &dyn Store) -> Result<(), StoreError> {
        match self {
            StoreWrite::Status { user_id, status } => store.save_status(user_id, status),
            StoreWrite::OpenTrade(record) => store.open_trade(record),
            StoreWrite::SettleTrade { trade_id, settlement } => {
                store.settle_trade(trade_id, settlement).map(|_| ())
            }
            StoreWrite::Flush(_) => Ok(()),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            StoreWrite::Status { .. } => "status",
            StoreWrite::OpenTrade(_) => "trade open",
            StoreWrite::SettleTrade { .. } => "trade settlement",
            StoreWrite::Flush(_) => "flush",
        }
    }
}

/// Cloneable handle to the writer task.
#[derive(Clone)]
pub struct StoreWriter {
    tx: mpsc::UnboundedSender<StoreWrite>,
}

impl StoreWriter {
    /// Spawn the writer task. It exits once every handle is dropped and the
    /// queue is drained.
    pub fn spawn(store: Arc<dyn Store>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_writer(store, rx));
        (Self { tx }, task)
    }

    pub fn save_status(&self, user_id: &str, status: &SessionStatus) {
        self.enqueue(StoreWrite::Status {
            user_id: user_id.to_string(),
            status: status.clone(),
        });
    }

    pub fn open_trade(&self, record: &TradeRecord) {
        self.enqueue(StoreWrite::OpenTrade(record.clone()));
    }

    pub fn settle_trade(&self, trade_id: &str, settlement: &Settlement) {
        self.enqueue(StoreWrite::SettleTrade {
            trade_id: trade_id.to_string(),
            settlement: settlement.clone(),
        });
    }

    /// Wait until everything enqueued so far has reached the store.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        self.enqueue(StoreWrite::Flush(done));
        let _ = wait.await;
    }

    fn enqueue(&self, write: StoreWrite) {
        if self.tx.send(write).is_err() {
            warn!("store writer gone; write dropped");
        }
    }
}

async fn run_writer(store: Arc<dyn Store>, mut rx: mpsc::UnboundedReceiver<StoreWrite>) {
    while let Some(write) = rx.recv().await {
        if let StoreWrite::Flush(done) = write {
            let _ = done.send(());
            continue;
        }

        let kind = write.kind();
        let store = Arc::clone(&store);
        match tokio::task::spawn_blocking(move || write.apply(&*store)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(kind, error = %e, "store write failed"),
            Err(e) => warn!(kind, error = %e, "store write task failed"),
        }
    }
    debug!("store writer finished");
}

/// Run a store read on the blocking pool.
pub async fn blocking<T, F>(store: &Arc<dyn Store>, f: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce(&dyn Store) -> Result<T, StoreError> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || f(&*store))
        .await
        .map_err(|e| StoreError::Unavailable(format!("store task failed: {e}")))?
}
