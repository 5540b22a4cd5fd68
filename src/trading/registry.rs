//! Process-wide map of user → running session.
//!
//! Lifecycle calls for one user are serialized through that user's slot lock;
//! different users never wait on each other. Only `stop` (or a risk stop
//! inside the session) writes `isActive = false`, so `shutdown` leaves the
//! durable active list intact for `restore_all` on the next boot.
//!
//! Store reads run on the blocking pool. Writes share the sessions' writer
//! queue, so a registry write never overtakes one the session made earlier.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::connection::{ConnectionManager, SessionDeps};
use super::types::{RunStatus, SessionStatus, TradeRecord, UserId};
use crate::error::{StoreError, TradeError};
use crate::store::{self, SessionStore, SettingsSource, Store, TradeLedger};

struct SessionHandle {
    running: watch::Sender<bool>,
    task: JoinHandle<SessionStatus>,
}

impl SessionHandle {
    fn is_live(&self) -> bool {
        !self.task.is_finished() && *self.running.borrow()
    }
}

type Slot = Arc<AsyncMutex<Option<SessionHandle>>>;

pub struct SessionRegistry {
    deps: SessionDeps,
    slots: Mutex<HashMap<UserId, Slot>>,
}

impl SessionRegistry {
    pub fn new(deps: SessionDeps) -> Self {
        Self { deps, slots: Mutex::new(HashMap::new()) }
    }

    fn slot(&self, user_id: &str) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.entry(user_id.to_string()).or_default().clone()
    }

    fn existing_slot(&self, user_id: &str) -> Option<Slot> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.get(user_id).cloned()
    }

    /// Drop the map entry once nobody else holds the slot. Clones are only
    /// made under the map lock, so the count check cannot race a new caller.
    fn release_slot(&self, user_id: &str, slot: Slot) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let idle = Arc::strong_count(&slot) == 2
            && slot.try_lock().map(|g| g.is_none()).unwrap_or(false);
        if idle && slots.get(user_id).is_some_and(|s| Arc::ptr_eq(s, &slot)) {
            slots.remove(user_id);
        }
    }

    async fn read<T, F>(&self, user_id: &str, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Store, &str) -> Result<T, StoreError> + Send + 'static,
    {
        let user_id = user_id.to_string();
        store::blocking(&self.deps.store, move |s| f(s, &user_id)).await
    }

    /// Start trading for `user_id`. A no-op if a session is already running.
    ///
    /// Missing or invalid settings, or no token for the configured account
    /// type, fail with [`TradeError::Config`] and create nothing.
    pub async fn start(&self, user_id: &str) -> Result<(), TradeError> {
        let slot = self.slot(user_id);
        let started = {
            let mut guard = slot.lock().await;
            self.start_locked(user_id, &mut guard).await
        };
        if started.is_err() {
            self.release_slot(user_id, slot);
        }
        started
    }

    async fn start_locked(
        &self,
        user_id: &str,
        guard: &mut Option<SessionHandle>,
    ) -> Result<(), TradeError> {
        if guard.as_ref().is_some_and(SessionHandle::is_live) {
            debug!(user_id, "session already running");
            return Ok(());
        }

        let settings = self
            .read(user_id, |s, u| s.load_settings(u))
            .await?
            .ok_or_else(|| TradeError::Config("Trading settings not configured".into()))?;
        settings.validate()?;
        let account = settings.account_type;
        let token = self
            .read(user_id, move |s, u| s.load_credential(u, account))
            .await?
            .ok_or_else(|| {
                TradeError::Config(format!(
                    "No API token configured for {} account",
                    account.as_str()
                ))
            })?;

        let previous = self.read(user_id, |s, u| s.load_status(u)).await.unwrap_or_else(|e| {
            warn!(user_id, error = %e, "previous status unreadable");
            None
        });
        let status = SessionStatus::starting(&settings, previous);
        self.deps.writer.save_status(user_id, &status);

        let (running, running_rx) = watch::channel(true);
        let manager = ConnectionManager::new(
            user_id.to_string(),
            settings,
            token,
            status,
            self.deps.clone(),
            running_rx,
        );
        let task = tokio::spawn(manager.run());
        *guard = Some(SessionHandle { running, task });

        info!(user_id, "▶️ Session started");
        Ok(())
    }

    /// Stop trading for `user_id`. Safe to call at any time, any number of times.
    ///
    /// Once this returns the session places no more orders, makes no more
    /// connection attempts, and its stopped snapshot is durable.
    pub async fn stop(&self, user_id: &str) {
        let slot = self.slot(user_id);
        {
            let mut guard = slot.lock().await;
            let final_status = match guard.take() {
                Some(handle) => self.halt(user_id, handle).await,
                None => None,
            };
            self.persist_stopped(user_id, final_status).await;
        }
        self.release_slot(user_id, slot);
    }

    async fn persist_stopped(&self, user_id: &str, final_status: Option<SessionStatus>) {
        // Whatever the session queued lands before the snapshot is read back.
        self.deps.writer.flush().await;
        let mut status = match final_status {
            Some(s) => s,
            None => match self.read(user_id, |s, u| s.load_status(u)).await {
                Ok(Some(s)) => s,
                Ok(None) => return,
                Err(e) => {
                    warn!(user_id, error = %e, "status unreadable; nothing to stop");
                    return;
                }
            },
        };

        // Already stopped (manually, by a risk limit, or a failed start).
        if !status.is_active {
            debug!(user_id, "session already stopped");
            return;
        }

        status.consecutive_losses = 0;
        status.mark_stopped("Trading stopped");
        self.deps.writer.save_status(user_id, &status);
        self.deps.writer.flush().await;
        info!(user_id, profit = status.session_profit, "⏹️ Session stopped");
    }

    /// Signal the task, wait out the grace period, abort if it overruns.
    async fn halt(&self, user_id: &str, handle: SessionHandle) -> Option<SessionStatus> {
        let SessionHandle { running, mut task } = handle;
        let _ = running.send(false);
        match tokio::time::timeout(self.deps.engine.stop_grace, &mut task).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                error!(user_id, error = %e, "session task failed");
                None
            }
            Err(_) => {
                warn!(user_id, "session task did not stop in time; aborting");
                task.abort();
                None
            }
        }
    }

    /// Last durable snapshot merged with the live running flag.
    pub async fn status(&self, user_id: &str) -> SessionStatus {
        let live = match self.existing_slot(user_id) {
            Some(slot) => slot.lock().await.as_ref().is_some_and(SessionHandle::is_live),
            None => false,
        };

        self.deps.writer.flush().await;
        let mut status = match self.read(user_id, |s, u| s.load_status(u)).await {
            Ok(Some(s)) => s,
            Ok(None) => SessionStatus::default(),
            Err(e) => {
                warn!(user_id, error = %e, "status unreadable; reporting defaults");
                SessionStatus::default()
            }
        };
        status.is_active = live;
        status.status = if live { RunStatus::Running } else { RunStatus::Stopped };
        status
    }

    /// Restart every session durably marked active. Returns how many started.
    pub async fn restore_all(&self) -> usize {
        let users = match store::blocking(&self.deps.store, |s| s.active_users()).await {
            Ok(users) => users,
            Err(e) => {
                error!(error = %e, "cannot list active sessions");
                return 0;
            }
        };
        info!(count = users.len(), "♻️ Restoring active sessions");

        let mut restored = 0;
        for user_id in &users {
            match self.start(user_id).await {
                Ok(()) => restored += 1,
                Err(e) => warn!(user_id = %user_id, error = %e, "session restore failed"),
            }
        }
        info!(restored, total = users.len(), "♻️ Restore complete");
        restored
    }

    /// Trade history for `user_id`, newest first.
    pub async fn trades(&self, user_id: &str) -> Result<Vec<TradeRecord>, TradeError> {
        self.deps.writer.flush().await;
        Ok(self.read(user_id, |s, u| s.trades_for(u)).await?)
    }

    /// Number of sessions currently running. A slot busy with a start or
    /// stop is not counted.
    pub fn live_sessions(&self) -> usize {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots
            .values()
            .filter(|slot| {
                slot.try_lock()
                    .map(|g| g.as_ref().is_some_and(SessionHandle::is_live))
                    .unwrap_or(false)
            })
            .count()
    }

    /// Halt every session task for process exit. Durable flags are untouched.
    pub async fn shutdown(&self) {
        let slots: Vec<(UserId, Slot)> = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots.drain().collect()
        };
        for (user_id, slot) in slots {
            if let Some(handle) = slot.lock().await.take() {
                self.halt(&user_id, handle).await;
            }
        }
        self.deps.writer.flush().await;
        info!("⚡ All sessions halted");
    }
}
