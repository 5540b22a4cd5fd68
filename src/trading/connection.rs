//! Per-session venue state machine.
//!
//! One task per user owns the connection, the candle window, the counters and
//! the pending order. The registry reaches it only through the `running`
//! watch flag, and gets the final [`SessionStatus`] back when the task ends.
//!
//! ```text
//! DISCONNECTED → CONNECTING → AUTHENTICATING → SUBSCRIBED ─┐
//!                    ▲                                      │ close / error
//!                    └──────── RECONNECT_WAIT (fixed) ◄─────┘
//! ```

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::candles::{CandleWindow, WindowUpdate};
use super::messages::{parse_message, ContractUpdate, VenueEvent, VenueRequest};
use super::risk::{self, RiskStop};
use super::signal::{self, Signal};
use super::stake::{next_stake, round_cents};
use super::types::{
    Direction, SessionStatus, Settlement, TradeRecord, TradeResult, TradingSettings, UserId,
};
use super::venue::{Connector, LinkEvent, VenueLink};
use crate::config::EngineConfig;
use crate::error::TradeError;
use crate::store::{Store, StoreWriter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    Connecting,
    Authenticating,
    Subscribed,
    ReconnectWait,
}

/// Collaborators shared by every session the registry spawns.
#[derive(Clone)]
pub struct SessionDeps {
    pub connector: Arc<dyn Connector>,
    /// Read side; the registry loads settings and snapshots from it.
    pub store: Arc<dyn Store>,
    /// Write side; sessions only enqueue.
    pub writer: StoreWriter,
    pub engine: EngineConfig,
}

impl SessionDeps {
    /// Spawns the store writer, so this must run inside the tokio runtime.
    pub fn new(connector: Arc<dyn Connector>, store: Arc<dyn Store>, engine: EngineConfig) -> Self {
        let (writer, _) = StoreWriter::spawn(Arc::clone(&store));
        Self { connector, store, writer, engine }
    }
}

#[derive(Debug, Clone)]
enum PendingOrder {
    /// Buy sent, acknowledgment outstanding.
    Submitted { direction: Direction, stake: f64, signal: Signal },
    /// Accepted; waiting for the contract to settle.
    Open { contract_id: String, trade_id: String },
}

pub struct ConnectionManager {
    user_id: UserId,
    settings: TradingSettings,
    token: String,
    deps: SessionDeps,
    running: watch::Receiver<bool>,

    state: ConnState,
    window: CandleWindow,
    status: SessionStatus,
    order: Option<PendingOrder>,
    risk_stop: Option<RiskStop>,
    connects: u32,
}

impl ConnectionManager {
    pub fn new(
        user_id: UserId,
        settings: TradingSettings,
        token: String,
        status: SessionStatus,
        deps: SessionDeps,
        running: watch::Receiver<bool>,
    ) -> Self {
        let window = CandleWindow::new(deps.engine.window_capacity);
        Self {
            user_id,
            settings,
            token,
            deps,
            running,
            state: ConnState::Disconnected,
            window,
            status,
            order: None,
            risk_stop: None,
            connects: 0,
        }
    }

    /// Run until halted or stopped by a risk limit. Returns the last snapshot.
    pub async fn run(mut self) -> SessionStatus {
        info!(
            user_id = %self.user_id,
            market = %self.settings.selected_market,
            account = self.settings.account_type.as_str(),
            stake = self.status.current_stake,
            "🚀 Session task started"
        );

        if self.token.trim().is_empty() {
            let err = TradeError::Credential(format!(
                "no {} token for session",
                self.settings.account_type.as_str()
            ));
            warn!(user_id = %self.user_id, error = %err, "❌ Cannot connect");
            self.status.last_error = Some(err.to_string());
            self.status.mark_stopped(format!("Error: {err}"));
            self.persist();
            return self.status;
        }

        while self.is_running() {
            self.state = ConnState::Connecting;
            self.connects += 1;
            debug!(user_id = %self.user_id, attempt = self.connects, "🔌 Connecting to venue");

            let connected = tokio::select! {
                res = self.deps.connector.connect() => res,
                _ = halted(&mut self.running) => break,
            };

            match connected {
                Ok(link) => self.drive(link).await,
                Err(e) => {
                    warn!(user_id = %self.user_id, error = %e, "🔌 Venue connect failed");
                    self.note_connection_error();
                }
            }
            self.state = ConnState::Disconnected;

            if !self.is_running() {
                break;
            }

            self.state = ConnState::ReconnectWait;
            info!(
                user_id = %self.user_id,
                delay_ms = self.deps.engine.reconnect_delay.as_millis() as u64,
                "🔌 Reconnecting after delay"
            );
            tokio::select! {
                _ = tokio::time::sleep(self.deps.engine.reconnect_delay) => {}
                _ = halted(&mut self.running) => break,
            }
        }

        self.state = ConnState::Disconnected;
        info!(
            user_id = %self.user_id,
            profit = self.status.session_profit,
            losses = self.status.consecutive_losses,
            risk_stop = ?self.risk_stop,
            "🏁 Session task finished"
        );
        self.status
    }

    fn is_running(&self) -> bool {
        self.risk_stop.is_none() && self.running.has_changed().is_ok() && *self.running.borrow()
    }

    /// Pump one link until it closes, the session halts, or a limit stops it.
    async fn drive(&mut self, mut link: VenueLink) {
        self.state = ConnState::Authenticating;
        let auth = VenueRequest::Authorize { token: self.token.clone() };
        if let Err(e) = link.send(auth.encode()).await {
            warn!(user_id = %self.user_id, error = %e, "authorize send failed");
            self.note_connection_error();
            return;
        }

        loop {
            let event = tokio::select! {
                ev = link.inbound.recv() => ev,
                _ = halted(&mut self.running) => return,
            };

            let text = match event {
                Some(LinkEvent::Text(text)) => text,
                Some(LinkEvent::Closed(reason)) => {
                    warn!(user_id = %self.user_id, ?reason, "🔌 Venue connection closed");
                    self.note_connection_error();
                    return;
                }
                None => {
                    warn!(user_id = %self.user_id, "🔌 Venue link dropped");
                    self.note_connection_error();
                    return;
                }
            };

            // A halt that raced this message wins; the message is discarded.
            if !self.is_running() {
                return;
            }

            match self.handle_text(&link, &text).await {
                Ok(()) => {}
                Err(TradeError::Connection(msg)) => {
                    warn!(user_id = %self.user_id, %msg, "🔌 Send failed");
                    self.note_connection_error();
                    return;
                }
                Err(e) => {
                    warn!(user_id = %self.user_id, error = %e, "dropping venue message");
                    self.status.last_error = Some(e.to_string());
                    self.persist();
                }
            }

            if self.risk_stop.is_some() {
                return;
            }
        }
    }

    async fn handle_text(&mut self, link: &VenueLink, text: &str) -> Result<(), TradeError> {
        match parse_message(text)? {
            VenueEvent::Authorized { balance } => self.on_authorized(link, balance).await,
            VenueEvent::Balance { balance } => {
                self.status.balance = balance;
                self.persist();
                Ok(())
            }
            VenueEvent::History(batch) => {
                debug!(user_id = %self.user_id, count = batch.len(), "candle history");
                self.window.replace(batch);
                self.evaluate(link).await
            }
            VenueEvent::Ohlc(candle) => match self.window.apply(candle) {
                WindowUpdate::Appended => self.evaluate(link).await,
                WindowUpdate::Revised => Ok(()),
                WindowUpdate::Stale => {
                    debug!(user_id = %self.user_id, epoch = candle.epoch, "stale candle ignored");
                    Ok(())
                }
            },
            VenueEvent::BuyAccepted { contract_id, buy_price } => {
                self.on_buy_accepted(link, contract_id, buy_price).await
            }
            VenueEvent::Contract(update) => {
                self.on_contract(update);
                Ok(())
            }
            VenueEvent::Rejected { msg_type, message } => {
                self.on_rejected(msg_type.as_deref(), message);
                Ok(())
            }
            VenueEvent::Other(kind) => {
                debug!(user_id = %self.user_id, %kind, "ignored venue message");
                Ok(())
            }
        }
    }

    async fn on_authorized(&mut self, link: &VenueLink, balance: f64) -> Result<(), TradeError> {
        info!(user_id = %self.user_id, balance, "✅ Authorized");
        self.status.balance = balance;
        self.status.last_signal = "Connected and authorized".to_string();
        self.status.last_error = None;

        link.send(VenueRequest::SubscribeBalance.encode()).await?;
        let candles = VenueRequest::SubscribeCandles {
            symbol: self.settings.selected_market.clone(),
        };
        link.send(candles.encode()).await?;

        if matches!(self.order, Some(PendingOrder::Submitted { .. })) {
            warn!(user_id = %self.user_id, "buy acknowledgment lost with previous connection; releasing order");
            self.order = None;
        }
        if let Some(PendingOrder::Open { contract_id, .. }) = &self.order {
            info!(user_id = %self.user_id, %contract_id, "re-subscribing open contract");
            let req = VenueRequest::SubscribeContract { contract_id: contract_id.clone() };
            link.send(req.encode()).await?;
        }

        self.state = ConnState::Subscribed;
        self.persist();
        Ok(())
    }

    async fn evaluate(&mut self, link: &VenueLink) -> Result<(), TradeError> {
        if !self.is_running() || self.order.is_some() || self.state != ConnState::Subscribed {
            return Ok(());
        }

        let signal = signal::evaluate(
            &self.window.snapshot(),
            self.settings.atr_threshold,
            &self.deps.engine.signal,
        );
        let Some(direction) = signal.direction() else {
            let reason = signal.reason();
            if self.status.last_signal != reason {
                self.status.last_signal = reason;
                self.persist();
            }
            return Ok(());
        };

        let stake = self.status.current_stake;
        info!(
            user_id = %self.user_id,
            direction = direction.as_str(),
            stake,
            sma5 = signal.sma_fast,
            sma6 = signal.sma_slow,
            atr = signal.atr,
            "📈 Placing order"
        );
        self.status.last_signal = format!("Placing {} trade at ${:.2}", direction.as_str(), stake);
        self.order = Some(PendingOrder::Submitted { direction, stake, signal });
        self.persist();

        let buy = VenueRequest::Buy {
            direction,
            stake,
            symbol: self.settings.selected_market.clone(),
        };
        link.send(buy.encode()).await
    }

    async fn on_buy_accepted(
        &mut self,
        link: &VenueLink,
        contract_id: String,
        buy_price: Option<f64>,
    ) -> Result<(), TradeError> {
        let (direction, stake, signal) = match self.order.take() {
            Some(PendingOrder::Submitted { direction, stake, signal }) => (direction, stake, signal),
            other => {
                self.order = other;
                warn!(user_id = %self.user_id, %contract_id, "buy acknowledgment without a submitted order");
                return Ok(());
            }
        };

        let record = TradeRecord {
            id: Uuid::new_v4().to_string(),
            user_id: self.user_id.clone(),
            contract_id: Some(contract_id.clone()),
            market: self.settings.selected_market.clone(),
            direction,
            stake: buy_price.unwrap_or(stake),
            account_type: self.settings.account_type,
            entry_time: Utc::now(),
            result: TradeResult::Pending,
            exit_time: None,
            exit_price: None,
            profit: None,
            sma5: Some(signal.sma_fast),
            sma6: Some(signal.sma_slow),
            atr: Some(signal.atr),
        };
        self.deps.writer.open_trade(&record);
        info!(user_id = %self.user_id, %contract_id, trade_id = %record.id, "✅ Order accepted");

        self.order = Some(PendingOrder::Open { contract_id: contract_id.clone(), trade_id: record.id });
        link.send(VenueRequest::SubscribeContract { contract_id }.encode()).await
    }

    fn on_contract(&mut self, update: ContractUpdate) {
        if !update.settled {
            return;
        }
        let (contract_id, trade_id) = match &self.order {
            Some(PendingOrder::Open { contract_id, trade_id }) => (contract_id.clone(), trade_id.clone()),
            _ => {
                debug!(user_id = %self.user_id, contract_id = ?update.contract_id, "settlement without open order");
                return;
            }
        };
        if update.contract_id.as_deref().is_some_and(|id| id != contract_id) {
            debug!(user_id = %self.user_id, contract_id = ?update.contract_id, "settlement for another contract");
            return;
        }
        self.order = None;

        let result = TradeResult::from_profit(update.profit);
        let settlement = Settlement {
            result,
            profit: update.profit,
            exit_price: update.exit_price,
            exit_time: Utc::now(),
        };
        self.deps.writer.settle_trade(&trade_id, &settlement);

        let st = &mut self.status;
        st.consecutive_losses = match result {
            TradeResult::Win => 0,
            _ => st.consecutive_losses + 1,
        };
        st.session_profit = round_cents(st.session_profit + update.profit);
        st.current_stake = next_stake(result, st.current_stake, &self.settings);
        st.last_signal = match result {
            TradeResult::Win => format!("Trade WON: {}", signed_usd(update.profit)),
            _ => format!("Trade LOST: {}", signed_usd(update.profit)),
        };
        info!(
            user_id = %self.user_id,
            %contract_id,
            result = ?result,
            profit = update.profit,
            session_profit = st.session_profit,
            losses = st.consecutive_losses,
            next_stake = st.current_stake,
            "💰 Contract settled"
        );
        self.persist();

        if let Some(stop) = risk::evaluate(
            &self.settings,
            self.status.consecutive_losses,
            self.status.session_profit,
        ) {
            warn!(user_id = %self.user_id, reason = stop.reason(), "🛑 Risk limit reached");
            self.status.mark_stopped(stop.to_string());
            self.risk_stop = Some(stop);
            self.persist();
        }
    }

    fn on_rejected(&mut self, msg_type: Option<&str>, message: String) {
        warn!(user_id = %self.user_id, ?msg_type, %message, "❌ Venue error");
        if msg_type == Some("buy") && matches!(self.order, Some(PendingOrder::Submitted { .. })) {
            self.order = None;
        }
        self.status.last_signal = format!("Error: {message}");
        self.status.last_error = Some(message);
        self.persist();
    }

    fn note_connection_error(&mut self) {
        if self.is_running() {
            self.status.last_error = Some("Connection error".to_string());
            self.persist();
        }
    }

    fn persist(&self) {
        self.deps.writer.save_status(&self.user_id, &self.status);
    }
}

/// `+$0.95`, `-$2.00`; break-even reads `+$0.00`.
fn signed_usd(amount: f64) -> String {
    if amount >= 0.0 {
        format!("+${:.2}", amount)
    } else {
        format!("-${:.2}", amount.abs())
    }
}

/// Resolves once the session is told to stop, or its controller is gone.
async fn halted(running: &mut watch::Receiver<bool>) {
    loop {
        if !*running.borrow_and_update() {
            return;
        }
        if running.changed().await.is_err() {
            return;
        }
    }
}
