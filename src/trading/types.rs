use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TradeError;

pub type UserId = String;

/// Market the dashboard falls back to when a user has never traded.
pub const DEFAULT_MARKET: &str = "R_10";

/// One-minute OHLC aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub epoch: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Rise,
    Fall,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Rise => "RISE",
            Direction::Fall => "FALL",
        }
    }

    /// Venue contract type for a one-minute rise/fall option.
    pub fn contract_type(&self) -> &'static str {
        match self {
            Direction::Rise => "CALL",
            Direction::Fall => "PUT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeResult {
    Pending,
    Win,
    Loss,
}

impl TradeResult {
    /// Strictly positive profit is the only win; break-even counts as a loss.
    pub fn from_profit(profit: f64) -> Self {
        if profit > 0.0 {
            TradeResult::Win
        } else {
            TradeResult::Loss
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TradeResult::Pending => "PENDING",
            TradeResult::Win => "WIN",
            TradeResult::Loss => "LOSS",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    #[default]
    Demo,
    Live,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Demo => "demo",
            AccountType::Live => "live",
        }
    }
}

/// User trading settings, captured once when a session starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradingSettings {
    pub initial_stake: f64,
    pub martingale_factor: f64,
    pub max_consecutive_losses: u32,
    pub max_consecutive_losses_enabled: bool,
    pub max_stake: f64,
    pub max_stake_enabled: bool,
    pub daily_loss_limit: f64,
    pub daily_loss_limit_enabled: bool,
    pub atr_threshold: f64,
    pub selected_market: String,
    pub account_type: AccountType,
}

impl Default for TradingSettings {
    fn default() -> Self {
        Self {
            initial_stake: 1.0,
            martingale_factor: 2.0,
            max_consecutive_losses: 5,
            max_consecutive_losses_enabled: true,
            max_stake: 100.0,
            max_stake_enabled: true,
            daily_loss_limit: 50.0,
            daily_loss_limit_enabled: true,
            atr_threshold: 0.0005,
            selected_market: DEFAULT_MARKET.to_string(),
            account_type: AccountType::Demo,
        }
    }
}

impl TradingSettings {
    /// Reject settings that would break the stake or risk invariants.
    pub fn validate(&self) -> Result<(), TradeError> {
        let bad = |msg: String| Err(TradeError::Config(msg));

        if !(self.initial_stake > 0.0) {
            return bad(format!("initial stake must be positive, got {}", self.initial_stake));
        }
        if !(self.martingale_factor >= 1.0) {
            return bad(format!(
                "martingale factor must be at least 1, got {}",
                self.martingale_factor
            ));
        }
        if self.max_stake_enabled && self.max_stake < self.initial_stake {
            return bad(format!(
                "max stake {} is below initial stake {}",
                self.max_stake, self.initial_stake
            ));
        }
        if self.max_consecutive_losses_enabled && self.max_consecutive_losses == 0 {
            return bad("max consecutive losses must be at least 1".to_string());
        }
        if self.daily_loss_limit_enabled && !(self.daily_loss_limit > 0.0) {
            return bad(format!(
                "daily loss limit must be positive, got {}",
                self.daily_loss_limit
            ));
        }
        if self.atr_threshold < 0.0 || !self.atr_threshold.is_finite() {
            return bad(format!("invalid ATR threshold {}", self.atr_threshold));
        }
        if self.selected_market.trim().is_empty() {
            return bad("no market selected".to_string());
        }
        Ok(())
    }
}

/// Final outcome of a contract as reported by the venue.
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    pub result: TradeResult,
    pub profit: f64,
    pub exit_price: f64,
    pub exit_time: DateTime<Utc>,
}

/// One placed order. Written PENDING on acceptance, settled exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeRecord {
    pub id: String,
    pub user_id: UserId,
    pub contract_id: Option<String>,
    pub market: String,
    pub direction: Direction,
    pub stake: f64,
    pub account_type: AccountType,
    pub entry_time: DateTime<Utc>,
    pub result: TradeResult,
    pub exit_time: Option<DateTime<Utc>>,
    pub exit_price: Option<f64>,
    pub profit: Option<f64>,
    pub sma5: Option<f64>,
    pub sma6: Option<f64>,
    pub atr: Option<f64>,
}

impl TradeRecord {
    pub fn is_settled(&self) -> bool {
        self.result != TradeResult::Pending
    }

    pub fn apply_settlement(&mut self, s: &Settlement) {
        self.result = s.result;
        self.profit = Some(s.profit);
        self.exit_price = Some(s.exit_price);
        self.exit_time = Some(s.exit_time);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Running,
    Stopped,
}

/// Durable per-user snapshot consumed by the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub is_active: bool,
    pub status: RunStatus,
    pub market: String,
    pub account_type: AccountType,
    pub current_stake: f64,
    pub consecutive_losses: u32,
    pub session_profit: f64,
    pub balance: f64,
    pub last_signal: String,
    pub last_error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            is_active: false,
            status: RunStatus::Stopped,
            market: DEFAULT_MARKET.to_string(),
            account_type: AccountType::Demo,
            current_stake: 1.0,
            consecutive_losses: 0,
            session_profit: 0.0,
            balance: 0.0,
            last_signal: "Not started".to_string(),
            last_error: None,
            started_at: None,
            stopped_at: None,
        }
    }
}

impl SessionStatus {
    /// Fresh snapshot for a session that is about to connect.
    pub fn starting(settings: &TradingSettings, previous: Option<SessionStatus>) -> Self {
        let balance = previous.map(|p| p.balance).unwrap_or(0.0);
        Self {
            is_active: true,
            status: RunStatus::Running,
            market: settings.selected_market.clone(),
            account_type: settings.account_type,
            current_stake: settings.initial_stake,
            consecutive_losses: 0,
            session_profit: 0.0,
            balance,
            last_signal: "Starting...".to_string(),
            last_error: None,
            started_at: Some(Utc::now()),
            stopped_at: None,
        }
    }

    /// Shared by manual and risk-triggered stops.
    pub fn mark_stopped(&mut self, signal: impl Into<String>) {
        self.is_active = false;
        self.status = RunStatus::Stopped;
        self.last_signal = signal.into();
        self.stopped_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_profit_is_a_loss() {
        assert_eq!(TradeResult::from_profit(0.0), TradeResult::Loss);
        assert_eq!(TradeResult::from_profit(-2.0), TradeResult::Loss);
        assert_eq!(TradeResult::from_profit(0.01), TradeResult::Win);
    }

    #[test]
    fn default_settings_are_valid() {
        assert!(TradingSettings::default().validate().is_ok());
    }

    #[test]
    fn rejects_cap_below_initial_stake() {
        let s = TradingSettings {
            initial_stake: 5.0,
            max_stake: 2.0,
            ..TradingSettings::default()
        };
        assert!(matches!(s.validate(), Err(TradeError::Config(_))));

        let uncapped = TradingSettings { max_stake_enabled: false, ..s };
        assert!(uncapped.validate().is_ok());
    }

    #[test]
    fn rejects_shrinking_martingale() {
        let s = TradingSettings {
            martingale_factor: 0.5,
            ..TradingSettings::default()
        };
        assert!(s.validate().is_err());
    }

    #[test]
    fn status_serializes_camel_case() {
        let v = serde_json::to_value(SessionStatus::default()).unwrap();
        assert_eq!(v["isActive"], false);
        assert_eq!(v["status"], "STOPPED");
        assert_eq!(v["accountType"], "demo");
        assert_eq!(v["lastSignal"], "Not started");
    }

    #[test]
    fn mark_stopped_keeps_counters() {
        let mut st = SessionStatus::starting(&TradingSettings::default(), None);
        st.consecutive_losses = 3;
        st.session_profit = -7.0;
        st.mark_stopped("Trading stopped");
        assert!(!st.is_active);
        assert_eq!(st.status, RunStatus::Stopped);
        assert_eq!(st.consecutive_losses, 3);
        assert_eq!(st.session_profit, -7.0);
        assert!(st.stopped_at.is_some());
    }
}
