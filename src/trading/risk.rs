//! Session stop conditions, checked after every settlement.

use std::fmt;

use super::types::TradingSettings;

/// Which limit stopped the session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RiskStop {
    MaxConsecutiveLosses { limit: u32 },
    DailyLossLimit { limit: f64 },
}

impl RiskStop {
    pub fn reason(&self) -> &'static str {
        match self {
            RiskStop::MaxConsecutiveLosses { .. } => "max consecutive losses reached",
            RiskStop::DailyLossLimit { .. } => "daily loss limit reached",
        }
    }
}

impl fmt::Display for RiskStop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskStop::MaxConsecutiveLosses { limit } => {
                write!(f, "Stopped: {} ({})", self.reason(), limit)
            }
            RiskStop::DailyLossLimit { limit } => {
                write!(f, "Stopped: {} (${:.2})", self.reason(), limit)
            }
        }
    }
}

/// First matching limit wins; consecutive losses are checked before the loss limit.
pub fn evaluate(
    settings: &TradingSettings,
    consecutive_losses: u32,
    session_profit: f64,
) -> Option<RiskStop> {
    if settings.max_consecutive_losses_enabled
        && consecutive_losses >= settings.max_consecutive_losses
    {
        return Some(RiskStop::MaxConsecutiveLosses {
            limit: settings.max_consecutive_losses,
        });
    }
    if settings.daily_loss_limit_enabled && session_profit <= -settings.daily_loss_limit {
        return Some(RiskStop::DailyLossLimit {
            limit: settings.daily_loss_limit,
        });
    }
    None
}
