//! SMA/ATR crossover signal, gated on volatility.
//!
//! Pure functions only. Insufficient data never yields a direction and
//! never panics: the indicators fall back to 0.

use super::types::{Candle, Direction};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalConfig {
    pub min_candles: usize,
    pub fast_period: usize,
    pub slow_period: usize,
    pub atr_period: usize,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            min_candles: 10,
            fast_period: 5,
            slow_period: 6,
            atr_period: 14,
        }
    }
}

/// Mean of the last `period` values, or 0 when there are fewer.
pub fn sma(closes: &[f64], period: usize) -> f64 {
    if period == 0 || closes.len() < period {
        return 0.0;
    }
    let tail = &closes[closes.len() - period..];
    tail.iter().sum::<f64>() / period as f64
}

fn true_range(cur: &Candle, prev: &Candle) -> f64 {
    (cur.high - cur.low)
        .max((cur.high - prev.close).abs())
        .max((cur.low - prev.close).abs())
}

/// Simple mean of the last `period` true ranges. Needs `period + 1` candles.
pub fn atr(candles: &[Candle], period: usize) -> f64 {
    if period == 0 || candles.len() < period + 1 {
        return 0.0;
    }
    let ranges: Vec<f64> = candles
        .windows(2)
        .map(|pair| true_range(&pair[1], &pair[0]))
        .collect();
    let tail = &ranges[ranges.len() - period..];
    tail.iter().sum::<f64>() / period as f64
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SignalKind {
    Waiting { have: usize, need: usize },
    LowVolatility,
    Flat,
    Enter(Direction),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub kind: SignalKind,
    pub sma_fast: f64,
    pub sma_slow: f64,
    pub atr: f64,
}

impl Signal {
    pub fn direction(&self) -> Option<Direction> {
        match self.kind {
            SignalKind::Enter(d) => Some(d),
            _ => None,
        }
    }

    /// Human-readable reason written to the session's `lastSignal`.
    pub fn reason(&self) -> String {
        match self.kind {
            SignalKind::Waiting { have, need } => format!("Waiting for candles ({have}/{need})"),
            SignalKind::LowVolatility => "Low volatility - ATR below threshold".to_string(),
            SignalKind::Flat => "No clear signal - SMAs equal".to_string(),
            SignalKind::Enter(Direction::Rise) => "SMA5 crossed above SMA6 - Bullish".to_string(),
            SignalKind::Enter(Direction::Fall) => "SMA5 crossed below SMA6 - Bearish".to_string(),
        }
    }
}

/// Decision table over precomputed indicator values.
pub fn decide(sma_fast: f64, sma_slow: f64, atr: f64, atr_threshold: f64) -> SignalKind {
    if atr < atr_threshold {
        SignalKind::LowVolatility
    } else if sma_fast > sma_slow {
        SignalKind::Enter(Direction::Rise)
    } else if sma_fast < sma_slow {
        SignalKind::Enter(Direction::Fall)
    } else {
        SignalKind::Flat
    }
}

/// Evaluate the window. Fewer than `min_candles` candles only ever waits.
pub fn evaluate(candles: &[Candle], atr_threshold: f64, cfg: &SignalConfig) -> Signal {
    if candles.len() < cfg.min_candles {
        return Signal {
            kind: SignalKind::Waiting { have: candles.len(), need: cfg.min_candles },
            sma_fast: 0.0,
            sma_slow: 0.0,
            atr: 0.0,
        };
    }

    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let sma_fast = sma(&closes, cfg.fast_period);
    let sma_slow = sma(&closes, cfg.slow_period);
    let atr = atr(candles, cfg.atr_period);

    Signal {
        kind: decide(sma_fast, sma_slow, atr, atr_threshold),
        sma_fast,
        sma_slow,
        atr,
    }
}
