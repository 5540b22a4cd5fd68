//! Martingale stake sizing.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};

use super::types::{TradeResult, TradingSettings};

/// Round to cents, half away from zero.
pub fn round_cents(value: f64) -> f64 {
    Decimal::from_f64(value)
        .map(|d| d.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|d| d.to_f64())
        .unwrap_or(value)
}

/// Stake for the next order after a settled one.
///
/// WIN resets to the initial stake. LOSS multiplies the previous stake by the
/// martingale factor, rounds to cents, then clamps to the cap when it is
/// enabled. The result never exceeds the cap.
pub fn next_stake(outcome: TradeResult, previous: f64, settings: &TradingSettings) -> f64 {
    let raw = match outcome {
        TradeResult::Loss => previous * settings.martingale_factor,
        TradeResult::Win | TradeResult::Pending => return settings.initial_stake,
    };
    let rounded = round_cents(raw);
    let next = if settings.max_stake_enabled {
        rounded.min(settings.max_stake)
    } else {
        rounded
    };
    // Settings validation keeps this positive; fall back rather than trade zero.
    if next > 0.0 {
        next
    } else {
        settings.initial_stake
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> TradingSettings {
        TradingSettings {
            initial_stake: 1.0,
            martingale_factor: 2.1,
            max_stake: 10.0,
            max_stake_enabled: true,
            ..TradingSettings::default()
        }
    }

    #[test]
    fn win_resets_to_initial() {
        assert_eq!(next_stake(TradeResult::Win, 8.82, &settings()), 1.0);
    }

    #[test]
    fn loss_multiplies_and_rounds() {
        assert_eq!(next_stake(TradeResult::Loss, 1.0, &settings()), 2.1);
        assert_eq!(next_stake(TradeResult::Loss, 2.1, &settings()), 4.41);
        assert_eq!(next_stake(TradeResult::Loss, 4.41, &settings()), 9.26);
    }

    #[test]
    fn loss_is_capped() {
        assert_eq!(next_stake(TradeResult::Loss, 9.26, &settings()), 10.0);
        let uncapped = TradingSettings { max_stake_enabled: false, ..settings() };
        assert_eq!(next_stake(TradeResult::Loss, 9.26, &uncapped), 19.45);
    }

    #[test]
    fn off_cent_cap_is_never_exceeded() {
        let s = TradingSettings { max_stake: 10.005, ..settings() };
        let next = next_stake(TradeResult::Loss, 9.26, &s);
        assert!(next <= 10.005, "stake {next} above cap");
        assert_eq!(next, 10.005);
    }

    #[test]
    fn stake_stays_positive() {
        let s = TradingSettings { initial_stake: 0.35, martingale_factor: 1.0, ..settings() };
        for prev in [0.001, 0.004, 0.35] {
            assert!(next_stake(TradeResult::Loss, prev, &s) > 0.0);
        }
    }

    #[test]
    fn rounds_half_away_from_zero() {
        assert_eq!(round_cents(0.125), 0.13);
        assert_eq!(round_cents(2.344), 2.34);
    }
}
