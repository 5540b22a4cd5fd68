//! Rolling candle window fed by the venue's history batch and live OHLC stream.

use std::collections::VecDeque;

use super::types::Candle;

pub const WINDOW_CAPACITY: usize = 20;

/// What an incremental update did to the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowUpdate {
    /// A new candle opened; the oldest may have been evicted.
    Appended,
    /// The still-open candle was overwritten in place.
    Revised,
    /// Update older than the newest stored candle; ignored.
    Stale,
}

#[derive(Debug, Clone)]
pub struct CandleWindow {
    candles: VecDeque<Candle>,
    capacity: usize,
}

impl CandleWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            candles: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Replace the whole window with a history batch (oldest first).
    pub fn replace(&mut self, batch: Vec<Candle>) {
        self.candles.clear();
        let skip = batch.len().saturating_sub(self.capacity);
        self.candles.extend(batch.into_iter().skip(skip));
    }

    /// Apply one live candle update.
    pub fn apply(&mut self, candle: Candle) -> WindowUpdate {
        match self.candles.back_mut() {
            Some(last) if candle.epoch == last.epoch => {
                *last = candle;
                WindowUpdate::Revised
            }
            Some(last) if candle.epoch < last.epoch => WindowUpdate::Stale,
            _ => {
                self.candles.push_back(candle);
                while self.candles.len() > self.capacity {
                    self.candles.pop_front();
                }
                WindowUpdate::Appended
            }
        }
    }

    /// Oldest-first copy of the window for indicator math.
    pub fn snapshot(&self) -> Vec<Candle> {
        self.candles.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(epoch: i64, close: f64) -> Candle {
        Candle { epoch, open: close, high: close, low: close, close }
    }

    fn closes(w: &CandleWindow) -> Vec<f64> {
        w.snapshot().iter().map(|c| c.close).collect()
    }

    #[test]
    fn evicts_oldest_past_capacity() {
        let mut w = CandleWindow::new(WINDOW_CAPACITY);
        for i in 0..25 {
            assert_eq!(w.apply(c(i * 60, i as f64)), WindowUpdate::Appended);
        }
        assert_eq!(w.snapshot().len(), WINDOW_CAPACITY);
        assert_eq!(w.snapshot()[0].epoch, 5 * 60);
        assert_eq!(w.snapshot().last().map(|c| c.epoch), Some(24 * 60));
    }

    #[test]
    fn same_epoch_revises_open_candle() {
        let mut w = CandleWindow::new(WINDOW_CAPACITY);
        w.apply(c(60, 1.0));
        w.apply(c(120, 2.0));
        assert_eq!(w.apply(c(120, 2.5)), WindowUpdate::Revised);
        assert_eq!(w.snapshot().len(), 2);
        assert_eq!(closes(&w), vec![1.0, 2.5]);
    }

    #[test]
    fn older_epoch_is_ignored() {
        let mut w = CandleWindow::new(WINDOW_CAPACITY);
        w.apply(c(120, 2.0));
        assert_eq!(w.apply(c(60, 9.0)), WindowUpdate::Stale);
        assert_eq!(closes(&w), vec![2.0]);
    }

    #[test]
    fn replace_keeps_newest_candles() {
        let mut w = CandleWindow::new(3);
        w.apply(c(1, 100.0));
        w.replace((0..5).map(|i| c(i * 60, i as f64)).collect());
        assert_eq!(closes(&w), vec![2.0, 3.0, 4.0]);
        assert_eq!(w.snapshot().last().map(|c| c.epoch), Some(240));
    }
}
