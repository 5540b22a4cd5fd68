//! Live trading sessions: one actor per user over a streaming venue link.
//!
//! Pure building blocks (`candles`, `signal`, `stake`, `risk`) sit under the
//! per-session state machine in `connection`; `registry` owns the lifecycle.

pub mod candles;
pub mod connection;
pub mod messages;
pub mod registry;
pub mod risk;
pub mod signal;
pub mod stake;
pub mod types;
pub mod venue;

#[cfg(test)]
pub(crate) mod testing;
