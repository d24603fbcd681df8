//! tradesim: declarative trading-strategy evaluation and backtesting engine.
//!
//! Pure computation library: the caller supplies materialized bar sequences
//! and a strategy description; the engine returns in-memory result
//! structures. Domain logic lives in [`domain`], boundary traits in
//! [`ports`].

pub mod domain;
pub mod ports;
