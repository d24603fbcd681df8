//! Core domain types and logic.

pub mod backtest;
pub mod condition;
pub mod condition_eval;
pub mod condition_parser;
pub mod error;
pub mod indicator;
pub mod metrics;
pub mod ohlcv;
pub mod portfolio;
pub mod position;
pub mod signal;
pub mod strategy;
