//! Trade Backfill Library
//!
//! Resumable historical-trade download for exchange/pair selectors.
//! Exposes the engine, adapters and store for the binary and tests.

pub mod backfill;
pub mod config;
pub mod error;
pub mod exchange;
pub mod models;
pub mod selector;
pub mod storage;

pub use error::BackfillError;
