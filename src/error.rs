//! Backfill error types

use thiserror::Error;

use crate::exchange::{FetchError, TradeQuery};
use crate::models::Cursor;

#[derive(Debug, Error)]
pub enum BackfillError {
    #[error("cannot backfill {selector}: exchange not implemented")]
    UnsupportedExchange { selector: String },

    #[error("cannot backfill {selector}: exchange does not offer historical data")]
    NoHistoricalData { selector: String },

    #[error("cannot backfill {selector}: {exchange} cannot position a cursor at a start time")]
    MissingTimeCursor { selector: String, exchange: String },

    #[error("get_trades() failed for {query}")]
    Fetch {
        query: TradeQuery,
        #[source]
        source: FetchError,
    },

    #[error(
        "get_trades() returned no trades after {attempts} attempts from {}; \
         the start may be too far in the past",
        cursor_or_none(.last_from)
    )]
    EmptyRetryExhausted {
        attempts: u32,
        last_from: Option<Cursor>,
    },

    #[error(
        "exchange returned duplicate results: leading trade {trade_id} for {query} \
         (previous request {previous_query})"
    )]
    DuplicateBatch {
        trade_id: String,
        query: TradeQuery,
        previous_query: TradeQuery,
    },

    #[error("store error: {0:#}")]
    Store(anyhow::Error),
}

fn cursor_or_none(cursor: &Option<Cursor>) -> String {
    cursor.map_or_else(|| "none".to_string(), |c| c.to_string())
}

impl BackfillError {
    /// Process exit status for this outcome. An exchange without history is
    /// reported but counts as a clean exit.
    pub fn exit_code(&self) -> i32 {
        match self {
            BackfillError::NoHistoricalData { .. } => 0,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let no_history = BackfillError::NoHistoricalData {
            selector: "gdax.BTC-USD".to_string(),
        };
        assert_eq!(no_history.exit_code(), 0);

        let unsupported = BackfillError::UnsupportedExchange {
            selector: "kraken.BTC-USD".to_string(),
        };
        assert_eq!(unsupported.exit_code(), 1);
        assert_eq!(
            unsupported.to_string(),
            "cannot backfill kraken.BTC-USD: exchange not implemented"
        );

        let dup = BackfillError::DuplicateBatch {
            trade_id: "7".to_string(),
            query: TradeQuery::new("BTC-USD"),
            previous_query: TradeQuery::new("BTC-USD"),
        };
        assert_eq!(dup.exit_code(), 1);
        assert!(dup.to_string().contains("duplicate results"));
    }

    #[test]
    fn test_empty_retry_message_shows_bare_cursor() {
        let err = BackfillError::EmptyRetryExhausted {
            attempts: 3,
            last_from: Some(1_003),
        };
        let msg = err.to_string();
        assert!(msg.contains("after 3 attempts from 1003;"), "{msg}");
        assert!(!msg.contains("Some"));

        let err = BackfillError::EmptyRetryExhausted {
            attempts: 3,
            last_from: None,
        };
        assert!(err.to_string().contains("from none;"));
    }

    #[test]
    fn test_store_error_keeps_context_chain() {
        let err = BackfillError::Store(
            anyhow::anyhow!("disk full").context("Failed to upsert marker abcd0001"),
        );
        assert_eq!(err.exit_code(), 1);
        assert_eq!(
            err.to_string(),
            "store error: Failed to upsert marker abcd0001: disk full"
        );
    }
}
