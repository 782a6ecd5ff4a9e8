//! Per-run backfill state
//!
//! Owned by the engine loop and threaded through every step. Nothing here is
//! shared across runs except what is persisted in the marker.

use serde::Serialize;

use super::direction::ScanPlan;
use super::progress::ProgressReporter;
use super::retry::{EmptyBatchRetry, TransientBackoff};
use crate::config::RetryConfig;
use crate::exchange::{ScanDirection, TradeQuery};
use crate::models::{Cursor, ResumeMarker};
use crate::selector::Selector;

/// Leading trade and request of the previous non-empty batch.
#[derive(Debug, Clone)]
pub struct LastBatch {
    pub leading_trade_id: String,
    pub query: TradeQuery,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub trades_persisted: u64,
    pub batches: u64,
    pub empty_polls: u64,
    /// Total time spent waiting on empty forward windows.
    pub empty_wait_ms: u64,
    pub transient_retries: u64,
    pub persist_retries: u64,
    pub skips: u64,
}

#[derive(Debug)]
pub struct BackfillSession {
    pub selector: Selector,
    pub plan: ScanPlan,
    pub marker: ResumeMarker,
    /// Other sessions' markers, ordered for coalescing.
    pub siblings: Vec<ResumeMarker>,
    /// Forward only: lower bound used until the marker has a `to`.
    pub start_cursor: Option<Cursor>,
    pub last_batch: Option<LastBatch>,
    pub empty_retry: EmptyBatchRetry,
    pub backoff: TransientBackoff,
    pub progress: ProgressReporter,
    pub stats: SessionStats,
}

impl BackfillSession {
    pub fn new(
        selector: Selector,
        plan: ScanPlan,
        siblings: Vec<ResumeMarker>,
        start_cursor: Option<Cursor>,
        retry: &RetryConfig,
    ) -> Self {
        let progress = ProgressReporter::new(&plan);
        Self {
            marker: ResumeMarker::new(&selector),
            selector,
            plan,
            siblings,
            start_cursor,
            last_batch: None,
            empty_retry: EmptyBatchRetry::new(retry),
            backoff: TransientBackoff::new(retry),
            progress,
            stats: SessionStats::default(),
        }
    }

    pub fn direction(&self) -> ScanDirection {
        self.plan.direction
    }

    /// Next page request. Backward asks for trades before the oldest cursor
    /// seen; forward asks for trades after the newest (or the start cursor).
    pub fn next_query(&self, offset: Option<u64>) -> TradeQuery {
        let mut query = TradeQuery::new(&self.selector.product_id);
        query.offset = offset;
        match self.direction() {
            ScanDirection::Backward => query.to = self.marker.from,
            ScanDirection::Forward => {
                query.from = self.marker.to.map(|to| to + 1).or(self.start_cursor)
            }
        }
        query
    }

    /// Forward only: slide the request window past an empty stretch.
    pub fn advance_window(&mut self, step_ms: i64) {
        match self.marker.to.as_mut() {
            Some(to) => *to += step_ms,
            None => {
                if let Some(start) = self.start_cursor.as_mut() {
                    *start += step_ms;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backfill::direction::BackfillWindow;

    fn session(direction: ScanDirection, start_cursor: Option<Cursor>) -> BackfillSession {
        let plan = ScanPlan::resolve(Some(direction), &BackfillWindow::span(1_000, 5_000), 10_000)
            .unwrap();
        BackfillSession::new(
            Selector::parse("binance.ADA-USDT").unwrap(),
            plan,
            Vec::new(),
            start_cursor,
            &RetryConfig::default(),
        )
    }

    #[test]
    fn test_backward_first_query_is_unbounded() {
        let mut s = session(ScanDirection::Backward, None);
        let q = s.next_query(None);
        assert_eq!(q.product_id, "ADA-USDT");
        assert_eq!((q.from, q.to), (None, None));

        s.marker.absorb(500, 5_000, ScanDirection::Backward);
        s.marker.absorb(450, 4_500, ScanDirection::Backward);
        assert_eq!(s.next_query(Some(3)).to, Some(450));
        assert_eq!(s.next_query(Some(3)).offset, Some(3));
    }

    #[test]
    fn test_forward_query_starts_at_start_cursor() {
        let mut s = session(ScanDirection::Forward, Some(1_000));
        assert_eq!(s.next_query(None).from, Some(1_000));

        s.marker.absorb(1_200, 1_200, ScanDirection::Forward);
        assert_eq!(s.next_query(None).from, Some(1_201));
    }

    #[test]
    fn test_advance_window_before_and_after_first_trade() {
        let mut s = session(ScanDirection::Forward, Some(1_000));
        s.advance_window(10);
        assert_eq!(s.start_cursor, Some(1_010));
        assert_eq!(s.marker.to, None);
        assert_eq!(s.next_query(None).from, Some(1_010));

        s.marker.absorb(1_200, 1_200, ScanDirection::Forward);
        s.advance_window(10);
        assert_eq!(s.marker.to, Some(1_210));
        assert_eq!(s.next_query(None).from, Some(1_211));
    }
}
