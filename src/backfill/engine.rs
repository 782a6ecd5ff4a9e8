//! Backfill state machine
//!
//! ```text
//! Fetching ─► Empty ─────────────────────────────────────────► Complete
//!    │          └─(forward, retry)─► Fetching
//!    └─► Sorting ─► DuplicateCheck ─► Persisting ─► Reconciling ─► Scheduling
//!                        │               ▲   │                        │
//!                        ▼ (abort)       └───┘ (retry whole batch)    ├─► Complete
//!                                                                     └─► Fetching
//! ```
//!
//! Each [`BackfillEngine::step`] performs one transition. Aborts surface as
//! `Err(BackfillError)`.

use chrono::Utc;
use serde::Serialize;
use std::io::Write;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::direction::{BackfillWindow, ScanPlan};
use super::marker::{coalesce, sort_siblings};
use super::retry::EmptyRetryDecision;
use super::session::{BackfillSession, LastBatch, SessionStats};
use crate::config::RetryConfig;
use crate::error::BackfillError;
use crate::exchange::{ExchangeAdapter, ExchangeRegistry, FetchError, ScanDirection, TradeQuery};
use crate::models::{ExchangeTrade, ResumeMarker, Trade};
use crate::selector::Selector;
use crate::storage::BackfillStore;

#[derive(Debug)]
pub enum BackfillState {
    Fetching,
    Empty {
        query: TradeQuery,
    },
    Sorting {
        query: TradeQuery,
        trades: Vec<ExchangeTrade>,
    },
    DuplicateCheck {
        query: TradeQuery,
        trades: Vec<ExchangeTrade>,
    },
    Persisting {
        trades: Vec<Trade>,
    },
    Reconciling {
        trades: Vec<Trade>,
    },
    Scheduling {
        batch_len: usize,
    },
    Complete(BackfillOutcome),
}

/// Why a session finished cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackfillOutcome {
    /// Backward: oldest trade reached the target time.
    TargetReached,
    /// Forward: newest trade reached the end of the explicit span.
    SpanComplete,
    /// Backward: the exchange has nothing older.
    HistoryExhausted,
    /// Forward: the window moved past the target with nothing left to fetch.
    CaughtUp,
}

impl BackfillOutcome {
    /// Closing line shown to the operator on stdout.
    pub fn completion_message(&self, plan: &ScanPlan) -> String {
        match (self, plan.span) {
            (BackfillOutcome::HistoryExhausted, _) => {
                "get_trades() returned no trades, we may have exhausted the historical data range."
                    .to_string()
            }
            (BackfillOutcome::SpanComplete, Some((start, end))) => {
                format!("download of span ({} - {}) complete!", start, end)
            }
            _ => "download complete!".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BackfillReport {
    pub selector: String,
    pub direction: ScanDirection,
    pub outcome: BackfillOutcome,
    pub marker: ResumeMarker,
    pub stats: SessionStats,
}

pub struct BackfillEngine {
    exchange: Arc<dyn ExchangeAdapter>,
    store: Arc<dyn BackfillStore>,
    retry: RetryConfig,
}

impl BackfillEngine {
    pub fn new(
        exchange: Arc<dyn ExchangeAdapter>,
        store: Arc<dyn BackfillStore>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            exchange,
            store,
            retry,
        }
    }

    pub fn start(
        &self,
        selector: Selector,
        window: BackfillWindow,
    ) -> Result<BackfillSession, BackfillError> {
        self.start_at(selector, window, Utc::now().timestamp_millis())
    }

    /// Plan the session and load sibling markers. Fails before any request is
    /// made when the exchange cannot serve history.
    pub fn start_at(
        &self,
        selector: Selector,
        window: BackfillWindow,
        now_ms: i64,
    ) -> Result<BackfillSession, BackfillError> {
        let plan = ScanPlan::resolve(self.exchange.history_scan(), &window, now_ms).ok_or_else(
            || BackfillError::NoHistoricalData {
                selector: selector.normalized.clone(),
            },
        )?;

        if plan.is_backward() && window.span.is_some() {
            warn!(
                selector = %selector,
                "Explicit start/end ignored: exchange scans backward, using day count"
            );
        }

        let start_cursor = match plan.start_time {
            Some(time) => Some(self.exchange.cursor_for_time(time).ok_or_else(|| {
                BackfillError::MissingTimeCursor {
                    selector: selector.normalized.clone(),
                    exchange: self.exchange.name().to_string(),
                }
            })?),
            None => None,
        };

        let mut siblings = self
            .store
            .load_markers(&selector.normalized)
            .map_err(BackfillError::Store)?;
        sort_siblings(&mut siblings, plan.direction);

        let session = BackfillSession::new(selector, plan, siblings, start_cursor, &self.retry);
        info!(
            selector = %session.selector,
            marker = %session.marker.id,
            direction = %session.plan.direction,
            target_time = session.plan.target_time,
            siblings = session.siblings.len(),
            "Backfill session started"
        );
        Ok(session)
    }

    /// Drive the session to completion.
    pub async fn run(&self, mut session: BackfillSession) -> Result<BackfillReport, BackfillError> {
        let mut state = BackfillState::Fetching;
        loop {
            state = self.step(&mut session, state).await?;
            if let BackfillState::Complete(outcome) = &state {
                let outcome = *outcome;
                println!("\n{}", outcome.completion_message(&session.plan));
                info!(
                    selector = %session.selector,
                    marker = %session.marker.id,
                    ?outcome,
                    trades = session.stats.trades_persisted,
                    batches = session.stats.batches,
                    "Backfill session complete"
                );
                return Ok(BackfillReport {
                    selector: session.selector.normalized.clone(),
                    direction: session.plan.direction,
                    outcome,
                    marker: session.marker,
                    stats: session.stats,
                });
            }
        }
    }

    /// Perform one transition.
    pub async fn step(
        &self,
        session: &mut BackfillSession,
        state: BackfillState,
    ) -> Result<BackfillState, BackfillError> {
        match state {
            BackfillState::Fetching => self.fetch(session).await,
            BackfillState::Empty { query } => self.on_empty(session, query).await,
            BackfillState::Sorting { query, mut trades } => {
                sort_batch(&mut trades, session.direction());
                Ok(BackfillState::DuplicateCheck { query, trades })
            }
            BackfillState::DuplicateCheck { query, trades } => {
                self.check_duplicate(session, query, trades)
            }
            BackfillState::Persisting { trades } => self.persist(session, trades).await,
            BackfillState::Reconciling { trades } => self.reconcile(session, trades),
            BackfillState::Scheduling { batch_len } => self.schedule(session, batch_len).await,
            BackfillState::Complete(outcome) => Ok(BackfillState::Complete(outcome)),
        }
    }

    async fn fetch(&self, session: &mut BackfillSession) -> Result<BackfillState, BackfillError> {
        let query = session.next_query(self.exchange.offset());
        debug!(selector = %session.selector, %query, "Fetching trades");

        match self.exchange.get_trades(&query).await {
            Ok(trades) => {
                session.backoff.reset();
                if trades.is_empty() {
                    Ok(BackfillState::Empty { query })
                } else {
                    Ok(BackfillState::Sorting { query, trades })
                }
            }
            Err(FetchError::Transient(reason)) => {
                let delay = session.backoff.next_backoff();
                session.stats.transient_retries += 1;
                warn!(
                    selector = %session.selector,
                    %query,
                    error = %reason,
                    attempt = session.backoff.attempt(),
                    delay_ms = delay.as_millis() as u64,
                    "get_trades() failed, retrying"
                );
                tokio::time::sleep(delay).await;
                Ok(BackfillState::Fetching)
            }
            Err(source) => Err(BackfillError::Fetch { query, source }),
        }
    }

    async fn on_empty(
        &self,
        session: &mut BackfillSession,
        query: TradeQuery,
    ) -> Result<BackfillState, BackfillError> {
        session.stats.empty_polls += 1;

        if session.direction() == ScanDirection::Backward {
            debug!(selector = %session.selector, %query, "No older trades available");
            return Ok(BackfillState::Complete(BackfillOutcome::HistoryExhausted));
        }

        let target = session.plan.target_time;
        let past_target = query.from.is_some_and(|from| target <= from);
        let target_in_future = target > Utc::now().timestamp_millis();
        if session.stats.trades_persisted > 0 && (past_target || target_in_future) {
            return Ok(BackfillState::Complete(BackfillOutcome::CaughtUp));
        }

        match session.empty_retry.register_empty() {
            EmptyRetryDecision::Retry {
                attempt,
                delay,
                elapsed,
            } => {
                let step = session.empty_retry.step_ms();
                session.advance_window(step);
                session.stats.empty_wait_ms = elapsed.as_millis() as u64;
                let next_from = session.next_query(self.exchange.offset()).from;
                warn!(
                    selector = %session.selector,
                    %query,
                    attempt,
                    elapsed_min = elapsed.as_secs_f64() / 60.0,
                    delay_ms = delay.as_millis() as u64,
                    next_from = ?next_from,
                    "get_trades() returned no trades, retrying later"
                );
                tokio::time::sleep(delay).await;
                Ok(BackfillState::Fetching)
            }
            EmptyRetryDecision::Exhausted { attempts } => Err(BackfillError::EmptyRetryExhausted {
                attempts,
                last_from: query.from,
            }),
        }
    }

    fn check_duplicate(
        &self,
        session: &mut BackfillSession,
        query: TradeQuery,
        trades: Vec<ExchangeTrade>,
    ) -> Result<BackfillState, BackfillError> {
        let Some(leading) = trades.first().map(|t| t.trade_id.clone()) else {
            return Ok(BackfillState::Empty { query });
        };

        if let Some(last) = &session.last_batch {
            if last.leading_trade_id == leading {
                return Err(BackfillError::DuplicateBatch {
                    trade_id: leading,
                    query,
                    previous_query: last.query.clone(),
                });
            }
        }
        session.last_batch = Some(LastBatch {
            leading_trade_id: leading,
            query,
        });

        let trades = trades
            .into_iter()
            .map(|raw| {
                let cursor = self.exchange.cursor_for_trade(&raw);
                Trade::stamp(&session.selector, raw, cursor)
            })
            .collect();
        Ok(BackfillState::Persisting { trades })
    }

    async fn persist(
        &self,
        session: &mut BackfillSession,
        trades: Vec<Trade>,
    ) -> Result<BackfillState, BackfillError> {
        match self.store.upsert_trades(&trades) {
            Ok(_) => Ok(BackfillState::Reconciling { trades }),
            Err(e) => {
                let delay = self.retry.persist_retry_delay();
                let reason = format!("{:#}", e);
                session.stats.persist_retries += 1;
                warn!(
                    selector = %session.selector,
                    count = trades.len(),
                    error = %reason,
                    delay_ms = delay.as_millis() as u64,
                    "Failed to save trades, retrying batch"
                );
                tokio::time::sleep(delay).await;
                Ok(BackfillState::Persisting { trades })
            }
        }
    }

    fn reconcile(
        &self,
        session: &mut BackfillSession,
        trades: Vec<Trade>,
    ) -> Result<BackfillState, BackfillError> {
        let direction = session.direction();
        for trade in &trades {
            session.marker.absorb(trade.cursor, trade.time, direction);
        }
        session.stats.trades_persisted += trades.len() as u64;
        session.stats.batches += 1;
        session.empty_retry.reset();

        if let Some(skip) = coalesce(&mut session.marker, &session.siblings, direction) {
            session.stats.skips += 1;
            print!("\nskipping {:.2} hrs of previously collected data", skip.skipped_hours());
            info!(
                selector = %session.selector,
                merged = ?skip.merged,
                cursor_before = skip.cursor_before,
                cursor_after = skip.cursor_after,
                "Jumped over previously covered range"
            );
        }

        self.store
            .upsert_marker(&session.marker)
            .map_err(BackfillError::Store)?;

        Ok(BackfillState::Scheduling {
            batch_len: trades.len(),
        })
    }

    async fn schedule(
        &self,
        session: &mut BackfillSession,
        batch_len: usize,
    ) -> Result<BackfillState, BackfillError> {
        let update = session.progress.record_batch(&session.marker, batch_len);
        print!("{}", update.render(&session.selector.normalized));
        let _ = std::io::stdout().flush();

        let plan = &session.plan;
        match plan.direction {
            ScanDirection::Backward => {
                if session
                    .marker
                    .oldest_time
                    .is_some_and(|oldest| oldest <= plan.target_time)
                {
                    return Ok(BackfillState::Complete(BackfillOutcome::TargetReached));
                }
            }
            ScanDirection::Forward => {
                if let Some((_, end)) = plan.span {
                    if session.marker.newest_time.is_some_and(|newest| newest >= end) {
                        return Ok(BackfillState::Complete(BackfillOutcome::SpanComplete));
                    }
                }
            }
        }

        match self.exchange.backfill_rate_limit() {
            Some(pause) => tokio::time::sleep(pause).await,
            None => tokio::task::yield_now().await,
        }
        Ok(BackfillState::Fetching)
    }
}

/// Look up the selector's exchange and confirm it can serve history, before
/// any store or network access.
pub fn resolve_adapter(
    registry: &ExchangeRegistry,
    selector: &Selector,
) -> Result<Arc<dyn ExchangeAdapter>, BackfillError> {
    let exchange =
        registry
            .get(&selector.exchange_id)
            .ok_or_else(|| BackfillError::UnsupportedExchange {
                selector: selector.normalized.clone(),
            })?;
    if exchange.history_scan().is_none() {
        return Err(BackfillError::NoHistoricalData {
            selector: selector.normalized.clone(),
        });
    }
    Ok(exchange)
}

/// Backward batches are processed newest first, forward batches oldest first.
fn sort_batch(trades: &mut [ExchangeTrade], direction: ScanDirection) {
    match direction {
        ScanDirection::Backward => trades.sort_by(|a, b| b.time.cmp(&a.time)),
        ScanDirection::Forward => trades.sort_by(|a, b| a.time.cmp(&b.time)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn times(trades: &[ExchangeTrade]) -> Vec<i64> {
        trades.iter().map(|t| t.time).collect()
    }

    #[test]
    fn test_completion_messages() {
        let span = ScanPlan::resolve(
            Some(ScanDirection::Forward),
            &BackfillWindow::span(1_000, 5_000),
            10_000,
        )
        .unwrap();
        let days = ScanPlan::resolve(Some(ScanDirection::Backward), &BackfillWindow::days(1), 10_000)
            .unwrap();

        assert_eq!(
            BackfillOutcome::SpanComplete.completion_message(&span),
            "download of span (1000 - 5000) complete!"
        );
        assert_eq!(
            BackfillOutcome::TargetReached.completion_message(&days),
            "download complete!"
        );
        assert_eq!(
            BackfillOutcome::CaughtUp.completion_message(&span),
            "download complete!"
        );
        assert!(BackfillOutcome::HistoryExhausted
            .completion_message(&days)
            .contains("exhausted the historical data range"));
    }

    #[test]
    fn test_sort_batch_by_direction() {
        let mut trades = vec![
            ExchangeTrade::new("2", 20),
            ExchangeTrade::new("1", 10),
            ExchangeTrade::new("3", 30),
        ];
        sort_batch(&mut trades, ScanDirection::Backward);
        assert_eq!(times(&trades), vec![30, 20, 10]);
        sort_batch(&mut trades, ScanDirection::Forward);
        assert_eq!(times(&trades), vec![10, 20, 30]);
    }
}
