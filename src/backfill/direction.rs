//! Scan-direction resolution
//!
//! Turns the adapter's capability and the requested window into a
//! [`ScanPlan`]: which way to walk, where to start, and the time at which the
//! session is satisfied.

use serde::{Deserialize, Serialize};

use crate::exchange::ScanDirection;

pub const MS_PER_DAY: i64 = 86_400_000;

/// Requested coverage, as given on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillWindow {
    pub days: u32,
    /// Explicit `[start, end]` in ms. Only forward scanners honour it.
    pub span: Option<(i64, i64)>,
}

impl BackfillWindow {
    pub fn days(days: u32) -> Self {
        Self { days, span: None }
    }

    pub fn span(start: i64, end: i64) -> Self {
        Self {
            days: 0,
            span: Some((start, end)),
        }
    }

    /// Both bounds must be present and non-negative for a span; anything else
    /// falls back to the day count.
    pub fn from_args(days: u32, start: Option<i64>, end: Option<i64>) -> Self {
        match (start, end) {
            (Some(s), Some(e)) if s >= 0 && e >= 0 => Self {
                days,
                span: Some((s, e)),
            },
            _ => Self::days(days),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanPlan {
    pub direction: ScanDirection,
    /// Backward: oldest time to reach. Forward: newest time to reach.
    pub target_time: i64,
    /// Forward only: where the first request starts.
    pub start_time: Option<i64>,
    /// Forward only: the explicit span, when one was requested.
    pub span: Option<(i64, i64)>,
    pub days: u32,
}

impl ScanPlan {
    /// `None` when the exchange has no historical capability.
    pub fn resolve(
        capability: Option<ScanDirection>,
        window: &BackfillWindow,
        now_ms: i64,
    ) -> Option<Self> {
        let direction = capability?;
        let days_ms = MS_PER_DAY * window.days as i64;

        let plan = match direction {
            ScanDirection::Backward => Self {
                direction,
                target_time: now_ms - days_ms,
                start_time: None,
                span: None,
                days: window.days,
            },
            ScanDirection::Forward => match window.span {
                Some((start, end)) => Self {
                    direction,
                    target_time: end,
                    start_time: Some(start),
                    span: Some((start, end)),
                    days: window.days,
                },
                None => Self {
                    direction,
                    target_time: now_ms,
                    start_time: Some(now_ms - days_ms),
                    span: None,
                    days: window.days,
                },
            },
        };
        Some(plan)
    }

    pub fn is_backward(&self) -> bool {
        self.direction == ScanDirection::Backward
    }

    /// Days of data the window asks for, used to seed progress reporting.
    pub fn window_days(&self) -> i64 {
        match self.span {
            Some((start, end)) => (end - start).max(0) / MS_PER_DAY,
            None => self.days as i64,
        }
    }
}
