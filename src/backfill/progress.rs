//! Operator-facing progress
//!
//! One `.` per batch, and a summary line each time the remaining-days count
//! changes.

use super::direction::{ScanPlan, MS_PER_DAY};
use crate::exchange::ScanDirection;
use crate::models::ResumeMarker;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressUpdate {
    /// Remaining-days count changed; `saved` trades landed since the last one.
    DayBoundary { saved: u64, days_left: i64 },
    Tick,
}

impl ProgressUpdate {
    pub fn render(&self, selector: &str) -> String {
        match self {
            ProgressUpdate::DayBoundary { saved, days_left } => {
                format!("\n{} saved {} trades {} days left", selector, saved, days_left)
            }
            ProgressUpdate::Tick => ".".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProgressReporter {
    direction: ScanDirection,
    target_time: i64,
    days_left: i64,
    saved_since_boundary: u64,
}

impl ProgressReporter {
    pub fn new(plan: &ScanPlan) -> Self {
        Self {
            direction: plan.direction,
            target_time: plan.target_time,
            days_left: plan.window_days() + 1,
            saved_since_boundary: 0,
        }
    }

    pub fn days_left(&self) -> i64 {
        self.days_left
    }

    /// Whole days between the marker's frontier and the target, plus one.
    fn current_days_left(&self, marker: &ResumeMarker) -> Option<i64> {
        let gap = match self.direction {
            ScanDirection::Backward => marker.oldest_time? - self.target_time,
            ScanDirection::Forward => self.target_time - marker.newest_time?,
        };
        Some(1 + gap.div_euclid(MS_PER_DAY))
    }

    /// Account for a persisted batch, with `marker` already widened over it.
    pub fn record_batch(&mut self, marker: &ResumeMarker, batch_len: usize) -> ProgressUpdate {
        self.saved_since_boundary += batch_len as u64;

        match self.current_days_left(marker) {
            Some(current) if current >= 0 && current != self.days_left => {
                let update = ProgressUpdate::DayBoundary {
                    saved: self.saved_since_boundary,
                    days_left: current,
                };
                self.days_left = current;
                self.saved_since_boundary = 0;
                update
            }
            _ => ProgressUpdate::Tick,
        }
    }
}
