//! Resume-marker bookkeeping
//!
//! A session widens its own marker as batches land, then jumps over any range
//! an earlier session already covered. Markers are never deleted, so an
//! interrupted run leaves behind coverage the next run can skip.

use crate::exchange::ScanDirection;
use crate::models::{Cursor, ResumeMarker};

/// Record of one jump across previously covered ranges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageSkip {
    /// Ids of the sibling markers whose ranges were adopted, in order.
    pub merged: Vec<String>,
    pub cursor_before: Cursor,
    pub cursor_after: Cursor,
    /// Wall-clock span skipped, in ms.
    pub skipped_ms: i64,
}

impl CoverageSkip {
    pub fn skipped_hours(&self) -> f64 {
        self.skipped_ms as f64 / 3_600_000.0
    }
}

/// Order siblings the way the scan meets them: newest `to` first when walking
/// backward, oldest `from` first when walking forward. Markers without bounds
/// sort last.
pub fn sort_siblings(markers: &mut [ResumeMarker], direction: ScanDirection) {
    match direction {
        ScanDirection::Backward => markers.sort_by(|a, b| match (a.to, b.to) {
            (Some(x), Some(y)) => y.cmp(&x),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        }),
        ScanDirection::Forward => markers.sort_by(|a, b| match (a.from, b.from) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        }),
    }
}

fn min_opt(a: Option<i64>, b: Option<i64>) -> Option<i64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.min(y)),
        (x, None) => x,
        (None, y) => y,
    }
}

fn max_opt(a: Option<i64>, b: Option<i64>) -> Option<i64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (x, None) => x,
        (None, y) => y,
    }
}

impl ResumeMarker {
    /// Widen the marker to include a persisted trade.
    ///
    /// Backward scans anchor `to` on the first trade seen and only ever lower
    /// `from`; forward scans anchor `from` and only ever raise `to`.
    pub fn absorb(&mut self, cursor: Cursor, time: i64, direction: ScanDirection) {
        match direction {
            ScanDirection::Backward => {
                if self.to.is_none() {
                    self.to = Some(cursor);
                    self.newest_time = Some(time);
                }
                self.from = Some(self.from.map_or(cursor, |from| from.min(cursor)));
                self.oldest_time = min_opt(self.oldest_time, Some(time));
            }
            ScanDirection::Forward => {
                if self.from.is_none() {
                    self.from = Some(cursor);
                    self.oldest_time = Some(time);
                }
                self.to = Some(self.to.map_or(cursor, |to| to.max(cursor)));
                self.newest_time = max_opt(self.newest_time, Some(time));
            }
        }
    }
}

/// Extend `marker` across every sibling range that already covers its
/// frontier. `siblings` must be ordered by [`sort_siblings`].
///
/// Returns `None` when nothing was adopted.
pub fn coalesce(
    marker: &mut ResumeMarker,
    siblings: &[ResumeMarker],
    direction: ScanDirection,
) -> Option<CoverageSkip> {
    let cursor_before = frontier(marker, direction)?;
    let time_before = frontier_time(marker, direction);
    let mut merged = Vec::new();

    for other in siblings {
        if other.id == marker.id {
            continue;
        }
        let Some((other_from, other_to)) = other.bounds() else {
            continue;
        };

        match direction {
            ScanDirection::Backward => {
                let Some(from) = marker.from else { break };
                if from <= other_to && from > other_from {
                    marker.from = Some(other_from);
                    marker.oldest_time = min_opt(marker.oldest_time, other.oldest_time);
                    merged.push(other.id.clone());
                }
            }
            ScanDirection::Forward => {
                let Some(to) = marker.to else { break };
                if to >= other_from && to < other_to {
                    marker.to = Some(other_to);
                    marker.newest_time = max_opt(marker.newest_time, other.newest_time);
                    merged.push(other.id.clone());
                }
            }
        }
    }

    if merged.is_empty() {
        return None;
    }

    let cursor_after = frontier(marker, direction).unwrap_or(cursor_before);
    let skipped_ms = match (time_before, frontier_time(marker, direction)) {
        (Some(before), Some(after)) => (after - before).abs(),
        _ => 0,
    };

    Some(CoverageSkip {
        merged,
        cursor_before,
        cursor_after,
        skipped_ms,
    })
}

/// The end of the marker the scan is currently extending.
fn frontier(marker: &ResumeMarker, direction: ScanDirection) -> Option<Cursor> {
    match direction {
        ScanDirection::Backward => marker.from,
        ScanDirection::Forward => marker.to,
    }
}

fn frontier_time(marker: &ResumeMarker, direction: ScanDirection) -> Option<i64> {
    match direction {
        ScanDirection::Backward => marker.oldest_time,
        ScanDirection::Forward => marker.newest_time,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::Selector;

    fn selector() -> Selector {
        Selector::parse("coinbase.BTC-USD").unwrap()
    }

    fn marker(id: &str, from: i64, to: i64, oldest: i64, newest: i64) -> ResumeMarker {
        let mut m = ResumeMarker::with_id(id, &selector());
        m.from = Some(from);
        m.to = Some(to);
        m.oldest_time = Some(oldest);
        m.newest_time = Some(newest);
        m
    }

    #[test]
    fn test_backward_absorb_anchors_to_on_first_trade() {
        let mut m = ResumeMarker::with_id("self0001", &selector());
        m.absorb(500, 5_000, ScanDirection::Backward);
        m.absorb(490, 4_900, ScanDirection::Backward);
        m.absorb(480, 4_800, ScanDirection::Backward);
        assert_eq!(m.bounds(), Some((480, 500)));
        assert_eq!(m.oldest_time, Some(4_800));
        assert_eq!(m.newest_time, Some(5_000));

        // a newer trade later on never moves `to`
        m.absorb(600, 6_000, ScanDirection::Backward);
        assert_eq!(m.to, Some(500));
        assert_eq!(m.newest_time, Some(5_000));
    }

    #[test]
    fn test_forward_absorb_anchors_from_on_first_trade() {
        let mut m = ResumeMarker::with_id("self0001", &selector());
        m.absorb(1_000, 1_000, ScanDirection::Forward);
        m.absorb(1_500, 1_500, ScanDirection::Forward);
        assert_eq!(m.bounds(), Some((1_000, 1_500)));
        assert_eq!(m.oldest_time, Some(1_000));
        assert_eq!(m.newest_time, Some(1_500));

        m.absorb(900, 900, ScanDirection::Forward);
        assert_eq!(m.from, Some(1_000));
    }

    #[test]
    fn test_sort_siblings_by_direction() {
        let mut markers = vec![
            marker("a", 10, 20, 0, 0),
            ResumeMarker::with_id("empty", &selector()),
            marker("b", 30, 40, 0, 0),
            marker("c", 5, 50, 0, 0),
        ];
        sort_siblings(&mut markers, ScanDirection::Backward);
        let ids: Vec<&str> = markers.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "a", "empty"]);

        sort_siblings(&mut markers, ScanDirection::Forward);
        let ids: Vec<&str> = markers.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b", "empty"]);
    }

    #[test]
    fn test_backward_coalesce_jumps_over_covered_range() {
        let mut m = marker("self", 150, 200, 15_000, 20_000);
        let mut siblings = vec![marker("older", 100, 160, 10_000, 16_000)];
        sort_siblings(&mut siblings, ScanDirection::Backward);

        let skip = coalesce(&mut m, &siblings, ScanDirection::Backward).unwrap();
        assert_eq!(m.from, Some(100));
        assert_eq!(m.oldest_time, Some(10_000));
        assert_eq!(m.to, Some(200));
        assert_eq!(skip.merged, vec!["older".to_string()]);
        assert_eq!(skip.cursor_before, 150);
        assert_eq!(skip.cursor_after, 100);
        assert_eq!(skip.skipped_ms, 5_000);
    }

    #[test]
    fn test_backward_coalesce_chains_through_siblings() {
        let mut m = marker("self", 150, 200, 15_000, 20_000);
        let mut siblings = vec![
            marker("b", 50, 110, 5_000, 11_000),
            marker("a", 100, 160, 10_000, 16_000),
        ];
        sort_siblings(&mut siblings, ScanDirection::Backward);

        let skip = coalesce(&mut m, &siblings, ScanDirection::Backward).unwrap();
        assert_eq!(m.from, Some(50));
        assert_eq!(m.oldest_time, Some(5_000));
        assert_eq!(skip.merged, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_coalesce_ignores_self_empty_and_disjoint() {
        let mut m = marker("self", 150, 200, 15_000, 20_000);
        let siblings = vec![
            marker("self", 0, 1_000, 0, 100_000),
            ResumeMarker::with_id("empty", &selector()),
            marker("disjoint", 10, 20, 1_000, 2_000),
        ];
        assert!(coalesce(&mut m, &siblings, ScanDirection::Backward).is_none());
        assert_eq!(m.bounds(), Some((150, 200)));
    }

    #[test]
    fn test_backward_coalesce_never_shrinks_width() {
        // sibling reaches back only as far as our own oldest trade time
        let mut m = marker("self", 150, 200, 9_000, 20_000);
        let siblings = vec![marker("a", 100, 160, 10_000, 16_000)];
        coalesce(&mut m, &siblings, ScanDirection::Backward).unwrap();
        assert_eq!(m.oldest_time, Some(9_000));
        assert!(m.from.unwrap() <= m.to.unwrap());
    }

    #[test]
    fn test_forward_coalesce_jumps_over_covered_range() {
        let mut m = marker("self", 1_000, 2_000, 1_000, 2_000);
        let mut siblings = vec![
            marker("later", 1_900, 8_000, 1_900, 8_000),
            marker("before", 0, 500, 0, 500),
        ];
        sort_siblings(&mut siblings, ScanDirection::Forward);

        let skip = coalesce(&mut m, &siblings, ScanDirection::Forward).unwrap();
        assert_eq!(m.to, Some(8_000));
        assert_eq!(m.newest_time, Some(8_000));
        assert_eq!(m.from, Some(1_000));
        assert_eq!(skip.merged, vec!["later".to_string()]);
        assert_eq!(skip.skipped_ms, 6_000);
        assert!((skip.skipped_hours() - 6_000.0 / 3_600_000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_marker_never_coalesces() {
        let mut m = ResumeMarker::with_id("self", &selector());
        let siblings = vec![marker("a", 0, 1_000, 0, 1_000)];
        assert!(coalesce(&mut m, &siblings, ScanDirection::Forward).is_none());
        assert!(m.is_empty());
    }
}
