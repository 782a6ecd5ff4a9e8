//! Resumable historical-trade backfill
//!
//! Pages trades out of an exchange adapter, persists them idempotently, and
//! records how far it got in a resume marker so later runs can skip ranges
//! that are already covered.

pub mod direction;
pub mod engine;
pub mod marker;
pub mod progress;
pub mod retry;
pub mod session;

pub use direction::{BackfillWindow, ScanPlan, MS_PER_DAY};
pub use engine::{resolve_adapter, BackfillEngine, BackfillOutcome, BackfillReport, BackfillState};
pub use marker::{coalesce, sort_siblings, CoverageSkip};
pub use progress::{ProgressReporter, ProgressUpdate};
pub use retry::{EmptyBatchRetry, EmptyRetryDecision, TransientBackoff};
pub use session::{BackfillSession, SessionStats};
