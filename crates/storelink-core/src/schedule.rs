//! # Re-arm Policy
//!
//! Every stage invocation ends with a definite outcome, and this module owns
//! the single rule that maps outcomes onto the next scheduled action. Stages
//! never schedule anything themselves.
//!
//! ## The Uniform Transition Rule
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  StageOutcome              →  Transition                                │
//! │  ─────────────────────────    ────────────────────────────────────────  │
//! │  RateLimited (HTTP 429)    →  re-arm SAME stage after 60 s              │
//! │  QuotaExceeded (code 1002) →  re-arm SAME stage at next top of hour     │
//! │  Failed                    →  run → failed, stop re-arming              │
//! │  MoreWork (queue/pages)    →  re-arm SAME stage after the stage's own   │
//! │                               drain delay (61 min for batch queues,     │
//! │                               5 min for order pages)                    │
//! │  Completed                 →  advance to next stage after 60 s,         │
//! │                               or mark the run completed                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The cursor is left untouched on both rate-limit paths, so a re-run of the
//! same stage resumes exactly where it was.

use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};

// =============================================================================
// Delay Constants
// =============================================================================

/// Re-arm delay after an HTTP 429 (the ERP's 30-second window).
pub const REARM_RATE_LIMITED: Duration = Duration::from_secs(60);

/// Delay before the next stage after a successful stage completion.
pub const REARM_ADVANCE: Duration = Duration::from_secs(60);

/// Delay between batches of a persisted request queue. Deliberately slow:
/// one batch per hour window keeps a large catalog inside the hourly quota.
pub const REARM_QUEUE_DRAIN: Duration = Duration::from_secs(61 * 60);

/// Delay between order pages.
pub const REARM_ORDER_PAGE: Duration = Duration::from_secs(5 * 60);

/// Extra settling delay before the archival pass reads the full remote set.
pub const REARM_BEFORE_ARCHIVE: Duration = Duration::from_secs(5 * 60);

/// Cadence of the immediate-order queue drain.
pub const ORDER_QUEUE_DRAIN_INTERVAL: Duration = Duration::from_secs(10 * 60);

// =============================================================================
// Top-of-hour Math
// =============================================================================

/// Seconds until the next top of the hour. Exactly on the hour the answer
/// is 0; the hourly quota has already rolled over.
pub fn seconds_to_full_hour(now: DateTime<Utc>) -> u64 {
    let into_hour = u64::from(now.minute()) * 60 + u64::from(now.second());
    if into_hour == 0 {
        0
    } else {
        3600 - into_hour
    }
}

// =============================================================================
// Stage Outcome → Transition
// =============================================================================

/// Definite result of one stage invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    /// The stage drained completely and successfully.
    Completed,
    /// Work remains (unsent batches or unread pages); cursor was advanced
    /// and persisted.
    MoreWork,
    /// The ERP answered HTTP 429; nothing was consumed, cursor unchanged.
    RateLimited,
    /// The ERP answered application code 1002; cursor unchanged.
    QuotaExceeded,
    /// Terminal failure. The run stops; the operator must restart or reset.
    Failed(String),
}

/// What the sequencer does next.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Re-arm the same stage after a fixed delay.
    Rearm(Duration),
    /// Re-arm the same stage at the next top of the hour.
    RearmAtFullHour,
    /// Persist the next stage and re-arm after [`REARM_ADVANCE`]; when the
    /// stage was the last in sequence, mark the run completed instead.
    Advance,
    /// Mark the run failed with a timestamped status line and stop.
    Fail(String),
}

/// Applies the uniform transition rule.
///
/// `drain_delay` is the stage's own spacing for [`StageOutcome::MoreWork`]:
/// [`REARM_QUEUE_DRAIN`] for persisted batch queues, [`REARM_ORDER_PAGE`]
/// for the order page loop.
pub fn transition_for(outcome: StageOutcome, drain_delay: Duration) -> Transition {
    match outcome {
        StageOutcome::RateLimited => Transition::Rearm(REARM_RATE_LIMITED),
        StageOutcome::QuotaExceeded => Transition::RearmAtFullHour,
        StageOutcome::Failed(reason) => Transition::Fail(reason),
        StageOutcome::MoreWork => Transition::Rearm(drain_delay),
        StageOutcome::Completed => Transition::Advance,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_seconds_to_full_hour_mid_hour() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 14, 25, 10).unwrap();
        assert_eq!(seconds_to_full_hour(now), 3600 - 25 * 60 - 10);
    }

    #[test]
    fn test_seconds_to_full_hour_on_the_boundary() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 14, 0, 0).unwrap();
        assert_eq!(seconds_to_full_hour(now), 0);
    }

    #[test]
    fn test_seconds_to_full_hour_just_past_boundary() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 14, 0, 1).unwrap();
        assert_eq!(seconds_to_full_hour(now), 3599);
    }

    #[test]
    fn test_rate_limited_rearms_short() {
        assert_eq!(
            transition_for(StageOutcome::RateLimited, REARM_QUEUE_DRAIN),
            Transition::Rearm(REARM_RATE_LIMITED)
        );
    }

    #[test]
    fn test_quota_rearms_at_full_hour() {
        assert_eq!(
            transition_for(StageOutcome::QuotaExceeded, REARM_QUEUE_DRAIN),
            Transition::RearmAtFullHour
        );
    }

    #[test]
    fn test_more_work_uses_the_stage_drain_delay() {
        assert_eq!(
            transition_for(StageOutcome::MoreWork, REARM_ORDER_PAGE),
            Transition::Rearm(REARM_ORDER_PAGE)
        );
    }

    #[test]
    fn test_failure_is_terminal() {
        let t = transition_for(
            StageOutcome::Failed("item 3 rejected".into()),
            REARM_QUEUE_DRAIN,
        );
        assert_eq!(t, Transition::Fail("item 3 rejected".into()));
    }

    #[test]
    fn test_completed_advances() {
        assert_eq!(
            transition_for(StageOutcome::Completed, REARM_QUEUE_DRAIN),
            Transition::Advance
        );
    }
}
