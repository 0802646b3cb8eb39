//! Interval scheduling for incremental items
//!
//! The next interval is twice the time since the last anchor event:
//! `interval = round(elapsed_days × 2)`. There is no ease factor and no
//! ceiling, so on-time reviews double the spacing while early reviews grow
//! it less because less time has elapsed.
//!
//! Before computing, history is pruned of repetitions logged before the item
//! could have appeared in the queue (back-dated or test entries). Genuine
//! early reviews carry `wasEarly` and survive.

use chrono::{DateTime, Utc};

use super::models::{
    add_days, days_between, HistoryEntry, HistoryEvent, IncrementalItem, QueueMode, Repetition,
    RepetitionKind, ReviewTiming,
};

/// Elapsed days used when nothing anchors the spacing clock yet
const DEFAULT_ELAPSED_DAYS: f64 = 1.0;

/// Shortest interval the scheduler hands out
const MIN_INTERVAL_DAYS: u32 = 1;

/// Everything the scheduler needs to know about the review being recorded
#[derive(Debug, Clone, Copy)]
pub struct ReviewContext {
    pub now: DateTime<Utc>,
    pub mode: QueueMode,
    /// Force lookback handling even in the SRS queue
    pub lookback: bool,
    pub kind: RepetitionKind,
}

impl ReviewContext {
    pub fn queue(now: DateTime<Utc>, mode: QueueMode) -> Self {
        Self {
            now,
            mode,
            lookback: false,
            kind: RepetitionKind::Review,
        }
    }

    pub fn execute(now: DateTime<Utc>, lookback: bool) -> Self {
        Self {
            now,
            mode: QueueMode::Srs,
            lookback,
            kind: RepetitionKind::Execute,
        }
    }

    fn in_lookback(&self) -> bool {
        self.lookback || self.mode.is_lookback()
    }
}

/// Result of scheduling one review
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewResult {
    pub interval: u32,
    pub next_rep_date: DateTime<Utc>,
    /// Pruned history with the new entry appended
    pub history: Vec<HistoryEntry>,
}

/// Drop repetitions that were logged before their scheduled date without
/// being flagged as early. Order of the kept entries is unchanged.
pub fn prune_history(history: &[HistoryEntry]) -> Vec<HistoryEntry> {
    history
        .iter()
        .filter(|entry| match &entry.event {
            HistoryEvent::Repetition(rep) => {
                let flagged_early = rep.timing.map_or(false, |t| t.was_early);
                entry.date >= entry.scheduled || flagged_early
            }
            _ => true,
        })
        .cloned()
        .collect()
}

/// Days since the last anchor entry, or 1 when there is none
pub fn elapsed_days(history: &[HistoryEntry], now: DateTime<Utc>) -> f64 {
    match history.iter().rev().find(|e| e.is_anchor()) {
        Some(last) => days_between(last.date, now).max(0.0),
        None => DEFAULT_ELAPSED_DAYS,
    }
}

pub fn next_interval(elapsed_days: f64) -> u32 {
    let doubled = (elapsed_days * 2.0).round();
    if doubled >= u32::MAX as f64 {
        u32::MAX
    } else {
        (doubled as u32).max(MIN_INTERVAL_DAYS)
    }
}

/// Signed distance from the scheduled date, in days with one decimal
pub fn days_early_or_late(actual: DateTime<Utc>, scheduled: DateTime<Utc>) -> f64 {
    round_one_decimal(days_between(scheduled, actual))
}

pub fn review_timing(actual: DateTime<Utc>, scheduled: DateTime<Utc>) -> ReviewTiming {
    let days = days_early_or_late(actual, scheduled);
    ReviewTiming {
        was_early: days < 0.0,
        days_early_or_late: days,
    }
}

/// Calculate the next repetition for an item reviewed at `ctx.now`
///
/// In lookback mode the item was shown ahead of time on purpose (practice
/// queues, explicit lookback), so the new date never moves earlier than the
/// one already scheduled.
pub fn calculate_next_review(item: &IncrementalItem, ctx: &ReviewContext) -> ReviewResult {
    let mut history = prune_history(&item.history);

    let interval = next_interval(elapsed_days(&history, ctx.now));
    let mut next_rep_date = add_days(ctx.now, interval);
    if ctx.in_lookback() && next_rep_date < item.next_rep_date {
        next_rep_date = item.next_rep_date;
    }

    history.push(HistoryEntry::repetition(
        ctx.now,
        item.next_rep_date,
        item.priority,
        Repetition {
            kind: ctx.kind,
            interval: Some(interval),
            review_time_seconds: None,
            timing: Some(review_timing(ctx.now, item.next_rep_date)),
        },
    ));

    ReviewResult {
        interval,
        next_rep_date,
        history,
    }
}

/// Fill in the measured review time on the most recent repetition
pub fn set_review_time(history: &mut [HistoryEntry], seconds: u32) -> bool {
    let last = history.iter_mut().rev().find(|e| e.is_repetition());
    match last {
        Some(HistoryEntry {
            event: HistoryEvent::Repetition(rep),
            ..
        }) => {
            rep.review_time_seconds = Some(seconds);
            true
        }
        _ => false,
    }
}

fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Format an interval in days to a human-readable string
pub fn format_interval(days: u32) -> String {
    if days == 0 {
        "now".to_string()
    } else if days < 7 {
        format!("{}d", days)
    } else if days < 30 {
        format!("{}w", days / 7)
    } else if days < 365 {
        format!("{}mo", days / 30)
    } else {
        format!("{}y", days / 365)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::millis_to_datetime;
    use crate::incremental::models::{LifecycleMarker, MS_PER_DAY};
    use chrono::Duration;
    use uuid::Uuid;

    fn now() -> DateTime<Utc> {
        millis_to_datetime(1_700_000_000_000)
    }

    fn days(n: i64) -> Duration {
        Duration::milliseconds(n * MS_PER_DAY)
    }

    fn review(date: DateTime<Utc>, scheduled: DateTime<Utc>, was_early: Option<bool>) -> HistoryEntry {
        HistoryEntry::repetition(
            date,
            scheduled,
            50,
            Repetition {
                kind: RepetitionKind::Review,
                interval: None,
                review_time_seconds: None,
                timing: was_early.map(|was_early| ReviewTiming {
                    was_early,
                    days_early_or_late: 0.0,
                }),
            },
        )
    }

    #[test]
    fn test_first_review_without_history() {
        let item = IncrementalItem::new(Uuid::new_v4(), 10, now());
        let result = calculate_next_review(&item, &ReviewContext::queue(now(), QueueMode::Srs));

        assert_eq!(result.interval, 2);
        assert_eq!(result.history.len(), 1);
        assert_eq!(result.next_rep_date, now() + days(2));
    }

    #[test]
    fn test_on_schedule_review_doubles() {
        let mut item = IncrementalItem::new(Uuid::new_v4(), 50, now());
        let last = now() - days(4);
        item.history.push(review(last, last, None));

        let result = calculate_next_review(&item, &ReviewContext::queue(now(), QueueMode::Srs));

        assert_eq!(result.interval, 8);
        let timing = result.history.last().unwrap().timing().unwrap();
        assert!(!timing.was_early);
        assert_eq!(timing.days_early_or_late, 0.0);
    }

    #[test]
    fn test_interval_is_rounded_double_of_elapsed() {
        for n in 1..40 {
            let mut item = IncrementalItem::new(Uuid::new_v4(), 50, now());
            let last = now() - days(n);
            item.history.push(review(last, last, None));
            let result = calculate_next_review(&item, &ReviewContext::queue(now(), QueueMode::Srs));
            assert_eq!(result.interval, (n * 2) as u32);
        }
    }

    #[test]
    fn test_early_review_shrinks_growth() {
        let mut item = IncrementalItem::new(Uuid::new_v4(), 50, now() + days(4));
        let last = now() - days(2);
        item.history.push(review(last, last, None));

        let result = calculate_next_review(&item, &ReviewContext::queue(now(), QueueMode::Srs));
        assert_eq!(result.interval, 4);
        let timing = result.history.last().unwrap().timing().unwrap();
        assert!(timing.was_early);
        assert_eq!(timing.days_early_or_late, -4.0);
    }

    #[test]
    fn test_lookback_never_moves_date_earlier() {
        let scheduled = now() + days(30);
        let mut item = IncrementalItem::new(Uuid::new_v4(), 50, scheduled);
        let last = now() - days(1);
        item.history.push(review(last, last, None));

        let result =
            calculate_next_review(&item, &ReviewContext::queue(now(), QueueMode::PracticeAll));
        assert_eq!(result.interval, 2);
        assert_eq!(result.next_rep_date, scheduled);
    }

    #[test]
    fn test_prune_drops_backdated_but_keeps_flagged_early() {
        let backdated = review(now() - days(6), now() - days(2), None);
        let genuine_early = review(now() - days(5), now() - days(1), Some(true));
        let on_time = review(now() - days(3), now() - days(3), None);
        let marker = HistoryEntry::marker(
            now() - days(10),
            now(),
            LifecycleMarker::MadeIncremental,
        );
        let history = vec![marker.clone(), backdated, genuine_early.clone(), on_time.clone()];

        let pruned = prune_history(&history);
        assert_eq!(pruned, vec![marker, genuine_early, on_time]);
    }

    #[test]
    fn test_prune_never_grows_and_keeps_order() {
        let mut history = Vec::new();
        for i in 0..20i64 {
            let date = now() - days(40 - i);
            let scheduled = if i % 3 == 0 { date + days(1) } else { date };
            history.push(review(date, scheduled, if i % 6 == 0 { Some(true) } else { None }));
        }

        let pruned = prune_history(&history);
        assert!(pruned.len() <= history.len());
        let mut cursor = history.iter();
        for kept in &pruned {
            assert!(cursor.any(|e| e == kept));
        }
    }

    #[test]
    fn test_pruned_entries_do_not_anchor() {
        let mut item = IncrementalItem::new(Uuid::new_v4(), 50, now());
        let real = now() - days(4);
        item.history.push(review(real, real, None));
        // logged yesterday against a date still two days out
        item.history.push(review(now() - days(1), now() + days(1), None));

        let result = calculate_next_review(&item, &ReviewContext::queue(now(), QueueMode::Srs));
        assert_eq!(result.interval, 8);
        assert_eq!(result.history.len(), 2);
    }

    #[test]
    fn test_lifecycle_marker_is_not_an_anchor() {
        let mut item = IncrementalItem::new(Uuid::new_v4(), 50, now());
        item.history.push(HistoryEntry::marker(
            now() - days(9),
            now() - days(9),
            LifecycleMarker::MadeIncremental,
        ));
        let result = calculate_next_review(&item, &ReviewContext::queue(now(), QueueMode::Srs));
        assert_eq!(result.interval, 2);
    }

    #[test]
    fn test_same_day_review_gets_minimum_interval() {
        assert_eq!(next_interval(0.1), 1);
        assert_eq!(next_interval(0.0), 1);
        assert_eq!(next_interval(1.3), 3);
    }

    #[test]
    fn test_days_early_or_late_rounds_to_one_decimal() {
        let scheduled = now();
        let actual = now() + Duration::hours(30);
        assert_eq!(days_early_or_late(actual, scheduled), 1.3);
        assert_eq!(days_early_or_late(scheduled - Duration::hours(12), scheduled), -0.5);
    }

    #[test]
    fn test_set_review_time_targets_last_repetition() {
        let mut history = vec![
            review(now() - days(2), now() - days(2), None),
            review(now(), now(), None),
            HistoryEntry::marker(now(), now(), LifecycleMarker::Dismissed),
        ];
        assert!(set_review_time(&mut history, 37));
        match &history[1].event {
            HistoryEvent::Repetition(rep) => assert_eq!(rep.review_time_seconds, Some(37)),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_format_interval() {
        assert_eq!(format_interval(0), "now");
        assert_eq!(format_interval(1), "1d");
        assert_eq!(format_interval(14), "2w");
        assert_eq!(format_interval(90), "3mo");
        assert_eq!(format_interval(730), "2y");
    }
}
