//! Data models for incremental items
//!
//! History entries are a tagged union in memory and a flat record on disk:
//! ```json
//! {"date": 1700000000000, "scheduled": 1699990000000, "interval": 8,
//!  "reviewTimeSeconds": 42, "wasEarly": false, "daysEarlyOrLate": 0.1,
//!  "eventType": "repetition", "priority": 30}
//! ```
//! Records written before `eventType` existed are repetitions.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::config::clamp_priority;

/// Milliseconds in a scheduling day
pub const MS_PER_DAY: i64 = 86_400_000;

/// Which queue the learner is working through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum QueueMode {
    /// Spaced repetition: only due items
    #[default]
    Srs,
    /// Every item in scope, due or not
    PracticeAll,
    /// Every item in scope, in document order
    InOrder,
}

impl QueueMode {
    /// Reviews in these modes may happen before the item is due
    pub fn is_lookback(self) -> bool {
        !matches!(self, Self::Srs)
    }
}

/// A node under incremental scheduling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncrementalItem {
    pub id: Uuid,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub next_rep_date: DateTime<Utc>,
    #[serde(deserialize_with = "deserialize_priority")]
    pub priority: u8,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

/// Stored priorities outside 0..=100 are clamped rather than rejected
fn deserialize_priority<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = i64::deserialize(deserializer)?;
    let clamped = clamp_priority(raw);
    if i64::from(clamped) != raw {
        log::warn!("Incremental: stored priority {} out of range, clamped to {}", raw, clamped);
    }
    Ok(clamped)
}

impl IncrementalItem {
    /// A fresh item is due immediately
    pub fn new(id: Uuid, priority: u8, now: DateTime<Utc>) -> Self {
        Self {
            id,
            next_rep_date: now,
            priority: priority.min(100),
            history: Vec::new(),
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_rep_date <= now
    }

    pub fn last_review(&self) -> Option<&HistoryEntry> {
        self.history.iter().rev().find(|e| e.is_repetition())
    }

    pub fn review_count(&self) -> usize {
        self.history.iter().filter(|e| e.is_repetition()).count()
    }
}

/// One event in an item's history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "HistoryRecord", into = "HistoryRecord")]
pub struct HistoryEntry {
    /// When the event happened
    pub date: DateTime<Utc>,
    /// The next repetition date the item had at that moment
    pub scheduled: DateTime<Utc>,
    /// Item priority when the event happened
    pub priority: Option<u8>,
    pub event: HistoryEvent,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HistoryEvent {
    Repetition(Repetition),
    Reschedule {
        origin: RescheduleOrigin,
        interval: Option<u32>,
    },
    ManualReset,
    Lifecycle(LifecycleMarker),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Repetition {
    pub kind: RepetitionKind,
    /// Days until the next repetition, as scheduled by this review
    pub interval: Option<u32>,
    pub review_time_seconds: Option<u32>,
    pub timing: Option<ReviewTiming>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepetitionKind {
    /// Reviewed from the queue
    Review,
    /// Repetition executed from the editor
    Execute,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReviewTiming {
    pub was_early: bool,
    /// Negative when early, one decimal
    pub days_early_or_late: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RescheduleOrigin {
    Queue,
    Editor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleMarker {
    MadeIncremental,
    Dismissed,
}

/// Persisted event discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    Repetition,
    RescheduledInQueue,
    RescheduledInEditor,
    ManualDateReset,
    ExecuteRepetition,
    MadeIncremental,
    Dismissed,
}

impl HistoryEntry {
    pub fn repetition(
        date: DateTime<Utc>,
        scheduled: DateTime<Utc>,
        priority: u8,
        repetition: Repetition,
    ) -> Self {
        Self {
            date,
            scheduled,
            priority: Some(priority),
            event: HistoryEvent::Repetition(repetition),
        }
    }

    pub fn marker(date: DateTime<Utc>, scheduled: DateTime<Utc>, marker: LifecycleMarker) -> Self {
        Self {
            date,
            scheduled,
            priority: None,
            event: HistoryEvent::Lifecycle(marker),
        }
    }

    pub fn is_repetition(&self) -> bool {
        matches!(self.event, HistoryEvent::Repetition(_))
    }

    /// Entries that restart the spacing clock. Lifecycle markers do not.
    pub fn is_anchor(&self) -> bool {
        !matches!(self.event, HistoryEvent::Lifecycle(_))
    }

    pub fn event_type(&self) -> EventType {
        match &self.event {
            HistoryEvent::Repetition(r) => match r.kind {
                RepetitionKind::Review => EventType::Repetition,
                RepetitionKind::Execute => EventType::ExecuteRepetition,
            },
            HistoryEvent::Reschedule { origin, .. } => match origin {
                RescheduleOrigin::Queue => EventType::RescheduledInQueue,
                RescheduleOrigin::Editor => EventType::RescheduledInEditor,
            },
            HistoryEvent::ManualReset => EventType::ManualDateReset,
            HistoryEvent::Lifecycle(LifecycleMarker::MadeIncremental) => EventType::MadeIncremental,
            HistoryEvent::Lifecycle(LifecycleMarker::Dismissed) => EventType::Dismissed,
        }
    }

    pub fn interval(&self) -> Option<u32> {
        match &self.event {
            HistoryEvent::Repetition(r) => r.interval,
            HistoryEvent::Reschedule { interval, .. } => *interval,
            _ => None,
        }
    }

    pub fn timing(&self) -> Option<ReviewTiming> {
        match &self.event {
            HistoryEvent::Repetition(r) => r.timing,
            _ => None,
        }
    }
}

/// Flat wire form of [`HistoryEntry`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryRecord {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    date: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    scheduled: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    interval: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    review_time_seconds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    was_early: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    days_early_or_late: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    event_type: Option<EventType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    priority: Option<u8>,
}

impl From<HistoryRecord> for HistoryEntry {
    fn from(record: HistoryRecord) -> Self {
        let timing = match (record.was_early, record.days_early_or_late) {
            (None, None) => None,
            (was_early, days) => {
                let days = days.unwrap_or(0.0);
                Some(ReviewTiming {
                    was_early: was_early.unwrap_or(days < 0.0),
                    days_early_or_late: days,
                })
            }
        };

        let repetition = |kind| {
            HistoryEvent::Repetition(Repetition {
                kind,
                interval: record.interval,
                review_time_seconds: record.review_time_seconds,
                timing,
            })
        };

        let event = match record.event_type.unwrap_or(EventType::Repetition) {
            EventType::Repetition => repetition(RepetitionKind::Review),
            EventType::ExecuteRepetition => repetition(RepetitionKind::Execute),
            EventType::RescheduledInQueue => HistoryEvent::Reschedule {
                origin: RescheduleOrigin::Queue,
                interval: record.interval,
            },
            EventType::RescheduledInEditor => HistoryEvent::Reschedule {
                origin: RescheduleOrigin::Editor,
                interval: record.interval,
            },
            EventType::ManualDateReset => HistoryEvent::ManualReset,
            EventType::MadeIncremental => HistoryEvent::Lifecycle(LifecycleMarker::MadeIncremental),
            EventType::Dismissed => HistoryEvent::Lifecycle(LifecycleMarker::Dismissed),
        };

        Self {
            date: record.date,
            scheduled: record.scheduled,
            priority: record.priority,
            event,
        }
    }
}

impl From<HistoryEntry> for HistoryRecord {
    fn from(entry: HistoryEntry) -> Self {
        let event_type = Some(entry.event_type());
        let mut record = HistoryRecord {
            date: entry.date,
            scheduled: entry.scheduled,
            interval: None,
            review_time_seconds: None,
            was_early: None,
            days_early_or_late: None,
            event_type,
            priority: entry.priority,
        };

        match entry.event {
            HistoryEvent::Repetition(r) => {
                record.interval = r.interval;
                record.review_time_seconds = r.review_time_seconds;
                if let Some(timing) = r.timing {
                    record.was_early = Some(timing.was_early);
                    record.days_early_or_late = Some(timing.days_early_or_late);
                }
            }
            HistoryEvent::Reschedule { interval, .. } => record.interval = interval,
            HistoryEvent::ManualReset | HistoryEvent::Lifecycle(_) => {}
        }

        record
    }
}

/// History kept after an item is dismissed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DismissedRecord {
    pub id: Uuid,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub dismissed_at: DateTime<Utc>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

/// Whole days between two instants, as a fraction
pub fn days_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / MS_PER_DAY as f64
}

pub fn add_days(at: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    at + Duration::milliseconds(i64::from(days) * MS_PER_DAY)
}
