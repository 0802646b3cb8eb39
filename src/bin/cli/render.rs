use chrono::{DateTime, Utc};

use nous_incremental_lib::incremental::{days_between, HistoryEntry, HistoryEvent, LifecycleMarker};

/// ANSI color codes
pub struct Color;

impl Color {
    pub const RESET: &str = "\x1b[0m";
    pub const BOLD: &str = "\x1b[1m";
    pub const DIM: &str = "\x1b[2m";
    pub const RED: &str = "\x1b[31m";
    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const CYAN: &str = "\x1b[36m";
}

pub fn paint(text: &str, color: &str, use_color: bool) -> String {
    if use_color {
        format!("{}{}{}", color, text, Color::RESET)
    } else {
        text.to_string()
    }
}

/// Priority colored by urgency: red for the top fifth, yellow up to the middle
pub fn priority_label(priority: u8, use_color: bool) -> String {
    let color = match priority {
        0..=20 => Color::RED,
        21..=50 => Color::YELLOW,
        _ => Color::GREEN,
    };
    paint(&format!("p{:>3}", priority), color, use_color)
}

/// "due now", "overdue 2.5d" or "in 3.0d"
pub fn due_label(next: DateTime<Utc>, now: DateTime<Utc>, use_color: bool) -> String {
    let days = days_between(now, next);
    if days.abs() < 0.05 {
        paint("due now", Color::BOLD, use_color)
    } else if days < 0.0 {
        paint(&format!("overdue {:.1}d", -days), Color::RED, use_color)
    } else {
        paint(&format!("in {:.1}d", days), Color::DIM, use_color)
    }
}

/// One history line
pub fn history_line(entry: &HistoryEntry) -> String {
    let date = entry.date.format("%Y-%m-%d %H:%M");
    let detail = match &entry.event {
        HistoryEvent::Repetition(rep) => {
            let mut parts = vec![format!("{:?}", rep.kind).to_lowercase()];
            if let Some(interval) = rep.interval {
                parts.push(format!("next in {}d", interval));
            }
            if let Some(timing) = rep.timing {
                let when = if timing.was_early { "early" } else { "late" };
                parts.push(format!("{:.1}d {}", timing.days_early_or_late.abs(), when));
            }
            if let Some(seconds) = rep.review_time_seconds {
                parts.push(format!("{}s", seconds));
            }
            parts.join(", ")
        }
        HistoryEvent::Reschedule { origin, interval } => match interval {
            Some(days) => format!("rescheduled from {:?} by {}d", origin, days).to_lowercase(),
            None => format!("rescheduled from {:?}", origin).to_lowercase(),
        },
        HistoryEvent::ManualReset => "next date set by hand".to_string(),
        HistoryEvent::Lifecycle(LifecycleMarker::MadeIncremental) => "made incremental".to_string(),
        HistoryEvent::Lifecycle(LifecycleMarker::Dismissed) => "dismissed".to_string(),
    };
    match entry.priority {
        Some(priority) => format!("{}  {} (p{})", date, detail, priority),
        None => format!("{}  {}", date, detail),
    }
}
