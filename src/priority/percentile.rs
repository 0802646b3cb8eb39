//! Relative rank of an item among a reference set
//!
//! Entries are sorted ascending by priority (stable, so ties keep their
//! input order) and the 1-based position is scaled to 100. A lower priority
//! value therefore always gets a lower or equal percentile.
//!
//! Two rounding conventions are in use and kept apart on purpose:
//! [`percentile`] rounds to a whole number for queue and shield logic,
//! [`fine_percentile`] keeps one decimal for the relative priority slider.

use std::collections::HashMap;

use uuid::Uuid;

use super::models::PriorityEntry;

/// Stable ascending sort by priority
pub fn sort_by_priority(entries: &[PriorityEntry]) -> Vec<PriorityEntry> {
    let mut sorted = entries.to_vec();
    sorted.sort_by_key(|e| e.priority);
    sorted
}

fn raw_percentile(index: usize, len: usize) -> f64 {
    (index + 1) as f64 / len as f64 * 100.0
}

fn coarse(index: usize, len: usize) -> u8 {
    raw_percentile(index, len).round().clamp(1.0, 100.0) as u8
}

fn position_of(sorted: &[PriorityEntry], target: Uuid) -> Option<usize> {
    sorted.iter().position(|e| e.id == target)
}

/// Whole-number percentile of `target`, in 1..=100
pub fn percentile(entries: &[PriorityEntry], target: Uuid) -> Option<u8> {
    let sorted = sort_by_priority(entries);
    position_of(&sorted, target).map(|index| coarse(index, sorted.len()))
}

/// Percentile of `target` rounded to one decimal
pub fn fine_percentile(entries: &[PriorityEntry], target: Uuid) -> Option<f64> {
    let sorted = sort_by_priority(entries);
    position_of(&sorted, target)
        .map(|index| (raw_percentile(index, sorted.len()) * 10.0).round() / 10.0)
}

/// Whole-number percentiles for every entry, sorting once
pub fn percentile_map(entries: &[PriorityEntry]) -> HashMap<Uuid, u8> {
    let sorted = sort_by_priority(entries);
    let len = sorted.len();
    let mut map = HashMap::with_capacity(len);
    for (index, entry) in sorted.iter().enumerate() {
        map.entry(entry.id).or_insert_with(|| coarse(index, len));
    }
    map
}
