//! Priorities of incremental items and flashcard-bearing nodes
//!
//! This module provides:
//! - Percentile ranking among a reference set
//! - Inheritance of priorities along the hierarchy, and subtree propagation
//! - The knowledge-base wide card priority cache and its debounced writer

pub mod cache_writer;
pub mod inheritance;
pub mod kb_cache;
pub mod models;
pub mod percentile;

pub use cache_writer::{FlushOutcome, PriorityCacheWriter};
pub use inheritance::{propagate_to_subtree, resolve_inherited_priority, PropagationReport, ResolvedPriority};
pub use kb_cache::{build_card_priority_cache, load_card_priority_cache, rebuild_card_priority_cache};
pub use models::{CardPriorityAttribute, CardPriorityInfo, PriorityEntry, PrioritySource};
pub use percentile::{fine_percentile, percentile, percentile_map};
