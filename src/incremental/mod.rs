//! Incremental items: notebook nodes under spaced-repetition-style scheduling
//!
//! This module provides:
//! - The item and history models (flat JSON on disk, tagged union in memory)
//! - The doubling interval scheduler with history pruning
//! - Storage of items on host nodes, including the dismissed archive

pub mod models;
pub mod scheduler;
pub mod storage;

pub use models::*;
pub use scheduler::{calculate_next_review, format_interval, ReviewContext, ReviewResult};
pub use storage::IncrementalStore;
