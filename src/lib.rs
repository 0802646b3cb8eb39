//! Incremental reading for Nous
//!
//! Spaced-repetition scheduling for arbitrary notebook nodes, a priority
//! system shared with flashcard-bearing nodes, and the queue interleaver
//! that decides, step by step, whether the learner sees a flashcard or an
//! incremental item next.
//!
//! The host knowledge base and flashcard engine are consumed through the
//! traits in [`host`]. [`host::MemoryHost`] and [`host::FileStorage`] let the
//! engine run standalone.

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod host;
pub mod incremental;
pub mod priority;
pub mod queue;
pub mod session;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EngineConfig, InterleaveRatio, PerformanceMode};
pub use engine::IncrementalEngine;
pub use error::{EngineError, Result};
pub use incremental::{HistoryEntry, HistoryEvent, IncrementalItem, QueueMode};
pub use priority::{CardPriorityInfo, PrioritySource};
pub use queue::QueueDecision;
pub use session::{SessionCache, ShieldKind, ShieldStatus};
