//! Flashcard queue integration

pub mod interleaver;

pub use crate::incremental::QueueMode;
pub use interleaver::{Candidate, CandidateSource, QueueDecision, QueueInterleaver, StepRequest};
