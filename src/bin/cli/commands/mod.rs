pub mod due;
pub mod nodes;
pub mod priority;
pub mod queue;
pub mod review;
pub mod show;
pub mod tag;
