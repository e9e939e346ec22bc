//! Trait seams between the engine and its collaborators.
//!
//! The engine reads and writes membership through the store traits and
//! hands follow-up work to a [`scheduler::Scheduler`]. Both are provided by
//! the application; in-memory versions live in [`crate::stores`] and
//! [`crate::jobs`].

pub mod scheduler;
pub mod store;
