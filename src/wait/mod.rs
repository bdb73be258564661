//! Timeout-bounded waiting
//!
//! - [`mailbox`] - single-slot handoff from a background I/O task to a waiter
//! - [`deadline`] - explicit per-operation deadlines

pub mod deadline;
pub mod mailbox;

pub use deadline::{Deadline, DeadlineElapsed};
pub use mailbox::Mailbox;
