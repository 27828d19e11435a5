//! Ports - the seams between the scheduler and its environment.
//!
//! The scheduler depends only on these traits: where tasks are persisted,
//! what time it is, and how execution tokens are minted.

pub mod clock;
pub mod id_generator;
pub mod task_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::task_store::{
    DueLock, DueScan, FinishedExecution, TaskEntry, TaskStore, WriteOutcome,
};
