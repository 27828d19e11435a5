//! cadence-core
//!
//! Core building blocks of the Cadence task scheduler.
//!
//! # Modules
//! - **domain**: ids, execution policies, cron expressions, task records, outcomes, errors
//! - **ports**: the seams to the environment (TaskStore, Clock, IdGenerator)
//! - **app**: SchedulerBuilder, Scheduler and the listing/status read models
//! - **typed**: typed task API (Task, Handler, TaskRegistry, PayloadCodec)
//! - **impls**: in-memory and SQLite task stores
//! - **config**: TOML configuration
//! - **observability**: task and store counters

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod typed;

#[cfg(test)]
mod testing;

pub use app::{BuildError, Scheduler, SchedulerBuilder};
pub use domain::{ErrorKind, ExecutionContext, ExecutionPolicy, SchedulerError, TaskDraft, TaskId};
pub use typed::{Handler, RunContext, Task, TaskFailure};
