//! App - the scheduler built on top of the ports.
//!
//! - **SchedulerBuilder**: registration and startup validation
//! - **Scheduler**: the batch path, manual execution and task administration
//! - **status**: read models for listings and the health check

pub mod builder;
pub mod scheduler;
pub mod status;

pub use self::builder::{BuildError, SchedulerBuilder};
pub use self::scheduler::Scheduler;
pub use self::status::{GroupSection, LastRunStatus, TaskListing, TaskView, ToggleResult};
