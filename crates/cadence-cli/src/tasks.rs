//! Task types shipped with the binary.

use async_trait::async_trait;
use cadence_core::app::SchedulerBuilder;
use cadence_core::typed::{Handler, RegistryError, RunContext, Task, TaskFailure};
use serde::{Deserialize, Serialize};
use tokio::time::{Duration, sleep};

/// Logs a message. Handy for checking that the cron hook fires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EchoTask {
    pub message: String,
}

impl Task for EchoTask {
    const TYPE: &'static str = "cadence.system.echo.v1";
    const TITLE: &'static str = "Echo";
    const DESCRIPTION: &'static str = "Writes its message to the log.";
    const EXTENSION: &'static str = "system";
}

pub struct EchoHandler;

#[async_trait]
impl Handler<EchoTask> for EchoHandler {
    async fn handle(&self, task: EchoTask, ctx: RunContext) -> Result<(), TaskFailure> {
        tracing::info!(task_id = %ctx.task_id, context = %ctx.context, "{}", task.message);
        Ok(())
    }
}

/// Sleeps for a while, optionally failing afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SleepTask {
    pub seconds: u64,
    #[serde(default)]
    pub fail_with: Option<String>,
}

impl Task for SleepTask {
    const TYPE: &'static str = "cadence.system.sleep.v1";
    const TITLE: &'static str = "Sleep";
    const DESCRIPTION: &'static str = "Waits the given number of seconds. Useful to try out locking.";
    const EXTENSION: &'static str = "system";
}

pub struct SleepHandler;

#[async_trait]
impl Handler<SleepTask> for SleepHandler {
    async fn handle(&self, task: SleepTask, ctx: RunContext) -> Result<(), TaskFailure> {
        tracing::debug!(task_id = %ctx.task_id, seconds = task.seconds, "sleeping");
        sleep(Duration::from_secs(task.seconds)).await;
        match task.fail_with {
            Some(message) => Err(TaskFailure::new(message).with_code(1)),
            None => Ok(()),
        }
    }
}

pub fn register(builder: SchedulerBuilder) -> Result<SchedulerBuilder, RegistryError> {
    builder
        .register::<EchoTask, _>(EchoHandler)?
        .register::<SleepTask, _>(SleepHandler)
}

pub const EXPECTED: &[&str] = &[EchoTask::TYPE, SleepTask::TYPE];
