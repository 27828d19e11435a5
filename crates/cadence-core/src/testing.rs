//! Task fixtures shared by the unit tests.

use crate::typed::{Handler, RunContext, Task, TaskFailure};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountingTask {
    pub label: String,
}

impl Task for CountingTask {
    const TYPE: &'static str = "test.counting.v1";
    const TITLE: &'static str = "Counting task";
    const EXTENSION: &'static str = "testing";
}

/// Counts runs and remembers the contexts it was called with.
#[derive(Clone, Default)]
pub struct CountingHandler {
    runs: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<RunContext>>>,
}

impl CountingHandler {
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn contexts(&self) -> Vec<RunContext> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Handler<CountingTask> for CountingHandler {
    async fn handle(&self, _task: CountingTask, ctx: RunContext) -> Result<(), TaskFailure> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(ctx);
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailingTask {
    pub code: i64,
    pub message: String,
}

impl Task for FailingTask {
    const TYPE: &'static str = "test.failing.v1";
}

pub struct FailingHandler;

#[async_trait]
impl Handler<FailingTask> for FailingHandler {
    async fn handle(&self, task: FailingTask, _ctx: RunContext) -> Result<(), TaskFailure> {
        Err(TaskFailure::new(task.message).with_code(task.code))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanickingTask {}

impl Task for PanickingTask {
    const TYPE: &'static str = "test.panicking.v1";
}

pub struct PanickingHandler;

#[async_trait]
impl Handler<PanickingTask> for PanickingHandler {
    async fn handle(&self, _task: PanickingTask, _ctx: RunContext) -> Result<(), TaskFailure> {
        panic!("handler exploded");
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatedTask {}

impl Task for GatedTask {
    const TYPE: &'static str = "test.gated.v1";
}

/// Signals `started`, then blocks until `release` is notified.
#[derive(Clone, Default)]
pub struct GatedHandler {
    pub started: Arc<Notify>,
    pub release: Arc<Notify>,
}

#[async_trait]
impl Handler<GatedTask> for GatedHandler {
    async fn handle(&self, _task: GatedTask, _ctx: RunContext) -> Result<(), TaskFailure> {
        self.started.notify_one();
        self.release.notified().await;
        Ok(())
    }
}
