use crate::domain::Services;
use async_trait::async_trait;
use common::domain::{DomainError, DomainResult};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// What the driver does after a task succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Continue,
    /// Stop the pipeline and report success.
    Abort,
}

/// One step of a pipeline, operating on the shared per-event context `C`.
#[async_trait]
pub trait Task<C: Send>: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(
        &self,
        services: &Services,
        ctx: &mut C,
        cancel: &CancellationToken,
    ) -> DomainResult<TaskOutcome>;
}

/// Ordered task list for one event type.
pub struct Pipeline<C: Send> {
    name: &'static str,
    tasks: Vec<Box<dyn Task<C>>>,
}

impl<C: Send> Pipeline<C> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            tasks: Vec::new(),
        }
    }

    pub fn with_task(mut self, task: impl Task<C> + 'static) -> Self {
        self.tasks.push(Box::new(task));
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn task_names(&self) -> Vec<&'static str> {
        self.tasks.iter().map(|t| t.name()).collect()
    }

    /// Runs the tasks in order. Stops at the first error, at an abort, or when `cancel`
    /// fires between two tasks.
    pub async fn run(
        &self,
        services: &Services,
        ctx: &mut C,
        cancel: &CancellationToken,
    ) -> DomainResult<()> {
        for task in &self.tasks {
            if cancel.is_cancelled() {
                warn!(pipeline = self.name, task = task.name(), "pipeline cancelled");
                return Err(DomainError::Cancelled);
            }

            match task.run(services, ctx, cancel).await? {
                TaskOutcome::Continue => {}
                TaskOutcome::Abort => {
                    debug!(pipeline = self.name, task = task.name(), "pipeline aborted");
                    return Ok(());
                }
            }
        }
        Ok(())
    }
}
