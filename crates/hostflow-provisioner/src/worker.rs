//! Worker Pool
//!
//! A fixed number of workers pull tasks from the queue. Each task runs in its
//! own tokio task under the budget of its operation, so a panic or a hung
//! provider call costs that task only.

use crate::config::secs;
use crate::error::ProvisionError;
use crate::orchestrator::{Orchestrator, Outcome};
use crate::queue::{FailOutcome, TaskQueue};
use crate::task::{Delivery, Operation, ProvisioningTask, Receipt};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub workers: usize,

    #[serde(with = "secs")]
    pub create_budget: Duration,

    #[serde(with = "secs")]
    pub delete_budget: Duration,

    #[serde(with = "secs")]
    pub resize_budget: Duration,

    /// Sleep when the queue is empty
    #[serde(with = "secs")]
    pub idle_poll: Duration,

    /// First backoff step while the queue is unreachable
    #[serde(with = "secs")]
    pub unavailable_backoff: Duration,

    #[serde(with = "secs")]
    pub max_unavailable_backoff: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            create_budget: Duration::from_secs(15 * 60),
            delete_budget: Duration::from_secs(5 * 60),
            resize_budget: Duration::from_secs(10 * 60),
            idle_poll: Duration::from_secs(1),
            unavailable_backoff: Duration::from_secs(1),
            max_unavailable_backoff: Duration::from_secs(60),
        }
    }
}

impl WorkerConfig {
    /// Wall-clock limit of one task
    pub fn budget_for(&self, operation: Operation) -> Duration {
        match operation {
            Operation::Create => self.create_budget,
            Operation::Delete => self.delete_budget,
            Operation::Resize => self.resize_budget,
        }
    }

    pub fn longest_budget(&self) -> Duration {
        self.create_budget
            .max(self.delete_budget)
            .max(self.resize_budget)
    }
}

pub struct WorkerPool {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `config.workers` workers on the current runtime
    pub fn start(
        config: WorkerConfig,
        queue: Arc<dyn TaskQueue>,
        orchestrator: Arc<Orchestrator>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let config = Arc::new(config);

        let handles = (0..config.workers.max(1))
            .map(|index| {
                let worker = Worker {
                    index,
                    config: Arc::clone(&config),
                    queue: Arc::clone(&queue),
                    orchestrator: Arc::clone(&orchestrator),
                    cancel: cancel.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        tracing::info!(workers = config.workers.max(1), "Worker pool started");
        Self { cancel, handles }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop taking tasks, cancel running ones and wait for the workers
    ///
    /// Interrupted tasks are released back to the queue and resume on the
    /// next start.
    pub async fn shutdown(self) {
        tracing::info!("Shutting down worker pool");
        self.cancel.cancel();
        self.join().await;
    }

    /// Wait until the workers exit
    pub async fn join(self) {
        for result in join_all(self.handles).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Worker exited abnormally");
            }
        }
    }
}

enum TaskEnd {
    Finished(crate::error::Result<Outcome>),
    Panicked(String),
    OverBudget(Duration),
}

struct Worker {
    index: usize,
    config: Arc<WorkerConfig>,
    queue: Arc<dyn TaskQueue>,
    orchestrator: Arc<Orchestrator>,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(self) {
        tracing::debug!(worker = self.index, "Worker started");
        let mut backoff = self.config.unavailable_backoff;

        while !self.cancel.is_cancelled() {
            match self.queue.dequeue().await {
                Ok(Some(delivery)) => {
                    backoff = self.config.unavailable_backoff;
                    self.process(delivery).await;
                }
                Ok(None) => {
                    backoff = self.config.unavailable_backoff;
                    self.pause(self.config.idle_poll).await;
                }
                Err(e) => {
                    tracing::warn!(
                        worker = self.index,
                        error = %e,
                        backoff_secs = backoff.as_secs_f64(),
                        "Queue unavailable"
                    );
                    self.pause(backoff).await;
                    backoff = (backoff * 2).min(self.config.max_unavailable_backoff);
                }
            }
        }

        tracing::debug!(worker = self.index, "Worker stopped");
    }

    async fn pause(&self, duration: Duration) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = tokio::time::sleep(duration) => {}
        }
    }

    async fn process(&self, delivery: Delivery) {
        let Delivery { task, receipt } = delivery;
        let budget = self.config.budget_for(task.operation);

        let orchestrator = Arc::clone(&self.orchestrator);
        let task_cancel = self.cancel.child_token();
        let spawned_task = task.clone();
        let spawned_cancel = task_cancel.clone();
        let mut handle = tokio::spawn(async move {
            orchestrator.handle(&spawned_task, &spawned_cancel).await
        });

        let joined = tokio::select! {
            joined = &mut handle => Some(joined),
            _ = tokio::time::sleep(budget) => None,
        };
        let end = match joined {
            Some(Ok(result)) => TaskEnd::Finished(result),
            Some(Err(e)) if e.is_panic() => TaskEnd::Panicked(panic_message(e.into_panic())),
            Some(Err(e)) => TaskEnd::Panicked(e.to_string()),
            None => {
                task_cancel.cancel();
                handle.abort();
                // Wait for the abort so no late write races the failure below
                let _ = handle.await;
                TaskEnd::OverBudget(budget)
            }
        };

        match end {
            TaskEnd::Finished(Ok(Outcome::Deferred(delay))) => {
                tracing::debug!(
                    task_id = %task.task_id,
                    delay_secs = delay.as_secs(),
                    "Task deferred"
                );
                self.release(&task.task_id, &receipt, delay).await;
            }
            TaskEnd::Finished(Ok(outcome)) => {
                tracing::info!(task_id = %task.task_id, outcome = ?outcome, "Task finished");
                self.finish(&task.task_id, &receipt).await;
            }
            TaskEnd::Finished(Err(ProvisionError::Cancelled)) => {
                tracing::info!(task_id = %task.task_id, "Task interrupted by shutdown");
                self.release(&task.task_id, &receipt, Duration::ZERO).await;
            }
            TaskEnd::Finished(Err(e)) => {
                let message = e.to_string();
                match self.queue.fail(&receipt, &message).await {
                    Ok(FailOutcome::Retrying { attempts, delay }) => {
                        tracing::warn!(
                            task_id = %task.task_id,
                            attempts,
                            delay_secs = delay.as_secs(),
                            error = %message,
                            "Task failed, will retry"
                        );
                    }
                    Ok(FailOutcome::DeadLettered { attempts }) => {
                        tracing::error!(
                            task_id = %task.task_id,
                            attempts,
                            error = %message,
                            "Task dead-lettered"
                        );
                        let reason = format!("gave up after {} attempts: {}", attempts, message);
                        self.abandon(&task, &reason).await;
                    }
                    Ok(FailOutcome::Stale) => {
                        tracing::warn!(task_id = %task.task_id, "Failure reported with stale receipt");
                    }
                    Err(queue_err) => {
                        tracing::warn!(
                            task_id = %task.task_id,
                            error = %queue_err,
                            "Could not report failure, task will be redelivered"
                        );
                    }
                }
            }
            TaskEnd::Panicked(message) => {
                tracing::error!(task_id = %task.task_id, panic = %message, "Task panicked");
                let reason = ProvisionError::Panicked(message).to_string();
                self.abandon(&task, &reason).await;
                self.finish(&task.task_id, &receipt).await;
            }
            TaskEnd::OverBudget(budget) => {
                tracing::error!(
                    task_id = %task.task_id,
                    budget = ?budget,
                    "Task exceeded its budget"
                );
                let reason = ProvisionError::Timeout(format!(
                    "{} exceeded its budget of {:?}",
                    task.operation, budget
                ))
                .to_string();
                self.abandon(&task, &reason).await;
                self.finish(&task.task_id, &receipt).await;
            }
        }
    }

    /// Ack the delivery and clear its outbox entry
    async fn finish(&self, task_id: &str, receipt: &Receipt) {
        match self.queue.ack(receipt).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!(task_id, "Ack with stale receipt"),
            Err(e) => {
                tracing::warn!(task_id, error = %e, "Ack failed, task will be redelivered");
                return;
            }
        }
        if let Err(e) = self.orchestrator.store().outbox_complete(task_id).await {
            tracing::warn!(task_id, error = %e, "Could not clear outbox entry");
        }
    }

    async fn release(&self, task_id: &str, receipt: &Receipt, delay: Duration) {
        if let Err(e) = self.queue.release(receipt, delay).await {
            tracing::warn!(task_id, error = %e, "Release failed, task will be redelivered");
        }
    }

    /// Fail the resource of a task that will not run again
    async fn abandon(&self, task: &ProvisioningTask, reason: &str) {
        if let Err(e) = self.orchestrator.fail_resource(task, reason).await {
            tracing::error!(
                task_id = %task.task_id,
                resource_id = %task.resource_id,
                error = %e,
                "Could not mark resource failed"
            );
        }
        if let Err(e) = self.orchestrator.store().outbox_complete(&task.task_id).await {
            tracing::warn!(task_id = %task.task_id, error = %e, "Could not clear outbox entry");
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_per_operation() {
        let config = WorkerConfig::default();
        assert_eq!(config.budget_for(Operation::Delete), Duration::from_secs(300));
        assert_eq!(config.longest_budget(), Duration::from_secs(900));
    }

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("bang"))), "bang");
        assert_eq!(panic_message(Box::new(7u8)), "unknown panic");
    }
}
