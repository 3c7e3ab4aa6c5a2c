//! In-process broker

use super::{DeadLetter, FailOutcome, Lane, QueueConfig, QueueStats, Result, TaskQueue};
use crate::error::QueueError;
use crate::task::{Delivery, ProvisioningTask, Receipt};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

struct Pending {
    task: ProvisioningTask,
    available_at: Instant,
}

struct Reservation {
    task: ProvisioningTask,
    lane: Lane,
    deadline: Instant,
}

struct Inner {
    lanes: [VecDeque<Pending>; 3],
    in_flight: HashMap<Receipt, Reservation>,
    dead: Vec<DeadLetter>,
    /// Ids of every task currently queued, reserved or dead-lettered
    known: HashSet<String>,
    available: bool,
}

pub struct MemoryTaskQueue {
    config: QueueConfig,
    inner: Mutex<Inner>,
}

impl MemoryTaskQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                lanes: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
                in_flight: HashMap::new(),
                dead: Vec::new(),
                known: HashSet::new(),
                available: true,
            }),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Simulate a broker outage; every call fails while unavailable
    pub async fn set_available(&self, available: bool) {
        self.inner.lock().await.available = available;
    }

    fn lane_of(&self, task: &ProvisioningTask) -> Lane {
        self.config.lanes.lane_for(task.operation)
    }
}

impl Inner {
    fn check_available(&self) -> Result<()> {
        if self.available {
            Ok(())
        } else {
            Err(QueueError::Unavailable("in-process broker is offline".to_string()))
        }
    }

    fn push(&mut self, lane: Lane, task: ProvisioningTask, available_at: Instant) {
        self.lanes[lane.index()].push_back(Pending { task, available_at });
    }

    /// Return expired reservations to the front of their lane
    fn reclaim_expired(&mut self, now: Instant) {
        let expired: Vec<Receipt> = self
            .in_flight
            .iter()
            .filter(|(_, r)| r.deadline <= now)
            .map(|(receipt, _)| receipt.clone())
            .collect();

        for receipt in expired {
            if let Some(reservation) = self.in_flight.remove(&receipt) {
                tracing::warn!(
                    task_id = %reservation.task.task_id,
                    resource_id = %reservation.task.resource_id,
                    deliveries = reservation.task.deliveries,
                    "Visibility timeout expired, redelivering task"
                );
                self.lanes[reservation.lane.index()].push_front(Pending {
                    task: reservation.task,
                    available_at: now,
                });
            }
        }
    }
}

#[async_trait]
impl TaskQueue for MemoryTaskQueue {
    async fn enqueue(&self, task: ProvisioningTask) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        inner.check_available()?;

        if !inner.known.insert(task.task_id.clone()) {
            tracing::debug!(task_id = %task.task_id, "Task already queued, ignoring");
            return Ok(false);
        }

        let lane = self.lane_of(&task);
        tracing::debug!(
            task_id = %task.task_id,
            resource_id = %task.resource_id,
            operation = %task.operation,
            lane = %lane,
            "Task enqueued"
        );
        inner.push(lane, task, Instant::now());
        Ok(true)
    }

    async fn dequeue(&self) -> Result<Option<Delivery>> {
        let mut inner = self.inner.lock().await;
        inner.check_available()?;

        let now = Instant::now();
        inner.reclaim_expired(now);

        for lane in Lane::ALL {
            let queue = &mut inner.lanes[lane.index()];
            let Some(pos) = queue.iter().position(|p| p.available_at <= now) else {
                continue;
            };
            let Some(pending) = queue.remove(pos) else {
                continue;
            };

            let mut task = pending.task;
            task.deliveries += 1;
            task.visibility_deadline = chrono::Duration::from_std(self.config.visibility_timeout)
                .ok()
                .map(|visibility| Utc::now() + visibility);

            let receipt = Receipt::generate();
            inner.in_flight.insert(
                receipt.clone(),
                Reservation {
                    task: task.clone(),
                    lane,
                    deadline: now + self.config.visibility_timeout,
                },
            );

            return Ok(Some(Delivery { task, receipt }));
        }

        Ok(None)
    }

    async fn ack(&self, receipt: &Receipt) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        inner.check_available()?;

        match inner.in_flight.remove(receipt) {
            Some(reservation) => {
                inner.known.remove(&reservation.task.task_id);
                Ok(true)
            }
            None => {
                tracing::debug!(receipt = %receipt, "Ignoring ack with stale receipt");
                Ok(false)
            }
        }
    }

    async fn release(&self, receipt: &Receipt, delay: Duration) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        inner.check_available()?;

        match inner.in_flight.remove(receipt) {
            Some(reservation) => {
                inner.push(reservation.lane, reservation.task, Instant::now() + delay);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn fail(&self, receipt: &Receipt, error: &str) -> Result<FailOutcome> {
        let mut inner = self.inner.lock().await;
        inner.check_available()?;

        let Some(reservation) = inner.in_flight.remove(receipt) else {
            return Ok(FailOutcome::Stale);
        };

        let mut task = reservation.task;
        task.attempts += 1;
        let attempts = task.attempts;

        if attempts >= self.config.max_attempts {
            tracing::error!(
                task_id = %task.task_id,
                resource_id = %task.resource_id,
                attempts,
                error,
                "Task dead-lettered"
            );
            inner.dead.push(DeadLetter {
                task,
                error: error.to_string(),
                dead_at: Utc::now(),
            });
            return Ok(FailOutcome::DeadLettered { attempts });
        }

        let delay = self.config.retry_delay_for(attempts);
        tracing::warn!(
            task_id = %task.task_id,
            attempts,
            delay_ms = delay.as_millis() as u64,
            error,
            "Task failed, requeued"
        );
        inner.push(reservation.lane, task, Instant::now() + delay);
        Ok(FailOutcome::Retrying { attempts, delay })
    }

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>> {
        let inner = self.inner.lock().await;
        inner.check_available()?;
        Ok(inner.dead.clone())
    }

    async fn requeue_dead_letter(&self, task_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.check_available()?;

        let pos = inner
            .dead
            .iter()
            .position(|d| d.task.task_id == task_id)
            .ok_or_else(|| QueueError::DeadLetterNotFound(task_id.to_string()))?;
        let mut task = inner.dead.remove(pos).task;
        task.attempts = 0;

        let lane = self.lane_of(&task);
        inner.push(lane, task, Instant::now());
        Ok(())
    }

    async fn stats(&self) -> Result<QueueStats> {
        let inner = self.inner.lock().await;
        inner.check_available()?;
        Ok(QueueStats {
            critical: inner.lanes[Lane::Critical.index()].len(),
            default: inner.lanes[Lane::Default.index()].len(),
            low: inner.lanes[Lane::Low.index()].len(),
            in_flight: inner.in_flight.len(),
            dead_letters: inner.dead.len(),
        })
    }
}
