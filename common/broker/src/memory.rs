use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use inference_core::{JobEnvelope, Priority, ResultEnvelope, Uuid};
use tokio::sync::{Mutex, Notify};
use tracing::debug;

use crate::{AckToken, BrokerState, Delivery, PriorityBroker};

struct InFlight {
    job: JobEnvelope,
    attempt: u32,
}

/// An in-process priority broker: three FIFO queues drained high-before-
/// normal-before-low, a result store, and late acknowledgment via an
/// in-flight table keyed by delivery id. Used by the worker's and
/// gateway's own test suites, and as the default when no `BROKER_URL` is
/// configured, so the full submit → dispatch → complete pipeline can be
/// exercised without a live Redis instance.
pub struct InMemoryBroker {
    queues: [Mutex<VecDeque<(JobEnvelope, u32)>>; 3],
    notify: Notify,
    next_delivery_id: AtomicU64,
    in_flight: DashMap<u64, InFlight>,
    results: DashMap<Uuid, BrokerState>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            queues: [Mutex::new(VecDeque::new()), Mutex::new(VecDeque::new()), Mutex::new(VecDeque::new())],
            notify: Notify::new(),
            next_delivery_id: AtomicU64::new(1),
            in_flight: DashMap::new(),
            results: DashMap::new(),
        }
    }

    fn queue_index(priority: Priority) -> usize {
        match priority {
            Priority::High => 0,
            Priority::Normal => 1,
            Priority::Low => 2,
        }
    }

    pub fn new_with_broker() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Current depth of the queue for `priority`, for gauge metrics (§4.10).
    pub async fn queue_depth(&self, priority: Priority) -> usize {
        self.queues[Self::queue_index(priority)].lock().await.len()
    }

    async fn try_pop_highest(&self) -> Option<(JobEnvelope, u32)> {
        for queue in &self.queues {
            let mut guard = queue.lock().await;
            if let Some(item) = guard.pop_front() {
                return Some(item);
            }
        }
        None
    }

    async fn push(&self, job: JobEnvelope, attempt: u32) {
        let idx = Self::queue_index(job.priority);
        self.queues[idx].lock().await.push_back((job, attempt));
        self.notify.notify_one();
    }
}

#[async_trait]
impl PriorityBroker for InMemoryBroker {
    async fn publish(&self, job: JobEnvelope) -> anyhow::Result<()> {
        let task_id = job.task_id;
        self.results.insert(task_id, BrokerState::Pending);
        self.push(job, 0).await;
        Ok(())
    }

    async fn pop_next(&self) -> Delivery {
        loop {
            if let Some((job, attempt)) = self.try_pop_highest().await {
                let delivery_id = self.next_delivery_id.fetch_add(1, Ordering::SeqCst);
                let task_id = job.task_id;
                self.in_flight.insert(delivery_id, InFlight { job: job.clone(), attempt });
                return Delivery {
                    job,
                    token: AckToken { task_id, delivery_id },
                    attempt,
                };
            }
            self.notify.notified().await;
        }
    }

    async fn mark_started(&self, task_id: Uuid) {
        self.results.insert(task_id, BrokerState::Started);
    }

    async fn ack(&self, token: AckToken) {
        self.in_flight.remove(&token.delivery_id);
        debug!(task_id = %token.task_id, "Acked job");
    }

    async fn nack_requeue(&self, token: AckToken, delay: Duration) {
        let Some((_, in_flight)) = self.in_flight.remove(&token.delivery_id) else {
            return;
        };
        let job = in_flight.job;
        let attempt = in_flight.attempt + 1;
        // The job stays off every queue (and thus unavailable to other
        // workers) for the backoff window — this call simply waits it out
        // before re-enqueuing, which is fine under prefetch=1: a worker has
        // nothing else to do with its single in-flight slot anyway (§4.8).
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.push(job, attempt).await;
    }

    async fn put_result(&self, task_id: Uuid, envelope: ResultEnvelope) {
        let state = if envelope.status == "SUCCESS" {
            BrokerState::Success(envelope)
        } else {
            BrokerState::Failure { error: envelope.error.unwrap_or_default() }
        };
        self.results.insert(task_id, state);
    }

    async fn mark_retry(&self, task_id: Uuid, error: String) {
        self.results.insert(task_id, BrokerState::Retry { error });
    }

    async fn get_result(&self, task_id: Uuid) -> BrokerState {
        self.results
            .get(&task_id)
            .map(|entry| entry.value().clone())
            .unwrap_or(BrokerState::Pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inference_core::{JobEnvelope, Priority};
    use serde_json::Map;

    fn job(priority: Priority) -> JobEnvelope {
        JobEnvelope {
            task_id: Uuid::new_v4(),
            model_name: "superres-x4".into(),
            input: Map::new(),
            callback_url: None,
            priority,
        }
    }

    #[tokio::test]
    async fn high_priority_drains_before_normal_and_low() {
        let broker = InMemoryBroker::new();
        broker.publish(job(Priority::Low)).await.unwrap();
        broker.publish(job(Priority::Normal)).await.unwrap();
        broker.publish(job(Priority::High)).await.unwrap();

        let first = broker.pop_next().await;
        assert_eq!(first.job.priority, Priority::High);
        let second = broker.pop_next().await;
        assert_eq!(second.job.priority, Priority::Normal);
        let third = broker.pop_next().await;
        assert_eq!(third.job.priority, Priority::Low);
    }

    #[tokio::test]
    async fn unknown_task_reports_pending() {
        let broker = InMemoryBroker::new();
        let state = broker.get_result(Uuid::new_v4()).await;
        assert!(matches!(state, BrokerState::Pending));
    }

    #[tokio::test]
    async fn publish_then_pop_then_ack_clears_in_flight() {
        let broker = InMemoryBroker::new();
        let envelope = job(Priority::Normal);
        let task_id = envelope.task_id;
        broker.publish(envelope).await.unwrap();
        broker.mark_started(task_id).await;
        assert!(matches!(broker.get_result(task_id).await, BrokerState::Started));

        let delivery = broker.pop_next().await;
        assert_eq!(delivery.attempt, 0);
        broker.ack(delivery.token).await;
        assert!(broker.in_flight.is_empty());
    }

    #[tokio::test]
    async fn nack_requeue_increments_attempt() {
        let broker = InMemoryBroker::new();
        broker.publish(job(Priority::Normal)).await.unwrap();
        let delivery = broker.pop_next().await;
        broker.nack_requeue(delivery.token, Duration::from_millis(1)).await;
        let redelivered = broker.pop_next().await;
        assert_eq!(redelivered.attempt, 1);
    }

    #[tokio::test]
    async fn put_result_success_and_failure() {
        let broker = InMemoryBroker::new();
        let task_id = Uuid::new_v4();
        broker
            .put_result(task_id, ResultEnvelope::success(task_id, Default::default(), Default::default()))
            .await;
        assert!(matches!(broker.get_result(task_id).await, BrokerState::Success(_)));

        let task_id2 = Uuid::new_v4();
        broker.put_result(task_id2, ResultEnvelope::failure(task_id2, "boom")).await;
        assert!(matches!(broker.get_result(task_id2).await, BrokerState::Failure { .. }));
    }
}
