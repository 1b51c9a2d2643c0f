pub mod memory;
pub mod redis_broker;

use async_trait::async_trait;
use inference_core::{JobEnvelope, ResultEnvelope, Uuid};
use std::time::Duration;

pub use memory::InMemoryBroker;
pub use redis_broker::RedisBroker;

/// Authoritative read of a task's state as the broker sees it (§3, §6).
/// `Pending` covers both "queued" and "never heard of this task" — the
/// gateway cannot and need not distinguish them.
#[derive(Debug, Clone)]
pub enum BrokerState {
    Pending,
    Started,
    Retry { error: String },
    Success(ResultEnvelope),
    Failure { error: String },
}

/// A token handed back by [`PriorityBroker::pop_next`] that must be passed
/// to [`PriorityBroker::ack`] or [`PriorityBroker::nack_requeue`] to
/// resolve delivery. Holding a delivery without resolving it means the
/// broker considers the job still in flight (late acknowledgment, §4.8).
#[derive(Debug, Clone)]
pub struct AckToken {
    pub task_id: Uuid,
    pub(crate) delivery_id: u64,
}

#[derive(Debug, Clone)]
pub struct Delivery {
    pub job: JobEnvelope,
    pub token: AckToken,
    pub attempt: u32,
}

/// The broker contract (§6, §8): three priority queues with
/// at-least-once delivery via late acknowledgment, and a per-task result
/// store the gateway reads through.
#[async_trait]
pub trait PriorityBroker: Send + Sync {
    async fn publish(&self, job: JobEnvelope) -> anyhow::Result<()>;

    /// Blocks until a job is available, preferring higher-priority queues
    /// (§5: higher-priority queues are drained preferentially; no ordering
    /// guarantee within a class).
    async fn pop_next(&self) -> Delivery;

    async fn mark_started(&self, task_id: Uuid);

    async fn ack(&self, token: AckToken);

    /// Re-queues the job behind `token` after `delay`, incrementing its
    /// attempt counter. Used by the worker's retry policy (§4.8).
    async fn nack_requeue(&self, token: AckToken, delay: Duration);

    async fn put_result(&self, task_id: Uuid, envelope: ResultEnvelope);

    async fn mark_retry(&self, task_id: Uuid, error: String);

    async fn get_result(&self, task_id: Uuid) -> BrokerState;
}
