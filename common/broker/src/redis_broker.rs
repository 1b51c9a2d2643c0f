use std::time::Duration;

use async_trait::async_trait;
use inference_core::{JobEnvelope, Priority, ResultEnvelope, Uuid};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{AckToken, BrokerState, Delivery, PriorityBroker};

/// The `BrokerState` as actually persisted in Redis — `BrokerState` itself
/// is not `Serialize` because its `Success` variant wraps a type the
/// gateway also uses directly; this is the wire shape for the hash entry.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "state")]
enum StoredState {
    Pending,
    Started,
    Retry { error: String },
    Success { envelope: ResultEnvelope },
    Failure { error: String },
}

impl From<StoredState> for BrokerState {
    fn from(value: StoredState) -> Self {
        match value {
            StoredState::Pending => BrokerState::Pending,
            StoredState::Started => BrokerState::Started,
            StoredState::Retry { error } => BrokerState::Retry { error },
            StoredState::Success { envelope } => BrokerState::Success(envelope),
            StoredState::Failure { error } => BrokerState::Failure { error },
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct WireJob {
    job: JobEnvelope,
    attempt: u32,
}

/// Redis-backed broker: each priority maps to a sorted set (`ZADD` scored
/// by enqueue time, `ZPOPMIN` to dequeue — the direct-exchange-with-
/// routing-key model in §6 collapses to one key per queue) plus a result
/// hash with TTL. Reuses the same `ConnectionManager` pattern as the
/// teacher's `RedisRateLimiter`.
///
/// This is the production adapter behind the `PriorityBroker` trait; the
/// real deployment's message broker (RabbitMQ/Redis Streams/etc.) is an
/// external collaborator per spec §1, so this adapter only needs to
/// satisfy the contract, not reimplement a general-purpose broker.
pub struct RedisBroker {
    manager: ConnectionManager,
    prefix: String,
    result_ttl_secs: u64,
    poll_interval: Duration,
}

impl RedisBroker {
    pub async fn new(redis_url: &str, prefix: impl Into<String>, result_ttl_secs: u64) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self {
            manager,
            prefix: prefix.into(),
            result_ttl_secs,
            poll_interval: Duration::from_millis(200),
        })
    }

    fn queue_key(&self, priority: Priority) -> String {
        format!("{}:queue:{}", self.prefix, priority.queue_name())
    }

    fn in_flight_key(&self) -> String {
        format!("{}:in-flight", self.prefix)
    }

    fn result_key(&self, task_id: Uuid) -> String {
        format!("{}:result:{}", self.prefix, task_id)
    }

    async fn zpopmin_job(&self, priority: Priority) -> anyhow::Result<Option<WireJob>> {
        let mut conn = self.manager.clone();
        let key = self.queue_key(priority);
        let popped: Vec<(String, f64)> = conn.zpopmin(&key, 1).await?;
        match popped.into_iter().next() {
            Some((payload, _score)) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl PriorityBroker for RedisBroker {
    async fn publish(&self, job: JobEnvelope) -> anyhow::Result<()> {
        let mut conn = self.manager.clone();
        let key = self.queue_key(job.priority);
        let task_id = job.task_id;
        let wire = WireJob { job, attempt: 0 };
        let payload = serde_json::to_string(&wire)?;
        let score = chrono::Utc::now().timestamp_millis() as f64;
        let _: () = conn.zadd(&key, payload, score).await?;
        let result_key = self.result_key(task_id);
        let stored = serde_json::to_string(&StoredState::Pending)?;
        let _: () = conn.set_ex(&result_key, stored, self.result_ttl_secs).await?;
        Ok(())
    }

    async fn pop_next(&self) -> Delivery {
        loop {
            for priority in Priority::ALL {
                match self.zpopmin_job(priority).await {
                    Ok(Some(wire)) => {
                        let task_id = wire.job.task_id;
                        let delivery_id = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0) as u64;
                        let mut conn = self.manager.clone();
                        if let Ok(payload) = serde_json::to_string(&wire) {
                            let _: Result<(), _> = conn
                                .hset(self.in_flight_key(), delivery_id.to_string(), payload)
                                .await;
                        }
                        return Delivery {
                            job: wire.job,
                            token: AckToken { task_id, delivery_id },
                            attempt: wire.attempt,
                        };
                    }
                    Ok(None) => continue,
                    Err(err) => {
                        warn!(?err, ?priority, "Failed to pop from Redis priority queue");
                    }
                }
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn mark_started(&self, task_id: Uuid) {
        let mut conn = self.manager.clone();
        if let Ok(stored) = serde_json::to_string(&StoredState::Started) {
            let _: Result<(), _> = conn.set_ex(self.result_key(task_id), stored, self.result_ttl_secs).await;
        }
    }

    async fn ack(&self, token: AckToken) {
        let mut conn = self.manager.clone();
        let _: Result<(), _> = conn.hdel(self.in_flight_key(), token.delivery_id.to_string()).await;
    }

    async fn nack_requeue(&self, token: AckToken, delay: Duration) {
        let mut conn = self.manager.clone();
        let payload: Option<String> = conn
            .hget(self.in_flight_key(), token.delivery_id.to_string())
            .await
            .ok()
            .flatten();
        let _: Result<(), _> = conn.hdel(self.in_flight_key(), token.delivery_id.to_string()).await;
        let Some(payload) = payload else { return };
        let Ok(mut wire) = serde_json::from_str::<WireJob>(&payload) else { return };
        wire.attempt += 1;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let key = self.queue_key(wire.job.priority);
        if let Ok(reencoded) = serde_json::to_string(&wire) {
            let score = chrono::Utc::now().timestamp_millis() as f64;
            let _: Result<(), _> = conn.zadd(&key, reencoded, score).await;
        }
    }

    async fn put_result(&self, task_id: Uuid, envelope: ResultEnvelope) {
        let stored = if envelope.status == "SUCCESS" {
            StoredState::Success { envelope }
        } else {
            StoredState::Failure { error: envelope.error.unwrap_or_default() }
        };
        let mut conn = self.manager.clone();
        if let Ok(payload) = serde_json::to_string(&stored) {
            let _: Result<(), _> = conn.set_ex(self.result_key(task_id), payload, self.result_ttl_secs).await;
        }
    }

    async fn mark_retry(&self, task_id: Uuid, error: String) {
        let mut conn = self.manager.clone();
        if let Ok(stored) = serde_json::to_string(&StoredState::Retry { error }) {
            let _: Result<(), _> = conn.set_ex(self.result_key(task_id), stored, self.result_ttl_secs).await;
        }
    }

    async fn get_result(&self, task_id: Uuid) -> BrokerState {
        let mut conn = self.manager.clone();
        let payload: Option<String> = conn.get(self.result_key(task_id)).await.ok();
        match payload.and_then(|p| serde_json::from_str::<StoredState>(&p).ok()) {
            Some(stored) => stored.into(),
            None => BrokerState::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // These exercise the wire encoding only; a live Redis instance is
    // required for the rest of the adapter and is covered by the
    // integration harness, not unit tests.
    #[test]
    fn stored_state_round_trips_through_json() {
        let task_id = Uuid::new_v4();
        let stored = StoredState::Success {
            envelope: ResultEnvelope::success(task_id, Default::default(), Default::default()),
        };
        let json = serde_json::to_string(&stored).unwrap();
        let back: StoredState = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, StoredState::Success { .. }));
    }

    #[test]
    fn wire_job_round_trips() {
        let job = JobEnvelope {
            task_id: Uuid::new_v4(),
            model_name: "superres-x4".into(),
            input: serde_json::Map::new(),
            callback_url: None,
            priority: Priority::High,
        };
        let wire = WireJob { job, attempt: 2 };
        let json = serde_json::to_string(&wire).unwrap();
        let back: WireJob = serde_json::from_str(&json).unwrap();
        assert_eq!(back.attempt, 2);
    }
}
