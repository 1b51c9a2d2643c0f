use std::env;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use inference_blobstore::{BlobStore, LocalBlobStore, S3BlobStore};
use inference_broker::{InMemoryBroker, PriorityBroker, RedisBroker};
use inference_core::{ModelRegistry, ResultEnvelope};
use inference_metrics::WorkerMetrics;
use inference_worker::config::WorkerConfig;
use inference_worker::pipeline::process_job;
use inference_worker::retry::backoff;
use inference_worker::timer::Timer;
use tracing::{error, info, warn};

#[derive(Clone)]
struct HttpState {
    metrics: Arc<WorkerMetrics>,
}

async fn health() -> &'static str {
    "ok"
}

async fn metrics_endpoint(State(state): State<HttpState>) -> Response {
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    match state.metrics.render() {
        Ok(resp) => resp,
        Err(err) => {
            error!(?err, "Failed to render worker metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics unavailable").into_response()
        }
    }
}

async fn build_blobstore(config: &WorkerConfig) -> anyhow::Result<Arc<dyn BlobStore>> {
    if config.use_local_storage {
        let store = LocalBlobStore::new(&config.local_storage_path).await?;
        Ok(Arc::new(store))
    } else {
        let endpoint = config.s3_endpoint.clone().unwrap_or_default();
        let access_key = config.s3_access_key.clone().unwrap_or_default();
        let secret_key = config.s3_secret_key.clone().unwrap_or_default();
        let store = S3BlobStore::new(&endpoint, &access_key, &secret_key, &config.s3_bucket, &config.s3_region).await?;
        Ok(Arc::new(store))
    }
}

async fn build_broker(config: &WorkerConfig) -> anyhow::Result<Arc<dyn PriorityBroker>> {
    if let Some(redis_url) = &config.redis_url {
        let prefix = env::var("BROKER_PREFIX").unwrap_or_else(|_| "inference".to_string());
        let broker = RedisBroker::new(redis_url, prefix, 3600).await?;
        Ok(Arc::new(broker))
    } else {
        warn!("REDIS_URL not set, using in-memory broker (single-process only)");
        Ok(InMemoryBroker::new_with_broker())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let config = WorkerConfig::from_env()?;
    let registry = Arc::new(ModelRegistry::new());
    inference_runners::register_runners(&registry).await;

    let blobstore = build_blobstore(&config).await?;
    let broker = build_broker(&config).await?;
    let metrics = Arc::new(WorkerMetrics::new()?);
    let http_client = reqwest::Client::builder().timeout(Duration::from_secs(config.callback_timeout_secs)).build()?;

    metrics.set_active_workers(1);

    let http_metrics = metrics.clone();
    let health_port = env::var("HEALTH_PORT").ok().and_then(|v| v.parse::<u16>().ok()).unwrap_or(8090);
    tokio::spawn(async move {
        let app = Router::new()
            .route("/health", get(health))
            .route("/metrics", get(metrics_endpoint))
            .with_state(HttpState { metrics: http_metrics });
        let addr = format!("0.0.0.0:{health_port}");
        let listener = match tokio::net::TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(err) => {
                error!(?err, %addr, "worker health server failed to bind");
                return;
            }
        };
        println!("starting inference-worker health server on {addr}");
        if let Err(err) = axum::serve(listener, app).await {
            error!(?err, "worker health server stopped");
        }
    });

    let tasks_processed = Arc::new(AtomicU64::new(0));
    info!(device_id = config.device_id, "inference-worker starting main loop");

    loop {
        let delivery = broker.pop_next().await;
        broker.mark_started(delivery.job.task_id).await;

        let job = delivery.job.clone();
        let task_id = job.task_id;
        let model_name = job.model_name.clone();
        let callback_url = job.callback_url.clone();

        let job_for_task = job.clone();
        let registry_for_task = registry.clone();
        let blobstore_for_task = blobstore.clone();
        let timer = Timer::new();
        let timer_for_task = timer.clone();
        let device_id = config.device_id;
        let soft_timeout = Duration::from_secs(config.soft_timeout_secs);

        let handle = tokio::spawn(async move {
            process_job(&job_for_task, &registry_for_task, blobstore_for_task.as_ref(), device_id, &timer_for_task, soft_timeout)
                .await
        });
        let abort_handle = handle.abort_handle();

        let outcome = match tokio::time::timeout(Duration::from_secs(config.hard_timeout_secs), handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => {
                error!(%task_id, ?join_err, "worker task panicked");
                Err(inference_core::CoreError::InferenceError("worker task panicked".to_string()))
            }
            Err(_elapsed) => {
                abort_handle.abort();
                warn!(%task_id, "hard time limit exceeded, aborting task");
                Err(inference_core::CoreError::InferenceError("hard time limit exceeded".to_string()))
            }
        };

        match outcome {
            Ok(envelope) => {
                observe_timing(&metrics, &envelope);
                metrics.record_task_completed(&model_name);
                broker.put_result(task_id, envelope.clone()).await;
                broker.ack(delivery.token).await;
                info!(%task_id, model = %model_name, "task completed");
                send_callback(&http_client, callback_url.as_deref(), &envelope).await;
            }
            Err(err) => {
                if delivery.attempt >= config.max_retries {
                    metrics.record_task_failed(&model_name);
                    let envelope = ResultEnvelope::failure(task_id, err.to_string());
                    broker.put_result(task_id, envelope.clone()).await;
                    broker.ack(delivery.token).await;
                    error!(%task_id, model = %model_name, error = %err, "task failed, retries exhausted");
                    send_callback(&http_client, callback_url.as_deref(), &envelope).await;
                } else {
                    broker.mark_retry(task_id, err.to_string()).await;
                    let delay = backoff(delivery.attempt + 1, config.retry_backoff_base_secs, config.retry_backoff_cap_secs);
                    warn!(%task_id, model = %model_name, attempt = delivery.attempt, ?delay, "task failed, retrying");
                    broker.nack_requeue(delivery.token, delay).await;
                }
            }
        }

        let processed = tasks_processed.fetch_add(1, Ordering::SeqCst) + 1;
        if processed >= config.max_tasks_per_child {
            info!(processed, "reached max tasks per child, recycling process");
            registry.cleanup(None, None).await;
            metrics.set_active_workers(0);
            break;
        }
    }

    Ok(())
}

fn observe_timing(metrics: &WorkerMetrics, envelope: &ResultEnvelope) {
    let Some(timing) = &envelope.timing else { return };
    if let Some(ms) = timing.get("model_loading") {
        metrics.observe_model_load_duration(ms / 1000.0);
    }
    if let Some(ms) = timing.get("inference") {
        metrics.observe_inference_duration(ms / 1000.0);
    }
    if let Some(ms) = timing.get("storage") {
        metrics.observe_storage_duration(ms / 1000.0);
    }
    if let Some(ms) = timing.get("total") {
        metrics.observe_total_duration(ms / 1000.0);
    }
}

/// Best-effort callback POST (§4.8 step 10). Failures are logged and
/// metered but never change the task's own terminal state.
async fn send_callback(client: &reqwest::Client, callback_url: Option<&str>, envelope: &ResultEnvelope) {
    let Some(url) = callback_url else { return };
    match client.post(url).json(envelope).send().await {
        Ok(resp) if resp.status().is_success() => {
            info!(%url, "callback delivered");
        }
        Ok(resp) => {
            warn!(%url, status = %resp.status(), "callback rejected by receiver");
        }
        Err(err) => {
            warn!(%url, ?err, "callback delivery failed");
        }
    }
}
