use anyhow::Result;
use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

fn render(registry: &Registry) -> Result<Response> {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, HeaderValue::from_static("text/plain; version=0.0.4"))
        .body(Body::from(buffer))?;
    Ok(response)
}

/// Metrics emitted by the gateway process (§4.10).
#[derive(Clone)]
pub struct GatewayMetrics {
    registry: Registry,
    tasks_submitted: IntCounterVec,
    status_checked: IntCounterVec,
    rate_limit_exceeded: IntCounterVec,
    auth_failures: IntCounterVec,
    http_request_duration: Histogram,
}

impl GatewayMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let tasks_submitted = IntCounterVec::new(
            Opts::new("gateway_tasks_submitted_total", "Tasks accepted for submission"),
            &["model", "priority"],
        )?;
        let status_checked = IntCounterVec::new(
            Opts::new("gateway_status_checks_total", "Status lookups grouped by resulting state"),
            &["status"],
        )?;
        let rate_limit_exceeded = IntCounterVec::new(
            Opts::new("gateway_rate_limit_exceeded_total", "Requests rejected for exceeding the rate limit"),
            &["api_key"],
        )?;
        let auth_failures = IntCounterVec::new(
            Opts::new("gateway_auth_failures_total", "Requests rejected for missing or invalid API keys"),
            &["reason"],
        )?;
        let http_request_duration = Histogram::with_opts(HistogramOpts::new(
            "gateway_http_request_duration_seconds",
            "HTTP request handling time in seconds",
        ))?;

        registry.register(Box::new(tasks_submitted.clone()))?;
        registry.register(Box::new(status_checked.clone()))?;
        registry.register(Box::new(rate_limit_exceeded.clone()))?;
        registry.register(Box::new(auth_failures.clone()))?;
        registry.register(Box::new(http_request_duration.clone()))?;

        Ok(Self {
            registry,
            tasks_submitted,
            status_checked,
            rate_limit_exceeded,
            auth_failures,
            http_request_duration,
        })
    }

    pub fn record_task_submitted(&self, model: &str, priority: &str) {
        self.tasks_submitted.with_label_values(&[model, priority]).inc();
    }

    pub fn record_status_checked(&self, status: &str) {
        self.status_checked.with_label_values(&[status]).inc();
    }

    /// `api_key` should already be prefix-truncated by the caller (§4.2) —
    /// this module never sees a full key.
    pub fn record_rate_limit_exceeded(&self, api_key: &str) {
        self.rate_limit_exceeded.with_label_values(&[api_key]).inc();
    }

    pub fn record_auth_failure(&self, reason: &str) {
        self.auth_failures.with_label_values(&[reason]).inc();
    }

    pub fn observe_http_request(&self, secs: f64) {
        self.http_request_duration.observe(secs);
    }

    pub fn render(&self) -> Result<Response> {
        render(&self.registry)
    }
}

/// Metrics emitted by each worker process (§4.10).
#[derive(Clone)]
pub struct WorkerMetrics {
    registry: Registry,
    tasks_completed: IntCounterVec,
    tasks_failed: IntCounterVec,
    inference_duration: Histogram,
    storage_duration: Histogram,
    total_duration: Histogram,
    model_load_duration: Histogram,
    active_workers: IntGauge,
    queue_size: IntGaugeVec,
}

impl WorkerMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let tasks_completed = IntCounterVec::new(
            Opts::new("worker_tasks_completed_total", "Tasks that reached SUCCESS"),
            &["model"],
        )?;
        let tasks_failed = IntCounterVec::new(
            Opts::new("worker_tasks_failed_total", "Tasks that reached FAILURE"),
            &["model"],
        )?;
        let inference_duration = Histogram::with_opts(HistogramOpts::new(
            "worker_inference_duration_seconds",
            "Time spent in the model's infer() call",
        ))?;
        let storage_duration = Histogram::with_opts(HistogramOpts::new(
            "worker_storage_duration_seconds",
            "Time spent uploading result artifacts to the blob store",
        ))?;
        let total_duration = Histogram::with_opts(HistogramOpts::new(
            "worker_total_duration_seconds",
            "Wall-clock time from task pop to result publication",
        ))?;
        let model_load_duration = Histogram::with_opts(HistogramOpts::new(
            "worker_model_load_duration_seconds",
            "Time spent lazily constructing a runner on first use",
        ))?;
        let active_workers = IntGauge::with_opts(Opts::new("worker_active_workers", "Worker processes currently running"))?;
        let queue_size = IntGaugeVec::new(
            Opts::new("worker_queue_size", "Approximate depth of each priority queue, as last observed"),
            &["priority"],
        )?;

        registry.register(Box::new(tasks_completed.clone()))?;
        registry.register(Box::new(tasks_failed.clone()))?;
        registry.register(Box::new(inference_duration.clone()))?;
        registry.register(Box::new(storage_duration.clone()))?;
        registry.register(Box::new(total_duration.clone()))?;
        registry.register(Box::new(model_load_duration.clone()))?;
        registry.register(Box::new(active_workers.clone()))?;
        registry.register(Box::new(queue_size.clone()))?;

        Ok(Self {
            registry,
            tasks_completed,
            tasks_failed,
            inference_duration,
            storage_duration,
            total_duration,
            model_load_duration,
            active_workers,
            queue_size,
        })
    }

    pub fn record_task_completed(&self, model: &str) {
        self.tasks_completed.with_label_values(&[model]).inc();
    }

    pub fn record_task_failed(&self, model: &str) {
        self.tasks_failed.with_label_values(&[model]).inc();
    }

    pub fn observe_inference_duration(&self, secs: f64) {
        self.inference_duration.observe(secs);
    }

    pub fn observe_storage_duration(&self, secs: f64) {
        self.storage_duration.observe(secs);
    }

    pub fn observe_total_duration(&self, secs: f64) {
        self.total_duration.observe(secs);
    }

    pub fn observe_model_load_duration(&self, secs: f64) {
        self.model_load_duration.observe(secs);
    }

    pub fn set_active_workers(&self, count: i64) {
        self.active_workers.set(count);
    }

    pub fn set_queue_size(&self, priority: &str, depth: i64) {
        self.queue_size.with_label_values(&[priority]).set(depth);
    }

    pub fn render(&self) -> Result<Response> {
        render(&self.registry)
    }
}
