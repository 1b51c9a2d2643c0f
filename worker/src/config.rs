use anyhow::Result;
use std::env;

/// Environment-driven worker configuration (§6), one process per device id.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub device_id: i64,
    pub max_retries: u32,
    pub retry_backoff_base_secs: f64,
    pub retry_backoff_cap_secs: f64,
    pub max_tasks_per_child: u64,
    pub soft_timeout_secs: u64,
    pub hard_timeout_secs: u64,
    pub callback_timeout_secs: u64,
    pub use_local_storage: bool,
    pub local_storage_path: String,
    pub s3_endpoint: Option<String>,
    pub s3_access_key: Option<String>,
    pub s3_secret_key: Option<String>,
    pub s3_bucket: String,
    pub s3_region: String,
    pub redis_url: Option<String>,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self> {
        let device_id = env::var("DEVICE_ID")
            .or_else(|_| env::var("CUDA_VISIBLE_DEVICES"))
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);

        let max_retries = env::var("MAX_RETRIES").ok().and_then(|v| v.parse().ok()).unwrap_or(3);
        let retry_backoff_base_secs =
            env::var("RETRY_BACKOFF_BASE_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(2.0);
        let retry_backoff_cap_secs =
            env::var("RETRY_BACKOFF_CAP_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(300.0);
        let max_tasks_per_child =
            env::var("WORKER_MAX_TASKS_PER_CHILD").ok().and_then(|v| v.parse().ok()).unwrap_or(100);
        let soft_timeout_secs = env::var("SOFT_TIMEOUT_SECONDS").ok().and_then(|v| v.parse().ok()).unwrap_or(540);
        let hard_timeout_secs = env::var("HARD_TIMEOUT_SECONDS").ok().and_then(|v| v.parse().ok()).unwrap_or(600);
        let callback_timeout_secs =
            env::var("CALLBACK_TIMEOUT_SECONDS").ok().and_then(|v| v.parse().ok()).unwrap_or(30);

        let use_local_storage = env::var("USE_LOCAL_STORAGE").map(|v| v == "true").unwrap_or(true);
        let local_storage_path = env::var("LOCAL_STORAGE_PATH").unwrap_or_else(|_| "./storage".to_string());

        let s3_endpoint = env::var("S3_ENDPOINT").ok();
        let s3_access_key = env::var("S3_ACCESS_KEY").ok();
        let s3_secret_key = env::var("S3_SECRET_KEY").ok();
        let s3_bucket = env::var("S3_BUCKET").unwrap_or_else(|_| "inference-results".to_string());
        let s3_region = env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string());
        let redis_url = env::var("REDIS_URL").ok();

        Ok(Self {
            device_id,
            max_retries,
            retry_backoff_base_secs,
            retry_backoff_cap_secs,
            max_tasks_per_child,
            soft_timeout_secs,
            hard_timeout_secs,
            callback_timeout_secs,
            use_local_storage,
            local_storage_path,
            s3_endpoint,
            s3_access_key,
            s3_secret_key,
            s3_bucket,
            s3_region,
            redis_url,
        })
    }
}
