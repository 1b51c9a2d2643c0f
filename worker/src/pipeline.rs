use std::time::Duration;

use inference_blobstore::BlobStore;
use inference_core::{CoreError, JobEnvelope, ModelConfig, ModelRegistry, ResultEnvelope, RunnerOutput, Uuid};
use serde_json::json;

use crate::timer::Timer;

/// Runs the model_loading → inference → storage phases for one job (§4.8),
/// recording each phase's duration on `timer`. The soft timeout wraps only
/// the inference phase, matching the original Celery `soft_time_limit`
/// semantics (model loading and storage are not expected to hang on GPU
/// work and are left unbounded here).
pub async fn process_job(
    job: &JobEnvelope,
    registry: &ModelRegistry,
    blobstore: &dyn BlobStore,
    device_id: i64,
    timer: &Timer,
    soft_timeout: Duration,
) -> Result<ResultEnvelope, CoreError> {
    let _total_guard = timer.scope("total");
    let config = ModelConfig::new(job.model_name.clone(), device_id);

    let runner = {
        let _guard = timer.scope("model_loading");
        registry.get_or_create_runner(config).await?
    };

    let mut result = {
        let _guard = timer.scope("inference");
        match tokio::time::timeout(soft_timeout, runner.run(&job.input)).await {
            Ok(outcome) => outcome?,
            Err(_elapsed) => return Err(CoreError::SoftTimeout),
        }
    };

    {
        let _guard = timer.scope("storage");
        externalize_binary_artifacts(job.task_id, &mut result, blobstore).await?;
    }

    Ok(ResultEnvelope::success(job.task_id, timer.clone().into_millis(), result))
}

/// Moves any well-known raw-bytes key a runner's `postprocess` produced out
/// of the JSON result and into the blob store, replacing it with a
/// `blob_key`/`blob_url` pair (§4.9). A runner with nothing to externalize
/// (e.g. `ImageScoringRunner`) leaves `result` untouched.
async fn externalize_binary_artifacts(
    task_id: Uuid,
    result: &mut RunnerOutput,
    blobstore: &dyn BlobStore,
) -> Result<(), CoreError> {
    let Some(encoded_value) = result.remove("image_bytes_base64") else {
        return Ok(());
    };
    let encoded = encoded_value
        .as_str()
        .ok_or_else(|| CoreError::BlobUploadError("image_bytes_base64 was not a string".to_string()))?;

    let bytes = base64_decode(encoded)
        .map_err(|err| CoreError::BlobUploadError(format!("invalid base64 artifact: {err}")))?;
    let extension = result.get("format").and_then(|v| v.as_str()).unwrap_or("PNG").to_lowercase();
    let key = format!("results/{task_id}.{extension}");
    let content_type = format!("image/{extension}");

    blobstore
        .upload_bytes(bytes, &key, &content_type)
        .await
        .map_err(|err| CoreError::BlobUploadError(err.to_string()))?;
    let url = blobstore.get_url(&key, 3600).await;

    result.insert("blob_key".into(), json!(key));
    result.insert("blob_url".into(), json!(url));
    Ok(())
}

fn base64_decode(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.decode(encoded)
}
