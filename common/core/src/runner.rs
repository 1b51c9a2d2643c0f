use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Configuration passed to a runner constructor (§4.6, mirrors the
/// original `ModelConfig`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model_name: String,
    pub device_id: i64,
    pub device: String,
}

impl ModelConfig {
    pub fn new(model_name: impl Into<String>, device_id: i64) -> Self {
        let device = if device_id >= 0 { "cuda" } else { "cpu" }.to_string();
        Self { model_name: model_name.into(), device_id, device }
    }
}

/// The opaque intermediate value passed between `prepare`, `infer` and
/// `postprocess`. Every registered runner in this system operates on a
/// single RGB image, so the contract is concrete rather than a boxed
/// `Any` — the numeric kernel behind `infer` is explicitly out of scope
/// (§1), but the pipeline shape it plugs into is not.
pub struct RunnerTensor(pub image::RgbImage);

pub type RunnerOutput = serde_json::Map<String, serde_json::Value>;

/// A runner's capability set (§4.6). `run` is the only method the worker
/// calls directly; `load_model`/`prepare`/`infer`/`postprocess` exist so a
/// concrete runner can be tested phase-by-phase and so the orchestration
/// policy (lazy load, no-grad inference) lives in one place.
#[async_trait]
pub trait Runner: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    async fn load_model(&self) -> Result<(), CoreError>;

    async fn prepare(&self, input: &RunnerOutput) -> Result<RunnerTensor, CoreError>;

    async fn infer(&self, tensor: RunnerTensor) -> Result<RunnerTensor, CoreError>;

    async fn postprocess(&self, tensor: RunnerTensor) -> Result<RunnerOutput, CoreError>;

    async fn is_loaded(&self) -> bool;

    /// Release the loaded model and any device-side memory. After this
    /// returns, `is_loaded` must report false.
    async fn cleanup(&self);

    /// Orchestrates the four phases (§4.6): lazy-load, prepare, infer
    /// (gradient tracking is a no-op concept here but the call boundary is
    /// preserved so retries re-enter at the same seam), postprocess.
    async fn run(&self, input: &RunnerOutput) -> Result<RunnerOutput, CoreError> {
        if !self.is_loaded().await {
            self.load_model().await?;
        }
        let prepared = self.prepare(input).await?;
        let inferred = self.infer(prepared).await?;
        self.postprocess(inferred).await
    }
}

/// Reads `image_url` (fetched by the caller) or decodes `image_base64`
/// from a runner's input map. Neither key present is a client error
/// (§4.6, §7 `MalformedRequest`).
pub enum ImageSource {
    Url(String),
    Base64(String),
}

pub fn extract_image_source(input: &RunnerOutput) -> Result<ImageSource, CoreError> {
    if let Some(url) = input.get("image_url").and_then(|v| v.as_str()) {
        return Ok(ImageSource::Url(url.to_string()));
    }
    if let Some(b64) = input.get("image_base64").and_then(|v| v.as_str()) {
        return Ok(ImageSource::Base64(b64.to_string()));
    }
    Err(CoreError::MalformedRequest(
        "Either image_url or image_base64 must be provided".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_config_picks_device_from_device_id() {
        let cfg = ModelConfig::new("superres-x4", 0);
        assert_eq!(cfg.device, "cuda");
        let cfg = ModelConfig::new("superres-x4", -1);
        assert_eq!(cfg.device, "cpu");
    }

    #[test]
    fn extract_image_source_requires_url_or_base64() {
        let input = serde_json::Map::new();
        assert!(extract_image_source(&input).is_err());

        let mut input = serde_json::Map::new();
        input.insert("image_url".into(), "https://example.com/x.jpg".into());
        assert!(matches!(extract_image_source(&input), Ok(ImageSource::Url(_))));
    }
}
