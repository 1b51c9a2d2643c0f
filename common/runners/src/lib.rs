pub mod scoring;
pub mod superres;

use inference_core::{CoreError, ImageSource};

pub use scoring::ImageScoringRunner;
pub use superres::SuperResolutionRunner;

/// Resolves an [`ImageSource`] to decoded bytes (§4.6). Shared by every
/// registered runner so the `image_url` vs. `image_base64` branching lives
/// in exactly one place.
pub(crate) async fn fetch_image_bytes(source: ImageSource) -> Result<Vec<u8>, CoreError> {
    match source {
        ImageSource::Url(url) => {
            let response = reqwest::get(&url)
                .await
                .map_err(|e| CoreError::InputFetchFailed(e.to_string()))?;
            let response = response
                .error_for_status()
                .map_err(|e| CoreError::InputFetchFailed(e.to_string()))?;
            let bytes = response
                .bytes()
                .await
                .map_err(|e| CoreError::InputFetchFailed(e.to_string()))?;
            Ok(bytes.to_vec())
        }
        ImageSource::Base64(encoded) => {
            use base64::Engine;
            base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map_err(|e| CoreError::MalformedRequest(format!("invalid base64 image: {e}")))
        }
    }
}

/// Registers every built-in runner with the given model registry (§4.6).
/// `device_id` drives the `ModelConfig` a runner is constructed with; the
/// registry itself decides when to actually call a constructor.
pub async fn register_runners(registry: &inference_core::ModelRegistry) {
    registry
        .register(
            "superres-x4",
            std::sync::Arc::new(|cfg| std::sync::Arc::new(SuperResolutionRunner::new(cfg)) as std::sync::Arc<dyn inference_core::Runner>),
        )
        .await;
    registry
        .register(
            "image-scoring-v1",
            std::sync::Arc::new(|cfg| std::sync::Arc::new(ImageScoringRunner::new(cfg)) as std::sync::Arc<dyn inference_core::Runner>),
        )
        .await;
}
