use async_trait::async_trait;
use image::imageops::FilterType;
use image::GenericImageView;
use inference_core::{extract_image_source, CoreError, ModelConfig, Runner, RunnerOutput, RunnerTensor};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::info;

use crate::fetch_image_bytes;

/// 4x upscaling runner (§4.6, grounded on the original `SuperResolutionRunner`).
/// The numeric kernel is out of scope (§1 Non-goals), so `infer` performs a
/// deterministic Lanczos3 resize rather than a learned upscale — the phase
/// boundary and output contract (`image_bytes`/`size`/`format`/
/// `scale_factor`) are what this system actually contracts on.
#[derive(Debug)]
pub struct SuperResolutionRunner {
    config: ModelConfig,
    loaded: RwLock<bool>,
}

const SCALE_FACTOR: u32 = 4;

impl SuperResolutionRunner {
    pub fn new(config: ModelConfig) -> Self {
        Self { config, loaded: RwLock::new(false) }
    }
}

#[async_trait]
impl Runner for SuperResolutionRunner {
    fn name(&self) -> &str {
        "superres-x4"
    }

    async fn load_model(&self) -> Result<(), CoreError> {
        info!(device = %self.config.device, "Loading superres-x4 model");
        *self.loaded.write().await = true;
        Ok(())
    }

    async fn prepare(&self, input: &RunnerOutput) -> Result<RunnerTensor, CoreError> {
        let source = extract_image_source(input)?;
        let bytes = fetch_image_bytes(source).await?;
        let image = image::load_from_memory(&bytes)
            .map_err(|e| CoreError::MalformedRequest(format!("not a decodable image: {e}")))?;
        Ok(RunnerTensor(image.to_rgb8()))
    }

    async fn infer(&self, tensor: RunnerTensor) -> Result<RunnerTensor, CoreError> {
        let (width, height) = tensor.0.dimensions();
        let upscaled = image::imageops::resize(
            &tensor.0,
            width * SCALE_FACTOR,
            height * SCALE_FACTOR,
            FilterType::Lanczos3,
        );
        Ok(RunnerTensor(upscaled))
    }

    async fn postprocess(&self, tensor: RunnerTensor) -> Result<RunnerOutput, CoreError> {
        let (width, height) = tensor.0.dimensions();
        let mut buffer = Vec::new();
        image::DynamicImage::ImageRgb8(tensor.0)
            .write_to(&mut std::io::Cursor::new(&mut buffer), image::ImageOutputFormat::Png)
            .map_err(|e| CoreError::InferenceError(format!("failed to encode output png: {e}")))?;

        let mut output = RunnerOutput::new();
        output.insert("image_bytes_base64".into(), json!(base64_encode(&buffer)));
        output.insert("size".into(), json!([width, height]));
        output.insert("format".into(), json!("PNG"));
        output.insert("scale_factor".into(), json!(SCALE_FACTOR));
        Ok(output)
    }

    async fn is_loaded(&self) -> bool {
        *self.loaded.read().await
    }

    async fn cleanup(&self) {
        *self.loaded.write().await = false;
    }
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let image: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_pixel(width, height, Rgb([10, 20, 30]));
        let mut buffer = Vec::new();
        image::DynamicImage::ImageRgb8(image)
            .write_to(&mut std::io::Cursor::new(&mut buffer), image::ImageOutputFormat::Png)
            .unwrap();
        buffer
    }

    #[tokio::test]
    async fn full_run_upscales_by_four_and_reports_png() {
        let runner = SuperResolutionRunner::new(ModelConfig::new("superres-x4", -1));
        let encoded = base64_encode(&png_bytes(8, 6));
        let mut input = RunnerOutput::new();
        input.insert("image_base64".into(), json!(encoded));

        let output = runner.run(&input).await.unwrap();
        assert_eq!(output.get("size").unwrap(), &json!([32, 24]));
        assert_eq!(output.get("scale_factor").unwrap(), &json!(4));
        assert_eq!(output.get("format").unwrap(), &json!("PNG"));
        assert!(runner.is_loaded().await);
    }

    #[tokio::test]
    async fn missing_image_source_is_malformed_request() {
        let runner = SuperResolutionRunner::new(ModelConfig::new("superres-x4", -1));
        let input = RunnerOutput::new();
        let err = runner.run(&input).await.unwrap_err();
        assert!(matches!(err, CoreError::MalformedRequest(_)));
    }

    #[tokio::test]
    async fn cleanup_resets_loaded_flag() {
        let runner = SuperResolutionRunner::new(ModelConfig::new("superres-x4", -1));
        runner.load_model().await.unwrap();
        assert!(runner.is_loaded().await);
        runner.cleanup().await;
        assert!(!runner.is_loaded().await);
    }
}
