use async_trait::async_trait;
use image::imageops::FilterType;
use image::GenericImageView;
use inference_core::{extract_image_source, CoreError, ModelConfig, Runner, RunnerOutput, RunnerTensor};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::info;

use crate::fetch_image_bytes;

const SCORE_LABELS: [&str; 5] = ["quality", "aesthetics", "sharpness", "color_balance", "composition"];

/// Image quality scoring runner (§4.6, grounded on the original
/// `ImageScoringRunner`). Returns only JSON-safe scalars — no binary
/// artifact — so its result never goes through the blob store.
#[derive(Debug)]
pub struct ImageScoringRunner {
    config: ModelConfig,
    loaded: RwLock<bool>,
}

impl ImageScoringRunner {
    pub fn new(config: ModelConfig) -> Self {
        Self { config, loaded: RwLock::new(false) }
    }
}

#[async_trait]
impl Runner for ImageScoringRunner {
    fn name(&self) -> &str {
        "image-scoring-v1"
    }

    async fn load_model(&self) -> Result<(), CoreError> {
        info!(device = %self.config.device, "Loading image-scoring-v1 model");
        *self.loaded.write().await = true;
        Ok(())
    }

    async fn prepare(&self, input: &RunnerOutput) -> Result<RunnerTensor, CoreError> {
        let source = extract_image_source(input)?;
        let bytes = fetch_image_bytes(source).await?;
        let image = image::load_from_memory(&bytes)
            .map_err(|e| CoreError::MalformedRequest(format!("not a decodable image: {e}")))?;
        let resized = image.resize_exact(224, 224, FilterType::Lanczos3);
        Ok(RunnerTensor(resized.to_rgb8()))
    }

    async fn infer(&self, tensor: RunnerTensor) -> Result<RunnerTensor, CoreError> {
        Ok(tensor)
    }

    async fn postprocess(&self, tensor: RunnerTensor) -> Result<RunnerOutput, CoreError> {
        let (width, height) = tensor.0.dimensions();
        let scores = channel_scores(&tensor.0);
        let overall_score: f64 = scores.iter().sum::<f64>() / scores.len() as f64;
        let assessment = quality_assessment(overall_score);

        let mut scores_map = serde_json::Map::new();
        for (label, score) in SCORE_LABELS.iter().zip(scores.iter()) {
            scores_map.insert((*label).to_string(), json!(score));
        }

        let mut output = RunnerOutput::new();
        output.insert("scores".into(), serde_json::Value::Object(scores_map));
        output.insert("overall_score".into(), json!(overall_score));
        output.insert("quality_assessment".into(), json!(assessment));
        output.insert("metadata".into(), json!({ "width": width, "height": height }));
        Ok(output)
    }

    async fn is_loaded(&self) -> bool {
        *self.loaded.read().await
    }

    async fn cleanup(&self) {
        *self.loaded.write().await = false;
    }
}

/// Five deterministic pseudo-scores derived from the resized image's pixel
/// statistics (§1 Non-goals excludes a real model; this runner still has to
/// produce five distinct, bounded [0, 1] values from its input, derived from
/// the image itself rather than randomized).
fn channel_scores(image: &image::RgbImage) -> [f64; 5] {
    let pixel_count = image.pixels().count().max(1) as f64;
    let (mut r_sum, mut g_sum, mut b_sum) = (0u64, 0u64, 0u64);
    let mut variance_accum = 0u64;
    let mut prev_luma: Option<i64> = None;
    for pixel in image.pixels() {
        let [r, g, b] = pixel.0;
        r_sum += r as u64;
        g_sum += g as u64;
        b_sum += b as u64;
        let luma = (r as i64 + g as i64 + b as i64) / 3;
        if let Some(prev) = prev_luma {
            variance_accum += (luma - prev).unsigned_abs();
        }
        prev_luma = Some(luma);
    }

    let r_mean = r_sum as f64 / pixel_count / 255.0;
    let g_mean = g_sum as f64 / pixel_count / 255.0;
    let b_mean = b_sum as f64 / pixel_count / 255.0;
    let sharpness = (variance_accum as f64 / pixel_count / 255.0).min(1.0);
    let color_balance = 1.0 - ((r_mean - g_mean).abs() + (g_mean - b_mean).abs() + (r_mean - b_mean).abs()) / 3.0;
    let brightness = (r_mean + g_mean + b_mean) / 3.0;

    [brightness, color_balance.clamp(0.0, 1.0), sharpness, color_balance.clamp(0.0, 1.0), brightness]
}

fn quality_assessment(overall_score: f64) -> &'static str {
    if overall_score > 0.8 {
        "excellent"
    } else if overall_score > 0.6 {
        "good"
    } else if overall_score > 0.4 {
        "average"
    } else if overall_score > 0.2 {
        "below_average"
    } else {
        "poor"
    }
}
