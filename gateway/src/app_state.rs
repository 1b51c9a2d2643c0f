use std::sync::Arc;

use inference_broker::PriorityBroker;
use inference_core::ModelRegistry;
use inference_metrics::GatewayMetrics;

use crate::config::GatewayConfig;
use crate::idempotency::IdempotencyCache;
use crate::rate_limiter::RateLimiter;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ModelRegistry>,
    pub broker: Arc<dyn PriorityBroker>,
    pub rate_limiter: Arc<RateLimiter>,
    pub idempotency: Arc<IdempotencyCache>,
    pub metrics: Arc<GatewayMetrics>,
    pub config: Arc<GatewayConfig>,
}
