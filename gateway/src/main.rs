use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use inference_broker::{InMemoryBroker, PriorityBroker, RedisBroker};
use inference_core::ModelRegistry;
use inference_gateway::app_state::AppState;
use inference_gateway::config::GatewayConfig;
use inference_gateway::idempotency::IdempotencyCache;
use inference_gateway::rate_limiter::RateLimiter;
use inference_gateway::router::build_router;
use inference_metrics::GatewayMetrics;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let config = Arc::new(GatewayConfig::from_env()?);

    let registry = Arc::new(ModelRegistry::new());
    inference_runners::register_runners(&registry).await;

    let broker: Arc<dyn PriorityBroker> = match env::var("REDIS_URL") {
        Ok(redis_url) => {
            let prefix = env::var("BROKER_PREFIX").unwrap_or_else(|_| "inference".to_string());
            Arc::new(RedisBroker::new(&redis_url, prefix, config.idempotency_ttl_secs).await.context("Failed to connect to broker")?)
        }
        Err(_) => {
            tracing::warn!("REDIS_URL not set, using in-process broker (single-replica only)");
            InMemoryBroker::new_with_broker()
        }
    };

    let state = AppState {
        registry,
        broker,
        rate_limiter: Arc::new(RateLimiter::new(config.rate_limit_per_minute, config.rate_limit_window_secs)),
        idempotency: Arc::new(IdempotencyCache::new(config.idempotency_ttl_secs)),
        metrics: Arc::new(GatewayMetrics::new()?),
        config: config.clone(),
    };

    let app = build_router(state);

    let ip: std::net::IpAddr = config.host.parse().context("Invalid HOST")?;
    let addr = SocketAddr::from((ip, config.port));
    println!("starting inference-gateway on {addr}");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
