use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::error::CoreError;
use crate::runner::{ModelConfig, Runner};

/// A runner constructor: given a [`ModelConfig`], produce a fresh,
/// not-yet-loaded runner instance.
pub type RunnerConstructor = Arc<dyn Fn(ModelConfig) -> Arc<dyn Runner> + Send + Sync>;

/// Process-wide catalog of registered runner constructors plus a
/// per-`(model, device)` instance cache (§4.5).
///
/// Unlike the original Python `ModelRegistry`, which is a set of
/// classmethods over module-level dictionaries, this is an explicit
/// collaborator a caller constructs and injects (§9 "process-wide
/// registry → explicit injected container") so gateway and worker tests
/// can each build an isolated registry.
pub struct ModelRegistry {
    catalog: RwLock<HashMap<String, RunnerConstructor>>,
    instances: RwLock<HashMap<String, Arc<dyn Runner>>>,
    // Serializes construction per cache key so two workers racing on the
    // same (model, device) never build two instances (§4.5).
    construction_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self {
            catalog: RwLock::new(HashMap::new()),
            instances: RwLock::new(HashMap::new()),
            construction_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a runner constructor under `model_name`. A duplicate
    /// registration warns and overwrites — last writer wins (§4.5).
    pub async fn register(&self, model_name: impl Into<String>, ctor: RunnerConstructor) {
        let model_name = model_name.into();
        let mut catalog = self.catalog.write().await;
        if catalog.contains_key(&model_name) {
            warn!(model = %model_name, "Model already registered, overwriting");
        }
        catalog.insert(model_name.clone(), ctor);
        info!(model = %model_name, "Registered model runner");
    }

    pub async fn list(&self) -> Vec<String> {
        let catalog = self.catalog.read().await;
        let mut names: Vec<String> = catalog.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn create_runner(&self, config: ModelConfig) -> Result<Arc<dyn Runner>, CoreError> {
        let catalog = self.catalog.read().await;
        let ctor = catalog
            .get(&config.model_name)
            .ok_or_else(|| CoreError::UnknownModel(config.model_name.clone()))?
            .clone();
        drop(catalog);
        Ok(ctor(config))
    }

    fn cache_key(model_name: &str, device_id: i64) -> String {
        format!("{model_name}_{device_id}")
    }

    /// Returns the cached runner instance for `(model_name, device_id)`,
    /// constructing one if absent. Construction is serialized per cache
    /// key so concurrent callers never build two instances.
    pub async fn get_or_create_runner(&self, config: ModelConfig) -> Result<Arc<dyn Runner>, CoreError> {
        let key = Self::cache_key(&config.model_name, config.device_id);

        if let Some(runner) = self.instances.read().await.get(&key) {
            return Ok(runner.clone());
        }

        let per_key_lock = {
            let mut locks = self.construction_locks.lock().await;
            locks.entry(key.clone()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        };
        let _guard = per_key_lock.lock().await;

        // Re-check: another caller may have finished construction while we
        // waited for the per-key lock.
        if let Some(runner) = self.instances.read().await.get(&key) {
            return Ok(runner.clone());
        }

        let runner = self.create_runner(config).await?;
        self.instances.write().await.insert(key.clone(), runner.clone());
        info!(cache_key = %key, "Created new runner instance");
        Ok(runner)
    }

    /// Evicts and cleans up one cache entry, or every entry when
    /// `model_name`/`device_id` are omitted (§4.5).
    pub async fn cleanup(&self, model_name: Option<&str>, device_id: Option<i64>) {
        match (model_name, device_id) {
            (Some(model_name), Some(device_id)) => {
                let key = Self::cache_key(model_name, device_id);
                let removed = self.instances.write().await.remove(&key);
                if let Some(runner) = removed {
                    runner.cleanup().await;
                    info!(cache_key = %key, "Cleaned up runner instance");
                }
            }
            _ => {
                let mut instances = self.instances.write().await;
                for (key, runner) in instances.drain() {
                    runner.cleanup().await;
                    info!(cache_key = %key, "Cleaned up runner instance");
                }
                info!("Cleaned up all runner instances");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{RunnerOutput, RunnerTensor};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use async_trait::async_trait;

    #[derive(Debug)]
    struct CountingRunner {
        name: String,
        loaded: AtomicBool,
        load_calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Runner for CountingRunner {
        fn name(&self) -> &str {
            &self.name
        }
        async fn load_model(&self) -> Result<(), CoreError> {
            self.load_calls.fetch_add(1, Ordering::SeqCst);
            self.loaded.store(true, Ordering::SeqCst);
            Ok(())
        }
        async fn prepare(&self, _input: &RunnerOutput) -> Result<RunnerTensor, CoreError> {
            Ok(RunnerTensor(image::RgbImage::new(1, 1)))
        }
        async fn infer(&self, tensor: RunnerTensor) -> Result<RunnerTensor, CoreError> {
            Ok(tensor)
        }
        async fn postprocess(&self, _tensor: RunnerTensor) -> Result<RunnerOutput, CoreError> {
            Ok(RunnerOutput::new())
        }
        async fn is_loaded(&self) -> bool {
            self.loaded.load(Ordering::SeqCst)
        }
        async fn cleanup(&self) {
            self.loaded.store(false, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn unregistered_model_is_unknown_model_error() {
        let registry = ModelRegistry::new();
        let err = registry
            .create_runner(ModelConfig::new("nope", 0))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::UnknownModel(name) if name == "nope"));
    }

    #[tokio::test]
    async fn register_overwrites_and_list_is_sorted() {
        let registry = ModelRegistry::new();
        let load_calls = Arc::new(AtomicUsize::new(0));
        let calls = load_calls.clone();
        registry
            .register(
                "zebra",
                Arc::new(move |_cfg| {
                    Arc::new(CountingRunner {
                        name: "zebra".into(),
                        loaded: AtomicBool::new(false),
                        load_calls: calls.clone(),
                    }) as Arc<dyn Runner>
                }),
            )
            .await;
        registry
            .register(
                "apple",
                Arc::new(|_cfg| {
                    Arc::new(CountingRunner {
                        name: "apple".into(),
                        loaded: AtomicBool::new(false),
                        load_calls: Arc::new(AtomicUsize::new(0)),
                    }) as Arc<dyn Runner>
                }),
            )
            .await;
        assert_eq!(registry.list().await, vec!["apple".to_string(), "zebra".to_string()]);
    }

    #[tokio::test]
    async fn get_or_create_runner_caches_by_model_and_device() {
        let registry = ModelRegistry::new();
        let load_calls = Arc::new(AtomicUsize::new(0));
        let calls = load_calls.clone();
        registry
            .register(
                "superres-x4",
                Arc::new(move |cfg| {
                    Arc::new(CountingRunner {
                        name: cfg.model_name,
                        loaded: AtomicBool::new(false),
                        load_calls: calls.clone(),
                    }) as Arc<dyn Runner>
                }),
            )
            .await;

        let a = registry
            .get_or_create_runner(ModelConfig::new("superres-x4", 0))
            .await
            .unwrap();
        let b = registry
            .get_or_create_runner(ModelConfig::new("superres-x4", 0))
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let c = registry
            .get_or_create_runner(ModelConfig::new("superres-x4", 1))
            .await
            .unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[tokio::test]
    async fn cleanup_marks_runner_unloaded() {
        let registry = ModelRegistry::new();
        registry
            .register(
                "superres-x4",
                Arc::new(|_cfg| {
                    Arc::new(CountingRunner {
                        name: "superres-x4".into(),
                        loaded: AtomicBool::new(false),
                        load_calls: Arc::new(AtomicUsize::new(0)),
                    }) as Arc<dyn Runner>
                }),
            )
            .await;
        let runner = registry
            .get_or_create_runner(ModelConfig::new("superres-x4", 0))
            .await
            .unwrap();
        runner.load_model().await.unwrap();
        assert!(runner.is_loaded().await);

        registry.cleanup(Some("superres-x4"), Some(0)).await;
        assert!(!runner.is_loaded().await);
    }
}
