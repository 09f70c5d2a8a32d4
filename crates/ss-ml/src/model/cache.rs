//! Resident-model cache
//!
//! At most one model variant is held in memory at a time; switching
//! variants drops the old weights before loading the new ones. Loading
//! goes through an injected [`ModelProvider`] so callers can swap the
//! file-backed loader for an in-memory one.

use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{SeparationError, SeparationResult};
use crate::model::unet::UNet;
use crate::model::weights::{ModelVariant, UNetWeights};
use crate::model::MaskPredictor;

/// Source of loaded models, injected into [`ModelCache`].
pub trait ModelProvider: Send + Sync {
    fn load(&self, variant: ModelVariant) -> SeparationResult<Arc<dyn MaskPredictor>>;
}

/// Loads weight files from a model directory.
pub struct FileModelProvider {
    dir: PathBuf,
}

impl FileModelProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl ModelProvider for FileModelProvider {
    fn load(&self, variant: ModelVariant) -> SeparationResult<Arc<dyn MaskPredictor>> {
        let path = self.dir.join(variant.weight_file_name());
        let weights = UNetWeights::load(&path)?;
        if weights.variant != variant {
            return Err(SeparationError::ModelUnavailable {
                reason: format!(
                    "{} holds a {} model, expected {variant}",
                    path.display(),
                    weights.variant
                ),
            });
        }
        Ok(Arc::new(UNet::new(weights)))
    }
}

/// Keeps the most recently requested model resident.
pub struct ModelCache {
    provider: Arc<dyn ModelProvider>,
    resident: Mutex<Option<(ModelVariant, Arc<dyn MaskPredictor>)>>,
}

impl ModelCache {
    pub fn new(provider: Arc<dyn ModelProvider>) -> Self {
        Self {
            provider,
            resident: Mutex::new(None),
        }
    }

    /// Return the resident model, loading (and evicting) as needed.
    pub fn get_or_load(&self, variant: ModelVariant) -> SeparationResult<Arc<dyn MaskPredictor>> {
        self.get_or_load_inner(variant, None)
    }

    /// Like [`get_or_load`](Self::get_or_load) but gives up after
    /// `timeout`. A timed-out load leaves no partial entry behind; the
    /// orphaned load finishes on its worker thread and is discarded.
    pub fn get_or_load_timeout(
        &self,
        variant: ModelVariant,
        timeout: Duration,
    ) -> SeparationResult<Arc<dyn MaskPredictor>> {
        self.get_or_load_inner(variant, Some(timeout))
    }

    fn get_or_load_inner(
        &self,
        variant: ModelVariant,
        timeout: Option<Duration>,
    ) -> SeparationResult<Arc<dyn MaskPredictor>> {
        let mut resident = self.resident.lock();

        if let Some((held, model)) = resident.as_ref() {
            if *held == variant {
                return Ok(model.clone());
            }
            log::info!("evicting resident {held} model to load {variant}");
        }
        // Old weights drop before the new load starts.
        *resident = None;

        let loaded = match timeout {
            None => self.provider.load(variant)?,
            Some(limit) => {
                let (tx, rx) = mpsc::channel();
                let provider = self.provider.clone();
                thread::spawn(move || {
                    let _ = tx.send(provider.load(variant));
                });
                match rx.recv_timeout(limit) {
                    Ok(result) => result?,
                    Err(_) => {
                        return Err(SeparationError::ModelUnavailable {
                            reason: format!("{variant} model load timed out after {limit:?}"),
                        });
                    }
                }
            }
        };

        log::info!("loaded {variant} model");
        *resident = Some((variant, loaded.clone()));
        Ok(loaded)
    }

    /// Variant currently held in memory, if any
    pub fn resident_variant(&self) -> Option<ModelVariant> {
        self.resident.lock().as_ref().map(|(v, _)| *v)
    }

    /// Drop the resident model
    pub fn clear(&self) {
        *self.resident.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct StubPredictor {
        variant: ModelVariant,
    }

    impl MaskPredictor for StubPredictor {
        fn variant(&self) -> ModelVariant {
            self.variant
        }

        fn mask_heads(&self) -> usize {
            self.variant.mask_heads()
        }

        fn predict_masks(&self, slice: &Array2<f32>) -> SeparationResult<Vec<Array2<f32>>> {
            Ok(vec![Array2::zeros(slice.dim()); self.mask_heads()])
        }
    }

    struct CountingProvider {
        loads: AtomicUsize,
        delay: Option<Duration>,
    }

    impl CountingProvider {
        fn new() -> Self {
            Self {
                loads: AtomicUsize::new(0),
                delay: None,
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                loads: AtomicUsize::new(0),
                delay: Some(delay),
            }
        }
    }

    impl ModelProvider for CountingProvider {
        fn load(&self, variant: ModelVariant) -> SeparationResult<Arc<dyn MaskPredictor>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                thread::sleep(delay);
            }
            Ok(Arc::new(StubPredictor { variant }))
        }
    }

    struct FailingProvider;

    impl ModelProvider for FailingProvider {
        fn load(&self, _variant: ModelVariant) -> SeparationResult<Arc<dyn MaskPredictor>> {
            Err(SeparationError::ModelUnavailable {
                reason: "weights not installed".into(),
            })
        }
    }

    #[test]
    fn repeated_requests_load_once() {
        let provider = Arc::new(CountingProvider::new());
        let cache = ModelCache::new(provider.clone());

        for _ in 0..3 {
            cache.get_or_load(ModelVariant::TwoStem).unwrap();
        }
        assert_eq!(provider.loads.load(Ordering::SeqCst), 1);
        assert_eq!(cache.resident_variant(), Some(ModelVariant::TwoStem));
    }

    #[test]
    fn switching_variants_evicts_and_reloads() {
        let provider = Arc::new(CountingProvider::new());
        let cache = ModelCache::new(provider.clone());

        cache.get_or_load(ModelVariant::TwoStem).unwrap();
        cache.get_or_load(ModelVariant::FourStem).unwrap();
        assert_eq!(cache.resident_variant(), Some(ModelVariant::FourStem));

        cache.get_or_load(ModelVariant::TwoStem).unwrap();
        assert_eq!(provider.loads.load(Ordering::SeqCst), 3);
        assert_eq!(cache.resident_variant(), Some(ModelVariant::TwoStem));
    }

    #[test]
    fn timed_out_load_leaves_cache_empty() {
        let provider = Arc::new(CountingProvider::slow(Duration::from_millis(500)));
        let cache = ModelCache::new(provider);

        let err = cache
            .get_or_load_timeout(ModelVariant::TwoStem, Duration::from_millis(10))
            .unwrap_err();
        assert!(matches!(err, SeparationError::ModelUnavailable { .. }));
        assert_eq!(cache.resident_variant(), None);
    }

    #[test]
    fn fast_load_beats_timeout() {
        let provider = Arc::new(CountingProvider::new());
        let cache = ModelCache::new(provider);

        let model = cache
            .get_or_load_timeout(ModelVariant::FourStem, Duration::from_secs(5))
            .unwrap();
        assert_eq!(model.variant(), ModelVariant::FourStem);
        assert_eq!(cache.resident_variant(), Some(ModelVariant::FourStem));
    }

    #[test]
    fn load_failure_propagates_and_caches_nothing() {
        let cache = ModelCache::new(Arc::new(FailingProvider));
        let err = cache.get_or_load(ModelVariant::TwoStem).unwrap_err();
        assert!(matches!(err, SeparationError::ModelUnavailable { .. }));
        assert_eq!(cache.resident_variant(), None);
    }

    #[test]
    fn clear_drops_resident_model() {
        let cache = ModelCache::new(Arc::new(CountingProvider::new()));
        cache.get_or_load(ModelVariant::TwoStem).unwrap();
        cache.clear();
        assert_eq!(cache.resident_variant(), None);
    }
}
