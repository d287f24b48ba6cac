use crate::config::{LoadPolicy, ModelConfig};
use ndarray::{Array, Ix4};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use parking_lot::{Mutex, RwLock};
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("No model found, looked for {lite:?} and {full:?}")]
    NotFound { lite: PathBuf, full: PathBuf },
    #[error("Failed to load model: {0}")]
    Load(#[source] ort::Error),
    #[error("Inference failed: {0}")]
    Inference(#[source] ort::Error),
    #[error("Model produced an unusable output: {0}")]
    InvalidOutput(String),
}

/// Arg-max of one inference: the winning class and its raw score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub class_index: usize,
    pub score: f32,
}

pub trait ModelProvider: Send + Sync + 'static {
    /// Runs the model forward and returns the flat score vector.
    fn infer(&self, input: &Array<f32, Ix4>) -> Result<Vec<f32>, ModelError>;

    /// Whether a model is resident in memory right now.
    fn is_loaded(&self) -> bool;

    fn classify(&self, input: &Array<f32, Ix4>) -> Result<Classification, ModelError> {
        let scores = self.infer(input)?;
        top_class(&scores)
    }
}

/// Lowest index wins on ties; NaN scores are skipped.
pub fn top_class(scores: &[f32]) -> Result<Classification, ModelError> {
    scores
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, score)| !score.is_nan())
        .reduce(|accum, row| if row.1 > accum.1 { row } else { accum })
        .map(|(class_index, score)| Classification { class_index, score })
        .ok_or_else(|| ModelError::InvalidOutput("no scores in model output".into()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFormat {
    /// ONNX Runtime mobile format (`.ort`).
    Lite,
    /// Plain ONNX graph (`.onnx`).
    Full,
}

#[derive(Debug, Clone)]
pub struct ModelSource {
    pub path: PathBuf,
    pub format: ModelFormat,
}

impl ModelSource {
    /// Picks the lightweight artifact when present, the full one otherwise.
    pub fn resolve(model_config: &ModelConfig) -> Result<Self, ModelError> {
        let lite = model_config.get_lite_path();
        let full = model_config.get_full_path();

        if lite.is_file() {
            Ok(Self {
                path: lite,
                format: ModelFormat::Lite,
            })
        } else if full.is_file() {
            Ok(Self {
                path: full,
                format: ModelFormat::Full,
            })
        } else {
            Err(ModelError::NotFound { lite, full })
        }
    }
}

struct SessionPool {
    sessions: Vec<Mutex<Session>>,
    counter: AtomicUsize,
}

impl SessionPool {
    fn load(source: &ModelSource, num_instances: usize) -> Result<Self, ModelError> {
        let sessions = (0..num_instances)
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(&source.path)?;
                Ok(Mutex::new(session))
            })
            .collect::<Result<Vec<_>, ort::Error>>()
            .map_err(ModelError::Load)?;

        tracing::info!(
            "Created {} ONNX sessions from {:?} ({:?})",
            num_instances,
            source.path,
            source.format
        );

        Ok(Self {
            sessions,
            counter: AtomicUsize::new(0),
        })
    }

    fn run(&self, input: &Array<f32, Ix4>) -> Result<Vec<f32>, ModelError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        let mut session = self.sessions[index].lock();
        tracing::debug!("Handling request with session {}", index);

        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .ok_or_else(|| ModelError::InvalidOutput("model declares no outputs".into()))?;

        let owned_buffer;
        let input_view = if input.view().is_standard_layout() {
            input.view()
        } else {
            owned_buffer = input.as_standard_layout().into_owned();
            owned_buffer.view()
        };

        let tensor_ref = TensorRef::from_array_view(input_view).map_err(ModelError::Inference)?;
        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(ModelError::Inference)?;

        let (_shape, data) = outputs[output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(ModelError::Inference)?;

        Ok(data.to_vec())
    }
}

pub struct OrtModelProvider {
    source: ModelSource,
    policy: LoadPolicy,
    num_instances: usize,
    pool: RwLock<Option<Arc<SessionPool>>>,
    // Mirrors `pool` so health checks never wait on a load in progress.
    loaded: AtomicBool,
}

impl OrtModelProvider {
    /// Fails with [`ModelError::NotFound`] whatever the policy, so a missing
    /// artifact is caught at startup rather than on the first upload.
    pub fn new(model_config: &ModelConfig) -> Result<Self, ModelError> {
        let source = ModelSource::resolve(model_config)?;
        let provider = Self {
            source,
            policy: model_config.load_policy,
            num_instances: model_config.num_instances.max(1),
            pool: RwLock::new(None),
            loaded: AtomicBool::new(false),
        };

        if provider.policy == LoadPolicy::Eager {
            provider.resident_pool()?;
        }

        tracing::info!(
            "Model provider ready with {:?} using {:?} policy",
            provider.source.path,
            provider.policy
        );
        Ok(provider)
    }

    fn resident_pool(&self) -> Result<Arc<SessionPool>, ModelError> {
        if let Some(pool) = self.pool.read().as_ref() {
            return Ok(pool.clone());
        }

        let mut slot = self.pool.write();
        if let Some(pool) = slot.as_ref() {
            return Ok(pool.clone());
        }
        let pool = Arc::new(SessionPool::load(&self.source, self.num_instances)?);
        *slot = Some(pool.clone());
        self.loaded.store(true, Ordering::Release);
        Ok(pool)
    }
}

impl ModelProvider for OrtModelProvider {
    fn infer(&self, input: &Array<f32, Ix4>) -> Result<Vec<f32>, ModelError> {
        match self.policy {
            LoadPolicy::Eager | LoadPolicy::Lazy => self.resident_pool()?.run(input),
            LoadPolicy::PerRequest => {
                let pool = SessionPool::load(&self.source, 1)?;
                let scores = pool.run(input);
                drop(pool);
                tracing::debug!("Released per-request model session");
                scores
            }
        }
    }

    fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn model_config(dir: &std::path::Path, load_policy: LoadPolicy) -> ModelConfig {
        ModelConfig {
            model_dir: dir.to_path_buf(),
            lite_file: "model.ort".into(),
            full_file: "model.onnx".into(),
            load_policy,
            num_instances: 1,
        }
    }

    #[test]
    fn test_top_class_picks_highest_score() {
        let top = top_class(&[0.1, 0.7, 0.2]).unwrap();
        assert_eq!(top.class_index, 1);
        assert!((top.score - 0.7).abs() < f32::EPSILON);
    }

    #[test]
    fn test_top_class_ties_and_nan() {
        let top = top_class(&[0.4, f32::NAN, 0.4, 0.2]).unwrap();
        assert_eq!(top.class_index, 0);

        assert!(matches!(
            top_class(&[]),
            Err(ModelError::InvalidOutput(_))
        ));
        assert!(top_class(&[f32::NAN]).is_err());
    }

    #[test]
    fn test_resolve_prefers_lite_model() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("model.onnx"), b"full").unwrap();
        let config = model_config(dir.path(), LoadPolicy::Lazy);

        let source = ModelSource::resolve(&config).unwrap();
        assert_eq!(source.format, ModelFormat::Full);

        fs::write(dir.path().join("model.ort"), b"lite").unwrap();
        let source = ModelSource::resolve(&config).unwrap();
        assert_eq!(source.format, ModelFormat::Lite);
        assert_eq!(source.path, dir.path().join("model.ort"));
    }

    #[test]
    fn test_missing_model_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let config = model_config(dir.path(), LoadPolicy::Lazy);

        let result = OrtModelProvider::new(&config);
        assert!(matches!(result, Err(ModelError::NotFound { .. })));
    }

    #[test]
    fn test_lazy_provider_starts_unloaded() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("model.onnx"), b"not loaded yet").unwrap();

        let lazy = OrtModelProvider::new(&model_config(dir.path(), LoadPolicy::Lazy)).unwrap();
        assert!(!lazy.is_loaded());

        let per_request =
            OrtModelProvider::new(&model_config(dir.path(), LoadPolicy::PerRequest)).unwrap();
        assert!(!per_request.is_loaded());
    }

    #[test]
    fn test_is_loaded_does_not_wait_for_a_load_in_progress() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("model.onnx"), b"not loaded yet").unwrap();
        let lazy = OrtModelProvider::new(&model_config(dir.path(), LoadPolicy::Lazy)).unwrap();

        // A first lazy load holds the write guard while sessions are built.
        let _loading = lazy.pool.write();
        assert!(!lazy.is_loaded());
    }
}
