//! Model discovery, compilation and caching.
//!
//! # Discovery
//!
//! A model is requested by name (`yolov8n`) or by explicit path
//! (`./models/yolov8n.onnx`). Names are resolved against
//! [`ModelSearchPaths`] in two passes:
//!
//! 1. `<dir>/<name>.ort` in every directory (precompiled, used as is)
//! 2. `<dir>/<name>.onnx` in every directory (source, compiled on first load)
//!
//! Explicit paths must carry one of those two extensions.
//!
//! # Caching
//!
//! Compiled artifacts are cached per name in a [`ModelCache`]. Concurrent
//! loads of the same name wait on a single compilation. The backend itself is
//! not cached: every [`ModelLoader::load`] call instantiates a fresh backend
//! from the cached artifact, so each service owns its handle exclusively.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info};

use crate::backend::{ComputeUnits, InferenceBackend};
use crate::error::{BackendError, ModelLoadError};

/// Extension of precompiled (runtime-ready) model files.
pub const PRECOMPILED_EXTENSION: &str = "ort";

/// Extension of source model files.
pub const SOURCE_EXTENSION: &str = "onnx";

/// How a model file was found on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelKind {
    /// Loaded without compilation.
    Precompiled,
    /// Compiled by the [`BackendFactory`] before use.
    Source,
}

impl ModelKind {
    fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some(PRECOMPILED_EXTENSION) => Some(ModelKind::Precompiled),
            Some(SOURCE_EXTENSION) => Some(ModelKind::Source),
            _ => None,
        }
    }
}

/// Model search paths in priority order.
#[derive(Debug, Clone)]
pub struct ModelSearchPaths {
    /// Base directories to search for models.
    pub directories: Vec<PathBuf>,
}

impl Default for ModelSearchPaths {
    fn default() -> Self {
        Self {
            directories: vec![
                PathBuf::from("./models"),
                PathBuf::from("./models/object_detection"),
                PathBuf::from("/app/models"),
                PathBuf::from("/usr/share/vdet/models"),
            ],
        }
    }
}

impl ModelSearchPaths {
    pub fn new<I, P>(directories: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            directories: directories.into_iter().map(Into::into).collect(),
        }
    }

    /// Resolve a model name or explicit path.
    pub fn locate(&self, name: &str) -> Result<(PathBuf, ModelKind), ModelLoadError> {
        let requested = Path::new(name);
        if requested.extension().is_some() || requested.components().count() > 1 {
            return Self::locate_explicit(requested);
        }

        for kind in [ModelKind::Precompiled, ModelKind::Source] {
            let extension = match kind {
                ModelKind::Precompiled => PRECOMPILED_EXTENSION,
                ModelKind::Source => SOURCE_EXTENSION,
            };
            for dir in &self.directories {
                let path = dir.join(name).with_extension(extension);
                if path.is_file() {
                    debug!(model = name, path = %path.display(), "Found model");
                    return Ok((path, kind));
                }
            }
        }

        Err(ModelLoadError::NotFound(name.to_string()))
    }

    fn locate_explicit(path: &Path) -> Result<(PathBuf, ModelKind), ModelLoadError> {
        if !path.is_file() {
            return Err(ModelLoadError::NotFound(path.display().to_string()));
        }
        ModelKind::from_path(path)
            .map(|kind| (path.to_path_buf(), kind))
            .ok_or_else(|| ModelLoadError::UnsupportedFormat(path.to_path_buf()))
    }
}

/// A model ready to be instantiated.
pub struct ModelArtifact {
    pub name: String,
    /// File the artifact was built from.
    pub path: PathBuf,
    pub kind: ModelKind,
    /// Runtime-ready model bytes.
    pub bytes: Vec<u8>,
}

impl fmt::Debug for ModelArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelArtifact")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("kind", &self.kind)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

/// Turns model files into backends.
///
/// Both methods are called from the blocking thread pool.
pub trait BackendFactory: Send + Sync {
    fn name(&self) -> &str;

    /// Compile source model bytes into runtime-ready bytes.
    fn compile(&self, source: &[u8]) -> Result<Vec<u8>, BackendError>;

    /// Create a new backend instance from a compiled artifact.
    fn instantiate(
        &self,
        artifact: &ModelArtifact,
        compute_units: ComputeUnits,
    ) -> Result<Box<dyn InferenceBackend>, BackendError>;
}

type CacheSlot = Arc<OnceCell<Arc<ModelArtifact>>>;

/// Compiled artifacts keyed by model name.
///
/// Cloning shares the underlying cache.
#[derive(Clone, Default)]
pub struct ModelCache {
    entries: Arc<Mutex<HashMap<String, CacheSlot>>>,
}

impl ModelCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached artifact for `name`, running `init` if there is none.
    ///
    /// Concurrent callers for the same name share one `init` run. A failed
    /// `init` leaves the slot empty so a later call retries.
    pub async fn get_or_load<F, Fut>(&self, name: &str, init: F) -> Result<Arc<ModelArtifact>, ModelLoadError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Arc<ModelArtifact>, ModelLoadError>>,
    {
        let slot = {
            let mut entries = self.entries.lock().await;
            entries.entry(name.to_string()).or_default().clone()
        };
        slot.get_or_try_init(init).await.cloned()
    }

    /// Whether a compiled artifact for `name` is cached.
    pub async fn contains(&self, name: &str) -> bool {
        let entries = self.entries.lock().await;
        entries.get(name).is_some_and(|slot| slot.initialized())
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }
}

impl fmt::Debug for ModelCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelCache").finish_non_exhaustive()
    }
}

/// Locates, compiles and instantiates models.
#[derive(Clone)]
pub struct ModelLoader {
    search_paths: ModelSearchPaths,
    factory: Arc<dyn BackendFactory>,
    cache: ModelCache,
}

impl ModelLoader {
    pub fn new(search_paths: ModelSearchPaths, factory: Arc<dyn BackendFactory>, cache: ModelCache) -> Self {
        Self {
            search_paths,
            factory,
            cache,
        }
    }

    pub fn search_paths(&self) -> &ModelSearchPaths {
        &self.search_paths
    }

    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    /// Create a backend for model `name`, compiling it if needed.
    pub async fn load(
        &self,
        name: &str,
        compute_units: ComputeUnits,
    ) -> Result<Box<dyn InferenceBackend>, ModelLoadError> {
        let artifact = self.artifact(name).await?;
        let factory = self.factory.clone();
        let model = artifact.name.clone();

        let backend = tokio::task::spawn_blocking(move || factory.instantiate(&artifact, compute_units))
            .await
            .map_err(|e| ModelLoadError::load_failed(&model, format!("Task join error: {}", e)))?
            .map_err(|e| ModelLoadError::load_failed(&model, e.to_string()))?;

        info!(
            model = %model,
            backend = backend.name(),
            compute_units = %compute_units,
            "Model loaded"
        );
        Ok(backend)
    }

    /// The cached (or freshly compiled) artifact for `name`.
    pub async fn artifact(&self, name: &str) -> Result<Arc<ModelArtifact>, ModelLoadError> {
        self.cache
            .get_or_load(name, || async {
                let (path, kind) = self.search_paths.locate(name)?;
                let factory = self.factory.clone();
                let model = name.to_string();

                tokio::task::spawn_blocking(move || build_artifact(factory.as_ref(), model, path, kind))
                    .await
                    .map_err(|e| ModelLoadError::load_failed(name, format!("Task join error: {}", e)))?
                    .map(Arc::new)
            })
            .await
    }
}

fn build_artifact(
    factory: &dyn BackendFactory,
    name: String,
    path: PathBuf,
    kind: ModelKind,
) -> Result<ModelArtifact, ModelLoadError> {
    let raw = std::fs::read(&path)
        .map_err(|e| ModelLoadError::load_failed(&name, format!("Failed to read {}: {}", path.display(), e)))?;

    let bytes = match kind {
        ModelKind::Precompiled => raw,
        ModelKind::Source => {
            info!(model = %name, path = %path.display(), factory = factory.name(), "Compiling model");
            factory
                .compile(&raw)
                .map_err(|e| ModelLoadError::compilation_failed(&name, e.to_string()))?
        }
    };

    Ok(ModelArtifact {
        name,
        path,
        kind,
        bytes,
    })
}
