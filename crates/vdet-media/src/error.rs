//! Error types for the detection pipeline.
//!
//! Errors are grouped by pipeline stage. [`DetectionError`] is the type callers
//! of the services see; the stage enums are wrapped into it.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for detection operations.
pub type DetectResult<T> = Result<T, DetectionError>;

/// Errors raised while locating, compiling or instantiating a model.
#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error("Model not found: {0}")]
    NotFound(String),

    #[error("Model compilation failed for {name}: {message}")]
    CompilationFailed { name: String, message: String },

    #[error("Model load failed for {name}: {message}")]
    LoadFailed { name: String, message: String },

    #[error("Unsupported model format: {0}")]
    UnsupportedFormat(PathBuf),
}

impl ModelLoadError {
    pub fn compilation_failed(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CompilationFailed {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn load_failed(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LoadFailed {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Errors raised while turning an image into a model input buffer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PreprocessError {
    #[error("Invalid image data: {0}")]
    InvalidImageData(String),

    #[error("Pixel buffer allocation failed: {0}")]
    BufferAllocationFailed(String),

    #[error("Could not acquire a writable view of the pixel buffer")]
    BufferLockFailed,

    #[error("Could not create drawing context: {0}")]
    ContextCreationFailed(String),
}

/// Opaque failure reported by an inference backend.
#[derive(Debug, Error)]
#[error("{backend} backend failed: {message}")]
pub struct BackendError {
    pub backend: String,
    pub message: String,
}

impl BackendError {
    pub fn new(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            message: message.into(),
        }
    }
}

/// Errors raised while sampling frames from a video.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Video not found: {0}")]
    InvalidVideoUrl(PathBuf),

    #[error("Invalid sampling rate: {0} fps")]
    InvalidFrameRate(f64),

    #[error("Failed to load video asset: {0}")]
    AssetLoadingFailed(String),

    #[error("Failed to generate frame at {time:.3}s: {cause}")]
    FrameGenerationFailed { time: f64, cause: String },

    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("Frame extraction cancelled")]
    Cancelled,
}

impl ExtractionError {
    pub fn frame_generation_failed(time: f64, cause: impl Into<String>) -> Self {
        Self::FrameGenerationFailed {
            time,
            cause: cause.into(),
        }
    }
}

/// Errors surfaced by the detection services.
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("Model loading failed: {0}")]
    ModelLoad(#[from] ModelLoadError),

    #[error("Preprocessing failed: {0}")]
    PreprocessingFailed(#[from] PreprocessError),

    #[error("Inference failed: {0}")]
    InferenceFailed(#[from] BackendError),

    /// Reserved: postprocessing is currently infallible.
    #[error("Postprocessing failed: {0}")]
    PostprocessingFailed(String),

    #[error("Frame extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Detection cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DetectionError {
    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// True when the operation was stopped on request rather than broken.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            DetectionError::Cancelled | DetectionError::Extraction(ExtractionError::Cancelled)
        )
    }

    /// Short stage name used as a metrics label.
    pub fn stage(&self) -> &'static str {
        match self {
            DetectionError::ModelLoad(_) => "model_load",
            DetectionError::PreprocessingFailed(_) => "preprocess",
            DetectionError::InferenceFailed(_) => "inference",
            DetectionError::PostprocessingFailed(_) => "postprocess",
            DetectionError::Extraction(_) => "extraction",
            DetectionError::Cancelled => "cancelled",
            DetectionError::Internal(_) => "internal",
        }
    }
}

/// Error types that can represent a cancelled stream.
pub trait Cancellation {
    fn cancelled() -> Self;
}

impl Cancellation for ExtractionError {
    fn cancelled() -> Self {
        ExtractionError::Cancelled
    }
}

impl Cancellation for DetectionError {
    fn cancelled() -> Self {
        DetectionError::Cancelled
    }
}
