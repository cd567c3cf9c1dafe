#![deny(unreachable_patterns)]
//! Object detection pipeline for images and video.
//!
//! This crate provides:
//! - Image preprocessing into fixed-size model input buffers
//! - A narrow inference backend trait, with an ONNX Runtime implementation
//! - Postprocessing: confidence filtering, coordinate conversion, NMS, top-K
//! - Model discovery and a load-once artifact cache
//! - Timed frame sampling from video via FFmpeg
//! - Cancellable, back-pressured result streams

pub mod backend;
pub mod cancel;
pub mod command;
pub mod coordinates;
pub mod error;
pub mod extractor;
pub mod metrics;
pub mod model_loader;
pub mod nms;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod postprocess;
pub mod preprocess;
pub mod probe;
pub mod service;
pub mod stream;
pub mod video;

pub use backend::{Classification, ComputeUnits, InferenceBackend, RawObservation};
pub use cancel::{cancel_pair, CancelHandle, CancelSignal};
pub use command::{check_ffmpeg, check_ffprobe, FrameGrabCommand};
pub use coordinates::{normalized_to_pixel, pixel_to_normalized};
pub use error::{
    BackendError, DetectResult, DetectionError, ExtractionError, ModelLoadError, PreprocessError,
};
pub use extractor::{
    estimate_frame_count, FfmpegFrameSource, FrameFailurePolicy, FrameSource, FrameStream,
    SamplingPlan, VideoFrame, VideoFrameExtractor,
};
pub use model_loader::{BackendFactory, ModelArtifact, ModelCache, ModelKind, ModelLoader, ModelSearchPaths};
pub use nms::{non_maximum_suppression, NmsProcessor};
#[cfg(feature = "onnx")]
pub use onnx::{OnnxBackend, OnnxBackendFactory, COCO_CLASSES, DEFAULT_SCORE_FLOOR};
pub use postprocess::DetectionPostProcessor;
pub use preprocess::{ImagePreprocessor, PixelBuffer, PixelFormat};
pub use probe::{probe_media, MediaInfo};
pub use service::DetectionService;
pub use stream::{CancellableStream, StreamSender};
pub use video::{ProgressStream, VideoDetectionService};
