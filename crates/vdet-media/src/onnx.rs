//! YOLOv8 object detection backend on ONNX Runtime.
//!
//! Execution provider selection:
//! - CUDA on Linux with NVIDIA GPU (when the `cuda` feature is enabled)
//! - CoreML on macOS
//! - CPU fallback on all platforms
//!
//! GPU providers are only tried when the requested [`ComputeUnits`] allow it.

use ndarray::Array2;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::{Tensor, Value};
use tracing::{debug, info};
use vdet_models::{ImageSize, PixelRect};

use crate::backend::{Classification, ComputeUnits, InferenceBackend, RawObservation};
use crate::coordinates::pixel_to_normalized;
use crate::error::BackendError;
use crate::model_loader::{BackendFactory, ModelArtifact};
use crate::preprocess::PixelBuffer;

const BACKEND_NAME: &str = "onnx";

/// Output tensor holding `[1, 4 + classes, candidates]`.
const OUTPUT_NAME: &str = "output0";

/// Scores below this are never reported.
pub const DEFAULT_SCORE_FLOOR: f32 = 0.01;

/// COCO class names (80 classes).
pub const COCO_CLASSES: &[&str] = &[
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck",
    "boat", "traffic light", "fire hydrant", "stop sign", "parking meter", "bench",
    "bird", "cat", "dog", "horse", "sheep", "cow", "elephant", "bear", "zebra",
    "giraffe", "backpack", "umbrella", "handbag", "tie", "suitcase", "frisbee",
    "skis", "snowboard", "sports ball", "kite", "baseball bat", "baseball glove",
    "skateboard", "surfboard", "tennis racket", "bottle", "wine glass", "cup",
    "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch",
    "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse",
    "remote", "keyboard", "cell phone", "microwave", "oven", "toaster", "sink",
    "refrigerator", "book", "clock", "vase", "scissors", "teddy bear", "hair drier",
    "toothbrush",
];

fn backend_error(message: impl Into<String>) -> BackendError {
    BackendError::new(BACKEND_NAME, message)
}

/// Creates [`OnnxBackend`]s from `.onnx` / `.ort` artifacts.
#[derive(Debug, Clone)]
pub struct OnnxBackendFactory {
    input_size: ImageSize,
    score_floor: f32,
}

impl OnnxBackendFactory {
    pub fn new(input_size: ImageSize) -> Self {
        Self {
            input_size,
            score_floor: DEFAULT_SCORE_FLOOR,
        }
    }

    /// Drop candidates scoring below `floor` inside the backend.
    pub fn with_score_floor(mut self, floor: f32) -> Self {
        self.score_floor = floor.clamp(0.0, 1.0);
        self
    }
}

impl BackendFactory for OnnxBackendFactory {
    fn name(&self) -> &str {
        BACKEND_NAME
    }

    /// ONNX Runtime runs source models directly; compiling validates that the
    /// graph loads and keeps the bytes.
    fn compile(&self, source: &[u8]) -> Result<Vec<u8>, BackendError> {
        let builder = Session::builder()
            .map_err(|e| backend_error(format!("Failed to create session builder: {}", e)))?;
        builder
            .commit_from_memory(source)
            .map_err(|e| backend_error(format!("Invalid ONNX model: {}", e)))?;
        Ok(source.to_vec())
    }

    fn instantiate(
        &self,
        artifact: &ModelArtifact,
        compute_units: ComputeUnits,
    ) -> Result<Box<dyn InferenceBackend>, BackendError> {
        let session = create_session(&artifact.bytes, compute_units)?;
        info!(
            model = %artifact.name,
            input_size = %self.input_size,
            "ONNX detector initialized"
        );

        Ok(Box::new(OnnxBackend {
            session,
            input_size: self.input_size,
            score_floor: self.score_floor,
            compute_units,
        }))
    }
}

/// YOLOv8 detector session.
pub struct OnnxBackend {
    session: Session,
    input_size: ImageSize,
    score_floor: f32,
    compute_units: ComputeUnits,
}

impl OnnxBackend {
    /// Build the `[1, 3, H, W]` float tensor, RGB normalized to `[0, 1]`.
    fn input_tensor(&self, input: &PixelBuffer) -> Result<Value, BackendError> {
        let size = input.size();
        if size != self.input_size {
            return Err(backend_error(format!(
                "Input buffer is {}, model expects {}",
                size, self.input_size
            )));
        }

        let (w, h) = (size.width as usize, size.height as usize);
        let plane = w * h;
        let mut chw_data = vec![0.0f32; 3 * plane];

        for y in 0..size.height {
            for x in 0..size.width {
                let rgb = input
                    .rgb_at(x, y)
                    .ok_or_else(|| backend_error("Pixel buffer shorter than its size"))?;
                let offset = y as usize * w + x as usize;
                for (c, value) in rgb.iter().enumerate() {
                    chw_data[c * plane + offset] = *value as f32 / 255.0;
                }
            }
        }

        let shape = vec![1usize, 3, h, w];
        Tensor::from_array((shape, chw_data.into_boxed_slice()))
            .map(Value::from)
            .map_err(|e| backend_error(format!("Failed to create tensor: {}", e)))
    }

    fn run(&mut self, input: Value) -> Result<Vec<f32>, BackendError> {
        let outputs = self
            .session
            .run(ort::inputs![input])
            .map_err(|e| backend_error(format!("ONNX inference failed: {}", e)))?;

        let output = outputs
            .get(OUTPUT_NAME)
            .ok_or_else(|| backend_error(format!("Missing {} tensor", OUTPUT_NAME)))?;

        let tensor = output
            .try_extract_tensor::<f32>()
            .map_err(|e| backend_error(format!("Failed to extract tensor: {}", e)))?;

        Ok(tensor.1.to_vec())
    }
}

impl InferenceBackend for OnnxBackend {
    fn name(&self) -> &str {
        BACKEND_NAME
    }

    fn infer(
        &mut self,
        input: &PixelBuffer,
        compute_units: ComputeUnits,
    ) -> Result<Vec<RawObservation>, BackendError> {
        if compute_units != self.compute_units {
            debug!(
                requested = %compute_units,
                session = %self.compute_units,
                "Execution providers are fixed at session creation"
            );
        }

        let tensor = self.input_tensor(input)?;
        let raw = self.run(tensor)?;
        decode_yolo_output(&raw, COCO_CLASSES, self.input_size, self.score_floor)
    }
}

/// Decode a YOLOv8 `[4 + C, N]` output.
///
/// Rows 0..4 hold `cx, cy, w, h` in input pixels; the remaining rows hold
/// per-class scores. Boxes are returned normalized with a bottom-left origin.
pub fn decode_yolo_output(
    outputs: &[f32],
    classes: &[&str],
    input_size: ImageSize,
    score_floor: f32,
) -> Result<Vec<RawObservation>, BackendError> {
    let num_features = 4 + classes.len();
    if outputs.is_empty() || outputs.len() % num_features != 0 {
        return Err(backend_error(format!(
            "Unexpected output size {} for {} features",
            outputs.len(),
            num_features
        )));
    }
    let num_boxes = outputs.len() / num_features;

    // Output is [features, boxes]; transpose to [boxes, features].
    let output_array = Array2::from_shape_vec((num_features, num_boxes), outputs.to_vec())
        .map_err(|e| backend_error(format!("Failed to reshape output: {}", e)))?;
    let transposed = output_array.t();

    let mut observations = Vec::new();
    for row in transposed.rows() {
        let mut best_class = 0;
        let mut best_score = 0.0f32;
        for (c, &score) in row.iter().skip(4).enumerate() {
            if score > best_score {
                best_score = score;
                best_class = c;
            }
        }

        if best_score < score_floor {
            continue;
        }

        let (cx, cy, w, h) = (row[0] as f64, row[1] as f64, row[2] as f64, row[3] as f64);
        let top_left = PixelRect::new(cx - w / 2.0, cy - h / 2.0, w, h);

        observations.push(RawObservation::new(
            pixel_to_normalized(top_left, input_size),
            best_score,
            vec![Classification::new(classes[best_class], best_score)],
        ));
    }

    Ok(observations)
}

/// Create ONNX Runtime session with execution provider selection.
fn create_session(model_bytes: &[u8], compute_units: ComputeUnits) -> Result<Session, BackendError> {
    let builder = Session::builder()
        .map_err(|e| backend_error(format!("Failed to create session builder: {}", e)))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| backend_error(format!("Failed to set optimization level: {}", e)))?;

    if compute_units.allows_gpu() {
        // Try CUDA on Linux with cuda feature
        #[cfg(all(target_os = "linux", feature = "cuda"))]
        {
            use ort::execution_providers::CUDAExecutionProvider;
            if let Ok(cuda_builder) = builder
                .clone()
                .with_execution_providers([CUDAExecutionProvider::default().build()])
            {
                if let Ok(session) = cuda_builder.commit_from_memory(model_bytes) {
                    info!("Using CUDA execution provider for object detection");
                    return Ok(session);
                }
            }
            debug!("CUDA execution provider not available, trying alternatives");
        }

        // Try CoreML on macOS
        #[cfg(target_os = "macos")]
        {
            use ort::execution_providers::CoreMLExecutionProvider;
            if let Ok(coreml_builder) = builder
                .clone()
                .with_execution_providers([CoreMLExecutionProvider::default().build()])
            {
                if let Ok(session) = coreml_builder.commit_from_memory(model_bytes) {
                    info!("Using CoreML execution provider for object detection");
                    return Ok(session);
                }
            }
            debug!("CoreML execution provider not available, using CPU");
        }
    }

    info!("Using CPU execution provider for object detection");
    builder
        .commit_from_memory(model_bytes)
        .map_err(|e| backend_error(format!("Failed to load ONNX model: {}", e)))
}
