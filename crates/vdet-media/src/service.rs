//! Single-image detection service.
//!
//! A [`DetectionService`] owns one backend instance and runs the
//! preprocess → infer → postprocess pipeline. Calls are serialized: concurrent
//! callers queue on an async gate, and the backend itself runs on the blocking
//! thread pool.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use image::{DynamicImage, GenericImageView};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, Instrument};
use vdet_models::{DetectionConfiguration, DetectionResult, ImageSize};

use crate::backend::{ComputeUnits, InferenceBackend, RawObservation};
use crate::cancel::CancelSignal;
use crate::error::{DetectResult, DetectionError};
use crate::metrics;
use crate::model_loader::ModelLoader;
use crate::postprocess::DetectionPostProcessor;
use crate::preprocess::{ImagePreprocessor, PixelBuffer, PixelFormat};

/// Runs object detection on still images.
pub struct DetectionService {
    backend: Arc<Mutex<Box<dyn InferenceBackend>>>,
    backend_name: String,
    preprocessor: ImagePreprocessor,
    postprocessor: DetectionPostProcessor,
    config: DetectionConfiguration,
    compute_units: ComputeUnits,
    gate: tokio::sync::Mutex<()>,
    runtime: Option<Handle>,
}

impl DetectionService {
    /// Wrap an already created backend.
    ///
    /// When called inside a Tokio runtime, that runtime also drives
    /// [`detect_with_callback`](Self::detect_with_callback).
    pub fn new(
        backend: Box<dyn InferenceBackend>,
        config: DetectionConfiguration,
        compute_units: ComputeUnits,
    ) -> Self {
        let backend_name = backend.name().to_string();
        Self {
            backend: Arc::new(Mutex::new(backend)),
            backend_name,
            preprocessor: ImagePreprocessor::new(config.input_size(), PixelFormat::default()),
            postprocessor: DetectionPostProcessor::new(config),
            config,
            compute_units,
            gate: tokio::sync::Mutex::new(()),
            runtime: Handle::try_current().ok(),
        }
    }

    /// Load model `name` through `loader` and wrap a fresh backend for it.
    pub async fn load(
        name: &str,
        config: DetectionConfiguration,
        loader: &ModelLoader,
        compute_units: ComputeUnits,
    ) -> DetectResult<Self> {
        let backend = loader.load(name, compute_units).await?;
        info!(
            model = name,
            backend = backend.name(),
            confidence = config.confidence_threshold(),
            iou = config.iou_threshold(),
            max_detections = config.max_detections(),
            input_size = %config.input_size(),
            "Detection service ready"
        );
        Ok(Self::new(backend, config, compute_units))
    }

    /// Runtime used by [`detect_with_callback`](Self::detect_with_callback).
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Use a different buffer layout for backends that expect one.
    pub fn with_pixel_format(mut self, format: PixelFormat) -> Self {
        self.preprocessor = ImagePreprocessor::new(self.config.input_size(), format);
        self
    }

    pub fn config(&self) -> &DetectionConfiguration {
        &self.config
    }

    pub fn compute_units(&self) -> ComputeUnits {
        self.compute_units
    }

    pub fn backend_name(&self) -> &str {
        &self.backend_name
    }

    /// Detect objects in `image`.
    pub async fn detect(&self, image: &DynamicImage) -> DetectResult<DetectionResult> {
        self.detect_cancellable(image, &CancelSignal::never()).await
    }

    /// Detect objects in `image`, stopping early once `cancel` fires.
    ///
    /// Cancellation is checked before preprocessing, after preprocessing and
    /// after inference.
    pub async fn detect_cancellable(
        &self,
        image: &DynamicImage,
        cancel: &CancelSignal,
    ) -> DetectResult<DetectionResult> {
        let _gate = self.gate.lock().await;
        self.detect_locked(image, cancel).await
    }

    /// Run detection on the service's runtime and hand the outcome to
    /// `callback`.
    ///
    /// Callable from any thread, including ones outside the runtime. Fails
    /// when the service was built outside a runtime and none was set with
    /// [`with_runtime`](Self::with_runtime).
    pub fn detect_with_callback<F>(
        self: Arc<Self>,
        image: DynamicImage,
        callback: F,
    ) -> DetectResult<JoinHandle<()>>
    where
        F: FnOnce(DetectResult<DetectionResult>) + Send + 'static,
    {
        let runtime = self
            .runtime
            .clone()
            .or_else(|| Handle::try_current().ok())
            .ok_or_else(|| DetectionError::internal("No Tokio runtime to run detection on"))?;

        Ok(runtime.spawn(async move {
            let result = self.detect(&image).await;
            callback(result);
        }))
    }

    /// Detect objects in each image in order.
    ///
    /// `on_progress` receives `(index + 1) / total` after every image. The
    /// first error aborts the batch.
    pub async fn detect_batch<F>(
        &self,
        images: &[DynamicImage],
        on_progress: F,
    ) -> DetectResult<Vec<DetectionResult>>
    where
        F: FnMut(f64),
    {
        self.detect_batch_cancellable(images, &CancelSignal::never(), on_progress)
            .await
    }

    /// [`detect_batch`](Self::detect_batch) with cancellation checked before
    /// each image.
    pub async fn detect_batch_cancellable<F>(
        &self,
        images: &[DynamicImage],
        cancel: &CancelSignal,
        mut on_progress: F,
    ) -> DetectResult<Vec<DetectionResult>>
    where
        F: FnMut(f64),
    {
        let _gate = self.gate.lock().await;
        let started = Instant::now();
        let total = images.len();
        let mut results = Vec::with_capacity(total);

        for (index, image) in images.iter().enumerate() {
            if cancel.is_cancelled() {
                metrics::record_detection_failure(DetectionError::Cancelled.stage());
                return Err(DetectionError::Cancelled);
            }
            results.push(self.detect_locked(image, cancel).await?);
            on_progress((index + 1) as f64 / total as f64);
        }

        info!(
            images = total,
            objects = results.iter().map(|r| r.count()).sum::<usize>(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Batch detection completed"
        );
        Ok(results)
    }

    /// Pipeline body; the caller holds the gate.
    async fn detect_locked(
        &self,
        image: &DynamicImage,
        cancel: &CancelSignal,
    ) -> DetectResult<DetectionResult> {
        let (width, height) = image.dimensions();
        let span = info_span!("detect", backend = %self.backend_name, width, height);

        let result = self.run_pipeline(image, cancel).instrument(span).await;
        match &result {
            Ok(detection) => metrics::record_detection(
                &self.backend_name,
                detection.count(),
                detection.processing_time.as_secs_f64(),
            ),
            Err(e) => metrics::record_detection_failure(e.stage()),
        }
        result
    }

    async fn run_pipeline(
        &self,
        image: &DynamicImage,
        cancel: &CancelSignal,
    ) -> DetectResult<DetectionResult> {
        let started = Instant::now();
        if cancel.is_cancelled() {
            return Err(DetectionError::Cancelled);
        }

        let (width, height) = image.dimensions();
        let image_size = ImageSize::new(width, height);
        let buffer = self.preprocessor.process(image)?;

        if cancel.is_cancelled() {
            return Err(DetectionError::Cancelled);
        }

        let observations = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DetectionError::Cancelled),
            observations = self.infer(buffer) => observations?,
        };

        if cancel.is_cancelled() {
            return Err(DetectionError::Cancelled);
        }

        let objects = self.postprocessor.process(observations, image_size);
        let result = DetectionResult::new(objects, image_size, started.elapsed());

        debug!(
            objects = result.count(),
            duration = %result.formatted_duration(),
            "Detection completed"
        );
        Ok(result)
    }

    async fn infer(&self, buffer: PixelBuffer) -> DetectResult<Vec<RawObservation>> {
        let backend = self.backend.clone();
        let compute_units = self.compute_units;

        tokio::task::spawn_blocking(move || {
            let mut backend = backend
                .lock()
                .map_err(|_| DetectionError::internal("Backend lock poisoned"))?;
            backend
                .infer(&buffer, compute_units)
                .map_err(DetectionError::from)
        })
        .await
        .map_err(|e| DetectionError::internal(format!("Task join error: {}", e)))?
    }
}
