//! Inference backend interface.
//!
//! A backend takes a preprocessed [`PixelBuffer`] and returns raw
//! observations in normalized, bottom-left-origin coordinates. Everything
//! downstream of that (thresholding, coordinate conversion, NMS) lives in
//! [`crate::postprocess`].

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use vdet_models::NormalizedRect;

use crate::error::BackendError;
use crate::preprocess::PixelBuffer;

/// Hardware the backend may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputeUnits {
    CpuOnly,
    CpuAndGpu,
    /// CPU, GPU and any other accelerator the runtime knows about.
    #[default]
    All,
}

impl ComputeUnits {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ComputeUnits::CpuOnly => "cpu_only",
            ComputeUnits::CpuAndGpu => "cpu_and_gpu",
            ComputeUnits::All => "all",
        }
    }

    pub fn allows_gpu(&self) -> bool {
        !matches!(self, ComputeUnits::CpuOnly)
    }
}

impl fmt::Display for ComputeUnits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComputeUnits {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "cpu" | "cpu_only" => Ok(ComputeUnits::CpuOnly),
            "gpu" | "cpu_and_gpu" => Ok(ComputeUnits::CpuAndGpu),
            "all" => Ok(ComputeUnits::All),
            other => Err(format!("unknown compute units: {}", other)),
        }
    }
}

/// One label hypothesis for an observation.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub identifier: String,
    pub confidence: f32,
}

impl Classification {
    pub fn new(identifier: impl Into<String>, confidence: f32) -> Self {
        Self {
            identifier: identifier.into(),
            confidence,
        }
    }
}

/// Unfiltered backend output for one candidate object.
#[derive(Debug, Clone, PartialEq)]
pub struct RawObservation {
    /// Normalized box, origin bottom-left.
    pub bounding_box: NormalizedRect,
    pub confidence: f32,
    /// Labels ordered by likelihood; only the first is used.
    pub labels: Vec<Classification>,
}

impl RawObservation {
    pub fn new(bounding_box: NormalizedRect, confidence: f32, labels: Vec<Classification>) -> Self {
        Self {
            bounding_box,
            confidence,
            labels,
        }
    }

    pub fn top_label(&self) -> Option<&str> {
        self.labels.first().map(|l| l.identifier.as_str())
    }
}

/// A loaded model that can run inference.
///
/// Implementations are driven from the blocking thread pool, one call at a
/// time, so they need `Send` but not `Sync`.
pub trait InferenceBackend: Send {
    /// Backend name for logging and error messages.
    fn name(&self) -> &str;

    /// Run the model over one preprocessed buffer.
    fn infer(
        &mut self,
        input: &PixelBuffer,
        compute_units: ComputeUnits,
    ) -> Result<Vec<RawObservation>, BackendError>;
}

impl<B: InferenceBackend + ?Sized> InferenceBackend for Box<B> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn infer(
        &mut self,
        input: &PixelBuffer,
        compute_units: ComputeUnits,
    ) -> Result<Vec<RawObservation>, BackendError> {
        (**self).infer(input, compute_units)
    }
}
