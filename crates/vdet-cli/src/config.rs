//! Detector configuration from environment variables and CLI flags.

use std::path::PathBuf;
use std::str::FromStr;

use clap::Args;
use vdet_media::{ComputeUnits, ModelSearchPaths};
use vdet_models::{
    DetectionConfiguration, ImageSize, DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_INPUT_EDGE,
    DEFAULT_IOU_THRESHOLD, DEFAULT_MAX_DETECTIONS,
};

/// Default model name looked up in the search paths.
pub const DEFAULT_MODEL: &str = "yolov8n";

/// Detector settings shared by every subcommand.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
    /// Model name or path
    pub model: String,
    /// Extra model directories searched before the defaults
    pub model_dirs: Vec<PathBuf>,
    pub confidence: f32,
    pub iou: f32,
    pub max_detections: i64,
    /// Model input size
    pub input_size: ImageSize,
    pub compute_units: ComputeUnits,
    /// Video sampling rate (None = one frame per second)
    pub fps: Option<f64>,
    /// Cap on decoded video frame size
    pub max_resolution: Option<ImageSize>,
    /// Skip undecodable video frames instead of failing
    pub skip_bad_frames: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            model_dirs: Vec::new(),
            confidence: DEFAULT_CONFIDENCE_THRESHOLD,
            iou: DEFAULT_IOU_THRESHOLD,
            max_detections: DEFAULT_MAX_DETECTIONS as i64,
            input_size: ImageSize::square(DEFAULT_INPUT_EDGE),
            compute_units: ComputeUnits::default(),
            fps: None,
            max_resolution: None,
            skip_bad_frames: false,
        }
    }
}

/// Flags overriding the environment.
#[derive(Args, Debug, Clone, Default)]
pub struct DetectorArgs {
    /// Model name (searched in model directories) or path to a .onnx/.ort file
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Additional model directory (repeatable)
    #[arg(long = "model-dir", global = true)]
    pub model_dirs: Vec<PathBuf>,

    /// Minimum confidence in [0, 1]
    #[arg(long, global = true)]
    pub confidence: Option<f32>,

    /// IoU threshold for non-maximum suppression
    #[arg(long, global = true)]
    pub iou: Option<f32>,

    /// Maximum detections per image
    #[arg(long, global = true, allow_hyphen_values = true)]
    pub max_detections: Option<i64>,

    /// Model input size, e.g. 640 or 640x480
    #[arg(long, global = true, value_parser = parse_size)]
    pub input_size: Option<ImageSize>,

    /// cpu, gpu or all
    #[arg(long, global = true)]
    pub compute_units: Option<ComputeUnits>,
}

impl DetectorConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let parsed = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        Self {
            model: parsed("VDET_MODEL").unwrap_or(defaults.model),
            model_dirs: parsed("VDET_MODEL_DIRS")
                .map(|dirs| std::env::split_paths(&dirs).collect())
                .unwrap_or_default(),
            confidence: parse_var(parsed("VDET_CONFIDENCE")).unwrap_or(defaults.confidence),
            iou: parse_var(parsed("VDET_IOU")).unwrap_or(defaults.iou),
            max_detections: parse_var(parsed("VDET_MAX_DETECTIONS")).unwrap_or(defaults.max_detections),
            input_size: parsed("VDET_INPUT_SIZE")
                .and_then(|s| parse_size(&s).ok())
                .unwrap_or(defaults.input_size),
            compute_units: parse_var(parsed("VDET_COMPUTE_UNITS")).unwrap_or(defaults.compute_units),
            fps: parse_var(parsed("VDET_FPS")),
            max_resolution: parsed("VDET_MAX_RESOLUTION").and_then(|s| parse_size(&s).ok()),
            skip_bad_frames: parsed("VDET_SKIP_BAD_FRAMES")
                .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
                .unwrap_or(false),
        }
    }

    /// Apply CLI flags on top of this config.
    pub fn with_args(mut self, args: &DetectorArgs) -> Self {
        if let Some(model) = &args.model {
            self.model = model.clone();
        }
        if !args.model_dirs.is_empty() {
            let mut dirs = args.model_dirs.clone();
            dirs.extend(self.model_dirs);
            self.model_dirs = dirs;
        }
        if let Some(confidence) = args.confidence {
            self.confidence = confidence;
        }
        if let Some(iou) = args.iou {
            self.iou = iou;
        }
        if let Some(max_detections) = args.max_detections {
            self.max_detections = max_detections;
        }
        if let Some(input_size) = args.input_size {
            self.input_size = input_size;
        }
        if let Some(compute_units) = args.compute_units {
            self.compute_units = compute_units;
        }
        self
    }

    /// Clamped pipeline configuration.
    pub fn detection_configuration(&self) -> DetectionConfiguration {
        DetectionConfiguration::new(self.confidence, self.iou, self.max_detections, self.input_size)
    }

    /// Configured directories first, then the defaults.
    pub fn search_paths(&self) -> ModelSearchPaths {
        let mut directories = self.model_dirs.clone();
        directories.extend(ModelSearchPaths::default().directories);
        ModelSearchPaths { directories }
    }
}

fn parse_var<T: FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|v| v.parse().ok())
}

/// Parse `640` (square) or `640x480`.
pub fn parse_size(s: &str) -> Result<ImageSize, String> {
    let s = s.trim();
    let (width, height) = match s.split_once(['x', 'X']) {
        Some((w, h)) => (w, h),
        None => (s, s),
    };
    let width: u32 = width.trim().parse().map_err(|_| format!("invalid size: {}", s))?;
    let height: u32 = height.trim().parse().map_err(|_| format!("invalid size: {}", s))?;
    if width == 0 || height == 0 {
        return Err(format!("size must be non-zero: {}", s));
    }
    Ok(ImageSize::new(width, height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_env() {
        assert_eq!(DetectorConfig::from_lookup(|_| None), DetectorConfig::default());
    }

    #[test]
    fn test_env_values() {
        let config = DetectorConfig::from_lookup(lookup(&[
            ("VDET_MODEL", "yolov8s"),
            ("VDET_CONFIDENCE", "0.3"),
            ("VDET_IOU", "0.6"),
            ("VDET_MAX_DETECTIONS", "20"),
            ("VDET_INPUT_SIZE", "320x256"),
            ("VDET_COMPUTE_UNITS", "cpu"),
            ("VDET_FPS", "2.5"),
            ("VDET_MAX_RESOLUTION", "1280"),
            ("VDET_SKIP_BAD_FRAMES", "true"),
        ]));

        assert_eq!(config.model, "yolov8s");
        assert!((config.confidence - 0.3).abs() < 1e-6);
        assert!((config.iou - 0.6).abs() < 1e-6);
        assert_eq!(config.max_detections, 20);
        assert_eq!(config.input_size, ImageSize::new(320, 256));
        assert_eq!(config.compute_units, ComputeUnits::CpuOnly);
        assert_eq!(config.fps, Some(2.5));
        assert_eq!(config.max_resolution, Some(ImageSize::square(1280)));
        assert!(config.skip_bad_frames);
    }

    #[test]
    fn test_invalid_env_falls_back() {
        let config = DetectorConfig::from_lookup(lookup(&[
            ("VDET_CONFIDENCE", "high"),
            ("VDET_INPUT_SIZE", "0x0"),
            ("VDET_COMPUTE_UNITS", "tpu"),
        ]));
        assert_eq!(config.confidence, DEFAULT_CONFIDENCE_THRESHOLD);
        assert_eq!(config.input_size, ImageSize::square(DEFAULT_INPUT_EDGE));
        assert_eq!(config.compute_units, ComputeUnits::All);
    }

    #[test]
    fn test_flags_win_over_env() {
        let env = DetectorConfig::from_lookup(lookup(&[("VDET_CONFIDENCE", "0.3"), ("VDET_MODEL", "env")]));
        let args = DetectorArgs {
            confidence: Some(0.8),
            model_dirs: vec![PathBuf::from("/opt/models")],
            ..Default::default()
        };
        let config = env.with_args(&args);

        assert!((config.confidence - 0.8).abs() < 1e-6);
        assert_eq!(config.model, "env");
        assert_eq!(config.search_paths().directories[0], PathBuf::from("/opt/models"));
    }

    #[test]
    fn test_detection_configuration_is_clamped() {
        let config = DetectorConfig {
            confidence: 1.7,
            max_detections: -4,
            ..Default::default()
        };
        let detection = config.detection_configuration();
        assert_eq!(detection.confidence_threshold(), 1.0);
        assert_eq!(detection.max_detections(), 1);
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("640").unwrap(), ImageSize::square(640));
        assert_eq!(parse_size(" 1280X720 ").unwrap(), ImageSize::new(1280, 720));
        assert!(parse_size("wide").is_err());
        assert!(parse_size("0").is_err());
    }
}
