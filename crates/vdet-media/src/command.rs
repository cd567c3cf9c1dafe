//! FFmpeg single-frame grabber.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;
use vdet_models::ImageSize;

use crate::error::ExtractionError;

/// Builder for an FFmpeg command that decodes one frame as raw RGB24.
#[derive(Debug, Clone)]
pub struct FrameGrabCommand {
    /// Input file path
    input: PathBuf,
    /// Seek position in seconds
    time: f64,
    /// Output frame size
    size: ImageSize,
    /// Decode the final second and keep its last frame instead of seeking
    last_frame: bool,
}

impl FrameGrabCommand {
    pub fn new(input: impl AsRef<Path>, time: f64, size: ImageSize) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            time,
            size,
            last_frame: false,
        }
    }

    /// Grab the final frame of the input rather than the frame at `time`.
    pub fn last_frame(mut self) -> Self {
        self.last_frame = true;
        self
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec!["-nostdin".to_string(), "-v".to_string(), "error".to_string()];

        if self.last_frame {
            args.extend(["-sseof".to_string(), "-1".to_string()]);
        } else {
            // Input-side seek
            args.extend(["-ss".to_string(), format!("{:.3}", self.time)]);
        }
        args.extend(["-i".to_string(), self.input.to_string_lossy().to_string()]);
        if !self.last_frame {
            args.extend(["-frames:v".to_string(), "1".to_string()]);
        }

        args.extend([
            "-vf".to_string(),
            format!("scale={}:{}", self.size.width, self.size.height),
            "-f".to_string(),
            "rawvideo".to_string(),
            "-pix_fmt".to_string(),
            "rgb24".to_string(),
            "pipe:1".to_string(),
        ]);
        args
    }

    /// Expected number of output bytes.
    pub fn frame_len(&self) -> usize {
        self.size.width as usize * self.size.height as usize * 3
    }

    /// Run FFmpeg and return the frame bytes.
    ///
    /// `Ok(None)` means FFmpeg succeeded without producing a frame, which
    /// happens when the seek lands after the last video frame. The child is
    /// killed if the returned future is dropped.
    pub async fn run(&self) -> Result<Option<Vec<u8>>, ExtractionError> {
        check_ffmpeg()?;

        let args = self.build_args();
        debug!("Running FFmpeg: ffmpeg {}", args.join(" "));

        let output = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ExtractionError::frame_generation_failed(self.time, e.to_string()))?;

        if !output.status.success() {
            return Err(ExtractionError::frame_generation_failed(
                self.time,
                format!(
                    "FFmpeg exited with {:?}: {}",
                    output.status.code(),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }

        self.take_frame(output.stdout)
    }

    /// Pick the frame out of FFmpeg's stdout.
    ///
    /// A last-frame grab decodes every frame of the final second, so the tail
    /// of the output is kept.
    fn take_frame(&self, mut stdout: Vec<u8>) -> Result<Option<Vec<u8>>, ExtractionError> {
        let frame_len = self.frame_len();
        if stdout.is_empty() {
            return Ok(None);
        }
        if frame_len == 0 || stdout.len() % frame_len != 0 || (!self.last_frame && stdout.len() != frame_len) {
            return Err(ExtractionError::frame_generation_failed(
                self.time,
                format!("expected {} frame bytes, decoded {}", frame_len, stdout.len()),
            ));
        }

        let tail = stdout.split_off(stdout.len() - frame_len);
        Ok(Some(tail))
    }
}

/// Locate the `ffmpeg` binary.
pub fn check_ffmpeg() -> Result<PathBuf, ExtractionError> {
    which::which("ffmpeg").map_err(|_| ExtractionError::FfmpegNotFound)
}

/// Locate the `ffprobe` binary.
pub fn check_ffprobe() -> Result<PathBuf, ExtractionError> {
    which::which("ffprobe").map_err(|_| ExtractionError::FfprobeNotFound)
}
