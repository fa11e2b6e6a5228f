//! Video frame sources. A source owns its decoder handle and hands out RGB
//! frames one at a time until the stream is exhausted.

mod ffmpeg;
mod synthetic;

pub use ffmpeg::{FfmpegSource, device_path};
pub use synthetic::SyntheticSource;

use common::retry::RetryPolicy;
use image::RgbImage;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("video source {target} unavailable: {reason}")]
    Unavailable { target: String, reason: String },

    #[error("failed to decode frame from {target}: {reason}")]
    Decode { target: String, reason: String },
}

impl SourceError {
    pub(crate) fn unavailable(target: impl Into<String>, reason: impl ToString) -> Self {
        Self::Unavailable {
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn decode(target: impl Into<String>, reason: impl ToString) -> Self {
        Self::Decode {
            target: target.into(),
            reason: reason.to_string(),
        }
    }
}

/// What to open.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceSpec {
    File(PathBuf),
    Device { index: u32, width: u32, height: u32 },
    Synthetic { frames: u64, width: u32, height: u32 },
}

pub trait FrameSource: Send {
    /// Whether the underlying stream is usable.
    fn is_ready(&self) -> bool;

    /// Next decoded frame; `Ok(None)` once the stream is exhausted or released.
    fn next_frame(&mut self) -> Result<Option<RgbImage>, SourceError>;

    /// Release the decoder handle. Safe to call more than once.
    fn release(&mut self);

    fn describe(&self) -> String;
}

impl SourceSpec {
    /// Matches [`FrameSource::describe`] of the source this spec opens.
    pub fn description(&self) -> String {
        match self {
            SourceSpec::File(path) => format!("file:{}", path.display()),
            SourceSpec::Device { index, .. } => format!("device:{}", device_path(*index).display()),
            SourceSpec::Synthetic {
                frames,
                width,
                height,
            } => format!("synthetic:{}x{}x{}", width, height, frames),
        }
    }
}

/// Turns a [`SourceSpec`] into a live source.
pub trait SourceOpener: Send + Sync {
    fn open(&self, spec: &SourceSpec) -> Result<Box<dyn FrameSource>, SourceError>;
}

/// Opens files and devices through ffmpeg, synthetic specs in memory.
#[derive(Debug, Clone, Default)]
pub struct SystemOpener {
    pub device_retry: RetryPolicy,
}

impl SourceOpener for SystemOpener {
    fn open(&self, spec: &SourceSpec) -> Result<Box<dyn FrameSource>, SourceError> {
        match spec {
            SourceSpec::File(path) => Ok(Box::new(FfmpegSource::open_file(path)?)),
            SourceSpec::Device {
                index,
                width,
                height,
            } => Ok(Box::new(FfmpegSource::open_device(
                *index,
                *width,
                *height,
                &self.device_retry,
            )?)),
            SourceSpec::Synthetic {
                frames,
                width,
                height,
            } => Ok(Box::new(SyntheticSource::new(*frames, *width, *height))),
        }
    }
}
