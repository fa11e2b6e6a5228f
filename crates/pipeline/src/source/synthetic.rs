use super::{FrameSource, SourceError};
use image::{Rgb, RgbImage};

/// Generates `frames` gradient frames, each shifted by its index.
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    frames: u64,
    emitted: u64,
    width: u32,
    height: u32,
    released: bool,
}

impl SyntheticSource {
    pub fn new(frames: u64, width: u32, height: u32) -> Self {
        Self {
            frames,
            emitted: 0,
            width,
            height,
            released: false,
        }
    }

    pub fn emitted(&self) -> u64 {
        self.emitted
    }
}

pub(crate) fn gradient_frame(width: u32, height: u32, shift: u64) -> RgbImage {
    let shift = (shift % 256) as u32;
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            ((x + shift) % 256) as u8,
            ((y + shift) % 256) as u8,
            ((x + y) % 256) as u8,
        ])
    })
}

impl FrameSource for SyntheticSource {
    fn is_ready(&self) -> bool {
        !self.released && self.width > 0 && self.height > 0
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>, SourceError> {
        if self.released || self.emitted >= self.frames {
            return Ok(None);
        }
        let frame = gradient_frame(self.width, self.height, self.emitted);
        self.emitted += 1;
        Ok(Some(frame))
    }

    fn release(&mut self) {
        self.released = true;
    }

    fn describe(&self) -> String {
        format!("synthetic:{}x{}x{}", self.width, self.height, self.frames)
    }
}
