use super::{FrameSource, SourceError};
use common::retry::{RetryPolicy, retry_with_backoff};
use image::RgbImage;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};

#[derive(Debug, Clone)]
enum Input {
    File(PathBuf),
    Device(PathBuf),
}

impl Input {
    fn path(&self) -> &Path {
        match self {
            Input::File(path) | Input::Device(path) => path,
        }
    }
}

/// Decodes a file or V4L2 device through an `ffmpeg` child emitting rgb24
/// rawvideo on stdout.
///
/// For files the child is spawned on the first `next_frame` call, so opening
/// only probes. Devices start decoding at open time.
pub struct FfmpegSource {
    input: Input,
    width: u32,
    height: u32,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    buffer: Vec<u8>,
    /// Frame read while opening a device, handed out first.
    pending: Option<RgbImage>,
    exhausted: bool,
    released: bool,
}

impl FfmpegSource {
    pub fn open_file(path: &Path) -> Result<Self, SourceError> {
        let target = path.display().to_string();
        if !path.is_file() {
            return Err(SourceError::unavailable(target, "file not found"));
        }

        let (width, height) = probe_dimensions(path)?;
        tracing::info!(path = %target, width, height, "Video file opened");

        Ok(Self::new(Input::File(path.to_path_buf()), width, height))
    }

    /// Open `/dev/video<index>`. The decoder is started and must deliver one
    /// frame before the device counts as open; that frame is returned by the
    /// first `next_frame`.
    pub fn open_device(
        index: u32,
        width: u32,
        height: u32,
        retry: &RetryPolicy,
    ) -> Result<Self, SourceError> {
        Self::open_device_at(&device_path(index), width, height, retry)
    }

    fn open_device_at(
        path: &Path,
        width: u32,
        height: u32,
        retry: &RetryPolicy,
    ) -> Result<Self, SourceError> {
        let target = path.display().to_string();

        let source = retry_with_backoff(retry, "Open video device", || {
            if !path.exists() {
                return Err(SourceError::unavailable(target.clone(), "device not present"));
            }
            let mut source = Self::new(Input::Device(path.to_path_buf()), width, height);
            source.prime()?;
            Ok(source)
        })?;

        tracing::info!(device = %target, width, height, "Video device opened");
        Ok(source)
    }

    fn prime(&mut self) -> Result<(), SourceError> {
        match self.read_frame() {
            Ok(Some(frame)) => {
                self.pending = Some(frame);
                Ok(())
            }
            Ok(None) => Err(SourceError::unavailable(self.target(), "device produced no frames")),
            Err(SourceError::Decode { reason, .. }) => {
                self.reap();
                Err(SourceError::unavailable(self.target(), reason))
            }
            Err(e) => Err(e),
        }
    }

    fn new(input: Input, width: u32, height: u32) -> Self {
        Self {
            input,
            width,
            height,
            child: None,
            stdout: None,
            buffer: vec![0; width as usize * height as usize * 3],
            pending: None,
            exhausted: false,
            released: false,
        }
    }

    fn target(&self) -> String {
        self.input.path().display().to_string()
    }

    fn decoder_command(&self) -> Command {
        let mut cmd = Command::new("ffmpeg");
        cmd.arg("-hide_banner").arg("-loglevel").arg("error");

        if let Input::Device(_) = self.input {
            cmd.arg("-f")
                .arg("video4linux2")
                .arg("-video_size")
                .arg(format!("{}x{}", self.width, self.height));
        }

        cmd.arg("-i")
            .arg(self.input.path())
            .arg("-an")
            .arg("-vf")
            .arg(format!("scale={}:{}", self.width, self.height))
            .arg("-pix_fmt")
            .arg("rgb24")
            .arg("-f")
            .arg("rawvideo")
            .arg("-")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        cmd
    }

    fn ensure_spawned(&mut self) -> Result<(), SourceError> {
        if self.stdout.is_some() {
            return Ok(());
        }

        let mut child = self
            .decoder_command()
            .spawn()
            .map_err(|e| SourceError::unavailable(self.target(), format!("failed to spawn ffmpeg: {}", e)))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SourceError::unavailable(self.target(), "ffmpeg stdout not captured"))?;

        tracing::debug!(target_path = %self.target(), pid = child.id(), "Decoder process started");
        self.child = Some(child);
        self.stdout = Some(stdout);
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<RgbImage>, SourceError> {
        if self.exhausted {
            return Ok(None);
        }
        self.ensure_spawned()?;

        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(None);
        };

        match stdout.read_exact(&mut self.buffer) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                self.exhausted = true;
                self.reap();
                return Ok(None);
            }
            Err(e) => return Err(SourceError::decode(self.target(), e)),
        }

        RgbImage::from_raw(self.width, self.height, self.buffer.clone())
            .map(Some)
            .ok_or_else(|| SourceError::decode(self.target(), "frame buffer size mismatch"))
    }

    fn reap(&mut self) {
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            match child.wait() {
                Ok(status) => tracing::debug!(status = %status, "Decoder process exited"),
                Err(e) => tracing::warn!(error = %e, "Failed to reap decoder process"),
            }
        }
    }
}

impl FrameSource for FfmpegSource {
    fn is_ready(&self) -> bool {
        !self.released && self.width > 0 && self.height > 0
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>, SourceError> {
        if self.released {
            return Ok(None);
        }
        if let Some(frame) = self.pending.take() {
            return Ok(Some(frame));
        }
        self.read_frame()
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.pending = None;
        self.reap();
        tracing::debug!(target_path = %self.target(), "Video source released");
    }

    fn describe(&self) -> String {
        match &self.input {
            Input::File(path) => format!("file:{}", path.display()),
            Input::Device(path) => format!("device:{}", path.display()),
        }
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        self.release();
    }
}

pub fn device_path(index: u32) -> PathBuf {
    PathBuf::from(format!("/dev/video{}", index))
}

fn probe_dimensions(path: &Path) -> Result<(u32, u32), SourceError> {
    let target = path.display().to_string();
    let output = Command::new("ffprobe")
        .arg("-v")
        .arg("error")
        .arg("-select_streams")
        .arg("v:0")
        .arg("-show_entries")
        .arg("stream=width,height")
        .arg("-of")
        .arg("csv=s=x:p=0")
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| SourceError::unavailable(target.clone(), format!("failed to run ffprobe: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(SourceError::unavailable(target, stderr.trim()));
    }

    parse_dimensions(&String::from_utf8_lossy(&output.stdout))
        .ok_or_else(|| SourceError::unavailable(target, "no decodable video stream"))
}

/// Parses ffprobe's `WIDTHxHEIGHT` output.
fn parse_dimensions(output: &str) -> Option<(u32, u32)> {
    let line = output.lines().map(str::trim).find(|l| !l.is_empty())?;
    let (w, h) = line.split_once('x')?;
    let width: u32 = w.trim().parse().ok()?;
    let height: u32 = h.trim().trim_end_matches('x').parse().ok()?;
    (width > 0 && height > 0).then_some((width, height))
}
