//! Camera stream sources.
//!
//! The shipped source runs an `ffmpeg` subprocess that decodes the camera
//! stream, applies an `fps` filter and writes an MJPEG byte stream to stdout.
//! Frames are split on JPEG SOI/EOI markers.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, warn};

use crate::error::{VisionError, VisionResult};

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// A decoded camera stream yielding JPEG frames.
#[async_trait]
pub trait FrameSource: Send {
    /// Next JPEG frame. `Ok(None)` means the stream ended.
    async fn next_frame(&mut self) -> VisionResult<Option<Vec<u8>>>;

    /// Stop decoding and release the underlying stream.
    async fn close(&mut self);
}

/// Opens frame sources for camera URIs.
#[async_trait]
pub trait StreamOpener: Send + Sync {
    async fn open(&self, uri: &str, sample_fps: f32) -> VisionResult<Box<dyn FrameSource>>;
}

/// Incremental splitter for a concatenated JPEG byte stream.
#[derive(Debug)]
pub struct MjpegSplitter {
    buf: Vec<u8>,
    max_frame_bytes: usize,
}

impl Default for MjpegSplitter {
    fn default() -> Self {
        Self::new(16 * 1024 * 1024)
    }
}

impl MjpegSplitter {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_frame_bytes,
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes buffered but not yet returned as a frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Pop the next complete frame, if one is buffered.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        let Some(start) = find(&self.buf, &SOI) else {
            // Keep a trailing 0xFF in case it begins the next SOI.
            let keep = usize::from(self.buf.last() == Some(&0xFF));
            let drop = self.buf.len() - keep;
            self.buf.drain(..drop);
            return None;
        };

        if start > 0 {
            self.buf.drain(..start);
        }

        match find(&self.buf[SOI.len()..], &EOI) {
            Some(offset) => {
                let end = SOI.len() + offset + EOI.len();
                Some(self.buf.drain(..end).collect())
            }
            None => {
                if self.buf.len() > self.max_frame_bytes {
                    warn!(
                        buffered = self.buf.len(),
                        "MJPEG frame exceeded size limit, discarding"
                    );
                    self.buf.clear();
                }
                None
            }
        }
    }
}

fn find(haystack: &[u8], needle: &[u8; 2]) -> Option<usize> {
    haystack.windows(2).position(|w| w == needle)
}

/// FFmpeg source settings.
#[derive(Debug, Clone)]
pub struct FfmpegSourceConfig {
    /// Longest wait for the next frame before the read counts as failed
    pub read_timeout: Duration,
    /// MJPEG quality scale passed to `-q:v` (2 best .. 31 worst)
    pub mjpeg_quality: u8,
}

impl Default for FfmpegSourceConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(10),
            mjpeg_quality: 5,
        }
    }
}

/// Opens streams through an `ffmpeg` subprocess.
#[derive(Debug, Clone, Default)]
pub struct FfmpegOpener {
    config: FfmpegSourceConfig,
}

impl FfmpegOpener {
    pub fn new(config: FfmpegSourceConfig) -> Self {
        Self { config }
    }

    /// Build the FFmpeg argument list for a stream.
    pub fn build_args(&self, uri: &str, sample_fps: f32) -> Vec<String> {
        let mut args: Vec<String> = vec!["-hide_banner".into(), "-loglevel".into(), "error".into()];

        if uri.to_ascii_lowercase().starts_with("rtsp://") {
            args.extend(["-rtsp_transport".into(), "tcp".into()]);
        } else if !uri.contains("://") {
            // Local files are read at their native rate.
            args.push("-re".into());
        }

        args.extend([
            "-i".into(),
            uri.to_string(),
            "-an".into(),
            "-vf".into(),
            format!("fps={}", sample_fps.max(0.1)),
            "-f".into(),
            "image2pipe".into(),
            "-vcodec".into(),
            "mjpeg".into(),
            "-q:v".into(),
            self.config.mjpeg_quality.to_string(),
            "pipe:1".into(),
        ]);
        args
    }
}

#[async_trait]
impl StreamOpener for FfmpegOpener {
    async fn open(&self, uri: &str, sample_fps: f32) -> VisionResult<Box<dyn FrameSource>> {
        which::which("ffmpeg").map_err(|_| VisionError::FfmpegNotFound)?;

        let args = self.build_args(uri, sample_fps);
        debug!("Running FFmpeg: ffmpeg {}", args.join(" "));

        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| VisionError::source_unavailable(uri, e.to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| VisionError::internal("ffmpeg stdout not captured"))?;

        if let Some(stderr) = child.stderr.take() {
            let uri = uri.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(uri = %uri, "ffmpeg: {}", line);
                }
            });
        }

        info!(uri = %uri, sample_fps = sample_fps, "Stream opened");

        Ok(Box::new(FfmpegFrameSource {
            uri: uri.to_string(),
            child,
            stdout,
            splitter: MjpegSplitter::default(),
            read_timeout: self.config.read_timeout,
            closed: false,
        }))
    }
}

/// Live FFmpeg pipe. The subprocess is killed on close or drop.
pub struct FfmpegFrameSource {
    uri: String,
    child: Child,
    stdout: ChildStdout,
    splitter: MjpegSplitter,
    read_timeout: Duration,
    closed: bool,
}

#[async_trait]
impl FrameSource for FfmpegFrameSource {
    async fn next_frame(&mut self) -> VisionResult<Option<Vec<u8>>> {
        let mut chunk = vec![0u8; 64 * 1024];

        loop {
            if let Some(frame) = self.splitter.next_frame() {
                return Ok(Some(frame));
            }

            let read = tokio::time::timeout(self.read_timeout, self.stdout.read(&mut chunk))
                .await
                .map_err(|_| VisionError::ReadTimeout(self.read_timeout))??;

            if read == 0 {
                let status = self.child.try_wait().ok().flatten();
                debug!(uri = %self.uri, ?status, "Stream ended");
                return Ok(None);
            }

            self.splitter.push(&chunk[..read]);
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Err(e) = self.child.kill().await {
            debug!(uri = %self.uri, "ffmpeg already exited: {}", e);
        }
        info!(uri = %self.uri, "Stream closed");
    }
}
