//! MJPEG frame multiplexing.
//!
//! One capture per feed is shared by every connected HTTP client. The
//! capture starts with the first subscriber and stops (releasing the device
//! or file) when the last one leaves or the source fails. Frames go out over a
//! `broadcast` channel, so slow clients skip frames instead of stalling the
//! capture.
//!
//! Each frame is emitted as one multipart part:
//!
//! ```text
//! --frame\r\nContent-Type: image/jpeg\r\n\r\n<jpeg bytes>\r\n
//! ```

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use futures_core::Stream;
use parking_lot::Mutex;
use tokio::io::AsyncReadExt;
use tokio::process::ChildStdout;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use vr_core::config::FeedConfig;
use vr_core::{Error, Result};

use crate::command::ToolCommand;
use crate::process::ManagedProcess;
use crate::tools::ToolRegistry;

/// Multipart boundary token.
pub const MJPEG_BOUNDARY: &str = "frame";

/// Frames buffered per subscriber before it starts skipping.
const CHANNEL_CAPACITY: usize = 8;

/// A partially-received frame larger than this is discarded.
const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// `Content-Type` of the multipart response.
pub fn content_type() -> String {
    format!("multipart/x-mixed-replace; boundary={MJPEG_BOUNDARY}")
}

/// Wrap one JPEG in its multipart part.
pub fn multipart_part(jpeg: &[u8]) -> Bytes {
    let header = format!("--{MJPEG_BOUNDARY}\r\nContent-Type: image/jpeg\r\n\r\n");
    let mut part = BytesMut::with_capacity(header.len() + jpeg.len() + 2);
    part.extend_from_slice(header.as_bytes());
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    part.freeze()
}

/// Something that can be opened to produce JPEG frames.
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Acquire the underlying capture handle.
    async fn open(&self) -> Result<Box<dyn FrameReader>>;

    /// Human-readable description for logs.
    fn describe(&self) -> String;
}

/// An open capture. Dropping it releases the handle.
#[async_trait]
pub trait FrameReader: Send {
    /// Next complete JPEG, or `None` at end of input.
    async fn next_frame(&mut self) -> Result<Option<Bytes>>;
}

/// Splits a byte stream into JPEG images on SOI/EOI markers.
#[derive(Debug, Default)]
pub struct JpegSplitter {
    buf: BytesMut,
}

impl JpegSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
        if self.buf.len() > MAX_FRAME_BYTES {
            tracing::warn!(buffered = self.buf.len(), "Discarding oversized partial frame");
            self.buf.clear();
        }
    }

    /// Pop the next complete frame, discarding any bytes before its SOI.
    pub fn next_frame(&mut self) -> Option<Bytes> {
        let Some(start) = find(&self.buf, &SOI, 0) else {
            // Keep a trailing 0xFF; it may begin the next SOI.
            let keep = usize::from(self.buf.last() == Some(&0xFF));
            let drop = self.buf.len() - keep;
            self.buf.advance(drop);
            return None;
        };
        self.buf.advance(start);

        let end = find(&self.buf, &EOI, SOI.len())?;
        Some(self.buf.split_to(end + EOI.len()).freeze())
    }
}

fn find(haystack: &[u8], needle: &[u8; 2], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(2)
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// ffmpeg-backed source: a `/dev/video*` capture device or a file played on a
/// native-rate loop, encoded to MJPEG on stdout.
#[derive(Debug, Clone)]
pub struct FfmpegFrameSource {
    ffmpeg: Option<PathBuf>,
    feed: FeedConfig,
}

impl FfmpegFrameSource {
    pub fn new(ffmpeg: Option<PathBuf>, feed: FeedConfig) -> Self {
        Self { ffmpeg, feed }
    }

    fn is_device(&self) -> bool {
        self.feed.source.starts_with("/dev/video")
    }

    pub fn command(&self, ffmpeg: PathBuf) -> ToolCommand {
        let mut cmd = ToolCommand::new(ffmpeg);
        cmd.args(["-hide_banner", "-loglevel", "error"]);
        if self.is_device() {
            cmd.args(["-f", "v4l2"]);
        } else {
            cmd.args(["-re", "-stream_loop", "-1"]);
        }
        cmd.arg("-i")
            .arg(self.feed.source.as_str())
            .args(["-f", "image2pipe", "-vcodec", "mjpeg", "-q:v"])
            .arg(self.feed.quality.to_string())
            .arg("-r")
            .arg(self.feed.fps.max(1).to_string())
            .arg("pipe:1");
        cmd
    }
}

#[async_trait]
impl FrameSource for FfmpegFrameSource {
    async fn open(&self) -> Result<Box<dyn FrameReader>> {
        let ffmpeg = self
            .ffmpeg
            .clone()
            .ok_or_else(|| {
                Error::tool("ffmpeg", "ffmpeg not found; is it installed and in PATH?")
            })?;
        if !self.is_device() && !std::path::Path::new(&self.feed.source).is_file() {
            return Err(Error::not_found("feed source", &self.feed.source));
        }

        let (process, stdout) = self
            .command(ffmpeg)
            .spawn_reader(&format!("mjpeg:{}", self.feed.id))?;
        Ok(Box::new(FfmpegFrameReader {
            _process: process,
            stdout,
            splitter: JpegSplitter::new(),
            read_buf: vec![0u8; 64 * 1024],
        }))
    }

    fn describe(&self) -> String {
        format!("ffmpeg({})", self.feed.source)
    }
}

struct FfmpegFrameReader {
    // kill_on_drop: dropping the reader ends the capture.
    _process: ManagedProcess,
    stdout: ChildStdout,
    splitter: JpegSplitter,
    read_buf: Vec<u8>,
}

#[async_trait]
impl FrameReader for FfmpegFrameReader {
    async fn next_frame(&mut self) -> Result<Option<Bytes>> {
        loop {
            if let Some(frame) = self.splitter.next_frame() {
                return Ok(Some(frame));
            }
            let n = self.stdout.read(&mut self.read_buf).await?;
            if n == 0 {
                return Ok(None);
            }
            self.splitter.push(&self.read_buf[..n]);
        }
    }
}

/// Shares one [`FrameSource`] among any number of subscribers.
pub struct FrameMultiplexer {
    id: String,
    source: Arc<dyn FrameSource>,
    sender: Mutex<Option<broadcast::Sender<Bytes>>>,
}

impl FrameMultiplexer {
    pub fn new(id: impl Into<String>, source: Arc<dyn FrameSource>) -> Self {
        Self {
            id: id.into(),
            source,
            sender: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether a capture loop is currently active.
    pub fn is_capturing(&self) -> bool {
        self.sender.lock().is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender
            .lock()
            .as_ref()
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    /// Join the feed, starting the capture loop if nobody else is watching.
    pub fn subscribe(self: &Arc<Self>) -> broadcast::Receiver<Bytes> {
        let mut guard = self.sender.lock();
        if let Some(tx) = guard.as_ref() {
            return tx.subscribe();
        }

        let (tx, rx) = broadcast::channel(CHANNEL_CAPACITY);
        *guard = Some(tx.clone());
        drop(guard);

        tracing::info!(feed = %self.id, source = %self.source.describe(), "Starting capture");
        tokio::spawn(Arc::clone(self).capture(tx));
        rx
    }

    /// Subscribe and render the feed as multipart body chunks. The stream
    /// ends when the capture stops.
    pub fn multipart_stream(
        self: &Arc<Self>,
    ) -> impl Stream<Item = std::result::Result<Bytes, Infallible>> + Send + 'static {
        let id = self.id.clone();
        BroadcastStream::new(self.subscribe()).filter_map(move |frame| match frame {
            Ok(jpeg) => Some(Ok(multipart_part(&jpeg))),
            Err(lagged) => {
                tracing::debug!(feed = %id, "Client lagging: {lagged}");
                None
            }
        })
    }

    async fn capture(self: Arc<Self>, tx: broadcast::Sender<Bytes>) {
        let mut reader = match self.source.open().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(feed = %self.id, "Failed to open frame source: {e}");
                self.release(&tx, true);
                return;
            }
        };

        let mut frames: u64 = 0;
        loop {
            match reader.next_frame().await {
                Ok(Some(frame)) => {
                    frames += 1;
                    if tx.send(frame).is_err() && self.release(&tx, false) {
                        tracing::info!(
                            feed = %self.id,
                            frames,
                            "Last subscriber left; stopping capture"
                        );
                        break;
                    }
                }
                Ok(None) => {
                    tracing::info!(feed = %self.id, frames, "Frame source ended");
                    self.release(&tx, true);
                    break;
                }
                Err(e) => {
                    tracing::warn!(feed = %self.id, frames, "Frame source failed: {e}");
                    self.release(&tx, true);
                    break;
                }
            }
        }
    }

    /// Detach `tx` so the next subscriber starts a fresh capture. Unless
    /// `force`, only when nobody is subscribed. Returns whether it detached.
    fn release(&self, tx: &broadcast::Sender<Bytes>, force: bool) -> bool {
        let mut guard = self.sender.lock();
        let ours = guard.as_ref().is_some_and(|cur| cur.same_channel(tx));
        if ours && (force || tx.receiver_count() == 0) {
            *guard = None;
            return true;
        }
        false
    }
}

/// Every configured feed, by id.
#[derive(Default)]
pub struct FeedHub {
    feeds: BTreeMap<String, Arc<FrameMultiplexer>>,
}

impl FeedHub {
    pub fn from_config(feeds: &[FeedConfig], tools: &ToolRegistry) -> Self {
        let ffmpeg = tools.ffmpeg().map(|p| p.to_path_buf());
        let mut hub = Self::default();
        for feed in feeds {
            let source = FfmpegFrameSource::new(ffmpeg.clone(), feed.clone());
            hub.insert(FrameMultiplexer::new(feed.id.clone(), Arc::new(source)));
        }
        hub
    }

    pub fn insert(&mut self, mux: FrameMultiplexer) {
        self.feeds.insert(mux.id.clone(), Arc::new(mux));
    }

    pub fn get(&self, id: &str) -> Option<Arc<FrameMultiplexer>> {
        self.feeds.get(id).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        self.feeds.keys().cloned().collect()
    }
}
