//! Lazy chunked file reading.
//!
//! [`ChunkedFileReader`] serves a bounded window of a file; [`looping_stream`]
//! serves a whole file over and over for the loop-forever endpoint. Both yield
//! `io::Result<Bytes>` so they plug straight into `axum::body::Body::from_stream`.
//! The file handle lives inside the stream, so dropping the stream (client
//! disconnect) closes the file.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures_core::Stream;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_stream::StreamExt;
use tokio_util::io::ReaderStream;

use vr_core::config::DEFAULT_CHUNK_SIZE;

/// A file opened and positioned at `start`, ready to stream `length` bytes.
#[derive(Debug)]
pub struct ChunkedFileReader {
    file: File,
    path: PathBuf,
    start: u64,
    length: u64,
    chunk_size: usize,
}

impl ChunkedFileReader {
    /// Open `path` and seek to `start`.
    ///
    /// Both steps happen here, before any response header is committed, so
    /// a failure can still become an error status.
    pub async fn open(
        path: impl AsRef<Path>,
        start: u64,
        length: u64,
        chunk_size: usize,
    ) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path).await?;
        if start > 0 {
            file.seek(SeekFrom::Start(start)).await?;
        }

        Ok(Self {
            file,
            path,
            start,
            length,
            chunk_size: effective(chunk_size),
        })
    }

    /// Number of bytes this reader will try to deliver.
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Turn the reader into a stream of chunks of at most `chunk_size` bytes.
    ///
    /// If the file turns out shorter than expected the stream ends early
    /// without padding. A read error is yielded once and ends the stream.
    pub fn into_stream(self) -> impl Stream<Item = std::io::Result<Bytes>> + Send + 'static {
        let Self {
            file,
            path,
            start,
            length,
            chunk_size,
        } = self;

        async_stream::stream! {
            let mut chunks = ReaderStream::with_capacity(file.take(length), chunk_size);
            let mut delivered: u64 = 0;

            while let Some(chunk) = chunks.next().await {
                match chunk {
                    Ok(bytes) => {
                        delivered += bytes.len() as u64;
                        yield Ok(bytes);
                    }
                    Err(e) => {
                        tracing::error!(
                            path = %path.display(),
                            delivered,
                            "Read failed mid-stream: {e}"
                        );
                        yield Err(e);
                        return;
                    }
                }
            }

            if delivered < length {
                tracing::warn!(
                    path = %path.display(),
                    start,
                    delivered,
                    expected = length,
                    "File ended before the requested window was delivered"
                );
            }
        }
    }
}

/// Stream `path` from start to end, then reopen it and start again, forever.
///
/// The stream ends only when the consumer drops it, when a full pass yields
/// no bytes, or when the file cannot be (re)opened.
pub fn looping_stream(
    path: impl Into<PathBuf>,
    chunk_size: usize,
) -> impl Stream<Item = std::io::Result<Bytes>> + Send + 'static {
    let path = path.into();
    let chunk_size = effective(chunk_size);

    async_stream::stream! {
        let mut passes: u64 = 0;

        loop {
            let file = match File::open(&path).await {
                Ok(f) => f,
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        passes,
                        "Cannot reopen looping source: {e}"
                    );
                    if passes == 0 {
                        yield Err(e);
                    }
                    break;
                }
            };

            let mut chunks = ReaderStream::with_capacity(file, chunk_size);
            let mut pass_bytes: u64 = 0;
            while let Some(chunk) = chunks.next().await {
                match chunk {
                    Ok(bytes) => {
                        pass_bytes += bytes.len() as u64;
                        yield Ok(bytes);
                    }
                    Err(e) => {
                        tracing::error!(
                            path = %path.display(),
                            "Read failed in looping stream: {e}"
                        );
                        yield Err(e);
                        return;
                    }
                }
            }

            if pass_bytes == 0 {
                tracing::debug!(path = %path.display(), "Looping source is empty; ending stream");
                break;
            }

            passes += 1;
            tracing::trace!(path = %path.display(), passes, "Looping source restarted");
        }
    }
}

fn effective(chunk_size: usize) -> usize {
    if chunk_size == 0 {
        DEFAULT_CHUNK_SIZE
    } else {
        chunk_size
    }
}
