//! `GET /{name}`: media by logical name.
//!
//! The deployment's `server.stream_mode` picks exactly one handler:
//!
//! - `range`: finite file with `Range` support (200 / 206 / 416)
//! - `loop`: unbounded body that restarts at end-of-file
//! - `mjpeg`: `multipart/x-mixed-replace` frames from a configured feed

use std::path::Path as FsPath;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Extension;

use vr_core::config::StreamMode;
use vr_core::Error;
use vr_media::{guess_content_type, looping_stream, resolve_range, ChunkedFileReader};

use crate::context::AppContext;
use crate::error::AppError;
use crate::middleware::request_id::RequestId;

/// GET /{name}
pub async fn serve_stream(
    State(ctx): State<AppContext>,
    Path(name): Path<String>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
) -> Response {
    let result = match ctx.config.server.stream_mode {
        StreamMode::Range => serve_range(&ctx, &name, &headers).await,
        StreamMode::Loop => serve_loop(&ctx, &name).await,
        StreamMode::Mjpeg => serve_mjpeg(&ctx, &name),
    };

    result.unwrap_or_else(|e| {
        tracing::debug!(stream = %name, "Stream request failed: {e}");
        AppError::new(e).with_request_id(request_id.0).into_response()
    })
}

async fn serve_range(ctx: &AppContext, name: &str, headers: &HeaderMap) -> Result<Response, Error> {
    let path = ctx.registry().resolve_async(name).await?;

    let metadata = tokio::fs::metadata(&path)
        .await
        .map_err(|_| Error::not_found("file", path.display()))?;
    let size = metadata.len();

    // A header that is not valid ASCII cannot be a byte range.
    let range_header = headers
        .get(header::RANGE)
        .map(|v| v.to_str().unwrap_or_default());
    let window = resolve_range(range_header, size, ctx.config.media.range_policy)?;

    let mut builder = Response::builder()
        .header(header::CONTENT_TYPE, guess_content_type(&path))
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_LENGTH, window.len());

    let body = match window.range() {
        None => {
            builder = builder.status(StatusCode::OK);
            Body::empty()
        }
        Some(range) => {
            if window.is_partial() {
                builder = builder
                    .status(StatusCode::PARTIAL_CONTENT)
                    .header(header::CONTENT_RANGE, range.content_range());
            } else {
                builder = builder.status(StatusCode::OK);
            }
            tracing::debug!(
                stream = %name,
                start = range.start(),
                end = range.end(),
                total = size,
                "Serving byte range"
            );
            let chunk_size = ctx.config.media.effective_chunk_size();
            let reader = ChunkedFileReader::open(&path, range.start(), range.len(), chunk_size)
                .await
                .map_err(|e| open_error(&path, e))?;
            Body::from_stream(reader.into_stream())
        }
    };

    builder
        .body(body)
        .map_err(|e| Error::Internal(format!("Failed to build response: {e}")))
}

async fn serve_loop(ctx: &AppContext, name: &str) -> Result<Response, Error> {
    let path = ctx.registry().resolve_async(name).await?;
    tokio::fs::metadata(&path)
        .await
        .map_err(|_| Error::not_found("file", path.display()))?;

    tracing::debug!(stream = %name, path = %path.display(), "Serving looping stream");
    let content_type = guess_content_type(&path);
    let stream = looping_stream(path, ctx.config.media.effective_chunk_size());

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, content_type)],
        Body::from_stream(stream),
    )
        .into_response())
}

fn serve_mjpeg(ctx: &AppContext, name: &str) -> Result<Response, Error> {
    let feed = ctx.feeds.get(name).ok_or_else(|| Error::StreamNotFound {
        name: name.to_string(),
        available: ctx.feeds.ids(),
    })?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, vr_av::mjpeg::content_type()),
            (header::CACHE_CONTROL, "no-cache".to_string()),
        ],
        Body::from_stream(feed.multipart_stream()),
    )
        .into_response())
}

fn open_error(path: &FsPath, e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::NotFound {
        Error::not_found("file", path.display())
    } else {
        Error::Io { source: e }
    }
}
