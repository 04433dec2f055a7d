//! Converted file retrieval.
//!
//! `GET /files/{file_name}` streams a file from the output directory in
//! 64 KiB chunks via `ReaderStream`, honoring single `Range` requests.

use std::path::Path;

use axum::body::Body;
use axum::extract::{Path as UrlPath, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Extension;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

use ac_core::Error;

use crate::context::AppContext;
use crate::error::AppError;
use crate::middleware::request_id::RequestId;

const CHUNK_SIZE: usize = 64 * 1024;

/// A parsed `Range: bytes=...` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// `bytes=START-` or `bytes=START-END`.
    From { start: u64, end: Option<u64> },
    /// `bytes=-LEN`: the last `LEN` bytes.
    Suffix(u64),
}

impl ByteRange {
    /// Resolve against a file size into an inclusive `(start, end)`.
    /// `None` means unsatisfiable.
    pub fn resolve(self, file_size: u64) -> Option<(u64, u64)> {
        if file_size == 0 {
            return None;
        }
        let last = file_size - 1;
        match self {
            ByteRange::From { start, end } => {
                let end = end.unwrap_or(last).min(last);
                (start <= end).then_some((start, end))
            }
            ByteRange::Suffix(0) => None,
            ByteRange::Suffix(len) => Some((file_size.saturating_sub(len), last)),
        }
    }
}

/// Parse a single-range `Range` header value. Multi-range requests are not
/// supported and parse as `None`, which serves the whole file.
pub fn parse_range_header(value: &str) -> Option<ByteRange> {
    let ranges = value.trim().strip_prefix("bytes=")?;
    if ranges.contains(',') {
        return None;
    }
    let (start, end) = ranges.split_once('-')?;
    let (start, end) = (start.trim(), end.trim());

    if start.is_empty() {
        return Some(ByteRange::Suffix(end.parse().ok()?));
    }
    let start = start.parse().ok()?;
    let end = if end.is_empty() {
        None
    } else {
        Some(end.parse().ok()?)
    };
    Some(ByteRange::From { start, end })
}

/// MIME type for an audio output, from its extension.
pub fn guess_content_type(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "ogg" | "oga" => "audio/ogg",
        "opus" => "audio/opus",
        "mp3" => "audio/mpeg",
        "m4a" | "mp4" => "audio/mp4",
        "aac" => "audio/aac",
        "wav" => "audio/wav",
        "flac" => "audio/flac",
        "webm" => "audio/webm",
        _ => "application/octet-stream",
    }
}

/// A name that addresses a visible file directly inside the output
/// directory. Hidden files are in-progress partials.
fn is_servable_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0'])
        && name != ".."
}

/// GET /files/{file_name}
pub async fn get_file(
    State(ctx): State<AppContext>,
    Extension(request_id): Extension<RequestId>,
    UrlPath(file_name): UrlPath<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    if !is_servable_name(&file_name) {
        return Err(request_id.tag(Error::not_found("file", &file_name)));
    }

    let path = ctx.config.server.output_dir.join(&file_name);
    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_range_header);

    serve_file_streaming(&path, &file_name, range)
        .await
        .map_err(|e| request_id.tag(e))
}

/// Stream `file_path`, or the requested byte range of it.
pub async fn serve_file_streaming(
    file_path: &Path,
    file_name: &str,
    range: Option<ByteRange>,
) -> Result<Response, Error> {
    let metadata = tokio::fs::metadata(file_path)
        .await
        .map_err(|_| Error::not_found("file", file_name))?;
    if !metadata.is_file() {
        return Err(Error::not_found("file", file_name));
    }

    let file_size = metadata.len();
    let content_type = guess_content_type(file_name);

    let mut file = tokio::fs::File::open(file_path)
        .await
        .map_err(|_| Error::not_found("file", file_name))?;

    let Some(range) = range else {
        let body = Body::from_stream(ReaderStream::with_capacity(file, CHUNK_SIZE));
        return Ok((
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, content_type.to_string()),
                (header::CONTENT_LENGTH, file_size.to_string()),
                (header::ACCEPT_RANGES, "bytes".to_string()),
            ],
            body,
        )
            .into_response());
    };

    let Some((start, end)) = range.resolve(file_size) else {
        return Ok((
            StatusCode::RANGE_NOT_SATISFIABLE,
            [(header::CONTENT_RANGE, format!("bytes */{file_size}"))],
            Body::empty(),
        )
            .into_response());
    };

    let length = end - start + 1;
    file.seek(std::io::SeekFrom::Start(start)).await?;
    let body = Body::from_stream(ReaderStream::with_capacity(file.take(length), CHUNK_SIZE));

    Ok((
        StatusCode::PARTIAL_CONTENT,
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_RANGE, format!("bytes {start}-{end}/{file_size}")),
            (header::CONTENT_LENGTH, length.to_string()),
            (header::ACCEPT_RANGES, "bytes".to_string()),
        ],
        body,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_range_full() {
        assert_eq!(
            parse_range_header("bytes=0-999"),
            Some(ByteRange::From { start: 0, end: Some(999) })
        );
    }

    #[test]
    fn parse_range_open_end() {
        assert_eq!(
            parse_range_header("bytes=500-"),
            Some(ByteRange::From { start: 500, end: None })
        );
    }

    #[test]
    fn parse_range_suffix() {
        assert_eq!(parse_range_header("bytes=-200"), Some(ByteRange::Suffix(200)));
    }

    #[test]
    fn parse_range_invalid() {
        assert!(parse_range_header("invalid").is_none());
        assert!(parse_range_header("bytes=abc-def").is_none());
        assert!(parse_range_header("bytes=0-1,4-5").is_none());
        assert!(parse_range_header("items=0-1").is_none());
    }

    #[test]
    fn resolve_ranges() {
        assert_eq!(ByteRange::From { start: 10, end: Some(20) }.resolve(100), Some((10, 20)));
        assert_eq!(ByteRange::From { start: 10, end: Some(500) }.resolve(100), Some((10, 99)));
        assert_eq!(ByteRange::From { start: 100, end: None }.resolve(100), None);
        assert_eq!(ByteRange::Suffix(30).resolve(100), Some((70, 99)));
        assert_eq!(ByteRange::Suffix(300).resolve(100), Some((0, 99)));
        assert_eq!(ByteRange::Suffix(0).resolve(100), None);
        assert_eq!(ByteRange::From { start: 0, end: None }.resolve(0), None);
    }

    #[test]
    fn content_types() {
        assert_eq!(guess_content_type("abc.ogg"), "audio/ogg");
        assert_eq!(guess_content_type("abc.MP3"), "audio/mpeg");
        assert_eq!(guess_content_type("abc.flac"), "audio/flac");
        assert_eq!(guess_content_type("abc"), "application/octet-stream");
    }

    #[test]
    fn servable_names() {
        assert!(is_servable_name("0b7c.ogg"));
        assert!(!is_servable_name(""));
        assert!(!is_servable_name(".."));
        assert!(!is_servable_name("../secret"));
        assert!(!is_servable_name("a/b.ogg"));
        assert!(!is_servable_name("a\\b.ogg"));
        assert!(!is_servable_name(".0b7c.ogg.partial"));
    }

    #[tokio::test]
    async fn serve_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.ogg");
        std::fs::write(&path, b"0123456789").unwrap();

        let response = serve_file_streaming(&path, "a.ogg", None).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "audio/ogg");
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "10");
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"0123456789");
    }

    #[tokio::test]
    async fn serve_partial_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.ogg");
        std::fs::write(&path, b"0123456789").unwrap();

        let range = ByteRange::From { start: 2, end: Some(5) };
        let response = serve_file_streaming(&path, "a.ogg", Some(range)).await.unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 2-5/10");
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"2345");
    }

    #[tokio::test]
    async fn unsatisfiable_range_is_416() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.ogg");
        std::fs::write(&path, b"0123").unwrap();

        let range = ByteRange::From { start: 10, end: None };
        let response = serve_file_streaming(&path, "a.ogg", Some(range)).await.unwrap();
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes */4");
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = serve_file_streaming(&dir.path().join("nope.ogg"), "nope.ogg", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn directory_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let err = serve_file_streaming(&dir.path().join("sub"), "sub", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }
}
