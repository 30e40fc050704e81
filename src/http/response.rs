//! Response handles: lazy body access, JSON decoding, and save-to-disk.

use std::io;
use std::mem;
use std::path::{Path, PathBuf};
use std::time::Instant;

use bytes::Bytes;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;
use url::Url;

use super::trace::Trace;
use super::HttpError;

/// One captured wire image.
#[derive(Debug, Clone)]
pub enum Dump {
    /// Outbound request head, optionally with body.
    Request(String),
    /// Inbound response head, optionally with body.
    Response(String),
}

/// Body state. A live stream can be drained exactly once; buffered bodies
/// (cache hits, dump-with-body captures) survive repeated reads.
#[derive(Debug)]
enum Body {
    Stream(reqwest::Response),
    Buffered(Bytes),
    Closed,
}

/// Compact, cloneable image of a completed response, as stored in the
/// client's response cache.
#[derive(Clone)]
pub(crate) struct CachedResponse {
    pub method: String,
    pub url: Url,
    pub status: StatusCode,
    pub content_length: Option<u64>,
    pub body: Bytes,
    pub trace: Trace,
    pub dumps: Vec<Dump>,
}

/// The result of one executed request.
///
/// Metadata (status, URL, trace) is available immediately; the body is
/// read on demand. [`bytes`](Self::bytes) drains and closes a live stream,
/// but responses served from the cache are re-buffered internally so
/// repeated reads return identical content.
#[derive(Debug)]
pub struct Response {
    method: String,
    url: Url,
    status: StatusCode,
    content_length: Option<u64>,
    cache_key: String,
    trace: Trace,
    dumps: Vec<Dump>,
    body: Body,
}

impl Response {
    pub(crate) fn streamed(
        method: String,
        cache_key: String,
        trace: Trace,
        dumps: Vec<Dump>,
        inner: reqwest::Response,
    ) -> Self {
        Self {
            method,
            url: inner.url().clone(),
            status: inner.status(),
            content_length: inner.content_length(),
            cache_key,
            trace,
            dumps,
            body: Body::Stream(inner),
        }
    }

    pub(crate) fn buffered(cached: CachedResponse, cache_key: String) -> Self {
        Self {
            method: cached.method,
            url: cached.url,
            status: cached.status,
            content_length: cached.content_length,
            cache_key,
            trace: cached.trace,
            dumps: cached.dumps,
            body: Body::Buffered(cached.body),
        }
    }

    /// Method the request was sent with.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Final resolved URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// HTTP status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// `Content-Length` as reported by the server, if any.
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// Response-cache key, empty when the request was not cacheable.
    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    /// Trace metadata for the request that produced this response.
    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    /// Captured wire images, in capture order.
    pub fn dumps(&self) -> &[Dump] {
        &self.dumps
    }

    /// Read the full body. Drains and closes a live stream; buffered
    /// bodies can be read again.
    ///
    /// # Errors
    ///
    /// [`HttpError::Transport`] on a mid-body transport failure,
    /// [`HttpError::BodyClosed`] once the stream has been consumed.
    pub async fn bytes(&mut self) -> Result<Bytes, HttpError> {
        match mem::replace(&mut self.body, Body::Closed) {
            Body::Stream(inner) => {
                let started = Instant::now();
                let bytes = inner.bytes().await?;
                self.trace.recv_ms = started.elapsed().as_millis();
                Ok(bytes)
            }
            Body::Buffered(bytes) => {
                self.body = Body::Buffered(bytes.clone());
                Ok(bytes)
            }
            Body::Closed => Err(HttpError::BodyClosed),
        }
    }

    /// Read the body as (lossily decoded) UTF-8 text.
    ///
    /// # Errors
    ///
    /// As [`bytes`](Self::bytes).
    pub async fn text(&mut self) -> Result<String, HttpError> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Decode the body as JSON.
    ///
    /// # Errors
    ///
    /// As [`bytes`](Self::bytes), plus [`HttpError::Json`] on malformed
    /// documents.
    pub async fn json<T: DeserializeOwned>(&mut self) -> Result<T, HttpError> {
        let bytes = self.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Stream the body to disk and return the path written.
    ///
    /// With `path = None` the file name is inferred from the last URL path
    /// segment, falling back to `index.html`. Parent directories are
    /// created; an existing target is refused, never overwritten.
    ///
    /// # Errors
    ///
    /// [`HttpError::UnexpectedStatus`] unless the status is 200,
    /// [`HttpError::FileExists`] when the target exists, plus transport
    /// and filesystem errors.
    pub async fn save(&mut self, path: Option<&Path>) -> Result<PathBuf, HttpError> {
        if self.status != StatusCode::OK {
            return Err(HttpError::UnexpectedStatus(self.status.as_u16()));
        }
        let target = match path {
            Some(p) => p.to_path_buf(),
            None => PathBuf::from(self.inferred_file_name()),
        };
        if let Some(parent) = target.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
            .await
        {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                return Err(HttpError::FileExists(target.display().to_string()));
            }
            Err(err) => return Err(err.into()),
        };
        match mem::replace(&mut self.body, Body::Closed) {
            Body::Stream(mut inner) => {
                let started = Instant::now();
                while let Some(chunk) = inner.chunk().await? {
                    file.write_all(&chunk).await?;
                }
                self.trace.recv_ms = started.elapsed().as_millis();
            }
            Body::Buffered(bytes) => {
                file.write_all(&bytes).await?;
                self.body = Body::Buffered(bytes);
            }
            Body::Closed => return Err(HttpError::BodyClosed),
        }
        file.flush().await?;
        Ok(target)
    }

    /// Release the underlying stream without reading it.
    pub fn close(&mut self) {
        self.body = Body::Closed;
    }

    fn inferred_file_name(&self) -> String {
        self.url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| "index.html".to_string())
    }
}
