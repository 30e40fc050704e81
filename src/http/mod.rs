//! HTTP client with retries, response caching, wire-image dumps, and
//! request signing.
//!
//! [`HttpClient`] wraps a [`reqwest::Client`] with the cross-cutting
//! behaviour every outbound call here needs: a signed
//! `X-HTTP-GoKit-RequestId` header, a transport retry budget, an explicit
//! per-client response cache (a TTL [`Cache`], never a process-wide
//! singleton), and optional request/response dumps for debugging.
//!
//! Requests are assembled through a typed [`RequestBuilder`], one method
//! per override kind:
//!
//! ```rust,no_run
//! use xkit::http::{ClientConfig, HttpClient};
//!
//! # async fn run() -> Result<(), xkit::HttpError> {
//! let mut config = ClientConfig::default();
//! config.retry.times = 2;
//! config.cache_ttl.insert("GET".into(), 60);
//! let client = HttpClient::with_config(config, "client-secret")?;
//!
//! let mut resp = client
//!     .get("http://localhost:8080/items?a=1")
//!     .query_param("b", "2")
//!     .header("Accept", "application/json")
//!     .send()
//!     .await?;
//! let body = resp.text().await?;
//! # let _ = body;
//! # Ok(())
//! # }
//! ```
//!
//! Non-2xx responses are returned as normal responses and never retried;
//! only transport failures consume the retry budget.

mod config;
mod response;
mod trace;

pub use config::{ClientConfig, DumpPolicy, RetryPolicy, TimeoutConfig};
pub use response::{Dump, Response};
pub use trace::{sign, verify_request_id, Trace, MAX_CLOCK_SKEW_SECS, REQUEST_ID_HEADER};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, COOKIE, HOST};
use reqwest::Method;
use serde::Serialize;
use thiserror::Error;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::cache::Cache;
use crate::util::hash::sha1_hex;
use response::CachedResponse;

/// The closed set of methods the client accepts.
pub const SUPPORTED_METHODS: [&str; 7] =
    ["GET", "HEAD", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"];

/// Client-visible failure taxonomy.
#[derive(Debug, Error)]
pub enum HttpError {
    /// Method outside the supported set; raised before any I/O.
    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),
    /// Empty or unparseable target URL; raised before any I/O.
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    /// A header name or value could not be encoded.
    #[error("invalid header: {0}")]
    Header(String),
    /// JSON encoding of a request body, or decoding of a response body.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    /// Configuration rejected by [`ClientConfig::validate`].
    #[error("invalid config: {0}")]
    Config(String),
    /// Transport failure after the retry budget was exhausted.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// The request's [`CancelHandle`] fired.
    #[error("request cancelled")]
    Cancelled,
    /// [`Response::save`] refused to overwrite an existing file.
    #[error("target file exists: {0}")]
    FileExists(String),
    /// [`Response::save`] requires HTTP 200.
    #[error("unexpected status: {0}")]
    UnexpectedStatus(u16),
    /// Filesystem failure while reading form files or saving a body.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// The body stream was already consumed or closed.
    #[error("response body already consumed")]
    BodyClosed,
}

/// Cloneable cancellation handle for in-flight requests.
///
/// Cancelling while a retry delay is pending aborts before the next
/// attempt; cancelling mid-transport abandons the attempt. Either way the
/// caller sees [`HttpError::Cancelled`].
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    /// Create an un-fired handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the handle. Idempotent; affects every request it was attached
    /// to and every clone.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether the handle has fired.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

/// An HTTP client carrying defaults, a retry budget, a response cache,
/// and a signing identity. Cheap to share behind an `Arc`.
pub struct HttpClient {
    transport: reqwest::Client,
    config: ClientConfig,
    cache: Arc<Cache<CachedResponse>>,
    client_id: String,
    client_key: String,
}

impl HttpClient {
    /// Build a client with the default configuration. The `client_key` is
    /// the shared secret used to sign every request.
    ///
    /// # Errors
    ///
    /// [`HttpError::Transport`] when the TLS backend fails to initialise.
    pub fn new(client_key: &str) -> Result<Self, HttpError> {
        Self::with_config(ClientConfig::default(), client_key)
    }

    /// Build a client from an explicit configuration.
    ///
    /// # Errors
    ///
    /// [`HttpError::Config`] when validation fails, plus the errors of
    /// [`new`](Self::new).
    pub fn with_config(config: ClientConfig, client_key: &str) -> Result<Self, HttpError> {
        config.validate()?;
        let transport = build_transport(&config)?;
        let client_id = sha1_hex(&[b"xhttp", client_key.as_bytes()]);
        Ok(Self {
            transport,
            config,
            cache: Arc::new(Cache::new()),
            client_id,
            client_key: client_key.to_string(),
        })
    }

    /// Current configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Stable identifier of this client's signing identity.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Replace the retry budget: `times` additional attempts (-1 retries
    /// forever) with `sleep_ms` between attempts.
    pub fn set_retries(&mut self, times: i32, sleep_ms: u64) {
        self.config.retry = RetryPolicy { times, sleep_ms };
    }

    /// Enable response caching for `method` with the given TTL.
    ///
    /// # Errors
    ///
    /// [`HttpError::Config`] for unsupported methods or non-positive TTLs.
    pub fn set_cache_ttl(&mut self, method: &str, ttl_secs: i64) -> Result<(), HttpError> {
        let method = validate_method(method)?;
        if ttl_secs <= 0 {
            return Err(HttpError::Config(format!(
                "cache ttl must be positive, got {ttl_secs}"
            )));
        }
        self.config.cache_ttl.insert(method.to_string(), ttl_secs);
        Ok(())
    }

    /// Set the wire-image capture policy.
    pub fn set_dump(&mut self, dump: DumpPolicy) {
        self.config.dump = dump;
    }

    /// Start a request with an arbitrary method name.
    ///
    /// # Errors
    ///
    /// [`HttpError::UnsupportedMethod`] outside the closed method set.
    pub fn request(&self, method: &str, url: &str) -> Result<RequestBuilder<'_>, HttpError> {
        let method = validate_method(method)?;
        Ok(RequestBuilder::new(self, method, url))
    }

    /// Start a GET request.
    pub fn get(&self, url: &str) -> RequestBuilder<'_> {
        RequestBuilder::new(self, Method::GET, url)
    }

    /// Start a HEAD request.
    pub fn head(&self, url: &str) -> RequestBuilder<'_> {
        RequestBuilder::new(self, Method::HEAD, url)
    }

    /// Start a POST request.
    pub fn post(&self, url: &str) -> RequestBuilder<'_> {
        RequestBuilder::new(self, Method::POST, url)
    }

    /// Start a PUT request.
    pub fn put(&self, url: &str) -> RequestBuilder<'_> {
        RequestBuilder::new(self, Method::PUT, url)
    }

    /// Start a PATCH request.
    pub fn patch(&self, url: &str) -> RequestBuilder<'_> {
        RequestBuilder::new(self, Method::PATCH, url)
    }

    /// Start a DELETE request.
    pub fn delete(&self, url: &str) -> RequestBuilder<'_> {
        RequestBuilder::new(self, Method::DELETE, url)
    }

    /// Start an OPTIONS request.
    pub fn options(&self, url: &str) -> RequestBuilder<'_> {
        RequestBuilder::new(self, Method::OPTIONS, url)
    }

    /// Discard all cached responses.
    pub fn flush_cache(&self) {
        self.cache.flush();
    }

    /// Stop the response cache's sweeper. Synchronous; the client remains
    /// usable but no longer caches.
    pub fn close(&self) {
        self.cache.close();
    }

    fn cache_ttl_for(&self, method: &Method) -> Option<i64> {
        self.config
            .cache_ttl
            .iter()
            .find(|(m, _)| m.eq_ignore_ascii_case(method.as_str()))
            .map(|(_, ttl)| *ttl)
    }
}

fn validate_method(method: &str) -> Result<Method, HttpError> {
    let normalized = method.trim().to_ascii_uppercase();
    if !SUPPORTED_METHODS.contains(&normalized.as_str()) {
        return Err(HttpError::UnsupportedMethod(method.to_string()));
    }
    Method::from_bytes(normalized.as_bytes())
        .map_err(|_| HttpError::UnsupportedMethod(method.to_string()))
}

fn build_transport(config: &ClientConfig) -> Result<reqwest::Client, HttpError> {
    let mut builder = reqwest::Client::builder().user_agent(config.user_agent.clone());
    let timeouts = &config.timeouts;
    if timeouts.connect_secs > 0 {
        builder = builder.connect_timeout(Duration::from_secs(timeouts.connect_secs));
    }
    if timeouts.overall_secs > 0 {
        builder = builder.timeout(Duration::from_secs(timeouts.overall_secs));
    }
    if timeouts.response_header_secs > 0 {
        builder = builder.read_timeout(Duration::from_secs(timeouts.response_header_secs));
    }
    if timeouts.keep_alive_secs > 0 {
        builder = builder.pool_idle_timeout(Duration::from_secs(timeouts.keep_alive_secs));
    }
    if config.use_cookies {
        builder = builder.cookie_store(true);
    }
    Ok(builder.build()?)
}

struct HeaderEntry {
    name: String,
    value: String,
    append: bool,
}

enum PreparedBody {
    None,
    Raw(Bytes),
    Multipart,
}

/// One request under construction. Each override kind has its own typed
/// method, so conflicting or unknown overrides cannot be expressed.
pub struct RequestBuilder<'a> {
    client: &'a HttpClient,
    method: Method,
    url_text: String,
    host: Option<String>,
    headers: Vec<HeaderEntry>,
    cookies: Vec<(String, String)>,
    query_params: Vec<(String, String)>,
    form_params: Vec<(String, String)>,
    json_body: Option<Bytes>,
    raw_body: Option<Bytes>,
    form_files: Vec<(String, PathBuf)>,
    transport: Option<reqwest::Client>,
    cancel: Option<CancelHandle>,
    deferred_err: Option<HttpError>,
}

impl<'a> RequestBuilder<'a> {
    fn new(client: &'a HttpClient, method: Method, url: &str) -> Self {
        Self {
            client,
            method,
            url_text: url.to_string(),
            host: None,
            headers: Vec::new(),
            cookies: Vec::new(),
            query_params: Vec::new(),
            form_params: Vec::new(),
            json_body: None,
            raw_body: None,
            form_files: Vec::new(),
            transport: None,
            cancel: None,
            deferred_err: None,
        }
    }

    /// Set the `Host` header.
    pub fn host(mut self, host: &str) -> Self {
        self.host = Some(host.to_string());
        self
    }

    /// Set a header, replacing any previous value of the same name.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push(HeaderEntry {
            name: name.to_string(),
            value: value.to_string(),
            append: false,
        });
        self
    }

    /// Merge headers, preserving multi-valued names.
    pub fn headers<I, K, V>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (name, value) in entries {
            self.headers.push(HeaderEntry {
                name: name.as_ref().to_string(),
                value: value.as_ref().to_string(),
                append: true,
            });
        }
        self
    }

    /// Append a cookie to the `Cookie` header.
    pub fn cookie(mut self, name: &str, value: &str) -> Self {
        self.cookies.push((name.to_string(), value.to_string()));
        self
    }

    /// Add a query-string parameter.
    pub fn query_param(mut self, name: &str, value: &str) -> Self {
        self.query_params
            .push((name.to_string(), value.to_string()));
        self
    }

    /// Add several query-string parameters.
    pub fn query_params<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (name, value) in params {
            self = self.query_param(name.as_ref(), value.as_ref());
        }
        self
    }

    /// Add a form-body parameter. For methods without a body it lands in
    /// the query string instead.
    pub fn form_param(mut self, name: &str, value: &str) -> Self {
        self.form_params.push((name.to_string(), value.to_string()));
        self
    }

    /// Add several form-body parameters.
    pub fn form_params<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (name, value) in params {
            self = self.form_param(name.as_ref(), value.as_ref());
        }
        self
    }

    /// Add a parameter routed by method: into the form body for
    /// POST/PUT/PATCH, into the query string otherwise.
    pub fn param(self, name: &str, value: &str) -> Self {
        if self.body_carries_form() {
            self.form_param(name, value)
        } else {
            self.query_param(name, value)
        }
    }

    /// Add several method-routed parameters.
    pub fn params<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (name, value) in params {
            self = self.param(name.as_ref(), value.as_ref());
        }
        self
    }

    /// Serialise `value` as the JSON request body and set
    /// `Content-Type: application/json`.
    pub fn json<T: Serialize>(mut self, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(encoded) => self.json_body = Some(Bytes::from(encoded)),
            Err(err) => self.deferred_err = Some(HttpError::Json(err)),
        }
        self
    }

    /// Use `body` as the raw request body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.raw_body = Some(body.into());
        self
    }

    /// Attach a file as a multipart field. Any form file switches the
    /// request to streamed multipart/form-data encoding (files first, form
    /// fields after), and disables response caching for this request.
    pub fn form_file(mut self, field: &str, path: impl Into<PathBuf>) -> Self {
        self.form_files.push((field.to_string(), path.into()));
        self
    }

    /// Replace the transport for this request only.
    pub fn transport(mut self, transport: reqwest::Client) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Attach a cancellation handle.
    pub fn cancel(mut self, handle: &CancelHandle) -> Self {
        self.cancel = Some(handle.clone());
        self
    }

    fn body_carries_form(&self) -> bool {
        matches!(self.method, Method::POST | Method::PUT | Method::PATCH)
    }

    fn content_type_overridden(&self) -> bool {
        self.headers
            .iter()
            .any(|entry| entry.name.eq_ignore_ascii_case("content-type"))
    }

    /// Execute the request: resolve the URL and body, sign, consult the
    /// response cache, then send with retries.
    ///
    /// # Errors
    ///
    /// See [`HttpError`]; transport failures are retried per the client's
    /// [`RetryPolicy`] before being surfaced.
    pub async fn send(mut self) -> Result<Response, HttpError> {
        if let Some(err) = self.deferred_err.take() {
            return Err(err);
        }
        let url = self.resolve_url()?;
        let (prepared, body_bytes, content_type) = self.prepare_body();
        let mut header_map = self.build_headers(content_type)?;

        let mut trace = Trace::new(
            &self.client.client_id,
            self.method.as_str(),
            &url,
            &self.client.client_key,
        );
        header_map.insert(
            HeaderName::from_static("x-http-gokit-requestid"),
            HeaderValue::from_str(&trace.header_value())
                .map_err(|_| HttpError::Header(REQUEST_ID_HEADER.to_string()))?,
        );

        let multipart = matches!(prepared, PreparedBody::Multipart);
        let cache_ttl = if multipart {
            None
        } else {
            self.client.cache_ttl_for(&self.method)
        };
        let dump = self.client.config.dump;

        let cache_key = match cache_ttl {
            Some(_) => sha1_hex(&[
                self.method.as_str().as_bytes(),
                url.as_str().as_bytes(),
                &body_bytes,
            ]),
            None => String::new(),
        };
        if cache_ttl.is_some() {
            if let Some(hit) = self.client.cache.get(&cache_key) {
                debug!(key = %cache_key, "response cache hit");
                return Ok(Response::buffered(hit, cache_key));
            }
        }

        let mut dumps = Vec::new();
        if cache_ttl.is_some() || dump.enabled() {
            let include_body = cache_ttl.is_some() || dump.with_body();
            dumps.push(Dump::Request(render_request_image(
                &self.method,
                &url,
                &header_map,
                &body_bytes,
                include_body,
            )));
        }

        let inner = self
            .execute_with_retries(&url, &header_map, &prepared, &mut trace)
            .await?;

        let buffer_body = cache_ttl.is_some() || (dump.enabled() && dump.with_body());
        if !buffer_body {
            if dump.enabled() {
                dumps.push(Dump::Response(render_response_image(&inner, None)));
            }
            return Ok(Response::streamed(
                self.method.as_str().to_string(),
                cache_key,
                trace,
                dumps,
                inner,
            ));
        }

        let status = inner.status();
        let resolved_url = inner.url().clone();
        let content_length = inner.content_length();
        let head = render_response_image(&inner, None);
        let started = Instant::now();
        let body = inner.bytes().await?;
        trace.recv_ms = started.elapsed().as_millis();
        if dump.enabled() {
            let image = if dump.with_body() {
                format!("{head}{}", String::from_utf8_lossy(&body))
            } else {
                head
            };
            dumps.push(Dump::Response(image));
        }
        let cached = CachedResponse {
            method: self.method.as_str().to_string(),
            url: resolved_url,
            status,
            content_length,
            body,
            trace,
            dumps,
        };
        if let Some(ttl) = cache_ttl {
            self.client.cache.set(&cache_key, cached.clone(), ttl);
        }
        Ok(Response::buffered(cached, cache_key))
    }

    fn resolve_url(&self) -> Result<Url, HttpError> {
        if self.url_text.trim().is_empty() {
            return Err(HttpError::InvalidUrl("empty url".into()));
        }
        let mut url = Url::parse(self.url_text.trim())
            .map_err(|err| HttpError::InvalidUrl(format!("{}: {err}", self.url_text)))?;
        {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in &self.query_params {
                pairs.append_pair(name, value);
            }
            // Without a body to carry them, form params join the query.
            if !self.body_carries_form() {
                for (name, value) in &self.form_params {
                    pairs.append_pair(name, value);
                }
            }
        }
        Ok(url)
    }

    /// Decide the body encoding. Returns the prepared body, the bytes it
    /// contributes to the cache key and dumps (empty for multipart), and
    /// the content type to apply unless overridden.
    fn prepare_body(&self) -> (PreparedBody, Bytes, Option<&'static str>) {
        if self.body_carries_form() && !self.form_files.is_empty() {
            return (PreparedBody::Multipart, Bytes::new(), None);
        }
        if let Some(json) = &self.json_body {
            return (
                PreparedBody::Raw(json.clone()),
                json.clone(),
                Some("application/json"),
            );
        }
        if let Some(raw) = &self.raw_body {
            return (
                PreparedBody::Raw(raw.clone()),
                raw.clone(),
                Some("application/x-www-form-urlencoded"),
            );
        }
        if self.body_carries_form() && !self.form_params.is_empty() {
            let mut encoder = url::form_urlencoded::Serializer::new(String::new());
            for (name, value) in &self.form_params {
                encoder.append_pair(name, value);
            }
            let encoded = Bytes::from(encoder.finish());
            return (
                PreparedBody::Raw(encoded.clone()),
                encoded,
                Some("application/x-www-form-urlencoded"),
            );
        }
        (PreparedBody::None, Bytes::new(), None)
    }

    fn build_headers(&self, content_type: Option<&'static str>) -> Result<HeaderMap, HttpError> {
        let mut map = HeaderMap::new();
        if let Some(host) = &self.host {
            map.insert(
                HOST,
                HeaderValue::from_str(host).map_err(|_| HttpError::Header("Host".into()))?,
            );
        }
        for entry in &self.headers {
            let name = HeaderName::from_bytes(entry.name.as_bytes())
                .map_err(|_| HttpError::Header(entry.name.clone()))?;
            let value = HeaderValue::from_str(&entry.value)
                .map_err(|_| HttpError::Header(entry.name.clone()))?;
            if entry.append {
                map.append(name, value);
            } else {
                map.insert(name, value);
            }
        }
        if !self.cookies.is_empty() {
            let joined = self
                .cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; ");
            map.insert(
                COOKIE,
                HeaderValue::from_str(&joined).map_err(|_| HttpError::Header("Cookie".into()))?,
            );
        }
        if let Some(content_type) = content_type {
            if !self.content_type_overridden() {
                map.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
            }
        }
        Ok(map)
    }

    async fn execute_with_retries(
        &self,
        url: &Url,
        headers: &HeaderMap,
        prepared: &PreparedBody,
        trace: &mut Trace,
    ) -> Result<reqwest::Response, HttpError> {
        let transport = self.transport.as_ref().unwrap_or(&self.client.transport);
        let retry = &self.client.config.retry;
        let started = Instant::now();
        let mut attempts: u32 = 0;
        loop {
            if let Some(cancel) = &self.cancel {
                if cancel.is_cancelled() {
                    trace.attempts = attempts;
                    return Err(HttpError::Cancelled);
                }
            }
            attempts += 1;
            let mut request = transport
                .request(self.method.clone(), url.clone())
                .headers(headers.clone());
            request = match prepared {
                PreparedBody::None => request,
                PreparedBody::Raw(bytes) => request.body(bytes.clone()),
                PreparedBody::Multipart => request.multipart(self.multipart_form().await?),
            };
            let result = match &self.cancel {
                Some(cancel) => {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            trace.attempts = attempts;
                            return Err(HttpError::Cancelled);
                        }
                        result = request.send() => result,
                    }
                }
                None => request.send().await,
            };
            match result {
                Ok(response) => {
                    trace.attempts = attempts;
                    trace.send_ms = started.elapsed().as_millis();
                    return Ok(response);
                }
                Err(err) => {
                    if retry.exhausted(attempts) {
                        trace.attempts = attempts;
                        return Err(HttpError::Transport(err));
                    }
                    debug!(attempt = attempts, error = %err, "attempt failed; retrying");
                    match &self.cancel {
                        Some(cancel) => {
                            tokio::select! {
                                _ = cancel.cancelled() => {
                                    trace.attempts = attempts;
                                    return Err(HttpError::Cancelled);
                                }
                                _ = tokio::time::sleep(retry.sleep()) => {}
                            }
                        }
                        None => tokio::time::sleep(retry.sleep()).await,
                    }
                }
            }
        }
    }

    /// Build the multipart form, streaming each file lazily. Files come
    /// first, form fields after.
    async fn multipart_form(&self) -> Result<reqwest::multipart::Form, HttpError> {
        let mut form = reqwest::multipart::Form::new();
        for (field, path) in &self.form_files {
            let file = tokio::fs::File::open(path).await?;
            let file_name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "file".to_string());
            let part = reqwest::multipart::Part::stream(reqwest::Body::wrap_stream(
                ReaderStream::new(file),
            ))
            .file_name(file_name);
            form = form.part(field.clone(), part);
        }
        for (name, value) in &self.form_params {
            form = form.text(name.clone(), value.clone());
        }
        Ok(form)
    }
}

fn render_request_image(
    method: &Method,
    url: &Url,
    headers: &HeaderMap,
    body: &[u8],
    include_body: bool,
) -> String {
    let mut image = format!("{method} {url} HTTP/1.1\r\n");
    for (name, value) in headers {
        image.push_str(name.as_str());
        image.push_str(": ");
        image.push_str(value.to_str().unwrap_or("<binary>"));
        image.push_str("\r\n");
    }
    image.push_str("\r\n");
    if include_body && !body.is_empty() {
        image.push_str(&String::from_utf8_lossy(body));
    }
    image
}

fn render_response_image(response: &reqwest::Response, body: Option<&[u8]>) -> String {
    let mut image = format!("HTTP/1.1 {}\r\n", response.status());
    for (name, value) in response.headers() {
        image.push_str(name.as_str());
        image.push_str(": ");
        image.push_str(value.to_str().unwrap_or("<binary>"));
        image.push_str("\r\n");
    }
    image.push_str("\r\n");
    if let Some(body) = body {
        image.push_str(&String::from_utf8_lossy(body));
    }
    image
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_validation() {
        assert_eq!(validate_method("get").unwrap(), Method::GET);
        assert_eq!(validate_method(" Post ").unwrap(), Method::POST);
        assert!(matches!(
            validate_method("TRACE"),
            Err(HttpError::UnsupportedMethod(_))
        ));
        assert!(matches!(
            validate_method("CONNECT"),
            Err(HttpError::UnsupportedMethod(_))
        ));
    }

    #[test]
    fn test_url_query_joining() {
        let client = HttpClient::new("key").unwrap();
        let builder = client.get("http://example.com/path?a=1").query_param("b", "2");
        let url = builder.resolve_url().unwrap();
        assert_eq!(url.query(), Some("a=1&b=2"));

        let builder = client.get("http://example.com/path").query_param("a", "1");
        assert_eq!(builder.resolve_url().unwrap().query(), Some("a=1"));
        client.close();
    }

    #[test]
    fn test_param_routing_by_method() {
        let client = HttpClient::new("key").unwrap();
        let get = client.get("http://example.com/").param("a", "1");
        assert_eq!(get.query_params.len(), 1);
        assert!(get.form_params.is_empty());

        let post = client.post("http://example.com/").param("a", "1");
        assert_eq!(post.form_params.len(), 1);
        assert!(post.query_params.is_empty());
        client.close();
    }

    #[test]
    fn test_form_params_join_query_without_body() {
        let client = HttpClient::new("key").unwrap();
        let builder = client.get("http://example.com/").form_param("x", "9");
        assert_eq!(builder.resolve_url().unwrap().query(), Some("x=9"));
        client.close();
    }

    #[test]
    fn test_prepare_body_precedence() {
        let client = HttpClient::new("key").unwrap();

        let multipart = client
            .post("http://example.com/")
            .form_file("f", "/tmp/x")
            .form_param("a", "1");
        assert!(matches!(multipart.prepare_body().0, PreparedBody::Multipart));

        let form = client.post("http://example.com/").form_param("a", "1");
        let (_, bytes, content_type) = form.prepare_body();
        assert_eq!(&bytes[..], b"a=1");
        assert_eq!(content_type, Some("application/x-www-form-urlencoded"));

        let json = client.post("http://example.com/").json(&serde_json::json!({"a": 1}));
        let (_, bytes, content_type) = json.prepare_body();
        assert_eq!(&bytes[..], br#"{"a":1}"#);
        assert_eq!(content_type, Some("application/json"));
        client.close();
    }

    #[test]
    fn test_cache_key_covers_method_url_and_body() {
        let key = |method: &str, url: &str, body: &[u8]| {
            sha1_hex(&[method.as_bytes(), url.as_bytes(), body])
        };
        let base = key("GET", "http://example.com/?a=1", b"");
        assert_ne!(base, key("HEAD", "http://example.com/?a=1", b""));
        assert_ne!(base, key("GET", "http://example.com/?a=2", b""));
        assert_ne!(base, key("GET", "http://example.com/?a=1", b"x"));
    }

    #[tokio::test]
    async fn test_invalid_url_fails_without_io() {
        let client = HttpClient::new("key").unwrap();
        assert!(matches!(
            client.get("").send().await.unwrap_err(),
            HttpError::InvalidUrl(_)
        ));
        assert!(matches!(
            client.get("not a url").send().await.unwrap_err(),
            HttpError::InvalidUrl(_)
        ));
        client.close();
    }

    #[test]
    fn test_cancel_handle_clones_share_state() {
        let handle = CancelHandle::new();
        let clone = handle.clone();
        assert!(!clone.is_cancelled());
        handle.cancel();
        assert!(clone.is_cancelled());
    }
}
