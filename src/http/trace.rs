//! Per-request trace metadata and request-ID signing.
//!
//! Every outbound request carries `X-HTTP-GoKit-RequestId`, a header of the
//! form `<unix_seconds>-<7digit_nonce>-<sha1hex>`. The hash covers the
//! timestamp, nonce, method, URL path, raw query, and the caller's client
//! key, so a server holding the same key can verify both integrity and
//! freshness of the request line.

use rand::Rng;
use url::Url;

use crate::util::clock::now_unix;
use crate::util::hash::sha1_hex;

/// Header carrying the signed request identity.
pub const REQUEST_ID_HEADER: &str = "X-HTTP-GoKit-RequestId";

/// Maximum tolerated clock skew between client and verifying server.
pub const MAX_CLOCK_SKEW_SECS: i64 = 300;

/// Metadata recorded for one logical request (shared by every retry
/// attempt of that request).
#[derive(Debug, Clone, Default)]
pub struct Trace {
    /// Stable identifier of the signing client.
    pub client_id: String,
    /// Hex SHA-1 request ID, the third segment of the signing header.
    pub request_id: String,
    /// Unix seconds at which the request was signed.
    pub timestamp: i64,
    /// Random 7-digit nonce.
    pub nonce: u32,
    /// Attempts performed, including the first. 1 means no retries.
    pub attempts: u32,
    /// Milliseconds from the first attempt to the response head.
    pub send_ms: u128,
    /// Milliseconds spent draining the response body.
    pub recv_ms: u128,
}

impl Trace {
    pub(crate) fn new(client_id: &str, method: &str, url: &Url, client_key: &str) -> Self {
        let timestamp = now_unix();
        let nonce = rand::rng().random_range(1_000_000..=9_999_999u32);
        let request_id = sign(
            timestamp,
            nonce,
            method,
            url.path(),
            url.query().unwrap_or(""),
            client_key,
        );
        Self {
            client_id: client_id.to_string(),
            request_id,
            timestamp,
            nonce,
            attempts: 0,
            send_ms: 0,
            recv_ms: 0,
        }
    }

    /// Retries performed beyond the first attempt.
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }

    /// Render the `X-HTTP-GoKit-RequestId` header value.
    pub fn header_value(&self) -> String {
        format!("{}-{}-{}", self.timestamp, self.nonce, self.request_id)
    }
}

/// Compute the request-ID hash. The input is the literal `"xhttp"` prefix
/// followed by the decimal forms of timestamp and nonce, then method,
/// path, raw query, and client key, with no separators.
pub fn sign(
    timestamp: i64,
    nonce: u32,
    method: &str,
    path: &str,
    query: &str,
    client_key: &str,
) -> String {
    sha1_hex(&[
        b"xhttp",
        timestamp.to_string().as_bytes(),
        nonce.to_string().as_bytes(),
        method.as_bytes(),
        path.as_bytes(),
        query.as_bytes(),
        client_key.as_bytes(),
    ])
}

/// Server-side check of a signing header against the request line it
/// arrived on. Recomputes the hash from `(timestamp, nonce, method, path,
/// query, client_key)` and compares it to the header's third segment;
/// additionally rejects timestamps more than [`MAX_CLOCK_SKEW_SECS`] from
/// the local clock.
pub fn verify_request_id(
    header_value: &str,
    method: &str,
    path: &str,
    query: &str,
    client_key: &str,
) -> bool {
    let mut segments = header_value.splitn(3, '-');
    let (Some(ts), Some(nonce), Some(hash)) =
        (segments.next(), segments.next(), segments.next())
    else {
        return false;
    };
    let Ok(timestamp) = ts.parse::<i64>() else {
        return false;
    };
    let Ok(nonce) = nonce.parse::<u32>() else {
        return false;
    };
    if (now_unix() - timestamp).abs() > MAX_CLOCK_SKEW_SECS {
        return false;
    }
    sign(timestamp, nonce, method, path, query, client_key) == hash
}
