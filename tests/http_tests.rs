//! HTTP client behaviour against a local stub server: retries, response
//! caching, signing, dumps, and body handling.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use xkit::http::{
    verify_request_id, CancelHandle, ClientConfig, DumpPolicy, Dump, HttpClient, HttpError,
    REQUEST_ID_HEADER,
};

/// What the stub server saw: full request text (head + body), per accept.
type SeenRequests = Arc<Mutex<Vec<String>>>;

/// Spawn a stub server answering every request with `status` and a body of
/// `"hit <n>"` where n counts accepted connections. Returns the base URL,
/// the accept counter, and the captured requests.
async fn stub_server(status: u16) -> (String, Arc<AtomicUsize>, SeenRequests) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let seen: SeenRequests = Arc::new(Mutex::new(Vec::new()));
    let (hits_srv, seen_srv) = (Arc::clone(&hits), Arc::clone(&seen));
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let n = hits_srv.fetch_add(1, Ordering::SeqCst) + 1;
            let request = read_request(&mut socket).await;
            seen_srv.lock().unwrap().push(request);
            let body = format!("hit {n}");
            let response = format!(
                "HTTP/1.1 {status} X\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    });
    (format!("http://{addr}"), hits, seen)
}

/// Read one full HTTP request (head plus Content-Length body).
async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    let head_end = loop {
        let Ok(n) = socket.read(&mut buf).await else {
            return String::from_utf8_lossy(&data).into_owned();
        };
        if n == 0 {
            return String::from_utf8_lossy(&data).into_owned();
        }
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let head = String::from_utf8_lossy(&data[..head_end]).into_owned();
    let content_length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())?
        })
        .unwrap_or(0);
    while data.len() < head_end + content_length {
        let Ok(n) = socket.read(&mut buf).await else {
            break;
        };
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
    }
    String::from_utf8_lossy(&data).into_owned()
}

fn header_value<'a>(request: &'a str, name: &str) -> Option<&'a str> {
    request.lines().find_map(|line| {
        let (header, value) = line.split_once(':')?;
        header.eq_ignore_ascii_case(name).then(|| value.trim())
    })
}

#[tokio::test]
async fn test_basic_get_reads_body() -> anyhow::Result<()> {
    xkit::util::init_tracing();
    let (base, hits, _) = stub_server(200).await;
    let client = HttpClient::new("key")?;
    let mut resp = client.get(&format!("{base}/item")).send().await?;
    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(resp.text().await?, "hit 1");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(resp.trace().attempts, 1);
    assert!(resp.cache_key().is_empty());
    client.close();
    Ok(())
}

#[tokio::test]
async fn test_request_is_signed_and_server_verifiable() -> anyhow::Result<()> {
    let (base, _, seen) = stub_server(200).await;
    let client = HttpClient::new("shared-secret")?;
    let mut resp = client.get(&format!("{base}/api/items?q=7")).send().await?;
    resp.close();
    let requests = seen.lock().unwrap();
    let header = header_value(&requests[0], REQUEST_ID_HEADER).unwrap();
    assert!(verify_request_id(
        header,
        "GET",
        "/api/items",
        "q=7",
        "shared-secret"
    ));
    assert!(!verify_request_id(
        header,
        "GET",
        "/api/items",
        "q=7",
        "wrong-key"
    ));
    client.close();
    Ok(())
}

#[tokio::test]
async fn test_transport_errors_retry_k_plus_one_times() {
    // A server that accepts and immediately hangs up: every attempt is a
    // transport failure.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_srv = Arc::clone(&hits);
    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                break;
            };
            hits_srv.fetch_add(1, Ordering::SeqCst);
            drop(socket);
        }
    });

    let mut client = HttpClient::new("key").unwrap();
    client.set_retries(2, 10);
    let err = client
        .get(&format!("http://{addr}/x"))
        .send()
        .await
        .unwrap_err();
    assert!(matches!(err, HttpError::Transport(_)));
    assert_eq!(hits.load(Ordering::SeqCst), 3);
    client.close();
}

#[tokio::test]
async fn test_non_2xx_is_returned_not_retried() {
    let (base, hits, _) = stub_server(503).await;
    let mut client = HttpClient::new("key").unwrap();
    client.set_retries(5, 10);
    let mut resp = client.get(&format!("{base}/x")).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 503);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    resp.close();
    client.close();
}

#[tokio::test]
async fn test_cached_gets_share_body_and_request_id() {
    let (base, hits, _) = stub_server(200).await;
    let mut client = HttpClient::new("key").unwrap();
    client.set_cache_ttl("GET", 60).unwrap();
    let url = format!("{base}/data?a=1");

    let mut first = client
        .get(&url)
        .header("X-A", "1")
        .header("X-B", "2")
        .send()
        .await
        .unwrap();
    let first_body = first.bytes().await.unwrap();
    let first_id = first.trace().request_id.clone();
    assert!(!first.cache_key().is_empty());

    // Same method, URL, and body; header order differs.
    let mut second = client
        .get(&url)
        .header("X-B", "2")
        .header("X-A", "1")
        .send()
        .await
        .unwrap();
    let second_body = second.bytes().await.unwrap();
    assert_eq!(first_body, second_body);
    assert_eq!(first_id, second.trace().request_id);
    assert_eq!(first.cache_key(), second.cache_key());
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    // Cached responses re-buffer: reading again returns the same bytes.
    assert_eq!(second.bytes().await.unwrap(), second_body);
    client.close();
}

#[tokio::test]
async fn test_uncached_methods_hit_the_server_every_time() {
    let (base, hits, _) = stub_server(200).await;
    let mut client = HttpClient::new("key").unwrap();
    client.set_cache_ttl("GET", 60).unwrap();
    for _ in 0..2 {
        let mut resp = client.post(&format!("{base}/x")).send().await.unwrap();
        resp.close();
    }
    assert_eq!(hits.load(Ordering::SeqCst), 2);
    client.close();
}

#[tokio::test]
async fn test_post_form_body_and_content_type() {
    let (base, _, seen) = stub_server(200).await;
    let client = HttpClient::new("key").unwrap();
    let mut resp = client
        .post(&format!("{base}/submit"))
        .param("a", "1")
        .param("b", "two words")
        .send()
        .await
        .unwrap();
    resp.close();
    let requests = seen.lock().unwrap();
    let request = &requests[0];
    assert!(request.starts_with("POST /submit HTTP/1.1"));
    assert_eq!(
        header_value(request, "content-type"),
        Some("application/x-www-form-urlencoded")
    );
    assert!(request.ends_with("a=1&b=two+words"));
    client.close();
}

#[tokio::test]
async fn test_json_body_and_content_type() {
    let (base, _, seen) = stub_server(200).await;
    let client = HttpClient::new("key").unwrap();
    let mut resp = client
        .put(&format!("{base}/doc"))
        .json(&serde_json::json!({"n": 7}))
        .send()
        .await
        .unwrap();
    resp.close();
    let requests = seen.lock().unwrap();
    assert_eq!(
        header_value(&requests[0], "content-type"),
        Some("application/json")
    );
    assert!(requests[0].ends_with(r#"{"n":7}"#));
    client.close();
}

#[tokio::test]
async fn test_query_params_merge_into_existing_query() {
    let (base, _, seen) = stub_server(200).await;
    let client = HttpClient::new("key").unwrap();
    let mut resp = client
        .get(&format!("{base}/s?a=1"))
        .query_param("b", "2")
        .send()
        .await
        .unwrap();
    resp.close();
    let requests = seen.lock().unwrap();
    assert!(requests[0].starts_with("GET /s?a=1&b=2 HTTP/1.1"));
    client.close();
}

#[tokio::test]
async fn test_unsupported_method_and_bad_url_do_no_io() {
    let (base, hits, _) = stub_server(200).await;
    let client = HttpClient::new("key").unwrap();
    match client.request("TRACE", &format!("{base}/x")) {
        Err(HttpError::UnsupportedMethod(method)) => assert_eq!(method, "TRACE"),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("TRACE must be rejected"),
    }
    assert!(matches!(
        client.get("://broken").send().await.unwrap_err(),
        HttpError::InvalidUrl(_)
    ));
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    client.close();
}

#[tokio::test]
async fn test_cancel_fired_during_retry_sleep_aborts_promptly() {
    // Every attempt is a transport failure, and the retry sleep is far
    // longer than the test: only cancellation can end the wait early.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                break;
            };
            drop(socket);
        }
    });

    let mut client = HttpClient::new("key").unwrap();
    client.set_retries(5, 30_000);
    let handle = CancelHandle::new();
    let canceller = handle.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        canceller.cancel();
    });

    let started = std::time::Instant::now();
    let err = client
        .get(&format!("http://{addr}/x"))
        .cancel(&handle)
        .send()
        .await
        .unwrap_err();
    assert!(matches!(err, HttpError::Cancelled));
    assert!(
        started.elapsed() < std::time::Duration::from_secs(5),
        "cancellation did not interrupt the retry sleep"
    );
    client.close();
}

#[tokio::test]
async fn test_cancelled_handle_aborts_before_any_attempt() {
    let (base, hits, _) = stub_server(200).await;
    let client = HttpClient::new("key").unwrap();
    let handle = CancelHandle::new();
    handle.cancel();
    let err = client
        .get(&format!("{base}/x"))
        .cancel(&handle)
        .send()
        .await
        .unwrap_err();
    assert!(matches!(err, HttpError::Cancelled));
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    client.close();
}

#[tokio::test]
async fn test_dump_with_body_captures_both_wire_images() {
    let (base, _, _) = stub_server(200).await;
    let mut config = ClientConfig::default();
    config.dump = DumpPolicy::WithBody;
    let client = HttpClient::with_config(config, "key").unwrap();
    let resp = client.get(&format!("{base}/x")).send().await.unwrap();
    let dumps = resp.dumps();
    assert_eq!(dumps.len(), 2);
    match &dumps[0] {
        Dump::Request(image) => {
            assert!(image.starts_with("GET "));
            assert!(image.to_ascii_lowercase().contains("x-http-gokit-requestid:"));
        }
        other => panic!("expected request dump first, got {other:?}"),
    }
    match &dumps[1] {
        Dump::Response(image) => {
            assert!(image.starts_with("HTTP/1.1 200"));
            assert!(image.ends_with("hit 1"));
        }
        other => panic!("expected response dump second, got {other:?}"),
    }
    client.close();
}

#[tokio::test]
async fn test_save_writes_once_then_refuses() {
    let (base, _, _) = stub_server(200).await;
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("nested/out.txt");
    let client = HttpClient::new("key").unwrap();

    let mut resp = client.get(&format!("{base}/f")).send().await.unwrap();
    let written = resp.save(Some(&target)).await.unwrap();
    assert_eq!(std::fs::read_to_string(&written).unwrap(), "hit 1");

    let mut resp = client.get(&format!("{base}/f")).send().await.unwrap();
    assert!(matches!(
        resp.save(Some(&target)).await.unwrap_err(),
        HttpError::FileExists(_)
    ));
    client.close();
}

#[tokio::test]
async fn test_cookies_and_host_override() {
    let (base, _, seen) = stub_server(200).await;
    let client = HttpClient::new("key").unwrap();
    let mut resp = client
        .get(&format!("{base}/c"))
        .host("internal.example")
        .cookie("session", "abc")
        .cookie("theme", "dark")
        .send()
        .await
        .unwrap();
    resp.close();
    let requests = seen.lock().unwrap();
    assert_eq!(header_value(&requests[0], "host"), Some("internal.example"));
    assert_eq!(
        header_value(&requests[0], "cookie"),
        Some("session=abc; theme=dark")
    );
    client.close();
}
