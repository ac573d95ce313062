//! Test support: a minimal range-aware HTTP origin.
//!
//! Serves fixed bodies keyed by request path, honors `Range: bytes=N-`
//! requests, answers 416 when the range starts at or past the end, and
//! 404 for unknown paths. Lets transfer and install tests exercise
//! resume semantics without a real network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

/// Spawn an origin serving `routes` and return its base URL
/// (`http://127.0.0.1:<port>`).
pub async fn spawn_origin(routes: Vec<(&str, Vec<u8>)>) -> String {
    spawn_flaky_origin(routes, 0).await
}

/// Like [`spawn_origin`], but the first `fail_first` connections are
/// dropped without a response, simulating transient origin failures.
pub async fn spawn_flaky_origin(routes: Vec<(&str, Vec<u8>)>, fail_first: usize) -> String {
    let routes: HashMap<String, Vec<u8>> = routes
        .into_iter()
        .map(|(path, body)| (path.to_string(), body))
        .collect();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let failures_left = Arc::new(AtomicUsize::new(fail_first));

    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => return,
            };
            if failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                // Drop the connection before answering.
                drop(stream);
                continue;
            }
            let routes = routes.clone();
            tokio::spawn(async move {
                let mut reader = BufReader::new(stream);
                let mut request_line = String::new();
                if reader.read_line(&mut request_line).await.unwrap_or(0) == 0 {
                    return;
                }
                let path = request_line
                    .split_whitespace()
                    .nth(1)
                    .unwrap_or("/")
                    .to_string();

                let mut range_start: Option<u64> = None;
                loop {
                    let mut line = String::new();
                    if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                        return;
                    }
                    let line = line.trim_end().to_ascii_lowercase();
                    if line.is_empty() {
                        break;
                    }
                    if let Some(value) = line.strip_prefix("range: bytes=") {
                        range_start = value.split('-').next().and_then(|s| s.parse().ok());
                    }
                }

                let response = match routes.get(&path) {
                    None => b"HTTP/1.1 404 Not Found\r\nconnection: close\r\ncontent-length: 0\r\n\r\n"
                        .to_vec(),
                    Some(body) => {
                        let total = body.len() as u64;
                        match range_start {
                            Some(start) if start >= total => {
                                b"HTTP/1.1 416 Range Not Satisfiable\r\nconnection: close\r\ncontent-length: 0\r\n\r\n"
                                    .to_vec()
                            }
                            Some(start) => {
                                let slice = &body[start as usize..];
                                let mut resp = format!(
                                    "HTTP/1.1 206 Partial Content\r\nconnection: close\r\ncontent-length: {}\r\ncontent-range: bytes {}-{}/{}\r\n\r\n",
                                    slice.len(),
                                    start,
                                    total - 1,
                                    total
                                )
                                .into_bytes();
                                resp.extend_from_slice(slice);
                                resp
                            }
                            None => {
                                let mut resp = format!(
                                    "HTTP/1.1 200 OK\r\nconnection: close\r\ncontent-length: {}\r\n\r\n",
                                    body.len()
                                )
                                .into_bytes();
                                resp.extend_from_slice(body);
                                resp
                            }
                        }
                    }
                };

                let mut stream = reader.into_inner();
                let _ = stream.write_all(&response).await;
                let _ = stream.flush().await;
            });
        }
    });

    format!("http://{}", addr)
}
