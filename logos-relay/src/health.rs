//! Plain HTTP liveness responses on the relay port.
//!
//! WebSocket upgrades and health checks share one listener. The request head
//! is peeked without consuming it, re-peeking as more segments arrive until
//! the blank line that ends it. Anything carrying an `Upgrade` header is left
//! for the WebSocket handshake.
//!
//! | Route         | Response                                                  |
//! |---------------|-----------------------------------------------------------|
//! | `GET /`       | `{"status":"ok","message":..,"rooms":n,"timestamp":..}`   |
//! | `GET /health` | `{"status":"healthy"}`                                    |
//! | other         | 404                                                       |

use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;

use crate::registry::RoomRegistry;

const PEEK_LIMIT: usize = 16 * 1024;
const PEEK_INTERVAL: Duration = Duration::from_millis(5);
const HEAD_TIMEOUT: Duration = Duration::from_secs(5);

/// Parsed request line of a non-upgrade request.
#[derive(Debug, PartialEq, Eq)]
struct PlainRequest {
    method: String,
    path: String,
    head_len: usize,
}

/// What the bytes peeked so far amount to.
#[derive(Debug, PartialEq, Eq)]
enum Head {
    /// No blank line yet
    Incomplete,
    /// Hand the stream to the WebSocket handshake
    WebSocket,
    Plain(PlainRequest),
    /// `PEEK_LIMIT` bytes without a blank line or an `Upgrade` header
    TooLarge,
}

fn has_upgrade_header<'a>(mut lines: impl Iterator<Item = &'a str>) -> bool {
    lines.any(|line| {
        line.split_once(':')
            .is_some_and(|(name, _)| name.trim().eq_ignore_ascii_case("upgrade"))
    })
}

/// Inspect a peeked request head.
fn classify(head: &[u8]) -> Head {
    let Some(end) = head.windows(4).position(|w| w == b"\r\n\r\n") else {
        return Head::Incomplete;
    };
    // Garbage is the handshake's to reject
    let Ok(text) = std::str::from_utf8(&head[..end]) else {
        return Head::WebSocket;
    };
    let mut lines = text.split("\r\n");
    let mut request_line = lines.next().unwrap_or_default().split_whitespace();
    let (Some(method), Some(target)) = (request_line.next(), request_line.next()) else {
        return Head::WebSocket;
    };
    if has_upgrade_header(lines) {
        return Head::WebSocket;
    }

    let path = target.split('?').next().unwrap_or(target);
    Head::Plain(PlainRequest {
        method: method.to_string(),
        path: path.to_string(),
        head_len: end + 4,
    })
}

/// Peek until the head is complete, the limit is reached, or the client
/// stalls past `HEAD_TIMEOUT`.
async fn peek_head(stream: &TcpStream) -> std::io::Result<Head> {
    let mut buf = vec![0u8; PEEK_LIMIT];
    let deadline = Instant::now() + HEAD_TIMEOUT;
    loop {
        let n = match tokio::time::timeout_at(deadline, stream.peek(&mut buf)).await {
            Ok(peeked) => peeked?,
            Err(_) => return Ok(Head::Incomplete),
        };
        match classify(&buf[..n]) {
            Head::Incomplete if n == 0 => return Ok(Head::Incomplete),
            Head::Incomplete if n == PEEK_LIMIT => {
                let partial = String::from_utf8_lossy(&buf);
                return Ok(if has_upgrade_header(partial.split("\r\n").skip(1)) {
                    Head::WebSocket
                } else {
                    Head::TooLarge
                });
            }
            Head::Incomplete => {
                // peek returns at once while data is buffered
                if Instant::now() >= deadline {
                    return Ok(Head::Incomplete);
                }
                tokio::time::sleep(PEEK_INTERVAL).await;
            }
            decided => return Ok(decided),
        }
    }
}

/// Status line and JSON body for a plain request.
fn route(method: &str, path: &str, rooms: usize) -> (u16, &'static str, String) {
    match (method, path) {
        ("GET", "/") => (
            200,
            "OK",
            json!({
                "status": "ok",
                "message": "logos-relay running",
                "rooms": rooms,
                "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            })
            .to_string(),
        ),
        ("GET", "/health") => (200, "OK", json!({ "status": "healthy" }).to_string()),
        _ => (404, "Not Found", json!({ "error": "Not found" }).to_string()),
    }
}

async fn write_response(
    stream: &mut TcpStream,
    status: u16,
    reason: &str,
    body: &str,
) -> std::io::Result<()> {
    let response = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

/// Answer a plain HTTP request if that is what the client sent.
///
/// Returns `Ok(true)` when the connection is done (answered, or dropped for
/// never completing its head), `Ok(false)` when the stream should go on to
/// the WebSocket handshake.
pub async fn respond_if_plain_http(
    stream: &mut TcpStream,
    registry: &RoomRegistry,
) -> std::io::Result<bool> {
    let request = match peek_head(stream).await? {
        Head::WebSocket => return Ok(false),
        Head::Plain(request) => request,
        Head::Incomplete => {
            log::debug!("Dropping connection without a complete request head");
            return Ok(true);
        }
        Head::TooLarge => {
            let mut discard = vec![0u8; PEEK_LIMIT];
            stream.read_exact(&mut discard).await?;
            let body = json!({ "error": "Request header too large" }).to_string();
            write_response(stream, 431, "Request Header Fields Too Large", &body).await?;
            return Ok(true);
        }
    };

    // Consume the head we answered
    let mut head = vec![0u8; request.head_len];
    stream.read_exact(&mut head).await?;

    let (status, reason, body) = route(&request.method, &request.path, registry.room_count().await);
    log::debug!("{} {} -> {status}", request.method, request.path);
    write_response(stream, status, reason, &body).await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(head: &[u8]) -> PlainRequest {
        match classify(head) {
            Head::Plain(request) => request,
            other => panic!("expected a plain request, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_plain_get() {
        let head = b"GET /health HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let req = plain(head);
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/health");
        assert_eq!(req.head_len, head.len());
    }

    #[test]
    fn test_classify_strips_query() {
        assert_eq!(plain(b"GET /?x=1 HTTP/1.1\r\n\r\n").path, "/");
    }

    #[test]
    fn test_classify_upgrade_passes_through() {
        let head = b"GET /doc1 HTTP/1.1\r\nHost: x\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\n";
        assert_eq!(classify(head), Head::WebSocket);

        let lower = b"GET /doc1 HTTP/1.1\r\nupgrade: websocket\r\n\r\n";
        assert_eq!(classify(lower), Head::WebSocket);
    }

    #[test]
    fn test_classify_incomplete_head() {
        assert_eq!(classify(b"GET /health HTTP/1.1\r\nHost: loc"), Head::Incomplete);
        assert_eq!(classify(b"GET /health HTTP/1.1\r\n"), Head::Incomplete);
        assert_eq!(classify(b""), Head::Incomplete);
    }

    #[test]
    fn test_classify_garbage_goes_to_handshake() {
        assert_eq!(classify(b"\xFF\xFE\r\n\r\n"), Head::WebSocket);
        assert_eq!(classify(b"\r\n\r\n"), Head::WebSocket);
    }

    #[tokio::test]
    async fn test_peek_head_waits_for_later_segments() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.write_all(b"GET /health HTTP/1.1\r\n").await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            stream.write_all(b"Host: localhost\r\n\r\n").await.unwrap();
            stream
        });

        let (server, _) = listener.accept().await.unwrap();
        let head = peek_head(&server).await.unwrap();
        assert!(matches!(head, Head::Plain(ref req) if req.path == "/health"));
        drop(client.await.unwrap());
    }

    #[tokio::test]
    async fn test_peek_head_oversized() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            let mut head = b"GET / HTTP/1.1\r\n".to_vec();
            head.extend(std::iter::repeat(b'x').take(PEEK_LIMIT));
            stream.write_all(&head).await.unwrap();
            stream
        });

        let (server, _) = listener.accept().await.unwrap();
        assert_eq!(peek_head(&server).await.unwrap(), Head::TooLarge);
        drop(client.await.unwrap());
    }

    #[test]
    fn test_route_root_reports_rooms() {
        let (status, _, body) = route("GET", "/", 3);
        assert_eq!(status, 200);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["rooms"], 3);
        let timestamp = json["timestamp"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok());
        assert!(timestamp.ends_with('Z'));
    }

    #[test]
    fn test_route_health() {
        let (status, _, body) = route("GET", "/health", 0);
        assert_eq!(status, 200);
        assert_eq!(body, r#"{"status":"healthy"}"#);
    }

    #[test]
    fn test_route_not_found() {
        assert_eq!(route("GET", "/nope", 0).0, 404);
        assert_eq!(route("POST", "/health", 0).0, 404);
    }
}
