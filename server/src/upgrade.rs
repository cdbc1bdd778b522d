//! HTTP request parsing and the WebSocket upgrade handshake
//!
//! Everything arriving on the TLS port starts as an HTTP/1.1 request. A GET
//! carrying `Upgrade: websocket` and a `Sec-WebSocket-Key` becomes a
//! WebSocket connection via the 101 handshake; any other request is handed
//! to the [`HttpResponder`] seam (the real static file server lives outside
//! this crate) and the connection closes after the response.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use sha1::{Digest, Sha1};

/// Fixed GUID appended to the client key when computing the accept digest
/// (RFC 6455 §4.2.2).
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Upper bound on the buffered request head. A client that sends this much
/// without a blank line is not speaking HTTP we want to hear.
pub const MAX_REQUEST_LEN: usize = 8192;

/// A parsed HTTP request head. Header keys are stored lowercased.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    headers: HashMap<String, String>,
}

impl HttpRequest {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

/// How a freshly parsed request should be handled.
#[derive(Debug)]
pub enum RequestKind {
    /// WebSocket upgrade: write `handshake_response(key)` and hand the
    /// stream to the connection layer.
    Upgrade { key: String },
    /// Ordinary HTTP request for the responder seam.
    Http(HttpRequest),
}

/// Finds the end of the request head (the position just past `\r\n\r\n`).
pub fn find_request_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|pos| pos + 4)
}

/// Parses a request head into its request line and headers.
///
/// Returns `None` when even the request line is unusable. Header lines
/// without a colon are skipped, matching how lenient the original host was
/// with phone browsers.
pub fn parse_request(head: &str) -> Option<HttpRequest> {
    let mut lines = head.split('\n');

    let request_line = lines.next()?.trim();
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();

    let mut headers = HashMap::new();
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        if let Some((key, value)) = line.split_once(':') {
            headers.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    Some(HttpRequest { method, path, headers })
}

/// Decides whether a request is a WebSocket upgrade.
pub fn classify(request: HttpRequest) -> RequestKind {
    if request.method == "GET"
        && request
            .header("upgrade")
            .is_some_and(|u| u.eq_ignore_ascii_case("websocket"))
    {
        if let Some(key) = request.header("sec-websocket-key") {
            return RequestKind::Upgrade { key: key.to_string() };
        }
    }
    RequestKind::Http(request)
}

/// Computes the `Sec-WebSocket-Accept` value for a client key.
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.trim().as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// The complete 101 Switching Protocols response for a client key.
pub fn handshake_response(key: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\
         \r\n",
        accept_key(key)
    )
    .into_bytes()
}

/// A plain HTTP response sent on the non-upgrade path.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub reason: &'static str,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn text(status: u16, reason: &'static str, body: &str) -> HttpResponse {
        HttpResponse {
            status,
            reason,
            content_type: "text/plain",
            body: body.as_bytes().to_vec(),
        }
    }

    /// Serializes the response. Single-request semantics: every response
    /// carries `Connection: close` and a permissive CORS header.
    pub fn to_bytes(&self) -> Vec<u8> {
        let header = format!(
            "HTTP/1.1 {} {}\r\n\
             Content-Type: {}\r\n\
             Content-Length: {}\r\n\
             Connection: close\r\n\
             Access-Control-Allow-Origin: *\r\n\
             \r\n",
            self.status,
            self.reason,
            self.content_type,
            self.body.len()
        );

        let mut out = header.into_bytes();
        out.extend_from_slice(&self.body);
        out
    }
}

/// Answers requests that are not WebSocket upgrades.
///
/// The production deployment plugs the static file server in here; the
/// session host itself only needs a fallback.
pub trait HttpResponder: Send + Sync {
    fn respond(&self, request: &HttpRequest) -> HttpResponse;
}

/// Default responder when no static file server is attached.
pub struct NotFoundResponder;

impl HttpResponder for NotFoundResponder {
    fn respond(&self, request: &HttpRequest) -> HttpResponse {
        if request.method != "GET" {
            HttpResponse::text(405, "Method Not Allowed", "Method Not Allowed")
        } else {
            HttpResponse::text(404, "Not Found", "File not found")
        }
    }
}
