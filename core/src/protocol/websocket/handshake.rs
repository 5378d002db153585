/*
 * handshake.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Canticle, a presentation application.
 *
 * This file is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This file is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this file.  If not, see <http://www.gnu.org/licenses/>.
 */

//! WebSocket opening handshake (RFC 6455 §4): recognise an upgrade request and answer 101,
//! or build the client request and verify the server's Sec-WebSocket-Accept.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha1::{Digest, Sha1};
use tracing::debug;

use crate::protocol::http::h1::H1ResponseHandler;
use crate::protocol::http::Request;
use crate::protocol::websocket::WebSocketError;

/// Magic string for Sec-WebSocket-Accept (RFC 6455 §4.2.2).
const WS_ACCEPT_MAGIC: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The only protocol version we speak.
pub const WS_VERSION: &str = "13";

/// Sent when a request reaches the WebSocket endpoint without a usable upgrade.
pub const UPGRADE_REQUIRED_RESPONSE: &[u8] = b"HTTP/1.1 426 Upgrade Required\r\n\
Connection: close\r\n\
Upgrade: websocket\r\n\
Sec-WebSocket-Version: 13\r\n\
Content-Length: 0\r\n\r\n";

/// Compute Sec-WebSocket-Accept: base64(SHA-1(key + magic GUID)).
pub fn compute_accept(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_ACCEPT_MAGIC);
    BASE64.encode(hasher.finalize())
}

/// A recognised upgrade request: everything needed to write the 101 response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upgrade {
    pub accept: String,
}

impl Upgrade {
    /// The `101 Switching Protocols` response head. After writing it the stream carries frames only.
    pub fn response(&self) -> Vec<u8> {
        let mut res = Vec::with_capacity(128);
        res.extend_from_slice(b"HTTP/1.1 101 Switching Protocols\r\nConnection: Upgrade\r\nUpgrade: websocket\r\nSec-WebSocket-Accept: ");
        res.extend_from_slice(self.accept.as_bytes());
        res.extend_from_slice(b"\r\n\r\n");
        res
    }
}

/// Inspect request headers. Returns `None` when this is not a WebSocket upgrade; the host then
/// handles the request as plain HTTP. Method and path are the host's concern.
pub fn negotiate(request: &Request) -> Option<Upgrade> {
    if !request.has_token("Upgrade", "websocket") {
        return None;
    }
    let version = request.header_value("Sec-WebSocket-Version").map(str::trim)?;
    if version.is_empty() {
        return None;
    }
    if version != WS_VERSION {
        debug!(version, "unsupported websocket version");
        return None;
    }
    let key = request.header_value("Sec-WebSocket-Key").map(str::trim)?;
    if key.is_empty() {
        return None;
    }
    Some(Upgrade {
        accept: compute_accept(key),
    })
}

/// Build the client's HTTP GET request for the handshake. Caller writes this to the stream.
pub fn build_handshake_request(host: &str, path: &str, key: &str) -> Vec<u8> {
    let mut req = Vec::new();
    req.extend_from_slice(b"GET ");
    req.extend_from_slice(path.as_bytes());
    req.extend_from_slice(b" HTTP/1.1\r\nHost: ");
    req.extend_from_slice(host.as_bytes());
    req.extend_from_slice(b"\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: ");
    req.extend_from_slice(key.as_bytes());
    req.extend_from_slice(b"\r\nSec-WebSocket-Version: 13\r\n\r\n");
    req
}

/// Fresh client nonce: 16 random bytes, base64-encoded.
pub fn generate_key() -> Result<String, WebSocketError> {
    let mut raw = [0u8; 16];
    getrandom::getrandom(&mut raw)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
    Ok(BASE64.encode(raw))
}

/// Captures status and Sec-WebSocket-Accept from the server's response head.
#[derive(Debug, Default)]
pub struct HandshakeResponse {
    pub status: Option<u16>,
    pub accept: Option<String>,
}

impl H1ResponseHandler for HandshakeResponse {
    fn status(&mut self, code: u16, _reason: Option<&str>) {
        self.status = Some(code);
    }

    fn header(&mut self, name: &str, value: &str) {
        if name.eq_ignore_ascii_case("Sec-WebSocket-Accept") {
            self.accept = Some(value.trim().to_string());
        }
    }
}

/// Verify the server's Sec-WebSocket-Accept header matches the key we sent.
pub fn verify_accept(accept_header: Option<&str>, key: &str) -> Result<(), WebSocketError> {
    let expected = compute_accept(key);
    match accept_header {
        Some(h) if h.trim() == expected => Ok(()),
        Some(_) => Err(WebSocketError::Handshake("Sec-WebSocket-Accept mismatch".to_string())),
        None => Err(WebSocketError::Handshake("missing Sec-WebSocket-Accept".to_string())),
    }
}
