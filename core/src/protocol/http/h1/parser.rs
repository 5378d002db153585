/*
 * parser.rs
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

//! HTTP/1.1 head push parsers: request line or status line, then headers, up to the blank line.
//!
//! Only the head is parsed. After an upgrade the rest of the stream belongs to the WebSocket
//! session, so parsing stops at `HeadersComplete` and any bytes after the blank line stay in the buffer.

use bytes::Buf;
use bytes::BytesMut;
use std::io;

/// Heads larger than this are rejected rather than buffered without bound.
pub const MAX_HEAD_LEN: usize = 16 * 1024;

/// Callback for HTTP/1.1 request head events.
pub trait H1RequestHandler {
    fn request_line(&mut self, method: &str, target: &str, version: &str);
    fn header(&mut self, name: &str, value: &str);
}

/// Callback for HTTP/1.1 response head events.
pub trait H1ResponseHandler {
    fn status(&mut self, code: u16, reason: Option<&str>);
    fn header(&mut self, name: &str, value: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    StartLine,
    Headers,
    /// Blank line seen; remaining buffered bytes belong to whatever follows the head.
    HeadersComplete,
}

/// Find CRLF in buf; return number of bytes to the start of CRLF, or None if not found.
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Shared line handling: split off the next line (without CRLF), enforcing the head size cap.
fn next_line(buf: &mut BytesMut, consumed: &mut usize) -> Result<Option<String>, io::Error> {
    let line_end = match find_crlf(buf) {
        Some(n) => n,
        None => {
            if *consumed + buf.len() > MAX_HEAD_LEN {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "HTTP head too large"));
            }
            return Ok(None);
        }
    };
    *consumed += line_end + 2;
    if *consumed > MAX_HEAD_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "HTTP head too large"));
    }
    let line = buf.split_to(line_end);
    buf.advance(2);
    let line = std::str::from_utf8(&line)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "invalid HTTP head UTF-8"))?;
    Ok(Some(line.to_string()))
}

/// Header line `Name: value`. Lines without a colon are ignored.
fn split_header(line: &str) -> Option<(&str, &str)> {
    let colon = line.find(':')?;
    Some((line[..colon].trim(), line[colon + 1..].trim()))
}

/// Push parser for an HTTP/1.1 request head. Feed bytes via `receive`.
pub struct RequestParser {
    state: ParseState,
    consumed: usize,
}

impl RequestParser {
    pub fn new() -> Self {
        Self {
            state: ParseState::StartLine,
            consumed: 0,
        }
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    pub fn reset(&mut self) {
        self.state = ParseState::StartLine;
        self.consumed = 0;
    }

    /// Consume and parse as much as possible from buf. Partial lines remain in buf.
    pub fn receive<H: H1RequestHandler>(
        &mut self,
        buf: &mut BytesMut,
        handler: &mut H,
    ) -> Result<(), io::Error> {
        while self.state != ParseState::HeadersComplete {
            let line = match next_line(buf, &mut self.consumed)? {
                Some(line) => line,
                None => return Ok(()),
            };
            match self.state {
                ParseState::StartLine => {
                    // Tolerate stray CRLF before the request line (RFC 9112 §2.2).
                    if line.is_empty() {
                        continue;
                    }
                    // GET /path HTTP/1.1
                    let mut parts = line.split(' ');
                    let (method, target, version) = match (parts.next(), parts.next(), parts.next()) {
                        (Some(m), Some(t), Some(v)) if !m.is_empty() && !t.is_empty() => (m, t, v),
                        _ => {
                            return Err(io::Error::new(
                                io::ErrorKind::InvalidData,
                                "malformed request line",
                            ))
                        }
                    };
                    if !version.starts_with("HTTP/") {
                        return Err(io::Error::new(io::ErrorKind::InvalidData, "unsupported HTTP version"));
                    }
                    handler.request_line(method, target, version);
                    self.state = ParseState::Headers;
                }
                ParseState::Headers => {
                    if line.is_empty() {
                        self.state = ParseState::HeadersComplete;
                    } else if let Some((name, value)) = split_header(&line) {
                        handler.header(name, value);
                    }
                }
                ParseState::HeadersComplete => {}
            }
        }
        Ok(())
    }
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Push parser for an HTTP/1.1 response head (used by the client handshake).
pub struct ResponseParser {
    state: ParseState,
    consumed: usize,
}

impl ResponseParser {
    pub fn new() -> Self {
        Self {
            state: ParseState::StartLine,
            consumed: 0,
        }
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    pub fn receive<H: H1ResponseHandler>(
        &mut self,
        buf: &mut BytesMut,
        handler: &mut H,
    ) -> Result<(), io::Error> {
        while self.state != ParseState::HeadersComplete {
            let line = match next_line(buf, &mut self.consumed)? {
                Some(line) => line,
                None => return Ok(()),
            };
            match self.state {
                ParseState::StartLine => {
                    // HTTP/1.1 101 Switching Protocols or HTTP/1.1 101
                    let parts: Vec<&str> = line.splitn(3, ' ').collect();
                    let code = parts
                        .get(1)
                        .and_then(|s| s.parse::<u16>().ok())
                        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "malformed status line"))?;
                    let reason = parts.get(2).copied();
                    handler.status(code, reason);
                    self.state = ParseState::Headers;
                }
                ParseState::Headers => {
                    if line.is_empty() {
                        self.state = ParseState::HeadersComplete;
                    } else if let Some((name, value)) = split_header(&line) {
                        handler.header(name, value);
                    }
                }
                ParseState::HeadersComplete => {}
            }
        }
        Ok(())
    }
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new()
    }
}
