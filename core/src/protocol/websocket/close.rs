/*
 * close.rs
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

//! Close handshake (RFC 6455 §5.5.1, §7): status codes, Close payload parse/encode, per-session close state.

use bytes::{BufMut, Bytes, BytesMut};

use crate::protocol::websocket::frame::MAX_CONTROL_PAYLOAD;
use crate::protocol::websocket::WebSocketError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseCode {
    /// 1000
    Normal,
    /// 1001: endpoint going away (server shutdown, page navigated away).
    GoingAway,
    /// 1002
    ProtocolError,
    /// 1003: data type this endpoint cannot accept.
    Unsupported,
    /// 1005: never on the wire; stands for "no status in the Close frame".
    NoStatusReceived,
    /// 1006: never on the wire; connection dropped without a Close frame.
    Abnormal,
    /// 1007: e.g. non-UTF-8 text.
    InvalidPayload,
    /// 1008
    PolicyViolation,
    /// 1009
    MessageTooBig,
    /// 1010
    MandatoryExtension,
    /// 1011
    InternalError,
    /// 1015: never on the wire.
    TlsHandshake,
    Other(u16),
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::GoingAway,
            1002 => CloseCode::ProtocolError,
            1003 => CloseCode::Unsupported,
            1005 => CloseCode::NoStatusReceived,
            1006 => CloseCode::Abnormal,
            1007 => CloseCode::InvalidPayload,
            1008 => CloseCode::PolicyViolation,
            1009 => CloseCode::MessageTooBig,
            1010 => CloseCode::MandatoryExtension,
            1011 => CloseCode::InternalError,
            1015 => CloseCode::TlsHandshake,
            other => CloseCode::Other(other),
        }
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> u16 {
        match code {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::ProtocolError => 1002,
            CloseCode::Unsupported => 1003,
            CloseCode::NoStatusReceived => 1005,
            CloseCode::Abnormal => 1006,
            CloseCode::InvalidPayload => 1007,
            CloseCode::PolicyViolation => 1008,
            CloseCode::MessageTooBig => 1009,
            CloseCode::MandatoryExtension => 1010,
            CloseCode::InternalError => 1011,
            CloseCode::TlsHandshake => 1015,
            CloseCode::Other(code) => code,
        }
    }
}

impl CloseCode {
    /// Whether this code may appear in a Close frame on the wire.
    pub fn is_sendable(self) -> bool {
        let code: u16 = self.into();
        match code {
            1000..=1003 | 1007..=1014 => true,
            3000..=4999 => true,
            _ => false,
        }
    }
}

/// Payload of a Close frame: optional status code, then an optional UTF-8 reason.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CloseFrame {
    pub code: Option<CloseCode>,
    pub reason: String,
}

impl CloseFrame {
    pub fn new(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            reason: reason.into(),
        }
    }

    pub fn normal() -> Self {
        Self::new(CloseCode::Normal, "")
    }

    /// Status-less close (empty payload).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse a received Close payload. A one-byte payload, a code that must not be sent,
    /// or a reason that is not UTF-8 is an error.
    pub fn parse(payload: &[u8]) -> Result<Self, WebSocketError> {
        match payload.len() {
            0 => Ok(Self::empty()),
            1 => Err(WebSocketError::Protocol("close payload of one byte")),
            _ => {
                let code = CloseCode::from(u16::from_be_bytes([payload[0], payload[1]]));
                if !code.is_sendable() {
                    return Err(WebSocketError::Protocol("invalid close status code"));
                }
                let reason = std::str::from_utf8(&payload[2..])
                    .map_err(|_| WebSocketError::InvalidPayload("close reason is not UTF-8"))?;
                Ok(Self {
                    code: Some(code),
                    reason: reason.to_string(),
                })
            }
        }
    }

    /// Encode as a Close payload. The reason is cut on a char boundary to fit the 125-byte control limit.
    pub fn encode(&self) -> Bytes {
        let code = match self.code {
            Some(code) => code,
            None => return Bytes::new(),
        };
        let max_reason = MAX_CONTROL_PAYLOAD - 2;
        let mut end = self.reason.len().min(max_reason);
        while !self.reason.is_char_boundary(end) {
            end -= 1;
        }
        let mut out = BytesMut::with_capacity(2 + end);
        out.put_u16(code.into());
        out.put_slice(&self.reason.as_bytes()[..end]);
        out.freeze()
    }

    /// The Close we send back when the peer starts the close handshake: its status, or 1000 if it sent none.
    pub fn reply(&self) -> CloseFrame {
        match self.code {
            Some(code) => CloseFrame::new(code, ""),
            None => CloseFrame::normal(),
        }
    }
}

/// Close handshake progress. The connection is fully closed once both flags are set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloseState {
    pub close_sent: bool,
    pub close_received: bool,
    /// What the peer sent, once `close_received`.
    pub received: Option<CloseFrame>,
}

impl CloseState {
    pub fn is_closed(&self) -> bool {
        self.close_sent && self.close_received
    }
}
