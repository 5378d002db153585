/*
 * error.rs
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

//! Errors raised by the WebSocket layer, each mapped to the close status sent to the peer.

use std::io;

use thiserror::Error;

use crate::protocol::websocket::close::CloseCode;

#[derive(Debug, Error)]
pub enum WebSocketError {
    /// The underlying stream failed (peer vanished, reset, EOF without a close frame).
    #[error("websocket i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("websocket protocol error: {0}")]
    Protocol(&'static str),

    #[error("message too big: {size} bytes exceeds limit of {limit}")]
    MessageTooBig { size: u64, limit: usize },

    #[error("invalid payload: {0}")]
    InvalidPayload(&'static str),

    #[error("unsupported data: {0}")]
    UnsupportedData(&'static str),

    /// The session was already closed (close handshake finished, or a previous failure).
    #[error("websocket connection closed")]
    ConnectionClosed,

    #[error("websocket handshake failed: {0}")]
    Handshake(String),
}

impl WebSocketError {
    /// Status code to put in the Close frame when this error fails the connection.
    pub fn close_code(&self) -> CloseCode {
        match self {
            WebSocketError::Io(_) => CloseCode::Abnormal,
            WebSocketError::Protocol(_) | WebSocketError::Handshake(_) => CloseCode::ProtocolError,
            WebSocketError::MessageTooBig { .. } => CloseCode::MessageTooBig,
            WebSocketError::InvalidPayload(_) => CloseCode::InvalidPayload,
            WebSocketError::UnsupportedData(_) => CloseCode::Unsupported,
            WebSocketError::ConnectionClosed => CloseCode::Normal,
        }
    }

    /// True when a Close frame can still be written for this error (the stream itself is not broken).
    pub fn is_protocol_failure(&self) -> bool {
        !matches!(self, WebSocketError::Io(_) | WebSocketError::ConnectionClosed)
    }
}
