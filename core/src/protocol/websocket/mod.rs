/*
 * mod.rs
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

//! WebSocket (RFC 6455): server-side upgrade negotiation, frame codec, and per-connection sessions.
//!
//! - `handshake`: recognise an upgrade request, compute Sec-WebSocket-Accept, build the 101 response.
//! - `frame`: incremental frame parser and frame encoder (masking by role).
//! - `message` / `control` / `close`: reassembly of fragmented messages, control-frame handling, close codes.
//! - `connection`: session that owns the duplex stream; `receive` / `send` / `close` with cancellation.

mod error;

pub mod client;
pub mod close;
pub mod connection;
pub mod control;
pub mod frame;
pub mod handler;
pub mod handshake;
pub mod message;

pub use client::WebSocketClient;
pub use close::{CloseCode, CloseFrame, CloseState};
pub use connection::{CloseOutcome, Receive, SendStatus, WebSocketConnection, WebSocketSender};
pub use error::WebSocketError;
pub use frame::{Frame, FrameHeader, FrameParser, Opcode, Role};
pub use handler::WebSocketHandler;
pub use message::Message;
