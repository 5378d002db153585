/*
 * control.rs
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

//! Control frames (Close, Ping, Pong): decide what the session must do in response.
//!
//! Kept free of I/O so the session can run the action through its serialized writer.

use bytes::Bytes;

use crate::protocol::websocket::close::{CloseFrame, CloseState};
use crate::protocol::websocket::frame::{Frame, Opcode};
use crate::protocol::websocket::WebSocketError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlAction {
    /// Answer a Ping with a Pong carrying the same payload.
    Pong(Bytes),
    /// The peer started the close handshake; send `reply` and shut down.
    EchoClose { peer: CloseFrame, reply: CloseFrame },
    /// The peer answered our Close; the handshake is complete.
    CloseAcknowledged(CloseFrame),
    Ignore,
}

/// Apply one control frame to the close state and return the action to take.
pub fn handle_control(frame: &Frame, state: &mut CloseState) -> Result<ControlAction, WebSocketError> {
    match frame.opcode() {
        // Still answered after our Close: only data frames must stop.
        Opcode::Ping => Ok(ControlAction::Pong(frame.payload.clone())),
        Opcode::Pong => Ok(ControlAction::Ignore),
        Opcode::Close => {
            let peer = CloseFrame::parse(&frame.payload)?;
            state.close_received = true;
            state.received = Some(peer.clone());
            if state.close_sent {
                Ok(ControlAction::CloseAcknowledged(peer))
            } else {
                let reply = peer.reply();
                Ok(ControlAction::EchoClose { peer, reply })
            }
        }
        _ => Err(WebSocketError::Protocol("data frame passed to control handler")),
    }
}
