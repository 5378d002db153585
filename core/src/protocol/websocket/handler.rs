/*
 * handler.rs
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

//! WebSocket handler trait: the application side of a session driven by `WebSocketConnection::run`.

use crate::protocol::websocket::{CloseFrame, Message, WebSocketError, WebSocketSender};

/// Handler for WebSocket events. The connection calls it as messages arrive.
pub trait WebSocketHandler<S> {
    /// Handshake done. Keep `sender` to push messages from other tasks at any time.
    fn connected(&mut self, sender: WebSocketSender<S>);

    /// A complete message. A returned message is sent back on the same connection.
    fn message(&mut self, message: Message) -> Option<Message>;

    /// Close handshake finished (or the peer went away during it). `frame` is what the peer sent.
    fn close(&mut self, frame: &CloseFrame);

    /// Connection or protocol error. The connection is already closed when this is called.
    fn failed(&mut self, error: &WebSocketError);

    /// If true, `run()` starts a normal close after the current message. Default false.
    fn should_stop(&self) -> bool {
        false
    }
}
