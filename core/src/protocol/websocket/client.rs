/*
 * client.rs
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

//! WebSocket client: TCP connect, opening handshake, then a client-role session (masked frames).

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::debug;

use crate::config::WebSocketConfig;
use crate::protocol::http::h1::{ParseState, ResponseParser};
use crate::protocol::websocket::handshake::{build_handshake_request, generate_key, verify_accept, HandshakeResponse};
use crate::protocol::websocket::{Role, WebSocketConnection, WebSocketError};

/// WebSocket client. Connect with `WebSocketClient::connect(addr, host, path, config)`.
pub struct WebSocketClient;

impl WebSocketClient {
    /// Connect to `addr`, send the upgrade request for `path` with `Host: host`, verify the 101
    /// response, and return a client-role connection. The role in `config` is forced to `Client`.
    pub async fn connect<A: ToSocketAddrs>(
        addr: A,
        host: &str,
        path: &str,
        config: WebSocketConfig,
    ) -> Result<WebSocketConnection<TcpStream>, WebSocketError> {
        let mut stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;

        let key = generate_key()?;
        let request = build_handshake_request(host, path, &key);
        stream.write_all(&request).await?;
        stream.flush().await?;

        let mut read_buf = BytesMut::with_capacity(4096);
        let mut parser = ResponseParser::new();
        let mut response = HandshakeResponse::default();
        loop {
            let n = stream.read_buf(&mut read_buf).await?;
            if n == 0 {
                return Err(WebSocketError::Handshake("connection closed during handshake".to_string()));
            }
            parser.receive(&mut read_buf, &mut response)?;
            if parser.state() == ParseState::HeadersComplete {
                break;
            }
        }
        match response.status {
            Some(101) => {}
            other => {
                return Err(WebSocketError::Handshake(format!(
                    "expected 101 Switching Protocols, got {:?}",
                    other
                )))
            }
        }
        verify_accept(response.accept.as_deref(), &key)?;
        debug!(host, path, "websocket client connected");

        // Anything after the head is already frame data from the server.
        Ok(WebSocketConnection::with_buffered(stream, config.role(Role::Client), read_buf))
    }
}
