/*
 * server.rs
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

//! WebSocket server host: accept loop, HTTP request head, upgrade negotiation, one task per connection.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ServerConfig, WebSocketConfig};
use crate::protocol::http::h1::{ParseState, RequestParser};
use crate::protocol::http::{Method, Request};
use crate::protocol::websocket::handshake::{negotiate, UPGRADE_REQUIRED_RESPONSE};
use crate::protocol::websocket::{WebSocketConnection, WebSocketError, WebSocketHandler};

const BAD_REQUEST_RESPONSE: &[u8] =
    b"HTTP/1.1 400 Bad Request\r\nConnection: close\r\nContent-Length: 0\r\n\r\n";

/// Accepts TCP connections and upgrades them. `factory` builds one handler per upgraded
/// connection from the peer address and request (so it can route on the path).
pub struct WebSocketServer<F> {
    listener: TcpListener,
    config: WebSocketConfig,
    factory: Arc<F>,
}

impl<F, H> WebSocketServer<F>
where
    F: Fn(SocketAddr, &Request) -> H + Send + Sync + 'static,
    H: WebSocketHandler<TcpStream> + Send + 'static,
{
    pub async fn bind(config: ServerConfig, factory: F) -> Result<Self, WebSocketError> {
        let listener = TcpListener::bind(config.listen).await?;
        info!(addr = %listener.local_addr()?, "websocket server listening");
        Ok(Self {
            listener,
            config: config.websocket,
            factory: Arc::new(factory),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept until `cancel` fires. Each connection gets a child token, so cancelling also
    /// closes open sessions with 1001.
    pub async fn run(self, cancel: CancellationToken) {
        loop {
            let (stream, peer) = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                },
            };
            let factory = Arc::clone(&self.factory);
            let config = self.config.clone();
            let cancel = cancel.child_token();
            tokio::spawn(async move {
                if let Err(e) = serve_connection(stream, peer, config, &*factory, cancel).await {
                    debug!(%peer, error = %e, "connection ended with error");
                }
            });
        }
        info!("websocket server stopped");
    }
}

/// Serve one accepted connection: read the request head, answer 101 or 426, then run the session.
pub async fn serve_connection<F, H>(
    mut stream: TcpStream,
    peer: SocketAddr,
    config: WebSocketConfig,
    factory: &F,
    cancel: CancellationToken,
) -> Result<(), WebSocketError>
where
    F: Fn(SocketAddr, &Request) -> H,
    H: WebSocketHandler<TcpStream>,
{
    stream.set_nodelay(true)?;
    let (request, buffered) = match read_request(&mut stream, &cancel).await {
        Ok(Some(head)) => head,
        Ok(None) => return Ok(()),
        Err(e) => {
            debug!(%peer, error = %e, "bad request head");
            stream.write_all(BAD_REQUEST_RESPONSE).await?;
            stream.shutdown().await?;
            return Err(e);
        }
    };
    let upgrade = match request.method {
        Method::Get => negotiate(&request),
        _ => None,
    };
    let upgrade = match upgrade {
        Some(upgrade) => upgrade,
        None => {
            debug!(%peer, method = request.method.as_str(), path = %request.path, "not a websocket upgrade");
            stream.write_all(UPGRADE_REQUIRED_RESPONSE).await?;
            stream.shutdown().await?;
            return Ok(());
        }
    };
    stream.write_all(&upgrade.response()).await?;
    stream.flush().await?;
    info!(%peer, path = %request.path, "websocket upgrade accepted");

    let mut handler = factory(peer, &request);
    let mut conn = WebSocketConnection::with_buffered(stream, config, buffered);
    conn.run(&mut handler, &cancel).await
}

/// Read until the request head is complete. `None` if the peer left first or `cancel` fired.
/// Bytes after the head are returned for the session.
async fn read_request(
    stream: &mut TcpStream,
    cancel: &CancellationToken,
) -> Result<Option<(Request, BytesMut)>, WebSocketError> {
    let mut buf = BytesMut::with_capacity(4096);
    let mut parser = RequestParser::new();
    let mut request = Request::default();
    loop {
        let n = tokio::select! {
            _ = cancel.cancelled() => return Ok(None),
            read = stream.read_buf(&mut buf) => read?,
        };
        if n == 0 {
            return Ok(None);
        }
        parser.receive(&mut buf, &mut request)?;
        if parser.state() == ParseState::HeadersComplete {
            return Ok(Some((request, buf)));
        }
    }
}
