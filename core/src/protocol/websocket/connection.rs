/*
 * connection.rs
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

//! WebSocket connection: owns the stream after the handshake, reassembles incoming messages,
//! answers control frames, and serializes outgoing frames through a single-writer lock.
//!
//! The stream is split in two. The read half belongs to the connection and is only touched by
//! `receive` / `close`. The write half sits behind a mutex shared with every `WebSocketSender`,
//! so each frame (or fragmented message) is written whole before the next one starts.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio::time::{timeout, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::WebSocketConfig;
use crate::protocol::websocket::close::{CloseCode, CloseFrame, CloseState};
use crate::protocol::websocket::control::{handle_control, ControlAction};
use crate::protocol::websocket::frame::{
    encode_frame, mask_key_for, Frame, FrameParser, Opcode, Role, MAX_HEADER_LEN,
};
use crate::protocol::websocket::message::{Message, Reassembly};
use crate::protocol::websocket::{WebSocketError, WebSocketHandler};

/// Outcome of `receive`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Receive {
    Message(Message),
    /// The peer closed; our Close has been sent and the stream shut down.
    Closed(CloseFrame),
    /// The cancellation token fired. Reassembly and close state are intact; `receive` may be called again.
    Cancelled,
}

/// Outcome of a send. Cancellation is reported before any byte of the frame is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    Sent,
    Cancelled,
}

/// Outcome of `close`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseOutcome {
    /// The peer answered with its own Close.
    Acknowledged(CloseFrame),
    /// No Close arrived within the configured timeout; the stream was shut down.
    TimedOut,
    /// The peer dropped the stream without answering.
    Dropped,
    /// The token fired. If it fired before our Close was written nothing was sent; otherwise the
    /// session has been torn down and later calls return `ConnectionClosed`. Unlike
    /// `Receive::Cancelled` this cannot be resumed once the Close is out.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Data,
    Control,
    Close,
}

impl FrameKind {
    fn of(opcode: Opcode) -> Self {
        match opcode {
            Opcode::Close => FrameKind::Close,
            Opcode::Ping | Opcode::Pong => FrameKind::Control,
            _ => FrameKind::Data,
        }
    }
}

struct WriteSide<S> {
    stream: Mutex<WriteHalf<S>>,
    role: Role,
    fragment_size: usize,
    close_sent: AtomicBool,
    shut_down: AtomicBool,
}

/// Cloneable handle for sending on a connection from any task.
pub struct WebSocketSender<S> {
    shared: Arc<WriteSide<S>>,
}

impl<S> Clone for WebSocketSender<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S> WebSocketSender<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn role(&self) -> Role {
        self.shared.role
    }

    pub fn is_close_sent(&self) -> bool {
        self.shared.close_sent.load(Ordering::Acquire)
    }

    /// The write side has been shut down (after the close handshake or a failure).
    pub fn is_shut_down(&self) -> bool {
        self.shared.shut_down.load(Ordering::Acquire)
    }

    /// Encode and write one frame. Callers sending `fin = false` fragments themselves are
    /// responsible for not interleaving two fragmented messages; `send_message` does that for you.
    pub async fn send(
        &self,
        opcode: Opcode,
        payload: &[u8],
        fin: bool,
        cancel: &CancellationToken,
    ) -> Result<SendStatus, WebSocketError> {
        let mut out = BytesMut::new();
        encode_frame(opcode, fin, payload, mask_key_for(self.shared.role)?, &mut out)?;
        self.write(&out, FrameKind::of(opcode), Some(cancel)).await
    }

    /// Send a whole message, split into `fragment_size` frames if needed. The writer lock is held
    /// for the whole message, so no other data frame can land between its fragments.
    pub async fn send_message(
        &self,
        message: &Message,
        cancel: &CancellationToken,
    ) -> Result<SendStatus, WebSocketError> {
        if !message.opcode.is_data() {
            return Err(WebSocketError::UnsupportedData("messages are text or binary"));
        }
        let out = self.encode_message(message)?;
        trace!(opcode = ?message.opcode, len = message.len(), "sending message");
        self.write(&out, FrameKind::Data, Some(cancel)).await
    }

    pub async fn send_text(&self, text: &str, cancel: &CancellationToken) -> Result<SendStatus, WebSocketError> {
        self.send_message(&Message::text(text), cancel).await
    }

    pub async fn send_binary(&self, data: &[u8], cancel: &CancellationToken) -> Result<SendStatus, WebSocketError> {
        self.send_message(&Message::binary(Bytes::copy_from_slice(data)), cancel)
            .await
    }

    pub async fn send_ping(&self, payload: &[u8], cancel: &CancellationToken) -> Result<SendStatus, WebSocketError> {
        self.send(Opcode::Ping, payload, true, cancel).await
    }

    pub async fn send_pong(&self, payload: &[u8], cancel: &CancellationToken) -> Result<SendStatus, WebSocketError> {
        self.send(Opcode::Pong, payload, true, cancel).await
    }

    /// Send a Close frame. A second call is a no-op; data sends fail with `ConnectionClosed` afterwards.
    pub async fn send_close(
        &self,
        frame: &CloseFrame,
        cancel: &CancellationToken,
    ) -> Result<SendStatus, WebSocketError> {
        self.close_with(frame, Some(cancel)).await
    }

    /// Shut down the write half. Idempotent.
    pub async fn shutdown(&self) -> Result<(), WebSocketError> {
        let mut stream = self.shared.stream.lock().await;
        if self.shared.shut_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        stream.shutdown().await?;
        Ok(())
    }

    async fn close_with(
        &self,
        frame: &CloseFrame,
        cancel: Option<&CancellationToken>,
    ) -> Result<SendStatus, WebSocketError> {
        let mut out = BytesMut::new();
        encode_frame(Opcode::Close, true, &frame.encode(), mask_key_for(self.shared.role)?, &mut out)?;
        debug!(code = ?frame.code, reason = %frame.reason, "sending close");
        self.write(&out, FrameKind::Close, cancel).await
    }

    /// Control reply from the receive path; not cancellable.
    async fn reply(&self, opcode: Opcode, payload: &[u8]) -> Result<SendStatus, WebSocketError> {
        let mut out = BytesMut::new();
        encode_frame(opcode, true, payload, mask_key_for(self.shared.role)?, &mut out)?;
        self.write(&out, FrameKind::of(opcode), None).await
    }

    fn encode_message(&self, message: &Message) -> Result<BytesMut, WebSocketError> {
        let payload = &message.payload[..];
        let size = self.shared.fragment_size;
        let count = payload.len().div_ceil(size).max(1);
        let mut out = BytesMut::with_capacity(payload.len() + MAX_HEADER_LEN * count);
        if payload.is_empty() {
            encode_frame(message.opcode, true, payload, mask_key_for(self.shared.role)?, &mut out)?;
            return Ok(out);
        }
        for (i, chunk) in payload.chunks(size).enumerate() {
            let opcode = if i == 0 { message.opcode } else { Opcode::Continuation };
            encode_frame(opcode, i + 1 == count, chunk, mask_key_for(self.shared.role)?, &mut out)?;
        }
        Ok(out)
    }

    async fn write(
        &self,
        bytes: &[u8],
        kind: FrameKind,
        cancel: Option<&CancellationToken>,
    ) -> Result<SendStatus, WebSocketError> {
        let mut stream = match cancel {
            Some(cancel) => {
                if cancel.is_cancelled() {
                    return Ok(SendStatus::Cancelled);
                }
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(SendStatus::Cancelled),
                    guard = self.shared.stream.lock() => guard,
                }
            }
            None => self.shared.stream.lock().await,
        };
        if self.shared.shut_down.load(Ordering::Acquire) {
            return Err(WebSocketError::ConnectionClosed);
        }
        match kind {
            FrameKind::Data if self.shared.close_sent.load(Ordering::Acquire) => {
                return Err(WebSocketError::ConnectionClosed);
            }
            FrameKind::Close if self.shared.close_sent.swap(true, Ordering::AcqRel) => {
                return Ok(SendStatus::Sent);
            }
            _ => {}
        }
        // From here on the frame is written whole; cancellation is no longer observed.
        if let Err(e) = write_all_flush(&mut *stream, bytes).await {
            self.shared.shut_down.store(true, Ordering::Release);
            return Err(e.into());
        }
        Ok(SendStatus::Sent)
    }
}

async fn write_all_flush<W: AsyncWrite + Unpin>(writer: &mut W, bytes: &[u8]) -> io::Result<()> {
    writer.write_all(bytes).await?;
    writer.flush().await
}

/// One WebSocket session over a duplex stream `S` (TCP stream, in-memory duplex, ...).
pub struct WebSocketConnection<S> {
    reader: ReadHalf<S>,
    read_buf: BytesMut,
    parser: FrameParser,
    reassembly: Reassembly,
    close: CloseState,
    sender: WebSocketSender<S>,
    config: WebSocketConfig,
    terminated: bool,
}

impl<S> WebSocketConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, config: WebSocketConfig) -> Self {
        Self::with_buffered(stream, config, BytesMut::new())
    }

    /// Like `new`, but starts with bytes that were read past the end of the HTTP head.
    pub fn with_buffered(stream: S, config: WebSocketConfig, buffered: BytesMut) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        let shared = Arc::new(WriteSide {
            stream: Mutex::new(writer),
            role: config.role,
            fragment_size: config.fragment_size.max(1),
            close_sent: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
        });
        Self {
            reader,
            read_buf: buffered,
            parser: FrameParser::new(config.role, config.max_frame_size),
            reassembly: Reassembly::new(config.max_message_size),
            close: CloseState::default(),
            sender: WebSocketSender { shared },
            config,
            terminated: false,
        }
    }

    pub fn sender(&self) -> WebSocketSender<S> {
        self.sender.clone()
    }

    pub fn config(&self) -> &WebSocketConfig {
        &self.config
    }

    pub fn close_state(&self) -> CloseState {
        let mut state = self.close.clone();
        state.close_sent = self.sender.is_close_sent();
        state
    }

    /// Close handshake finished, or the connection failed or was torn down.
    pub fn is_closed(&self) -> bool {
        self.terminated || self.close_state().is_closed()
    }

    /// Bytes of a fragmented message received so far.
    pub fn pending_len(&self) -> usize {
        self.reassembly.pending_len()
    }

    pub async fn send(
        &self,
        opcode: Opcode,
        payload: &[u8],
        fin: bool,
        cancel: &CancellationToken,
    ) -> Result<SendStatus, WebSocketError> {
        self.sender.send(opcode, payload, fin, cancel).await
    }

    pub async fn send_message(&self, message: &Message, cancel: &CancellationToken) -> Result<SendStatus, WebSocketError> {
        self.sender.send_message(message, cancel).await
    }

    /// Receive the next complete message. Control frames arriving meanwhile are handled here:
    /// pings are answered, and a Close from the peer is echoed and ends the session.
    ///
    /// Protocol violations send a Close with the matching status (1002, 1007, 1009), shut the
    /// stream down and return the error; later calls return `ConnectionClosed`.
    pub async fn receive(&mut self, cancel: &CancellationToken) -> Result<Receive, WebSocketError> {
        if self.terminated || self.close.close_received {
            return Err(WebSocketError::ConnectionClosed);
        }
        loop {
            let frame = match self.next_frame(cancel).await {
                Ok(Some(frame)) => frame,
                Ok(None) => return Ok(Receive::Cancelled),
                Err(e) => return Err(self.fail(e).await),
            };
            trace!(opcode = ?frame.opcode(), fin = frame.fin(), len = frame.payload.len(), "frame received");
            if frame.opcode().is_control() {
                match self.on_control(frame).await {
                    Ok(Some(peer)) => return Ok(Receive::Closed(peer)),
                    Ok(None) => continue,
                    Err(e) => return Err(self.fail(e).await),
                }
            }
            match self.reassembly.push(frame) {
                Ok(Some(message)) => return Ok(Receive::Message(message)),
                Ok(None) => {}
                Err(e) => return Err(self.fail(e).await),
            }
        }
    }

    /// Start the close handshake: send `frame`, then wait up to `close_timeout` for the peer's
    /// Close. Data frames arriving meanwhile are validated and discarded; pings are still answered.
    /// Protocol errors in them fail the connection as `receive` would.
    pub async fn close(&mut self, frame: CloseFrame, cancel: &CancellationToken) -> Result<CloseOutcome, WebSocketError> {
        if self.close.close_received {
            return Ok(CloseOutcome::Acknowledged(self.close.received.clone().unwrap_or_default()));
        }
        if self.terminated {
            return Err(WebSocketError::ConnectionClosed);
        }
        match self.sender.send_close(&frame, cancel).await {
            Ok(SendStatus::Sent) => {}
            Ok(SendStatus::Cancelled) => return Ok(CloseOutcome::Cancelled),
            Err(e) => return Err(self.fail(e).await),
        }
        self.close.close_sent = true;
        let deadline = Instant::now() + self.config.close_timeout;
        loop {
            let next = match timeout_at(deadline, self.next_frame(cancel)).await {
                Ok(next) => next,
                Err(_) => {
                    warn!(
                        timeout_ms = self.config.close_timeout.as_millis() as u64,
                        "peer did not answer close, dropping connection"
                    );
                    self.abort().await;
                    return Ok(CloseOutcome::TimedOut);
                }
            };
            let frame = match next {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    self.abort().await;
                    return Ok(CloseOutcome::Cancelled);
                }
                Err(WebSocketError::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    debug!("peer dropped the connection during close handshake");
                    self.abort().await;
                    return Ok(CloseOutcome::Dropped);
                }
                Err(e) => return Err(self.fail(e).await),
            };
            if !frame.opcode().is_control() {
                // Framing rules still apply; completed messages are dropped.
                match self.reassembly.push(frame) {
                    Ok(Some(message)) => {
                        trace!(opcode = ?message.opcode, len = message.len(), "discarding message while closing")
                    }
                    Ok(None) => {}
                    Err(e) => return Err(self.fail(e).await),
                }
                continue;
            }
            match self.on_control(frame).await {
                Ok(Some(peer)) => return Ok(CloseOutcome::Acknowledged(peer)),
                Ok(None) => {}
                Err(e) => return Err(self.fail(e).await),
            }
        }
    }

    /// Drive the session with an application handler until the connection closes, fails,
    /// the handler asks to stop, or `cancel` fires (then we close with 1001).
    pub async fn run<H: WebSocketHandler<S>>(
        &mut self,
        handler: &mut H,
        cancel: &CancellationToken,
    ) -> Result<(), WebSocketError> {
        handler.connected(self.sender());
        loop {
            match self.receive(cancel).await {
                Ok(Receive::Message(message)) => {
                    if let Some(reply) = handler.message(message) {
                        match self.sender.send_message(&reply, cancel).await {
                            Ok(_) => {}
                            Err(WebSocketError::ConnectionClosed) if self.sender.is_close_sent() => {
                                trace!("reply dropped, close already sent");
                            }
                            Err(e) => {
                                let e = self.fail(e).await;
                                handler.failed(&e);
                                return Err(e);
                            }
                        }
                    }
                    if handler.should_stop() {
                        return self.close_for(handler, CloseFrame::normal()).await;
                    }
                }
                Ok(Receive::Closed(frame)) => {
                    handler.close(&frame);
                    return Ok(());
                }
                Ok(Receive::Cancelled) => {
                    return self
                        .close_for(handler, CloseFrame::new(CloseCode::GoingAway, "shutting down"))
                        .await;
                }
                Err(e) => {
                    handler.failed(&e);
                    return Err(e);
                }
            }
        }
    }

    async fn close_for<H: WebSocketHandler<S>>(&mut self, handler: &mut H, frame: CloseFrame) -> Result<(), WebSocketError> {
        // The caller's token may already have fired; the close handshake runs on its own timeout.
        match self.close(frame, &CancellationToken::new()).await {
            Ok(CloseOutcome::Acknowledged(peer)) => {
                handler.close(&peer);
                Ok(())
            }
            Ok(_) => {
                handler.close(&CloseFrame::new(CloseCode::Abnormal, ""));
                Ok(())
            }
            Err(e) => {
                handler.failed(&e);
                Err(e)
            }
        }
    }

    async fn next_frame(&mut self, cancel: &CancellationToken) -> Result<Option<Frame>, WebSocketError> {
        loop {
            if let Some(frame) = self.parser.parse(&mut self.read_buf)? {
                return Ok(Some(frame));
            }
            self.read_buf.reserve(self.config.read_buffer_size);
            let n = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(None),
                read = self.reader.read_buf(&mut self.read_buf) => read?,
            };
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed without a close frame",
                )
                .into());
            }
        }
    }

    /// Returns the peer's Close once the handshake is complete.
    async fn on_control(&mut self, frame: Frame) -> Result<Option<CloseFrame>, WebSocketError> {
        self.close.close_sent = self.sender.is_close_sent();
        match handle_control(&frame, &mut self.close)? {
            ControlAction::Pong(payload) => {
                trace!(len = payload.len(), "answering ping");
                self.sender.reply(Opcode::Pong, &payload).await?;
                Ok(None)
            }
            ControlAction::Ignore => Ok(None),
            ControlAction::EchoClose { peer, reply } => {
                debug!(code = ?peer.code, reason = %peer.reason, "peer started close handshake");
                self.sender.close_with(&reply, None).await?;
                self.close.close_sent = true;
                self.abort().await;
                Ok(Some(peer))
            }
            ControlAction::CloseAcknowledged(peer) => {
                debug!(code = ?peer.code, "close handshake complete");
                self.abort().await;
                Ok(Some(peer))
            }
        }
    }

    /// Fail the connection: best-effort Close with the error's status, then shut the stream down.
    async fn fail(&mut self, error: WebSocketError) -> WebSocketError {
        self.terminated = true;
        self.reset_state();
        if error.is_protocol_failure() && !self.sender.is_close_sent() {
            let frame = CloseFrame::new(error.close_code(), error.to_string());
            match timeout(self.config.close_timeout, self.sender.close_with(&frame, None)).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => debug!(error = %e, "could not send close after failure"),
                Err(_) => debug!("timed out sending close after failure"),
            }
        }
        self.shutdown_writer().await;
        warn!(error = %error, "websocket connection failed");
        error
    }

    /// Tear down without sending anything further.
    async fn abort(&mut self) {
        self.terminated = true;
        self.reset_state();
        self.shutdown_writer().await;
    }

    async fn shutdown_writer(&self) {
        match timeout(self.config.close_timeout, self.sender.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "shutdown failed"),
            Err(_) => debug!("timed out shutting down write side"),
        }
    }

    fn reset_state(&mut self) {
        self.parser.reset();
        self.reassembly.reset();
        self.read_buf.clear();
    }
}
