/*
 * session.rs
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

//! Session behaviour over an in-memory duplex stream. The test side plays the client:
//! it writes masked frames and parses the server's unmasked frames.

use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio_util::sync::CancellationToken;

use canticle_core::config::WebSocketConfig;
use canticle_core::protocol::websocket::frame::encode_frame;
use canticle_core::protocol::websocket::{
    CloseCode, CloseFrame, CloseOutcome, Frame, FrameParser, Message, Opcode, Receive, Role, SendStatus,
    WebSocketConnection, WebSocketError,
};

/// The client end of the duplex stream.
struct Peer {
    stream: DuplexStream,
    buf: BytesMut,
    parser: FrameParser,
}

impl Peer {
    fn new(stream: DuplexStream) -> Self {
        Self {
            stream,
            buf: BytesMut::new(),
            parser: FrameParser::new(Role::Client, 1 << 30),
        }
    }

    async fn send(&mut self, opcode: Opcode, fin: bool, payload: &[u8]) {
        let mut out = BytesMut::new();
        encode_frame(opcode, fin, payload, Some([0x11, 0x22, 0x33, 0x44]), &mut out).unwrap();
        self.stream.write_all(&out).await.unwrap();
    }

    async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    async fn frame(&mut self) -> Frame {
        loop {
            if let Some(frame) = self.parser.parse(&mut self.buf).unwrap() {
                return frame;
            }
            let n = self.stream.read_buf(&mut self.buf).await.unwrap();
            assert!(n > 0, "unexpected EOF from server");
        }
    }

    async fn close_frame(&mut self) -> CloseFrame {
        let frame = self.frame().await;
        assert_eq!(frame.opcode(), Opcode::Close);
        CloseFrame::parse(&frame.payload).unwrap()
    }

    async fn expect_eof(&mut self) {
        let mut rest = Vec::new();
        self.stream.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty(), "unexpected trailing bytes: {:?}", rest);
    }
}

fn setup(config: WebSocketConfig) -> (WebSocketConnection<DuplexStream>, Peer) {
    let (server_io, client_io) = tokio::io::duplex(64 * 1024);
    (WebSocketConnection::new(server_io, config), Peer::new(client_io))
}

fn text_of(len: usize) -> String {
    (0..len).map(|i| (b'a' + (i % 26) as u8) as char).collect()
}

#[tokio::test]
async fn fragmented_text_reassembles_like_single_frame() {
    let (mut conn, mut peer) = setup(WebSocketConfig::default());
    let cancel = CancellationToken::new();
    let text = text_of(300);
    let bytes = text.as_bytes();

    peer.send(Opcode::Text, true, bytes).await;
    let whole = match conn.receive(&cancel).await.unwrap() {
        Receive::Message(m) => m,
        other => panic!("unexpected {:?}", other),
    };

    peer.send(Opcode::Text, false, &bytes[..100]).await;
    peer.send(Opcode::Continuation, false, &bytes[100..200]).await;
    peer.send(Opcode::Continuation, true, &bytes[200..]).await;
    let fragmented = match conn.receive(&cancel).await.unwrap() {
        Receive::Message(m) => m,
        other => panic!("unexpected {:?}", other),
    };

    assert_eq!(fragmented, whole);
    assert_eq!(fragmented, Message::text(text));
    assert_eq!(conn.pending_len(), 0);
}

#[tokio::test]
async fn continuation_as_first_frame_fails_with_protocol_error() {
    let (mut conn, mut peer) = setup(WebSocketConfig::default());
    let cancel = CancellationToken::new();
    peer.send(Opcode::Continuation, true, b"orphan").await;

    let err = conn.receive(&cancel).await.unwrap_err();
    assert!(matches!(err, WebSocketError::Protocol(_)), "got {:?}", err);
    assert!(conn.is_closed());

    let close = peer.close_frame().await;
    assert_eq!(close.code, Some(CloseCode::ProtocolError));
    peer.expect_eof().await;

    assert!(matches!(conn.receive(&cancel).await, Err(WebSocketError::ConnectionClosed)));
}

#[tokio::test]
async fn ping_between_fragments_is_answered_and_leaves_message_intact() {
    let (mut conn, mut peer) = setup(WebSocketConfig::default());
    let cancel = CancellationToken::new();
    let text = text_of(150);
    let bytes = text.as_bytes();

    peer.send(Opcode::Text, false, &bytes[..100]).await;
    peer.send(Opcode::Ping, true, b"\x00ping\xff").await;

    // Receive until the Pong shows up on the peer side, then cancel the pending receive.
    let (received, pong) = tokio::join!(conn.receive(&cancel), async {
        let pong = peer.frame().await;
        cancel.cancel();
        pong
    });
    assert_eq!(received.unwrap(), Receive::Cancelled);
    assert_eq!(pong.opcode(), Opcode::Pong);
    assert_eq!(&pong.payload[..], b"\x00ping\xff");
    assert_eq!(conn.pending_len(), 100);

    let cancel = CancellationToken::new();
    peer.send(Opcode::Continuation, true, &bytes[100..]).await;
    match conn.receive(&cancel).await.unwrap() {
        Receive::Message(m) => assert_eq!(m.as_text().unwrap(), text),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn peer_close_is_echoed_and_reported() {
    let (mut conn, mut peer) = setup(WebSocketConfig::default());
    let cancel = CancellationToken::new();
    peer.send(Opcode::Close, true, &CloseFrame::new(CloseCode::Normal, "bye").encode()).await;

    match conn.receive(&cancel).await.unwrap() {
        Receive::Closed(frame) => {
            assert_eq!(frame.code, Some(CloseCode::Normal));
            assert_eq!(frame.reason, "bye");
        }
        other => panic!("unexpected {:?}", other),
    }
    let state = conn.close_state();
    assert!(state.close_sent && state.close_received);
    assert!(conn.is_closed());

    let echo = peer.close_frame().await;
    assert_eq!(echo.code, Some(CloseCode::Normal));
    peer.expect_eof().await;
}

#[tokio::test]
async fn server_initiated_close_waits_for_peer() {
    let (mut conn, mut peer) = setup(WebSocketConfig::default());
    let cancel = CancellationToken::new();

    let (outcome, ()) = tokio::join!(conn.close(CloseFrame::new(CloseCode::GoingAway, "restart"), &cancel), async {
        let close = peer.close_frame().await;
        assert_eq!(close.code, Some(CloseCode::GoingAway));
        assert_eq!(close.reason, "restart");
        // Data after the server's Close is discarded; the peer then answers.
        peer.send(Opcode::Text, true, b"late").await;
        peer.send(Opcode::Close, true, &close.reply().encode()).await;
    });
    assert_eq!(outcome.unwrap(), CloseOutcome::Acknowledged(CloseFrame::new(CloseCode::GoingAway, "")));
    assert!(conn.is_closed());
    peer.expect_eof().await;
}

#[tokio::test]
async fn close_times_out_when_peer_is_silent() {
    let config = WebSocketConfig::default().close_timeout(Duration::from_millis(50));
    let (mut conn, mut peer) = setup(config);
    let cancel = CancellationToken::new();

    let outcome = conn.close(CloseFrame::normal(), &cancel).await.unwrap();
    assert_eq!(outcome, CloseOutcome::TimedOut);
    assert!(conn.is_closed());
    assert_eq!(peer.close_frame().await.code, Some(CloseCode::Normal));
    peer.expect_eof().await;
}

#[tokio::test]
async fn oversized_frame_fails_with_1009() {
    let config = WebSocketConfig::default().max_frame_size(1024);
    let (mut conn, mut peer) = setup(config);
    let cancel = CancellationToken::new();
    // Header only: 64-bit length far beyond the limit; no payload is ever sent.
    let mut header = vec![0x82, 0x80 | 127];
    header.extend_from_slice(&(1u64 << 40).to_be_bytes());
    header.extend_from_slice(&[0, 0, 0, 0]);
    peer.send_raw(&header).await;

    let err = conn.receive(&cancel).await.unwrap_err();
    assert!(matches!(err, WebSocketError::MessageTooBig { .. }));
    assert_eq!(peer.close_frame().await.code, Some(CloseCode::MessageTooBig));
}

#[tokio::test]
async fn oversized_reassembled_message_fails_with_1009() {
    let config = WebSocketConfig::default().max_message_size(150);
    let (mut conn, mut peer) = setup(config);
    let cancel = CancellationToken::new();
    peer.send(Opcode::Binary, false, &[0u8; 100]).await;
    peer.send(Opcode::Continuation, true, &[0u8; 100]).await;

    let err = conn.receive(&cancel).await.unwrap_err();
    assert!(matches!(err, WebSocketError::MessageTooBig { size: 200, limit: 150 }));
    assert_eq!(peer.close_frame().await.code, Some(CloseCode::MessageTooBig));
}

#[tokio::test]
async fn invalid_utf8_text_fails_with_1007() {
    let (mut conn, mut peer) = setup(WebSocketConfig::default());
    let cancel = CancellationToken::new();
    peer.send(Opcode::Text, true, &[0xc3, 0x28]).await;

    assert!(matches!(
        conn.receive(&cancel).await,
        Err(WebSocketError::InvalidPayload(_))
    ));
    assert_eq!(peer.close_frame().await.code, Some(CloseCode::InvalidPayload));
}

#[tokio::test]
async fn unmasked_client_frame_is_rejected() {
    let (mut conn, mut peer) = setup(WebSocketConfig::default());
    let cancel = CancellationToken::new();
    let mut out = BytesMut::new();
    encode_frame(Opcode::Text, true, b"plain", None, &mut out).unwrap();
    peer.send_raw(&out).await;

    assert!(matches!(conn.receive(&cancel).await, Err(WebSocketError::Protocol(_))));
    assert_eq!(peer.close_frame().await.code, Some(CloseCode::ProtocolError));
}

#[tokio::test]
async fn peer_disconnect_without_close_is_an_io_error() {
    let (mut conn, peer) = setup(WebSocketConfig::default());
    let cancel = CancellationToken::new();
    drop(peer);
    match conn.receive(&cancel).await {
        Err(WebSocketError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn cancelled_receive_returns_promptly() {
    let (mut conn, _peer) = setup(WebSocketConfig::default());
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });
    let received = tokio::time::timeout(Duration::from_secs(5), conn.receive(&cancel))
        .await
        .expect("receive did not observe cancellation");
    assert_eq!(received.unwrap(), Receive::Cancelled);
    assert!(!conn.is_closed());
}

#[tokio::test]
async fn cancelled_send_writes_nothing() {
    let (conn, mut peer) = setup(WebSocketConfig::default());
    let cancel = CancellationToken::new();
    cancel.cancel();
    let status = conn.send(Opcode::Text, b"never", true, &cancel).await.unwrap();
    assert_eq!(status, SendStatus::Cancelled);

    let live = CancellationToken::new();
    conn.send(Opcode::Text, b"after", true, &live).await.unwrap();
    let frame = peer.frame().await;
    assert_eq!(&frame.payload[..], b"after");
}

#[tokio::test]
async fn long_message_is_sent_in_fragments() {
    let config = WebSocketConfig::default().fragment_size(10);
    let (conn, mut peer) = setup(config);
    let cancel = CancellationToken::new();
    let text = text_of(25);
    conn.send_message(&Message::text(text.clone()), &cancel).await.unwrap();

    let first = peer.frame().await;
    let second = peer.frame().await;
    let third = peer.frame().await;
    assert_eq!((first.opcode(), first.fin()), (Opcode::Text, false));
    assert_eq!((second.opcode(), second.fin()), (Opcode::Continuation, false));
    assert_eq!((third.opcode(), third.fin()), (Opcode::Continuation, true));
    assert!(!first.header.masked);
    let mut joined = first.payload.to_vec();
    joined.extend_from_slice(&second.payload);
    joined.extend_from_slice(&third.payload);
    assert_eq!(joined, text.as_bytes());
}

#[tokio::test]
async fn data_after_close_is_refused() {
    let (conn, mut peer) = setup(WebSocketConfig::default());
    let cancel = CancellationToken::new();
    let sender = conn.sender();
    sender.send_close(&CloseFrame::normal(), &cancel).await.unwrap();
    assert!(matches!(
        sender.send_text("too late", &cancel).await,
        Err(WebSocketError::ConnectionClosed)
    ));
    // A second close is a no-op.
    assert_eq!(sender.send_close(&CloseFrame::normal(), &cancel).await.unwrap(), SendStatus::Sent);
    assert_eq!(peer.close_frame().await.code, Some(CloseCode::Normal));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_sends_never_interleave() {
    // A small pipe forces both writers to block part-way through their frames.
    let (server_io, client_io) = tokio::io::duplex(1024);
    let conn = WebSocketConnection::new(server_io, WebSocketConfig::default());
    let mut peer = Peer::new(client_io);
    let cancel = CancellationToken::new();

    let mut tasks = Vec::new();
    for byte in [0xaau8, 0xbb] {
        let sender = conn.sender();
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            let payload = vec![byte; 100_000];
            sender.send(Opcode::Binary, &payload, true, &cancel).await.unwrap()
        }));
    }

    let mut seen = Vec::new();
    for _ in 0..2 {
        let frame = peer.frame().await;
        assert_eq!(frame.opcode(), Opcode::Binary);
        assert!(frame.fin());
        assert_eq!(frame.payload.len(), 100_000);
        let first = frame.payload[0];
        assert!(frame.payload.iter().all(|b| *b == first), "frame bytes interleaved");
        seen.push(first);
    }
    for task in tasks {
        assert_eq!(task.await.unwrap(), SendStatus::Sent);
    }
    seen.sort();
    assert_eq!(seen, vec![0xaa, 0xbb]);
}

#[tokio::test]
async fn ping_during_close_is_answered() {
    let (mut conn, mut peer) = setup(WebSocketConfig::default());
    let cancel = CancellationToken::new();

    let (outcome, pong) = tokio::join!(conn.close(CloseFrame::normal(), &cancel), async {
        let close = peer.close_frame().await;
        peer.send(Opcode::Ping, true, b"hb").await;
        let pong = peer.frame().await;
        peer.send(Opcode::Close, true, &close.reply().encode()).await;
        pong
    });
    assert_eq!(pong.opcode(), Opcode::Pong);
    assert_eq!(&pong.payload[..], b"hb");
    assert_eq!(outcome.unwrap(), CloseOutcome::Acknowledged(CloseFrame::normal()));
    peer.expect_eof().await;
}

#[tokio::test]
async fn orphan_continuation_while_closing_fails_the_connection() {
    let (mut conn, mut peer) = setup(WebSocketConfig::default());
    let cancel = CancellationToken::new();

    let (outcome, ()) = tokio::join!(conn.close(CloseFrame::normal(), &cancel), async {
        assert_eq!(peer.close_frame().await.code, Some(CloseCode::Normal));
        peer.send(Opcode::Continuation, true, b"orphan").await;
    });
    assert!(matches!(outcome, Err(WebSocketError::Protocol(_))), "got {:?}", outcome);
    assert!(conn.is_closed());
    // Our Close is already out; nothing else follows it.
    peer.expect_eof().await;
}

#[tokio::test]
async fn cancelled_close_ends_the_session() {
    let (mut conn, mut peer) = setup(WebSocketConfig::default());
    let cancel = CancellationToken::new();

    let (outcome, ()) = tokio::join!(conn.close(CloseFrame::normal(), &cancel), async {
        peer.close_frame().await;
        cancel.cancel();
    });
    assert_eq!(outcome.unwrap(), CloseOutcome::Cancelled);
    assert!(conn.is_closed());
    let retry = CancellationToken::new();
    assert!(matches!(
        conn.close(CloseFrame::normal(), &retry).await,
        Err(WebSocketError::ConnectionClosed)
    ));
}

#[tokio::test]
async fn send_cancelled_while_waiting_for_writer() {
    // The peer does not read yet, so the first send blocks holding the writer lock.
    let (server_io, client_io) = tokio::io::duplex(1024);
    let conn = WebSocketConnection::new(server_io, WebSocketConfig::default());
    let mut peer = Peer::new(client_io);

    let sender = conn.sender();
    let first = tokio::spawn(async move {
        let live = CancellationToken::new();
        sender.send(Opcode::Binary, &vec![0xaa; 100_000], true, &live).await.unwrap()
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!first.is_finished());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });
    let status = tokio::time::timeout(Duration::from_secs(5), conn.send(Opcode::Text, b"never", true, &cancel))
        .await
        .expect("send did not observe cancellation")
        .unwrap();
    assert_eq!(status, SendStatus::Cancelled);

    let frame = peer.frame().await;
    assert_eq!(frame.opcode(), Opcode::Binary);
    assert!(frame.fin());
    assert_eq!(frame.payload.len(), 100_000);
    assert!(frame.payload.iter().all(|b| *b == 0xaa));
    assert_eq!(first.await.unwrap(), SendStatus::Sent);

    // The next frame on the wire is the following send, not any part of the cancelled one.
    conn.send(Opcode::Text, b"after", true, &CancellationToken::new()).await.unwrap();
    let next = peer.frame().await;
    assert_eq!(next.opcode(), Opcode::Text);
    assert_eq!(&next.payload[..], b"after");
}
