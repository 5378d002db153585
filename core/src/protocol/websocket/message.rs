/*
 * message.rs
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

//! Application messages and reassembly of fragmented data frames (RFC 6455 §5.4).

use bytes::{Bytes, BytesMut};

use crate::protocol::websocket::frame::{Frame, Opcode};
use crate::protocol::websocket::WebSocketError;

/// A complete message: the opcode of its first frame and the concatenated payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub opcode: Opcode,
    pub payload: Bytes,
}

impl Message {
    pub fn text(text: impl Into<String>) -> Self {
        let text: String = text.into();
        Self {
            opcode: Opcode::Text,
            payload: Bytes::from(text),
        }
    }

    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self {
            opcode: Opcode::Binary,
            payload: data.into(),
        }
    }

    pub fn is_text(&self) -> bool {
        self.opcode == Opcode::Text
    }

    pub fn is_binary(&self) -> bool {
        self.opcode == Opcode::Binary
    }

    /// Payload as text. Received Text messages are validated on arrival, so this only fails for Binary.
    pub fn as_text(&self) -> Result<&str, WebSocketError> {
        if !self.is_text() {
            return Err(WebSocketError::UnsupportedData("expected a text message"));
        }
        std::str::from_utf8(&self.payload)
            .map_err(|_| WebSocketError::InvalidPayload("text message is not valid UTF-8"))
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Per-connection reassembly state: the opcode of the message in progress and its bytes so far.
pub struct Reassembly {
    pending_opcode: Option<Opcode>,
    pending: BytesMut,
    max_message: usize,
}

impl Reassembly {
    pub fn new(max_message: usize) -> Self {
        Self {
            pending_opcode: None,
            pending: BytesMut::new(),
            max_message,
        }
    }

    /// No fragmented message in progress.
    pub fn is_empty(&self) -> bool {
        self.pending_opcode.is_none()
    }

    pub fn pending_opcode(&self) -> Option<Opcode> {
        self.pending_opcode
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn reset(&mut self) {
        self.pending_opcode = None;
        self.pending = BytesMut::new();
    }

    /// Add one data frame. Returns the message once the frame with FIN completes it.
    pub fn push(&mut self, frame: Frame) -> Result<Option<Message>, WebSocketError> {
        let opcode = frame.opcode();
        match (self.pending_opcode, opcode) {
            (None, Opcode::Text) | (None, Opcode::Binary) => {
                self.check_size(frame.payload.len())?;
                if frame.fin() {
                    return complete(opcode, frame.payload).map(Some);
                }
                self.pending_opcode = Some(opcode);
                self.pending.extend_from_slice(&frame.payload);
                Ok(None)
            }
            (Some(pending_opcode), Opcode::Continuation) => {
                self.check_size(self.pending.len() + frame.payload.len())?;
                self.pending.extend_from_slice(&frame.payload);
                if !frame.fin() {
                    return Ok(None);
                }
                let payload = self.pending.split().freeze();
                self.pending_opcode = None;
                complete(pending_opcode, payload).map(Some)
            }
            (None, Opcode::Continuation) => Err(WebSocketError::Protocol(
                "continuation frame without a message in progress",
            )),
            (Some(_), Opcode::Text) | (Some(_), Opcode::Binary) => Err(WebSocketError::Protocol(
                "new data frame while a fragmented message is in progress",
            )),
            (_, _) => Err(WebSocketError::Protocol("control frame is not part of a message")),
        }
    }

    fn check_size(&self, size: usize) -> Result<(), WebSocketError> {
        if size > self.max_message {
            return Err(WebSocketError::MessageTooBig {
                size: size as u64,
                limit: self.max_message,
            });
        }
        Ok(())
    }
}

fn complete(opcode: Opcode, payload: Bytes) -> Result<Message, WebSocketError> {
    if opcode == Opcode::Text && std::str::from_utf8(&payload).is_err() {
        return Err(WebSocketError::InvalidPayload("text message is not valid UTF-8"));
    }
    Ok(Message { opcode, payload })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::websocket::frame::FrameHeader;

    fn frame(opcode: Opcode, fin: bool, payload: &[u8]) -> Frame {
        Frame {
            header: FrameHeader {
                fin,
                opcode,
                masked: false,
                payload_len: payload.len() as u64,
                mask_key: None,
            },
            payload: Bytes::copy_from_slice(payload),
        }
    }

    #[test]
    fn single_frame_message_delivered_immediately() {
        let mut r = Reassembly::new(1024);
        let msg = r.push(frame(Opcode::Binary, true, b"\x00\x01")).unwrap().unwrap();
        assert!(msg.is_binary());
        assert_eq!(&msg.payload[..], b"\x00\x01");
        assert!(r.is_empty());
    }

    #[test]
    fn three_fragments_reassemble() {
        let text: String = (0..300).map(|i| (b'a' + (i % 26) as u8) as char).collect();
        let bytes = text.as_bytes();
        let mut r = Reassembly::new(1024);
        assert!(r.push(frame(Opcode::Text, false, &bytes[..100])).unwrap().is_none());
        assert_eq!(r.pending_opcode(), Some(Opcode::Text));
        assert!(r.push(frame(Opcode::Continuation, false, &bytes[100..200])).unwrap().is_none());
        assert_eq!(r.pending_len(), 200);
        let msg = r.push(frame(Opcode::Continuation, true, &bytes[200..])).unwrap().unwrap();
        assert_eq!(msg, Message::text(text.clone()));
        assert!(r.is_empty());
        assert_eq!(r.pending_len(), 0);
    }

    #[test]
    fn continuation_without_start_is_protocol_error() {
        let mut r = Reassembly::new(1024);
        assert!(matches!(
            r.push(frame(Opcode::Continuation, true, b"x")),
            Err(WebSocketError::Protocol(_))
        ));
    }

    #[test]
    fn new_message_mid_fragmentation_is_protocol_error() {
        let mut r = Reassembly::new(1024);
        r.push(frame(Opcode::Text, false, b"a")).unwrap();
        assert!(matches!(
            r.push(frame(Opcode::Binary, true, b"b")),
            Err(WebSocketError::Protocol(_))
        ));
    }

    #[test]
    fn empty_first_fragment_still_starts_a_message() {
        let mut r = Reassembly::new(1024);
        assert!(r.push(frame(Opcode::Binary, false, b"")).unwrap().is_none());
        assert!(!r.is_empty());
        let msg = r.push(frame(Opcode::Continuation, true, b"z")).unwrap().unwrap();
        assert!(msg.is_binary());
    }

    #[test]
    fn accumulated_size_is_capped() {
        let mut r = Reassembly::new(10);
        r.push(frame(Opcode::Binary, false, &[0; 6])).unwrap();
        match r.push(frame(Opcode::Continuation, true, &[0; 6])) {
            Err(WebSocketError::MessageTooBig { size, limit }) => {
                assert_eq!(size, 12);
                assert_eq!(limit, 10);
            }
            other => panic!("expected MessageTooBig, got {:?}", other),
        }
    }

    #[test]
    fn invalid_utf8_text_rejected() {
        let mut r = Reassembly::new(1024);
        r.push(frame(Opcode::Text, false, &[0xe2, 0x82])).unwrap();
        assert!(matches!(
            r.push(frame(Opcode::Continuation, true, &[0xff])),
            Err(WebSocketError::InvalidPayload(_))
        ));
    }

    #[test]
    fn utf8_split_across_fragments_accepted() {
        let mut r = Reassembly::new(1024);
        r.push(frame(Opcode::Text, false, &[0xe2, 0x82])).unwrap();
        let msg = r.push(frame(Opcode::Continuation, true, &[0xac])).unwrap().unwrap();
        assert_eq!(msg.as_text().unwrap(), "€");
    }

    #[test]
    fn as_text_rejects_binary() {
        assert!(Message::binary(&b"abc"[..]).as_text().is_err());
    }
}
