/*
 * frame.rs
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

//! WebSocket frame format (RFC 6455 §5): incremental parser for receive, encoder for send (masking by role).

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;

use crate::protocol::websocket::WebSocketError;

/// Control frames (Close, Ping, Pong) carry at most 125 payload bytes.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Largest header: 2 basic bytes + 8 extended length + 4 mask key.
pub const MAX_HEADER_LEN: usize = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    /// Decode the low nibble of the first header byte. Reserved opcodes are a protocol error.
    pub fn from_u8(value: u8) -> Result<Self, WebSocketError> {
        match value {
            0x0 => Ok(Opcode::Continuation),
            0x1 => Ok(Opcode::Text),
            0x2 => Ok(Opcode::Binary),
            0x8 => Ok(Opcode::Close),
            0x9 => Ok(Opcode::Ping),
            0xA => Ok(Opcode::Pong),
            _ => Err(WebSocketError::Protocol("reserved opcode")),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
        }
    }

    pub fn is_control(self) -> bool {
        matches!(self, Opcode::Close | Opcode::Ping | Opcode::Pong)
    }

    /// Text or Binary: the opcodes that can start a message.
    pub fn is_data(self) -> bool {
        matches!(self, Opcode::Text | Opcode::Binary)
    }
}

/// Which end of the connection we are. Clients mask every frame they send; servers never do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub fin: bool,
    pub opcode: Opcode,
    pub masked: bool,
    pub payload_len: u64,
    pub mask_key: Option<[u8; 4]>,
}

/// One decoded frame. The payload is already unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Bytes,
}

impl Frame {
    pub fn fin(&self) -> bool {
        self.header.fin
    }

    pub fn opcode(&self) -> Opcode {
        self.header.opcode
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    AwaitingBasicHeader,
    /// 2 or 8 bytes of big-endian length follow the basic header.
    AwaitingExtendedLength(usize),
    AwaitingMaskKey,
    AwaitingPayload,
}

/// Incremental parser for incoming frames.
///
/// Feed it the connection's read buffer each time more bytes arrive; it consumes only the bytes it
/// has interpreted and keeps its position across calls, so frames split over any number of reads
/// (down to one byte at a time) decode the same as frames that arrive whole.
pub struct FrameParser {
    role: Role,
    max_payload: usize,
    state: ParseState,
    fin: bool,
    opcode: Opcode,
    masked: bool,
    payload_len: u64,
    mask_key: Option<[u8; 4]>,
}

impl FrameParser {
    /// `role` is the role of the receiving endpoint; it decides which masking direction is legal.
    pub fn new(role: Role, max_payload: usize) -> Self {
        Self {
            role,
            max_payload,
            state: ParseState::AwaitingBasicHeader,
            fin: false,
            opcode: Opcode::Continuation,
            masked: false,
            payload_len: 0,
            mask_key: None,
        }
    }

    /// True between frames (no partially parsed header pending).
    pub fn is_idle(&self) -> bool {
        self.state == ParseState::AwaitingBasicHeader
    }

    pub fn reset(&mut self) {
        self.state = ParseState::AwaitingBasicHeader;
        self.fin = false;
        self.opcode = Opcode::Continuation;
        self.masked = false;
        self.payload_len = 0;
        self.mask_key = None;
    }

    /// Parse as much of `buf` as possible. Returns `Ok(None)` when more bytes are needed.
    pub fn parse(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, WebSocketError> {
        loop {
            match self.state {
                ParseState::AwaitingBasicHeader => {
                    if buf.len() < 2 {
                        return Ok(None);
                    }
                    let b0 = buf.get_u8();
                    let b1 = buf.get_u8();
                    if b0 & 0x70 != 0 {
                        return Err(WebSocketError::Protocol("reserved bits set without extension"));
                    }
                    self.fin = (b0 & 0x80) != 0;
                    self.opcode = Opcode::from_u8(b0 & 0x0f)?;
                    self.masked = (b1 & 0x80) != 0;
                    self.mask_key = None;
                    let len7 = b1 & 0x7f;
                    if self.opcode.is_control() {
                        if !self.fin {
                            return Err(WebSocketError::Protocol("fragmented control frame"));
                        }
                        if len7 as usize > MAX_CONTROL_PAYLOAD {
                            return Err(WebSocketError::Protocol("control frame payload too long"));
                        }
                    }
                    match (self.role, self.masked) {
                        (Role::Server, false) => {
                            return Err(WebSocketError::Protocol("client frame must be masked"));
                        }
                        (Role::Client, true) => {
                            return Err(WebSocketError::Protocol("server frame must not be masked"));
                        }
                        _ => {}
                    }
                    self.state = match len7 {
                        126 => ParseState::AwaitingExtendedLength(2),
                        127 => ParseState::AwaitingExtendedLength(8),
                        n => {
                            self.payload_len = n as u64;
                            self.after_length()?
                        }
                    };
                }
                ParseState::AwaitingExtendedLength(width) => {
                    if buf.len() < width {
                        return Ok(None);
                    }
                    let len = if width == 2 {
                        buf.get_u16() as u64
                    } else {
                        buf.get_u64()
                    };
                    if len >> 63 != 0 {
                        return Err(WebSocketError::Protocol("payload length has most significant bit set"));
                    }
                    self.payload_len = len;
                    self.state = self.after_length()?;
                }
                ParseState::AwaitingMaskKey => {
                    if buf.len() < 4 {
                        return Ok(None);
                    }
                    let mut key = [0u8; 4];
                    buf.copy_to_slice(&mut key);
                    self.mask_key = Some(key);
                    self.state = ParseState::AwaitingPayload;
                }
                ParseState::AwaitingPayload => {
                    // Bounded by max_payload in after_length().
                    let len = self.payload_len as usize;
                    if buf.len() < len {
                        buf.reserve(len - buf.len());
                        return Ok(None);
                    }
                    let mut payload = buf.split_to(len);
                    if let Some(key) = self.mask_key {
                        apply_mask(&mut payload, key);
                    }
                    let header = FrameHeader {
                        fin: self.fin,
                        opcode: self.opcode,
                        masked: self.masked,
                        payload_len: self.payload_len,
                        mask_key: self.mask_key,
                    };
                    self.state = ParseState::AwaitingBasicHeader;
                    return Ok(Some(Frame {
                        header,
                        payload: payload.freeze(),
                    }));
                }
            }
        }
    }

    fn after_length(&self) -> Result<ParseState, WebSocketError> {
        if self.payload_len > self.max_payload as u64 {
            return Err(WebSocketError::MessageTooBig {
                size: self.payload_len,
                limit: self.max_payload,
            });
        }
        Ok(if self.masked {
            ParseState::AwaitingMaskKey
        } else {
            ParseState::AwaitingPayload
        })
    }
}

/// Encode one frame into `out`. With `mask_key` the mask bit is set and the payload is masked.
pub fn encode_frame(
    opcode: Opcode,
    fin: bool,
    payload: &[u8],
    mask_key: Option<[u8; 4]>,
    out: &mut BytesMut,
) -> Result<(), WebSocketError> {
    let len = payload.len();
    if opcode.is_control() {
        if !fin {
            return Err(WebSocketError::Protocol("control frames must not be fragmented"));
        }
        if len > MAX_CONTROL_PAYLOAD {
            return Err(WebSocketError::Protocol("control frame payload too long"));
        }
    }
    out.reserve(MAX_HEADER_LEN + len);
    let fin_bit: u8 = if fin { 0x80 } else { 0 };
    out.put_u8(fin_bit | opcode.as_u8());
    let mask_bit: u8 = if mask_key.is_some() { 0x80 } else { 0 };
    if len <= 125 {
        out.put_u8(mask_bit | len as u8);
    } else if len <= 0xffff {
        out.put_u8(mask_bit | 126);
        out.put_u16(len as u16);
    } else {
        out.put_u8(mask_bit | 127);
        out.put_u64(len as u64);
    }
    match mask_key {
        Some(key) => {
            out.put_slice(&key);
            let start = out.len();
            out.put_slice(payload);
            apply_mask(&mut out[start..], key);
        }
        None => out.put_slice(payload),
    }
    Ok(())
}

/// XOR `payload` with the 4-byte key in place. Applying it twice restores the input.
pub fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, b) in payload.iter_mut().enumerate() {
        *b ^= key[i & 3];
    }
}

/// Mask key for the next outgoing frame: a fresh random key for clients, none for servers.
pub fn mask_key_for(role: Role) -> Result<Option<[u8; 4]>, WebSocketError> {
    match role {
        Role::Server => Ok(None),
        Role::Client => {
            let mut key = [0u8; 4];
            getrandom::getrandom(&mut key)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
            Ok(Some(key))
        }
    }
}
