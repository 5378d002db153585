/*
 * config.rs
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

//! Server configuration: listen address and WebSocket limits, loaded from and saved to an XML file.
//! All XML read/write uses the quick_xml reader/writer.
//!
//! ```xml
//! <server>
//!   <listen>127.0.0.1:8080</listen>
//!   <websocket>
//!     <max-frame-size>16777216</max-frame-size>
//!     <max-message-size>16777216</max-message-size>
//!     <fragment-size>65536</fragment-size>
//!     <close-timeout-ms>5000</close-timeout-ms>
//!     <read-buffer-size>8192</read-buffer-size>
//!   </websocket>
//! </server>
//! ```

use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::reader::Reader;
use quick_xml::writer::Writer;
use thiserror::Error;

use crate::protocol::websocket::Role;

pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 << 20;
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 << 20;
pub const DEFAULT_FRAGMENT_SIZE: usize = 64 << 10;
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8192;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot access config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML parse error: {0}")]
    Xml(String),

    #[error("XML write error: {0}")]
    Write(String),

    #[error("invalid value for <{element}>: {value:?}")]
    InvalidValue { element: String, value: String },
}

/// Limits and behaviour of one WebSocket session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebSocketConfig {
    pub role: Role,
    /// Largest single incoming frame payload; larger frames fail the connection with 1009.
    pub max_frame_size: usize,
    /// Largest reassembled incoming message.
    pub max_message_size: usize,
    /// Outgoing messages longer than this are sent as several frames.
    pub fragment_size: usize,
    /// How long to wait for the peer's Close after sending ours.
    pub close_timeout: Duration,
    pub read_buffer_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            role: Role::Server,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            fragment_size: DEFAULT_FRAGMENT_SIZE,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

impl WebSocketConfig {
    pub fn client() -> Self {
        Self {
            role: Role::Client,
            ..Self::default()
        }
    }

    pub fn role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Zero is treated as one byte per fragment.
    pub fn fragment_size(mut self, size: usize) -> Self {
        self.fragment_size = size.max(1);
        self
    }

    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub websocket: WebSocketConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8080)),
            websocket: WebSocketConfig::default(),
        }
    }
}

/// Load the server configuration file. Missing elements keep their defaults.
pub fn load_server_config(path: &Path) -> Result<ServerConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_server_config(&content)
}

/// Parse server configuration XML. Unknown elements are ignored.
pub fn parse_server_config(content: &str) -> Result<ServerConfig, ConfigError> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut config = ServerConfig::default();
    let mut element_name = Vec::<u8>::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Err(e) => return Err(ConfigError::Xml(e.to_string())),
            Ok(Event::Eof) => break,
            Ok(Event::Start(e)) => {
                element_name.clear();
                element_name.extend_from_slice(e.name().as_ref());
            }
            Ok(Event::Text(e)) => {
                if element_name.is_empty() {
                    continue;
                }
                let text = e
                    .unescape()
                    .map_err(|e| ConfigError::Xml(e.to_string()))?
                    .trim()
                    .to_string();
                apply_setting(&mut config, &element_name, text)?;
                element_name.clear();
            }
            Ok(Event::End(_)) => element_name.clear(),
            _ => {}
        }
        buf.clear();
    }
    Ok(config)
}

fn apply_setting(config: &mut ServerConfig, element: &[u8], text: String) -> Result<(), ConfigError> {
    let ws = &mut config.websocket;
    match element {
        b"listen" => config.listen = parse_value("listen", text)?,
        b"max-frame-size" => ws.max_frame_size = parse_value("max-frame-size", text)?,
        b"max-message-size" => ws.max_message_size = parse_value("max-message-size", text)?,
        b"fragment-size" => {
            let size: usize = parse_value("fragment-size", text)?;
            ws.fragment_size = size.max(1);
        }
        b"close-timeout-ms" => {
            ws.close_timeout = Duration::from_millis(parse_value("close-timeout-ms", text)?);
        }
        b"read-buffer-size" => {
            let size: usize = parse_value("read-buffer-size", text)?;
            ws.read_buffer_size = size.max(1);
        }
        _ => {}
    }
    Ok(())
}

fn parse_value<T: FromStr>(element: &str, text: String) -> Result<T, ConfigError> {
    text.parse::<T>().map_err(|_| ConfigError::InvalidValue {
        element: element.to_string(),
        value: text,
    })
}

/// Build server configuration XML (UTF-8).
pub fn server_config_to_xml(config: &ServerConfig) -> Result<Vec<u8>, ConfigError> {
    let ws = &config.websocket;
    let mut out = Vec::new();
    let mut writer = Writer::new_with_indent(&mut out, b' ', 2);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(|e| ConfigError::Write(e.to_string()))?;
    writer
        .write_event(Event::Start(BytesStart::new("server")))
        .map_err(|e| ConfigError::Write(e.to_string()))?;
    write_element(&mut writer, "listen", &config.listen.to_string())?;
    writer
        .write_event(Event::Start(BytesStart::new("websocket")))
        .map_err(|e| ConfigError::Write(e.to_string()))?;
    write_element(&mut writer, "max-frame-size", &ws.max_frame_size.to_string())?;
    write_element(&mut writer, "max-message-size", &ws.max_message_size.to_string())?;
    write_element(&mut writer, "fragment-size", &ws.fragment_size.to_string())?;
    write_element(&mut writer, "close-timeout-ms", &ws.close_timeout.as_millis().to_string())?;
    write_element(&mut writer, "read-buffer-size", &ws.read_buffer_size.to_string())?;
    writer
        .write_event(Event::End(BytesEnd::new("websocket")))
        .map_err(|e| ConfigError::Write(e.to_string()))?;
    writer
        .write_event(Event::End(BytesEnd::new("server")))
        .map_err(|e| ConfigError::Write(e.to_string()))?;
    Ok(out)
}

fn write_element(writer: &mut Writer<&mut Vec<u8>>, name: &str, value: &str) -> Result<(), ConfigError> {
    writer
        .write_event(Event::Start(BytesStart::new(name)))
        .map_err(|e| ConfigError::Write(e.to_string()))?;
    writer
        .write_event(Event::Text(BytesText::new(value)))
        .map_err(|e| ConfigError::Write(e.to_string()))?;
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .map_err(|e| ConfigError::Write(e.to_string()))?;
    Ok(())
}

pub fn save_server_config(path: &Path, config: &ServerConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, server_config_to_xml(config)?)?;
    Ok(())
}
