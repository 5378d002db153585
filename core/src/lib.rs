/*
 * lib.rs
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

//! Canticle core: the WebSocket endpoint used by remote controls of the presentation.
//!
//! - `protocol::http`: HTTP/1.1 request/response head parsing in front of the upgrade.
//! - `protocol::websocket`: handshake, frame codec, sessions (RFC 6455).
//! - `server`: TCP accept loop handing upgraded connections to an application handler.
//! - `config`: limits and listen address, loaded from XML.

pub mod config;
pub mod protocol;
pub mod server;
