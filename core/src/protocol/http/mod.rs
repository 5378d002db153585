/*
 * mod.rs
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

//! HTTP/1.1 plumbing in front of the WebSocket layer: request heads in, upgrade responses out.
//!
//! - Push-parsed heads (`h1`), `bytes` buffers, callbacks per start line and header.
//! - Bodies are never read; an upgraded connection hands its stream to the WebSocket session.

mod request;

pub mod h1;

pub use request::{Method, Request};
