// Copyright (C) 2019-2021 the docnet Developers
// This file is part of the docnet library.

// The docnet library is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// The docnet library is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with the docnet library. If not, see <https://www.gnu.org/licenses/>.

#[macro_use]
extern crate log;

pub mod client;
pub use self::client::*;

pub mod cluster;
pub use self::cluster::*;

pub mod codec;
pub use self::codec::*;

pub mod config;
pub use self::config::*;

pub mod connection;
pub use self::connection::*;

pub mod errors;
pub use self::errors::*;

pub mod factory;
pub use self::factory::*;

pub mod message;
pub use self::message::*;

pub mod reconnect;
pub use self::reconnect::*;

/// The maximum permitted size of a single wire frame, header included.
pub const MAX_MESSAGE_SIZE: usize = 48 * 1024 * 1024;

/// The size of the fixed message header, in bytes.
pub const HEADER_SIZE: usize = 16;

/// The document size limit assumed until a server reports its own.
pub const DEFAULT_MAX_DOCUMENT_SIZE: usize = 16 * 1024 * 1024;

/// The default port assumed when a server name omits one.
pub const DEFAULT_PORT: u16 = 27017;

/// The default interval between cluster health probes.
pub const DEFAULT_PING_INTERVAL_SECS: u64 = 10;

/// The number of consecutive probe failures before a server is considered unreachable.
pub const PING_FAILURE_THRESHOLD: u32 = 3;

/// The number of distinct members that must name the same primary during rediscovery.
pub const DEFAULT_PRIMARY_CONFIRMATIONS: usize = 2;

/// The weight applied to the most recent latency sample when updating a server's average.
pub const LATENCY_SMOOTHING_FACTOR: f64 = 0.25;
