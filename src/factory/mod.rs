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

pub mod auth;
pub use self::auth::*;

pub mod bootstrap;
pub use self::bootstrap::*;

pub mod proxied;
pub use self::proxied::*;

pub mod replica_set;
pub use self::replica_set::*;

pub mod sharded;
pub use self::sharded::*;

pub mod socket_factory;
pub use self::socket_factory::*;

use crate::{
    connection::{reply_future, ReplyCallback, SocketConnection},
    errors::DriverError,
    message::{Message, Reply},
};

use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterType {
    Standalone,
    ReplicaSet,
    Sharded,
}

/// Which recovery discipline a factory applies to broken connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectStrategyKind {
    Simple,
    ReplicaSet,
}

/// The send surface a factory hands out: a single socket, or a facade that
/// multiplexes over several of them.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Enqueues a message; the callback (when present) is completed exactly
    /// once with the reply or an error. Returns the name of the server that
    /// received the bytes.
    async fn send(
        &self,
        message: Message,
        callback: Option<Box<dyn ReplyCallback>>,
    ) -> Result<String, DriverError>;

    /// Forces buffered bytes to the wire.
    async fn flush(&self) -> Result<(), DriverError>;

    /// Graceful (`force == false`, drain then close) or immediate teardown.
    async fn shutdown(&self, force: bool) -> Result<(), DriverError>;

    fn is_available(&self) -> bool;

    fn is_idle(&self) -> bool;

    fn server_name(&self) -> String;
}

#[async_trait]
impl Connection for SocketConnection {
    async fn send(
        &self,
        message: Message,
        callback: Option<Box<dyn ReplyCallback>>,
    ) -> Result<String, DriverError> {
        SocketConnection::send(self, message, callback).await
    }

    async fn flush(&self) -> Result<(), DriverError> {
        SocketConnection::flush(self).await
    }

    async fn shutdown(&self, force: bool) -> Result<(), DriverError> {
        SocketConnection::shutdown(self, force).await
    }

    fn is_available(&self) -> bool {
        SocketConnection::is_available(self)
    }

    fn is_idle(&self) -> bool {
        SocketConnection::is_idle(self)
    }

    fn server_name(&self) -> String {
        SocketConnection::server_name(self).to_owned()
    }
}

/// Produces connections for one cluster topology.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Connection>, DriverError>;

    /// Recovers from a broken connection using the factory's strategy.
    async fn reconnect(&self, broken_server: &str) -> Option<Box<dyn Connection>>;

    fn cluster_type(&self) -> ClusterType;

    fn reconnect_strategy_kind(&self) -> ReconnectStrategyKind;

    /// Releases pooled connections and background tasks.
    async fn close(&self) {}
}

/// Sends a message over any connection facade and awaits the reply.
pub(crate) async fn request_on(connection: &dyn Connection, message: Message) -> Result<Reply, DriverError> {
    let (sender, future) = reply_future();
    connection.send(message, Some(Box::new(sender))).await?;
    future.wait().await
}
