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

use crate::{
    cluster::ReadPreference,
    codec::JsonCodec,
    config::Config,
    connection::ReplyCallback,
    errors::DriverError,
    factory::{BootstrapConnectionFactory, ClusterType, Connection, ConnectionFactory},
    message::Message,
};

use std::{ops::Deref, sync::Arc};
use tokio::sync::Mutex;

/// How certain a write must be before its get-last-error reply comes back
/// clean.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Durability {
    /// Fire and forget; no get-last-error is paired with the write.
    None,
    /// The server applied the write in memory.
    Acknowledged,
    /// The write reached the journal.
    Journaled,
    /// The write replicated to this many members.
    ReplicaAcknowledged(u32),
}

impl Default for Durability {
    fn default() -> Self {
        Durability::Acknowledged
    }
}

struct InnerClient {
    config: Arc<Config>,
    factory: Arc<dyn ConnectionFactory>,
    /// The connection requests currently ride on; replaced when it breaks.
    connection: Mutex<Option<Arc<dyn Connection>>>,
}

/// The user-facing handle: hands requests to a factory-produced connection,
/// replacing it through the factory's reconnect strategy when it breaks.
/// Cloning shares the handle.
#[derive(Clone)]
pub struct Client(Arc<InnerClient>);

impl Client {
    /// Bootstraps the topology behind the configured seeds and returns a
    /// ready client.
    pub async fn connect(config: Config) -> Result<Self, DriverError> {
        let config = Arc::new(config);
        let factory = BootstrapConnectionFactory::bootstrap(config.clone(), Arc::new(JsonCodec)).await;
        Ok(Self::with_factory(config, Arc::new(factory)))
    }

    /// Builds a client over an explicit factory.
    pub fn with_factory(config: Arc<Config>, factory: Arc<dyn ConnectionFactory>) -> Self {
        Client(Arc::new(InnerClient {
            config,
            factory,
            connection: Mutex::new(None),
        }))
    }

    /// Enqueues a message; the callback completes with the reply or an
    /// error. Returns the name of the server the message went to.
    pub async fn send(
        &self,
        message: Message,
        callback: Option<Box<dyn ReplyCallback>>,
    ) -> Result<String, DriverError> {
        let connection = self.checkout().await?;
        connection.send(message, callback).await
    }

    /// Sends two linked messages over one connection, e.g. a write followed
    /// by its get-last-error; the callback answers the second message.
    pub async fn send_pair(
        &self,
        first: Message,
        second: Message,
        callback: Option<Box<dyn ReplyCallback>>,
    ) -> Result<String, DriverError> {
        let connection = self.checkout().await?;
        connection.send(first, None).await?;
        connection.send(second, callback).await
    }

    #[inline]
    pub fn config(&self) -> &Arc<Config> {
        &self.0.config
    }

    pub fn default_durability(&self) -> Durability {
        self.0.config.default_durability().clone()
    }

    pub fn default_read_preference(&self) -> ReadPreference {
        self.0.config.default_read_preference().clone()
    }

    pub fn cluster_type(&self) -> ClusterType {
        self.0.factory.cluster_type()
    }

    /// A view of this client that pins every request onto one connection,
    /// restoring total order across its requests.
    pub fn serialized(&self) -> SerializedClient {
        SerializedClient {
            client: self.clone(),
            connection: Mutex::new(None),
        }
    }

    /// Drains the active connection and releases the factory's resources.
    pub async fn close(&self) {
        if let Some(connection) = self.0.connection.lock().await.take() {
            let _ = connection.shutdown(false).await;
        }
        self.0.factory.close().await;
    }

    async fn checkout(&self) -> Result<Arc<dyn Connection>, DriverError> {
        let mut slot = self.0.connection.lock().await;
        if let Some(connection) = slot.as_ref() {
            if connection.is_available() {
                return Ok(connection.clone());
            }
            let broken = connection.server_name();
            debug!("The connection to {} broke; reconnecting", broken);
            *slot = None;
            if let Some(replacement) = self.0.factory.reconnect(&broken).await {
                let replacement: Arc<dyn Connection> = Arc::from(replacement);
                *slot = Some(replacement.clone());
                return Ok(replacement);
            }
        }
        let fresh: Arc<dyn Connection> = Arc::from(self.0.factory.connect().await?);
        *slot = Some(fresh.clone());
        Ok(fresh)
    }
}

/// A client view whose requests all ride a single pinned connection.
///
/// The pin survives until the connection breaks; a replacement is then pinned
/// in its place, so ordering holds within each connection's lifetime.
pub struct SerializedClient {
    client: Client,
    connection: Mutex<Option<Arc<dyn Connection>>>,
}

impl SerializedClient {
    pub async fn send(
        &self,
        message: Message,
        callback: Option<Box<dyn ReplyCallback>>,
    ) -> Result<String, DriverError> {
        let connection = self.pinned().await?;
        connection.send(message, callback).await
    }

    pub async fn send_pair(
        &self,
        first: Message,
        second: Message,
        callback: Option<Box<dyn ReplyCallback>>,
    ) -> Result<String, DriverError> {
        let connection = self.pinned().await?;
        connection.send(first, None).await?;
        connection.send(second, callback).await
    }

    async fn pinned(&self) -> Result<Arc<dyn Connection>, DriverError> {
        let mut slot = self.connection.lock().await;
        if let Some(connection) = slot.as_ref() {
            if connection.is_available() {
                return Ok(connection.clone());
            }
            *slot = None;
        }
        let connection = self.client.checkout().await?;
        *slot = Some(connection.clone());
        Ok(connection)
    }
}

impl Deref for SerializedClient {
    type Target = Client;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}
