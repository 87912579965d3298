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
    cluster::{Cluster, LatencyServerSelector, Server},
    codec::DocumentCodec,
    config::Config,
    connection::SocketConnection,
    errors::DriverError,
    factory::{ClusterType, Connection, ConnectionFactory, ReconnectStrategyKind},
    reconnect::SimpleReconnectStrategy,
};

use async_trait::async_trait;
use std::sync::Arc;

/// Opens raw socket connections, one per call. The default factory for a
/// standalone server, and the building block every other factory opens its
/// sockets through.
#[derive(Clone)]
pub struct SocketConnectionFactory {
    config: Arc<Config>,
    cluster: Arc<Cluster>,
    codec: Arc<dyn DocumentCodec>,
}

impl SocketConnectionFactory {
    pub fn new(config: Arc<Config>, cluster: Arc<Cluster>, codec: Arc<dyn DocumentCodec>) -> Self {
        SocketConnectionFactory { config, cluster, codec }
    }

    #[inline]
    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    #[inline]
    pub fn cluster(&self) -> &Arc<Cluster> {
        &self.cluster
    }

    #[inline]
    pub fn codec(&self) -> &Arc<dyn DocumentCodec> {
        &self.codec
    }

    /// Opens a socket to the named server, registering it in the cluster
    /// when it is new.
    pub async fn connect_to(&self, name: &str) -> Result<SocketConnection, DriverError> {
        let server = self.cluster.add(name)?;
        self.connect_to_server(&server).await
    }

    /// Opens a socket to a known server, trying the pinned address first and
    /// falling back through the remaining resolved addresses.
    pub async fn connect_to_server(&self, server: &Arc<Server>) -> Result<SocketConnection, DriverError> {
        let mut last_error = None;
        for address in server.connect_candidates() {
            match SocketConnection::open(server.clone(), address, self.codec.clone(), self.config.clone()).await {
                Ok(connection) => return Ok(connection),
                Err(error) => {
                    trace!("Couldn't connect to {} at {}: {}", server.name(), address, error);
                    server.record_connection_failure();
                    last_error = Some(error);
                }
            }
        }
        Err(last_error.unwrap_or(DriverError::AllServersUnavailable))
    }

    pub fn reconnect_strategy(&self) -> SimpleReconnectStrategy {
        SimpleReconnectStrategy::new(
            self.cluster.clone(),
            Arc::new(LatencyServerSelector::new(self.cluster.clone())),
            self.config.clone(),
            self.clone(),
        )
    }
}

#[async_trait]
impl ConnectionFactory for SocketConnectionFactory {
    async fn connect(&self) -> Result<Box<dyn Connection>, DriverError> {
        for name in self.config.servers().iter() {
            match self.connect_to(name).await {
                Ok(connection) => return Ok(Box::new(connection)),
                Err(error) => debug!("Seed {} is unavailable: {}", name, error),
            }
        }
        Err(DriverError::AllServersUnavailable)
    }

    async fn reconnect(&self, broken_server: &str) -> Option<Box<dyn Connection>> {
        self.reconnect_strategy()
            .reconnect(broken_server)
            .await
            .map(|connection| Box::new(connection) as Box<dyn Connection>)
    }

    fn cluster_type(&self) -> ClusterType {
        ClusterType::Standalone
    }

    fn reconnect_strategy_kind(&self) -> ReconnectStrategyKind {
        ReconnectStrategyKind::Simple
    }
}
