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
    cluster::{Cluster, ServerSelector},
    config::Config,
    connection::SocketConnection,
    factory::SocketConnectionFactory,
    message::commands,
};

use std::sync::Arc;
use tokio::time::timeout;

/// Restores service after a broken connection: the same server is retried
/// once, then the selector's candidates are attempted in order. A candidate
/// only counts once a status ping on the fresh socket succeeds.
pub struct SimpleReconnectStrategy {
    cluster: Arc<Cluster>,
    selector: Arc<dyn ServerSelector>,
    config: Arc<Config>,
    factory: SocketConnectionFactory,
}

impl SimpleReconnectStrategy {
    pub fn new(
        cluster: Arc<Cluster>,
        selector: Arc<dyn ServerSelector>,
        config: Arc<Config>,
        factory: SocketConnectionFactory,
    ) -> Self {
        SimpleReconnectStrategy {
            cluster,
            selector,
            config,
            factory,
        }
    }

    #[inline]
    pub fn cluster(&self) -> &Arc<Cluster> {
        &self.cluster
    }

    #[inline]
    pub fn selector(&self) -> &Arc<dyn ServerSelector> {
        &self.selector
    }

    #[inline]
    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    #[inline]
    pub fn factory(&self) -> &SocketConnectionFactory {
        &self.factory
    }

    /// Attempts to replace the broken connection, returning the first fresh
    /// connection whose status ping succeeds.
    pub async fn reconnect(&self, broken_server: &str) -> Option<SocketConnection> {
        debug!("Reconnecting after losing {}", broken_server);

        if let Some(connection) = self.attempt(broken_server).await {
            return Some(connection);
        }

        for server in self.selector.pick_servers() {
            if let Some(connection) = self.attempt(server.name()).await {
                return Some(connection);
            }
        }

        warn!("Couldn't reconnect; every candidate failed");
        None
    }

    async fn attempt(&self, name: &str) -> Option<SocketConnection> {
        let connection = match self.factory.connect_to(name).await {
            Ok(connection) => connection,
            Err(error) => {
                debug!("Couldn't reconnect to {}: {}", name, error);
                return None;
            }
        };

        match timeout(self.config.connect_timeout(), connection.request(commands::ping())).await {
            Ok(Ok(_reply)) => {
                debug!("Reconnected to {}", name);
                Some(connection)
            }
            Ok(Err(error)) => {
                debug!("The status ping of {} failed: {}", name, error);
                let _ = connection.shutdown(true).await;
                None
            }
            Err(_elapsed) => {
                debug!("The status ping of {} timed out", name);
                let _ = connection.shutdown(true).await;
                None
            }
        }
    }
}
