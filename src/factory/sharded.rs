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
    cluster::{Cluster, ClusterPinger, LatencyServerSelector, ServerSelector},
    codec::DocumentCodec,
    config::Config,
    errors::DriverError,
    factory::{ClusterType, Connection, ConnectionFactory, ReconnectStrategyKind, SocketConnectionFactory},
    message::commands,
};

use async_trait::async_trait;
use std::{ops::Deref, sync::Arc, time::Instant};
use tokio::time::timeout;

pub struct InnerShardedFactory {
    config: Arc<Config>,
    cluster: Arc<Cluster>,
    socket_factory: SocketConnectionFactory,
    pinger: ClusterPinger,
    selector: LatencyServerSelector,
}

/// Load-balances over a router tier: the registry collection supplies the
/// routers, the pinger keeps their latencies fresh, and every new connection
/// goes to the fastest reachable router.
#[derive(Clone)]
pub struct ShardedConnectionFactory(Arc<InnerShardedFactory>);

impl Deref for ShardedConnectionFactory {
    type Target = InnerShardedFactory;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl ShardedConnectionFactory {
    /// Contacts a seed router, expands the router tier from the registry
    /// collection, and readies the pinger.
    pub async fn bootstrap(config: Arc<Config>, codec: Arc<dyn DocumentCodec>) -> Result<Self, DriverError> {
        let cluster = Arc::new(Cluster::new());
        let socket_factory = SocketConnectionFactory::new(config.clone(), cluster.clone(), codec);

        let mut discovered = false;
        for seed in config.servers().iter() {
            let connection = match socket_factory.connect_to(seed).await {
                Ok(connection) => connection,
                Err(error) => {
                    debug!("Seed router {} is unavailable: {}", seed, error);
                    continue;
                }
            };

            let started = Instant::now();
            match timeout(config.connect_timeout(), connection.request(commands::is_master())).await {
                Ok(Ok(reply)) => {
                    if let Some(document) = reply.first_document() {
                        connection.server().update_from(document, started.elapsed());
                    }
                }
                _ => {
                    debug!("Seed router {} didn't answer the identity command", seed);
                    let _ = connection.shutdown(true).await;
                    continue;
                }
            }

            if config.auto_discover_servers() {
                match timeout(config.connect_timeout(), connection.request(commands::router_registry())).await {
                    Ok(Ok(reply)) => {
                        for document in &reply.documents {
                            if let Some(name) = document.get_str("_id") {
                                if let Err(error) = cluster.add(name) {
                                    warn!("Ignoring the unusable router {}: {}", name, error);
                                }
                            }
                        }
                    }
                    _ => debug!("Seed router {} didn't answer the registry query", seed),
                }
            }

            let _ = connection.shutdown(true).await;
            discovered = true;
            break;
        }

        if !discovered {
            return Err(DriverError::AllServersUnavailable);
        }

        let pinger = ClusterPinger::new(cluster.clone(), socket_factory.clone(), config.ping_interval());
        pinger.initial_sweep().await;
        pinger.start();

        info!("Bootstrapped a router tier of {} routers", cluster.len());
        Ok(ShardedConnectionFactory(Arc::new(InnerShardedFactory {
            config,
            selector: LatencyServerSelector::new(cluster.clone()),
            cluster,
            socket_factory,
            pinger,
        })))
    }

    #[inline]
    pub fn cluster(&self) -> &Arc<Cluster> {
        &self.cluster
    }
}

#[async_trait]
impl ConnectionFactory for ShardedConnectionFactory {
    async fn connect(&self) -> Result<Box<dyn Connection>, DriverError> {
        for router in self.selector.pick_servers() {
            match self.socket_factory.connect_to_server(&router).await {
                Ok(connection) => return Ok(Box::new(connection)),
                Err(error) => debug!("Router {} refused the connection: {}", router.name(), error),
            }
        }
        Err(DriverError::AllServersUnavailable)
    }

    async fn reconnect(&self, broken_server: &str) -> Option<Box<dyn Connection>> {
        self.socket_factory
            .reconnect_strategy()
            .reconnect(broken_server)
            .await
            .map(|connection| Box::new(connection) as Box<dyn Connection>)
    }

    fn cluster_type(&self) -> ClusterType {
        ClusterType::Sharded
    }

    fn reconnect_strategy_kind(&self) -> ReconnectStrategyKind {
        ReconnectStrategyKind::Simple
    }

    async fn close(&self) {
        self.pinger.stop().await;
    }
}
