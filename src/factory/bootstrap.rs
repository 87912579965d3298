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
    cluster::Cluster,
    codec::{Document, DocumentCodec},
    config::Config,
    errors::DriverError,
    factory::{
        AuthenticatingConnectionFactory, ClusterType, Connection, ConnectionFactory, ReconnectStrategyKind,
        ReplicaSetConnectionFactory, ShardedConnectionFactory, SocketConnectionFactory,
    },
    message::commands,
};

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use std::{sync::Arc, time::Instant};
use tokio::time::timeout;

/// Classifies the cluster behind the seed list and delegates to the matching
/// factory. When no seed gives a recognizable identity the delegate stays
/// unset and every `connect()` fails with `NoDelegateFactory`.
pub struct BootstrapConnectionFactory {
    config: Arc<Config>,
    delegate: OnceCell<Arc<dyn ConnectionFactory>>,
}

impl BootstrapConnectionFactory {
    /// Probes the seeds, classifies the topology, and builds the delegate.
    /// Configured credentials wrap the delegate in the authenticating
    /// factory.
    pub async fn bootstrap(config: Arc<Config>, codec: Arc<dyn DocumentCodec>) -> Self {
        let factory = BootstrapConnectionFactory {
            config: config.clone(),
            delegate: OnceCell::new(),
        };

        let identity = match probe_seeds(&config, &codec).await {
            Some(identity) => identity,
            None => {
                warn!("No seed answered the identity command; connects will fail");
                return factory;
            }
        };

        let classified = match classify_identity(&identity) {
            Some(cluster_type) => cluster_type,
            None => {
                warn!("The seed's identity reply fits no known topology; connects will fail");
                return factory;
            }
        };
        debug!("Classified the cluster as {:?}", classified);

        let delegate: Result<Arc<dyn ConnectionFactory>, DriverError> = match classified {
            ClusterType::Sharded => ShardedConnectionFactory::bootstrap(config.clone(), codec)
                .await
                .map(|f| Arc::new(f) as Arc<dyn ConnectionFactory>),
            ClusterType::ReplicaSet => ReplicaSetConnectionFactory::bootstrap(config.clone(), codec)
                .await
                .map(|f| Arc::new(f) as Arc<dyn ConnectionFactory>),
            ClusterType::Standalone => {
                let cluster = Arc::new(Cluster::new());
                for seed in config.servers().iter() {
                    if let Err(error) = cluster.add(seed) {
                        warn!("Ignoring the unusable seed {}: {}", seed, error);
                    }
                }
                Ok(Arc::new(SocketConnectionFactory::new(config.clone(), cluster, codec)) as Arc<dyn ConnectionFactory>)
            }
        };

        match delegate {
            Ok(delegate) => {
                let delegate = match config.credentials() {
                    Some(credentials) => {
                        Arc::new(AuthenticatingConnectionFactory::new(delegate, credentials.clone()))
                            as Arc<dyn ConnectionFactory>
                    }
                    None => delegate,
                };
                let _ = factory.delegate.set(delegate);
            }
            Err(error) => warn!("Couldn't bootstrap the {:?} factory: {}", classified, error),
        }
        factory
    }

    pub fn delegate(&self) -> Option<&Arc<dyn ConnectionFactory>> {
        self.delegate.get()
    }
}

#[async_trait]
impl ConnectionFactory for BootstrapConnectionFactory {
    async fn connect(&self) -> Result<Box<dyn Connection>, DriverError> {
        match self.delegate.get() {
            Some(delegate) => delegate.connect().await,
            None => Err(DriverError::NoDelegateFactory),
        }
    }

    async fn reconnect(&self, broken_server: &str) -> Option<Box<dyn Connection>> {
        match self.delegate.get() {
            Some(delegate) => delegate.reconnect(broken_server).await,
            None => None,
        }
    }

    fn cluster_type(&self) -> ClusterType {
        self.delegate
            .get()
            .map(|delegate| delegate.cluster_type())
            .unwrap_or(ClusterType::Standalone)
    }

    fn reconnect_strategy_kind(&self) -> ReconnectStrategyKind {
        self.delegate
            .get()
            .map(|delegate| delegate.reconnect_strategy_kind())
            .unwrap_or(ReconnectStrategyKind::Simple)
    }

    async fn close(&self) {
        if let Some(delegate) = self.delegate.get() {
            delegate.close().await;
        }
    }
}

/// Opens one probe connection to the first reachable seed and returns its
/// identity reply.
async fn probe_seeds(config: &Arc<Config>, codec: &Arc<dyn DocumentCodec>) -> Option<Document> {
    let probe_cluster = Arc::new(Cluster::new());
    let probe_factory = SocketConnectionFactory::new(config.clone(), probe_cluster, codec.clone());

    for seed in config.servers().iter() {
        let connection = match probe_factory.connect_to(seed).await {
            Ok(connection) => connection,
            Err(error) => {
                debug!("Seed {} is unavailable: {}", seed, error);
                continue;
            }
        };

        let started = Instant::now();
        let outcome = timeout(config.connect_timeout(), connection.request(commands::is_master())).await;
        match outcome {
            Ok(Ok(reply)) => {
                if let Some(document) = reply.first_document() {
                    connection.server().update_from(document, started.elapsed());
                    let document = document.clone();
                    let _ = connection.shutdown(true).await;
                    return Some(document);
                }
                let _ = connection.shutdown(true).await;
                return None;
            }
            _ => {
                debug!("Seed {} didn't answer the identity command", seed);
                let _ = connection.shutdown(true).await;
            }
        }
    }
    None
}

/// Decides the topology from an identity reply.
pub fn classify_identity(document: &Document) -> Option<ClusterType> {
    let is_router =
        document.get_str("process") == Some("mongos") || document.get_str("msg") == Some("isdbgrid");
    if is_router {
        return Some(ClusterType::Sharded);
    }

    let replicated = document
        .get_document("repl")
        .map_or(false, |repl| repl.contains_key("hosts"))
        || (document.get_array("hosts").is_some() && document.get_str("setName").is_some());
    if replicated {
        return Some(ClusterType::ReplicaSet);
    }

    if document.get_str("process") == Some("mongod") || document.get_f64("ok") == Some(1.0) {
        return Some(ClusterType::Standalone);
    }

    None
}
