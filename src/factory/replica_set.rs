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
    cluster::{Cluster, ClusterPinger, ReadPreference, ReadPreferenceMode, ReadPreferenceSelector, Server, ServerSelector},
    codec::{Document, DocumentCodec},
    config::Config,
    connection::{ReplyCallback, SocketConnection, WeakSocketConnection},
    errors::DriverError,
    factory::{
        ClusterType, Connection, ConnectionFactory, ProxiedConnection, ReconnectStrategyKind, SocketConnectionFactory,
    },
    message::{commands, Message},
    reconnect::ReplicaSetReconnectStrategy,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use std::{collections::HashMap, ops::Deref, sync::Arc, time::Instant};
use tokio::time::timeout;

pub struct InnerReplicaSetFactory {
    config: Arc<Config>,
    cluster: Arc<Cluster>,
    socket_factory: SocketConnectionFactory,
    pinger: ClusterPinger,
    strategy: ReplicaSetReconnectStrategy,
    /// Lazily opened secondary connections, shared by every facade.
    secondaries: tokio::sync::Mutex<HashMap<String, SocketConnection>>,
}

/// Maintains connections across a replica set: the primary for writes, lazy
/// secondaries for preference-routed reads, the pinger for ongoing health.
#[derive(Clone)]
pub struct ReplicaSetConnectionFactory(Arc<InnerReplicaSetFactory>);

impl Deref for ReplicaSetConnectionFactory {
    type Target = InnerReplicaSetFactory;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl ReplicaSetConnectionFactory {
    /// Discovers the set from the configured seeds: the first member that
    /// answers the identity command supplies the primary and the member
    /// lists, every member is registered, and the pinger completes an
    /// initial sweep before the factory is handed back.
    pub async fn bootstrap(config: Arc<Config>, codec: Arc<dyn DocumentCodec>) -> Result<Self, DriverError> {
        let cluster = Arc::new(Cluster::new());
        let socket_factory = SocketConnectionFactory::new(config.clone(), cluster.clone(), codec);

        let mut discovered = false;
        for seed in config.servers().iter() {
            let connection = match socket_factory.connect_to(seed).await {
                Ok(connection) => connection,
                Err(error) => {
                    debug!("Seed {} is unavailable: {}", seed, error);
                    continue;
                }
            };

            let started = Instant::now();
            let reply = match timeout(config.connect_timeout(), connection.request(commands::is_master())).await {
                Ok(Ok(reply)) => reply,
                _ => {
                    debug!("Seed {} didn't answer the identity command", seed);
                    let _ = connection.shutdown(true).await;
                    continue;
                }
            };

            if let Some(document) = reply.first_document() {
                connection.server().update_from(document, started.elapsed());
                register_members(&cluster, &config, document);
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

        let strategy = ReplicaSetReconnectStrategy::new(cluster.clone(), config.clone(), socket_factory.clone());

        info!("Bootstrapped a replica set of {} members", cluster.len());
        Ok(ReplicaSetConnectionFactory(Arc::new(InnerReplicaSetFactory {
            config,
            cluster,
            socket_factory,
            pinger,
            strategy,
            secondaries: Default::default(),
        })))
    }

    #[inline]
    pub fn cluster(&self) -> &Arc<Cluster> {
        &self.cluster
    }

    #[inline]
    pub fn strategy(&self) -> &ReplicaSetReconnectStrategy {
        &self.strategy
    }

    async fn primary_connection(&self) -> Result<SocketConnection, DriverError> {
        if let Some(primary) = self.cluster.writable_servers().into_iter().next() {
            match self.socket_factory.connect_to_server(&primary).await {
                Ok(connection) => return Ok(connection),
                Err(error) => debug!("The known primary {} refused the connection: {}", primary.name(), error),
            }
            return self
                .strategy
                .rediscover(Some(primary.name()))
                .await
                .ok_or(DriverError::NoWritableServer);
        }
        self.strategy.rediscover(None).await.ok_or(DriverError::NoWritableServer)
    }

    /// Whether the lowest-latency server matching `preference` is the
    /// primary. Vacuously true with no candidates, which routes the request
    /// to the primary's fail-fast path.
    pub(crate) fn nearest_is_writable(&self, preference: &ReadPreference) -> bool {
        ReadPreferenceSelector::new(self.cluster.clone(), preference.clone())
            .pick_servers()
            .first()
            .map_or(true, |server| server.is_writable())
    }

    /// Hands out a pooled connection to the best secondary for `preference`,
    /// opening one lazily when the pool has none alive.
    pub(crate) async fn secondary_connection(&self, preference: &ReadPreference) -> Option<SocketConnection> {
        let selector = ReadPreferenceSelector::new(self.cluster.clone(), preference.clone());
        let candidates: Vec<Arc<Server>> = selector
            .pick_servers()
            .into_iter()
            .filter(|server| !server.is_writable())
            .collect();

        for server in candidates {
            let mut pool = self.secondaries.lock().await;
            if let Some(existing) = pool.get(server.name()) {
                if existing.is_available() {
                    return Some(existing.clone());
                }
                pool.remove(server.name());
            }
            drop(pool);

            match self.socket_factory.connect_to_server(&server).await {
                Ok(connection) => {
                    self.secondaries
                        .lock()
                        .await
                        .insert(server.name().to_owned(), connection.clone());
                    return Some(connection);
                }
                Err(error) => debug!("Couldn't open a secondary connection to {}: {}", server.name(), error),
            }
        }
        None
    }
}

#[async_trait]
impl ConnectionFactory for ReplicaSetConnectionFactory {
    async fn connect(&self) -> Result<Box<dyn Connection>, DriverError> {
        let primary = self.primary_connection().await?;
        Ok(Box::new(ReplicaSetConnection::new(primary, self.clone())))
    }

    async fn reconnect(&self, broken_server: &str) -> Option<Box<dyn Connection>> {
        let primary = self.strategy.rediscover(Some(broken_server)).await?;
        Some(Box::new(ReplicaSetConnection::new(primary, self.clone())))
    }

    fn cluster_type(&self) -> ClusterType {
        ClusterType::ReplicaSet
    }

    fn reconnect_strategy_kind(&self) -> ReconnectStrategyKind {
        ReconnectStrategyKind::ReplicaSet
    }

    async fn close(&self) {
        self.pinger.stop().await;
        for (_, connection) in self.secondaries.lock().await.drain() {
            let _ = connection.shutdown(false).await;
        }
    }
}

/// Registers every member named by an identity reply. The member lists live
/// at the top level of a member's own reply and under `repl` in a bootstrap
/// probe; both shapes are accepted.
fn register_members(cluster: &Cluster, config: &Config, document: &Document) {
    let view = if document.get_array("hosts").is_some() || document.get_str("primary").is_some() {
        document.clone()
    } else {
        match document.get_document("repl") {
            Some(repl) => repl,
            None => return,
        }
    };

    if !config.auto_discover_servers() {
        return;
    }

    if let Some(primary) = view.get_str("primary") {
        let _ = cluster.add(primary);
    }
    for key in &["hosts", "passives", "arbiters"] {
        if let Some(members) = view.get_array(key) {
            for member in members.iter().filter_map(|value| value.as_str()) {
                if let Err(error) = cluster.add(member) {
                    warn!("Ignoring the unusable member {}: {}", member, error);
                }
            }
        }
    }
}

/// The facade over a replica set: writes and primary reads ride the owned
/// primary connection, preference-routed reads borrow pooled secondaries.
pub struct ReplicaSetConnection {
    primary: ProxiedConnection,
    factory: ReplicaSetConnectionFactory,
    /// Weak handles onto the factory's pool, keyed by server name.
    secondaries: Mutex<HashMap<String, WeakSocketConnection>>,
}

impl ReplicaSetConnection {
    fn new(primary: SocketConnection, factory: ReplicaSetConnectionFactory) -> Self {
        ReplicaSetConnection {
            primary: ProxiedConnection::new(Box::new(primary)),
            factory,
            secondaries: Default::default(),
        }
    }

    async fn secondary_for(&self, preference: &ReadPreference) -> Option<SocketConnection> {
        let cached: Vec<WeakSocketConnection> = self.secondaries.lock().values().cloned().collect();
        for weak in cached {
            if let Some(connection) = weak.upgrade() {
                if connection.is_available() && preference.matches_tags(&connection.server().tags()) {
                    return Some(connection);
                }
            }
        }

        let connection = self.factory.secondary_connection(preference).await?;
        self.secondaries
            .lock()
            .insert(connection.server_name().to_owned(), connection.downgrade());
        Some(connection)
    }
}

#[async_trait]
impl Connection for ReplicaSetConnection {
    async fn send(
        &self,
        message: Message,
        callback: Option<Box<dyn ReplyCallback>>,
    ) -> Result<String, DriverError> {
        if let Some(preference) = message.read_preference().cloned() {
            match preference.mode {
                ReadPreferenceMode::Primary => {}
                ReadPreferenceMode::PrimaryPreferred => {
                    if !self.primary.is_available() {
                        if let Some(secondary) = self.secondary_for(&preference).await {
                            return secondary.send(message, callback).await;
                        }
                    }
                }
                ReadPreferenceMode::Secondary => {
                    return match self.secondary_for(&preference).await {
                        Some(secondary) => secondary.send(message, callback).await,
                        None => Err(DriverError::AllServersUnavailable),
                    };
                }
                ReadPreferenceMode::SecondaryPreferred => {
                    if let Some(secondary) = self.secondary_for(&preference).await {
                        return secondary.send(message, callback).await;
                    }
                }
                ReadPreferenceMode::Nearest => {
                    if !self.factory.nearest_is_writable(&preference) {
                        if let Some(secondary) = self.secondary_for(&preference).await {
                            return secondary.send(message, callback).await;
                        }
                    }
                }
            }
        }
        self.primary.send(message, callback).await
    }

    async fn flush(&self) -> Result<(), DriverError> {
        self.primary.flush().await
    }

    async fn shutdown(&self, force: bool) -> Result<(), DriverError> {
        // Secondaries belong to the factory's pool; only the primary is ours.
        self.primary.shutdown(force).await
    }

    fn is_available(&self) -> bool {
        self.primary.is_available()
    }

    fn is_idle(&self) -> bool {
        self.primary.is_idle()
    }

    fn server_name(&self) -> String {
        self.primary.server_name()
    }
}
