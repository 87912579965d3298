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
    cluster::{Cluster, Server},
    config::Config,
    connection::SocketConnection,
    factory::SocketConnectionFactory,
    message::commands,
};

use futures::future::join_all;
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::time::{sleep, timeout};

const POLL_BACKOFF: Duration = Duration::from_millis(100);

/// Rediscovers the primary of a replica set after a failover.
///
/// Every reachable member is asked who the primary is; a candidate is only
/// accepted once the configured number of distinct members (two by default)
/// independently name it. Members that know of no primary neither veto nor
/// confirm, and contradictory answers split the tally. The search gives up
/// once `reconnect_timeout` elapses, leaving the writable-server set empty so
/// subsequent writes fail fast.
pub struct ReplicaSetReconnectStrategy {
    cluster: Arc<Cluster>,
    config: Arc<Config>,
    factory: SocketConnectionFactory,
}

impl ReplicaSetReconnectStrategy {
    pub fn new(cluster: Arc<Cluster>, config: Arc<Config>, factory: SocketConnectionFactory) -> Self {
        ReplicaSetReconnectStrategy {
            cluster,
            config,
            factory,
        }
    }

    #[inline]
    pub fn cluster(&self) -> &Arc<Cluster> {
        &self.cluster
    }

    #[inline]
    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    #[inline]
    pub fn factory(&self) -> &SocketConnectionFactory {
        &self.factory
    }

    /// Runs the quorum search. `broken_server` is the primary whose
    /// connection failed; it is demoted up front.
    pub async fn rediscover(&self, broken_server: Option<&str>) -> Option<SocketConnection> {
        let deadline = Instant::now() + self.config.reconnect_timeout();
        let required = self.config.required_primary_confirmations();

        if let Some(name) = broken_server {
            if let Some(server) = self.cluster.get(name) {
                server.demote();
            }
        }

        while Instant::now() < deadline {
            let members = self.cluster.servers_matching(|server| server.is_reachable());
            let answers = join_all(members.iter().map(|member| self.poll_member(member))).await;

            // Tally distinct reporters per claimed primary.
            let mut confirmations: HashMap<String, HashSet<String>> = HashMap::new();
            for (reporter, claimed) in answers.into_iter().flatten() {
                if let Some(primary) = claimed {
                    confirmations.entry(primary).or_default().insert(reporter);
                }
            }

            let agreed = confirmations
                .into_iter()
                .find(|(_, reporters)| reporters.len() >= required)
                .map(|(primary, _)| primary);

            if let Some(primary) = agreed {
                info!("{} confirmed as the primary", primary);
                match self.promote_and_connect(&primary).await {
                    Some(connection) => return Some(connection),
                    None => debug!("The confirmed primary {} refused the connection", primary),
                }
            }

            sleep(POLL_BACKOFF).await;
        }

        warn!(
            "No primary was confirmed within {:?}; writes will fail fast",
            self.config.reconnect_timeout()
        );
        None
    }

    /// Asks one member for its view of the primary, applying its identity
    /// reply along the way. Returns `(reporter, claimed_primary)`.
    async fn poll_member(&self, member: &Arc<Server>) -> Option<(String, Option<String>)> {
        let connection = match self.factory.connect_to_server(member).await {
            Ok(connection) => connection,
            Err(error) => {
                debug!("Couldn't poll {}: {}", member.name(), error);
                return None;
            }
        };

        let started = Instant::now();
        let reply = match timeout(self.config.connect_timeout(), connection.request(commands::is_master())).await {
            Ok(Ok(reply)) => reply,
            _ => {
                let _ = connection.shutdown(true).await;
                return None;
            }
        };
        let _ = connection.shutdown(true).await;

        let document = reply.first_document()?;
        member.update_from(document, started.elapsed());

        let claimed = if document.get_bool("ismaster").unwrap_or(false) {
            Some(member.name().to_owned())
        } else {
            document.get_str("primary").map(str::to_owned)
        };
        Some((member.name().to_owned(), claimed))
    }

    /// Opens a connection to the agreed primary and makes it the sole
    /// writable server.
    async fn promote_and_connect(&self, primary: &str) -> Option<SocketConnection> {
        let server = match self.cluster.add(primary) {
            Ok(server) => server,
            Err(error) => {
                warn!("The confirmed primary {} is unusable: {}", primary, error);
                return None;
            }
        };

        let connection = match self.factory.connect_to_server(&server).await {
            Ok(connection) => connection,
            Err(error) => {
                debug!("Couldn't connect to the new primary {}: {}", primary, error);
                return None;
            }
        };

        for other in self.cluster.servers() {
            if other.name() != server.name() {
                other.demote();
            }
        }
        server.promote_writable();

        Some(connection)
    }
}
