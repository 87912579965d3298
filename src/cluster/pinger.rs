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
    connection::SocketConnection,
    factory::SocketConnectionFactory,
    message::commands,
};

use futures::future::join_all;
use parking_lot::Mutex;
use rand::{thread_rng, Rng};
use std::{collections::HashMap, ops::Deref, sync::Arc, time::{Duration, Instant}};
use tokio::{task, time::{sleep, timeout}};

pub struct InnerPinger {
    cluster: Arc<Cluster>,
    factory: SocketConnectionFactory,
    interval: Duration,
    /// Probe connections, reused across sweeps while they stay healthy.
    probes: tokio::sync::Mutex<HashMap<String, SocketConnection>>,
    task: Mutex<Option<task::JoinHandle<()>>>,
}

/// Periodically measures every known server: sends the identity command,
/// times the round trip, and applies the reply to the server's state.
///
/// Servers that fail enough consecutive probes are marked unreachable and
/// drop out of selection; they stay in the cluster and rejoin as soon as a
/// probe succeeds.
#[derive(Clone)]
pub struct ClusterPinger(Arc<InnerPinger>);

impl Deref for ClusterPinger {
    type Target = InnerPinger;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl ClusterPinger {
    pub fn new(cluster: Arc<Cluster>, factory: SocketConnectionFactory, interval: Duration) -> Self {
        ClusterPinger(Arc::new(InnerPinger {
            cluster,
            factory,
            interval,
            probes: Default::default(),
            task: Default::default(),
        }))
    }

    /// Probes every known server once, in parallel, before returning.
    /// Bootstrap runs this so selection has data on first use.
    pub async fn initial_sweep(&self) {
        self.sweep().await;
    }

    /// Starts the periodic probe task. The task holds no strong reference to
    /// the pinger, so dropping the owning factory ends it.
    pub fn start(&self) {
        let weak = Arc::downgrade(&self.0);
        let interval = self.interval;
        let handle = task::spawn(async move {
            loop {
                // A little jitter keeps a fleet of clients from probing in
                // lockstep.
                let jitter = Duration::from_millis(thread_rng().gen_range(0..250));
                sleep(interval + jitter).await;
                match weak.upgrade() {
                    Some(inner) => ClusterPinger(inner).sweep().await,
                    None => break,
                }
            }
        });
        let mut slot = self.task.lock();
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
    }

    /// Stops the probe task and drops the probe connections.
    pub async fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        for (_, connection) in self.probes.lock().await.drain() {
            let _ = connection.shutdown(true).await;
        }
    }

    async fn sweep(&self) {
        let servers = self.cluster.servers();
        trace!("Probing {} servers", servers.len());
        join_all(servers.iter().map(|server| self.ping_server(server))).await;
    }

    async fn ping_server(&self, server: &Arc<Server>) {
        let connection = match self.probe_connection(server).await {
            Some(connection) => connection,
            None => {
                server.record_probe_failure();
                return;
            }
        };

        let started = Instant::now();
        let deadline = self.factory.config().connect_timeout();
        match timeout(deadline, connection.request(commands::is_master())).await {
            Ok(Ok(reply)) => {
                let round_trip = started.elapsed();
                if let Some(document) = reply.first_document() {
                    server.update_from(document, round_trip);
                }
                server.record_probe_success();
            }
            Ok(Err(error)) => {
                debug!("The probe of {} failed: {}", server.name(), error);
                self.discard_probe(server).await;
                server.record_probe_failure();
            }
            Err(_elapsed) => {
                debug!("The probe of {} timed out", server.name());
                self.discard_probe(server).await;
                server.record_probe_failure();
            }
        }
    }

    async fn probe_connection(&self, server: &Arc<Server>) -> Option<SocketConnection> {
        let mut probes = self.probes.lock().await;
        if let Some(existing) = probes.get(server.name()) {
            if existing.is_available() {
                return Some(existing.clone());
            }
            probes.remove(server.name());
        }
        drop(probes);

        match self.factory.connect_to_server(server).await {
            Ok(connection) => {
                self.probes
                    .lock()
                    .await
                    .insert(server.name().to_owned(), connection.clone());
                Some(connection)
            }
            Err(error) => {
                debug!("Couldn't open a probe to {}: {}", server.name(), error);
                None
            }
        }
    }

    async fn discard_probe(&self, server: &Arc<Server>) {
        if let Some(connection) = self.probes.lock().await.remove(server.name()) {
            let _ = connection.shutdown(true).await;
        }
    }
}

impl Drop for InnerPinger {
    fn drop(&mut self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}
