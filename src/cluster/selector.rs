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

use crate::cluster::{Cluster, ReadPreference, ReadPreferenceMode, Server};

use std::{sync::Arc, time::Duration};

/// Produces an ordered list of candidate servers for a request.
///
/// Selectors are pure views over the cluster; they hold no state of their own
/// and tolerate racing role updates. A stale pick fails fast on use and the
/// reconnect strategy takes over.
pub trait ServerSelector: Send + Sync {
    fn pick_servers(&self) -> Vec<Arc<Server>>;
}

/// Orders every reachable server by ascending average latency; servers with
/// no measurement yet sort last, ties keep insertion order.
pub struct LatencyServerSelector {
    cluster: Arc<Cluster>,
}

impl LatencyServerSelector {
    pub fn new(cluster: Arc<Cluster>) -> Self {
        LatencyServerSelector { cluster }
    }

    pub fn cluster(&self) -> &Arc<Cluster> {
        &self.cluster
    }
}

impl ServerSelector for LatencyServerSelector {
    fn pick_servers(&self) -> Vec<Arc<Server>> {
        let mut servers = self.cluster.servers_matching(|server| server.is_reachable());
        sort_by_latency(&mut servers);
        servers
    }
}

/// Filters by read preference and optional tags, then orders by latency.
/// "Preferred" modes place the fallback group after the preferred one.
pub struct ReadPreferenceSelector {
    cluster: Arc<Cluster>,
    preference: ReadPreference,
}

impl ReadPreferenceSelector {
    pub fn new(cluster: Arc<Cluster>, preference: ReadPreference) -> Self {
        ReadPreferenceSelector { cluster, preference }
    }

    pub fn preference(&self) -> &ReadPreference {
        &self.preference
    }

    fn eligible(&self, server: &Server) -> bool {
        server.is_reachable() && self.preference.matches_tags(&server.tags())
    }

    fn writables(&self) -> Vec<Arc<Server>> {
        let mut servers = self
            .cluster
            .servers_matching(|server| server.is_writable() && self.eligible(server));
        sort_by_latency(&mut servers);
        servers
    }

    fn secondaries(&self) -> Vec<Arc<Server>> {
        let mut servers = self
            .cluster
            .servers_matching(|server| server.is_readable() && !server.is_writable() && self.eligible(server));
        sort_by_latency(&mut servers);
        servers
    }
}

impl ServerSelector for ReadPreferenceSelector {
    fn pick_servers(&self) -> Vec<Arc<Server>> {
        match self.preference.mode {
            ReadPreferenceMode::Primary => self.writables(),
            ReadPreferenceMode::Secondary => self.secondaries(),
            ReadPreferenceMode::PrimaryPreferred => {
                let mut servers = self.writables();
                servers.extend(self.secondaries());
                servers
            }
            ReadPreferenceMode::SecondaryPreferred => {
                let mut servers = self.secondaries();
                servers.extend(self.writables());
                servers
            }
            ReadPreferenceMode::Nearest => {
                let mut servers = self
                    .cluster
                    .servers_matching(|server| server.is_readable() && self.eligible(server));
                sort_by_latency(&mut servers);
                servers
            }
        }
    }
}

fn sort_by_latency(servers: &mut Vec<Arc<Server>>) {
    // A stable sort keeps insertion order between equal latencies.
    servers.sort_by_key(|server| server.average_latency().unwrap_or(Duration::MAX));
}
