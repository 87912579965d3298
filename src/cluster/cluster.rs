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
    cluster::{Server, ServerVersion},
    errors::DriverError,
};

use parking_lot::RwLock;
use std::{
    net::{SocketAddr, ToSocketAddrs},
    sync::Arc,
};

/// The set of known servers, keyed by canonical name.
///
/// Servers are created once and never replaced; everything that points at a
/// server (connections, selectors, the pinger) can hold the `Arc` for as long
/// as the cluster lives. Insertion order is preserved so selection ties break
/// deterministically.
#[derive(Default)]
pub struct Cluster {
    servers: RwLock<Vec<Arc<Server>>>,
}

impl Cluster {
    pub fn new() -> Self {
        Default::default()
    }

    /// Registers a server by name, returning the existing entry when the
    /// canonical name is already known.
    pub fn add(&self, name: &str) -> Result<Arc<Server>, DriverError> {
        let canonical = canonicalize(name);

        if let Some(server) = self.get(&canonical) {
            return Ok(server);
        }

        let addresses = resolve(&canonical)?;
        let mut servers = self.servers.write();
        // A racing add may have won; the first insertion is the one that sticks.
        if let Some(server) = servers.iter().find(|server| server.name() == canonical) {
            return Ok(server.clone());
        }
        trace!("Registering {}", canonical);
        let server = Arc::new(Server::new(canonical, addresses));
        servers.push(server.clone());
        Ok(server)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Server>> {
        let canonical = canonicalize(name);
        self.servers
            .read()
            .iter()
            .find(|server| server.name() == canonical)
            .cloned()
    }

    pub fn servers(&self) -> Vec<Arc<Server>> {
        self.servers.read().clone()
    }

    pub fn writable_servers(&self) -> Vec<Arc<Server>> {
        self.servers_matching(|server| server.is_writable())
    }

    pub fn servers_matching<P: Fn(&Server) -> bool>(&self, predicate: P) -> Vec<Arc<Server>> {
        self.servers
            .read()
            .iter()
            .filter(|server| predicate(server))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.servers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.read().is_empty()
    }

    /// The lowest version any known server reported.
    pub fn minimum_version(&self) -> Option<ServerVersion> {
        self.servers.read().iter().filter_map(|server| server.version()).min()
    }

    /// The highest version any known server reported.
    pub fn maximum_version(&self) -> Option<ServerVersion> {
        self.servers.read().iter().filter_map(|server| server.version()).max()
    }
}

/// Normalizes a server name to `host:port`.
fn canonicalize(name: &str) -> String {
    if name.contains(':') {
        name.to_owned()
    } else {
        format!("{}:{}", name, crate::DEFAULT_PORT)
    }
}

fn resolve(canonical: &str) -> Result<Vec<SocketAddr>, DriverError> {
    // A literal address skips the resolver.
    if let Ok(address) = canonical.parse::<SocketAddr>() {
        return Ok(vec![address]);
    }
    let addresses: Vec<SocketAddr> = canonical
        .to_socket_addrs()
        .map_err(|_| DriverError::UnresolvedAddress(canonical.to_owned()))?
        .collect();
    if addresses.is_empty() {
        return Err(DriverError::UnresolvedAddress(canonical.to_owned()));
    }
    Ok(addresses)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_is_idempotent_on_name() {
        let cluster = Cluster::new();
        let first = cluster.add("127.0.0.1:27017").unwrap();
        let second = cluster.add("127.0.0.1:27017").unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cluster.len(), 1);
    }

    #[test]
    fn names_are_canonicalized_with_the_default_port() {
        let cluster = Cluster::new();
        let server = cluster.add("127.0.0.1").unwrap();
        assert_eq!(server.name(), "127.0.0.1:27017");
        assert!(Arc::ptr_eq(&server, &cluster.add("127.0.0.1:27017").unwrap()));
    }

    #[test]
    fn insertion_order_is_preserved() {
        let cluster = Cluster::new();
        cluster.add("127.0.0.1:27018").unwrap();
        cluster.add("127.0.0.1:27017").unwrap();
        cluster.add("127.0.0.1:27019").unwrap();

        let names: Vec<String> = cluster.servers().iter().map(|s| s.name().to_owned()).collect();
        assert_eq!(names, vec![
            "127.0.0.1:27018".to_owned(),
            "127.0.0.1:27017".to_owned(),
            "127.0.0.1:27019".to_owned()
        ]);
    }

    #[test]
    fn version_aggregation_spans_the_cluster() {
        use crate::doc;
        use std::time::Duration;

        let cluster = Cluster::new();
        let first = cluster.add("127.0.0.1:27017").unwrap();
        let second = cluster.add("127.0.0.1:27018").unwrap();

        first.update_from(&doc! { "version" => "3.6.4" }, Duration::from_millis(1));
        second.update_from(&doc! { "version" => "4.0.2" }, Duration::from_millis(1));

        assert_eq!(cluster.minimum_version(), Some("3.6.4".parse().unwrap()));
        assert_eq!(cluster.maximum_version(), Some("4.0.2".parse().unwrap()));
    }

    #[test]
    fn unresolvable_names_are_rejected() {
        let cluster = Cluster::new();
        assert!(matches!(
            cluster.add("such-a-host-does-not-exist.invalid:27017"),
            Err(DriverError::UnresolvedAddress(_))
        ));
    }
}
