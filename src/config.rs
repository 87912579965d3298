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

use crate::{client::Durability, cluster::ReadPreference, connection::CallbackExecutor};

use arc_swap::ArcSwap;
use std::{sync::Arc, time::Duration};

/// Which lock guards the pending-message queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockType {
    /// The default parking-lot mutex; fastest under light contention.
    Mutex,
    /// A fair mutex; grants slots in arrival order under heavy contention.
    Fair,
}

impl Default for LockType {
    fn default() -> Self {
        LockType::Mutex
    }
}

/// A username/password pair scoped to a database. When present, every opened
/// connection completes the challenge-response handshake first.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub database: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("database", &self.database)
            .finish()
    }
}

/// The pre-configured parameters of a client.
pub struct Config {
    /// The seed endpoints used for bootstrap.
    servers: ArcSwap<Vec<String>>,
    /// Whether identity replies may expand the seed list.
    auto_discover_servers: bool,
    /// The bound on each connection's pending-message queue.
    max_pending_per_connection: usize,
    /// The socket read timeout; also the unit of one idle tick.
    read_timeout: Duration,
    /// The bound on a TCP connect.
    connect_timeout: Duration,
    /// Consecutive idle ticks before a connection drains itself.
    max_idle_tick_count: u32,
    /// The deadline for the replica-set reconnect quorum.
    reconnect_timeout: Duration,
    /// The interval between cluster health probes.
    ping_interval: Duration,
    /// Distinct members that must agree before a primary is accepted.
    required_primary_confirmations: usize,
    lock_type: LockType,
    /// Runs non-lightweight callbacks off the reader task.
    executor: Option<Arc<dyn CallbackExecutor>>,
    credentials: Option<Credentials>,
    default_durability: Durability,
    default_read_preference: ReadPreference,
}

impl Config {
    pub fn new(servers: Vec<String>) -> Self {
        Config {
            servers: ArcSwap::new(Arc::new(servers)),
            auto_discover_servers: true,
            max_pending_per_connection: 1024,
            read_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            max_idle_tick_count: 12,
            reconnect_timeout: Duration::from_secs(30),
            ping_interval: Duration::from_secs(crate::DEFAULT_PING_INTERVAL_SECS),
            required_primary_confirmations: crate::DEFAULT_PRIMARY_CONFIRMATIONS,
            lock_type: Default::default(),
            executor: None,
            credentials: None,
            default_durability: Default::default(),
            default_read_preference: Default::default(),
        }
    }

    /// Returns the seed endpoints used for bootstrap.
    #[inline]
    pub fn servers(&self) -> Arc<Vec<String>> {
        self.servers.load_full()
    }

    pub fn set_servers(&self, servers: Vec<String>) {
        self.servers.store(Arc::new(servers));
    }

    #[inline]
    pub fn auto_discover_servers(&self) -> bool {
        self.auto_discover_servers
    }

    pub fn set_auto_discover_servers(&mut self, auto_discover: bool) {
        self.auto_discover_servers = auto_discover;
    }

    #[inline]
    pub fn max_pending_per_connection(&self) -> usize {
        self.max_pending_per_connection
    }

    pub fn set_max_pending_per_connection(&mut self, bound: usize) {
        self.max_pending_per_connection = bound;
    }

    #[inline]
    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    pub fn set_read_timeout(&mut self, read_timeout: Duration) {
        self.read_timeout = read_timeout;
    }

    #[inline]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn set_connect_timeout(&mut self, connect_timeout: Duration) {
        self.connect_timeout = connect_timeout;
    }

    #[inline]
    pub fn max_idle_tick_count(&self) -> u32 {
        self.max_idle_tick_count
    }

    pub fn set_max_idle_tick_count(&mut self, ticks: u32) {
        self.max_idle_tick_count = ticks;
    }

    #[inline]
    pub fn reconnect_timeout(&self) -> Duration {
        self.reconnect_timeout
    }

    pub fn set_reconnect_timeout(&mut self, reconnect_timeout: Duration) {
        self.reconnect_timeout = reconnect_timeout;
    }

    #[inline]
    pub fn ping_interval(&self) -> Duration {
        self.ping_interval
    }

    pub fn set_ping_interval(&mut self, ping_interval: Duration) {
        self.ping_interval = ping_interval;
    }

    #[inline]
    pub fn required_primary_confirmations(&self) -> usize {
        self.required_primary_confirmations
    }

    pub fn set_required_primary_confirmations(&mut self, confirmations: usize) {
        self.required_primary_confirmations = confirmations.max(1);
    }

    #[inline]
    pub fn lock_type(&self) -> LockType {
        self.lock_type
    }

    pub fn set_lock_type(&mut self, lock_type: LockType) {
        self.lock_type = lock_type;
    }

    #[inline]
    pub fn executor(&self) -> Option<&Arc<dyn CallbackExecutor>> {
        self.executor.as_ref()
    }

    pub fn set_executor(&mut self, executor: Arc<dyn CallbackExecutor>) {
        self.executor = Some(executor);
    }

    #[inline]
    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn set_credentials(&mut self, credentials: Credentials) {
        self.credentials = Some(credentials);
    }

    #[inline]
    pub fn default_durability(&self) -> &Durability {
        &self.default_durability
    }

    pub fn set_default_durability(&mut self, durability: Durability) {
        self.default_durability = durability;
    }

    #[inline]
    pub fn default_read_preference(&self) -> &ReadPreference {
        &self.default_read_preference
    }

    pub fn set_default_read_preference(&mut self, read_preference: ReadPreference) {
        self.default_read_preference = read_preference;
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::new(vec![format!("localhost:{}", crate::DEFAULT_PORT)])
    }
}
