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

use crate::{cluster::ServerVersion, codec::Document};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
    time::Duration,
};

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum ServerRole {
    /// No identity reply has classified this server yet.
    Unknown,
    /// Accepts writes; the primary of a replica set, or a standalone/router.
    Writable,
    /// Readable but not writable; a secondary.
    NonWritable,
    /// A member that serves no reads: an arbiter or a passive member.
    Candidate,
}

impl Default for ServerRole {
    fn default() -> Self {
        ServerRole::Unknown
    }
}

#[derive(Debug, Default)]
struct ServerState {
    role: ServerRole,
    /// Exponentially-weighted average round trip, in milliseconds.
    average_latency_ms: Option<f64>,
    tags: HashMap<String, String>,
    version: Option<ServerVersion>,
    max_document_size: Option<usize>,
}

/// Wall-clock bookkeeping for one server.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ServerQuality {
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    pub last_connected: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
}

impl ServerQuality {
    fn see(&mut self) {
        let now = Utc::now();
        if self.first_seen.is_none() {
            self.first_seen = Some(now);
        }
        self.last_seen = Some(now);
    }
}

/// One endpoint of the cluster: a stable identity plus everything the runtime
/// has learned about it.
///
/// A `Server` is shared by the cluster, the pinger, the selectors, and every
/// live connection pointed at it; it lives exactly as long as its cluster.
pub struct Server {
    /// The canonical `host:port` name.
    name: String,
    /// Every address the name resolved to.
    addresses: Vec<SocketAddr>,
    /// The address a connection last succeeded on.
    pinned_address: Mutex<Option<SocketAddr>>,
    state: RwLock<ServerState>,
    quality: Mutex<ServerQuality>,
    reachable: AtomicBool,
    probe_failures: AtomicU32,
    messages_sent: AtomicU64,
    replies_received: AtomicU64,
    connection_opens: AtomicU64,
    connection_failures: AtomicU64,
}

impl Server {
    pub(crate) fn new(name: String, addresses: Vec<SocketAddr>) -> Self {
        Server {
            name,
            addresses,
            pinned_address: Default::default(),
            state: Default::default(),
            quality: Default::default(),
            reachable: AtomicBool::new(true),
            probe_failures: Default::default(),
            messages_sent: Default::default(),
            replies_received: Default::default(),
            connection_opens: Default::default(),
            connection_failures: Default::default(),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn addresses(&self) -> &[SocketAddr] {
        &self.addresses
    }

    /// The address to dial: the pinned one when a connection has succeeded
    /// before, otherwise every resolved address in order.
    pub fn connect_candidates(&self) -> Vec<SocketAddr> {
        let pinned = *self.pinned_address.lock();
        let mut candidates = Vec::with_capacity(self.addresses.len());
        if let Some(address) = pinned {
            candidates.push(address);
        }
        for address in &self.addresses {
            if Some(*address) != pinned {
                candidates.push(*address);
            }
        }
        candidates
    }

    pub fn pin_address(&self, address: SocketAddr) {
        *self.pinned_address.lock() = Some(address);
    }

    pub fn pinned_address(&self) -> Option<SocketAddr> {
        *self.pinned_address.lock()
    }

    #[inline]
    pub fn role(&self) -> ServerRole {
        self.state.read().role
    }

    #[inline]
    pub fn is_writable(&self) -> bool {
        self.role() == ServerRole::Writable
    }

    #[inline]
    pub fn is_readable(&self) -> bool {
        matches!(self.role(), ServerRole::Writable | ServerRole::NonWritable)
    }

    pub fn version(&self) -> Option<ServerVersion> {
        self.state.read().version.clone()
    }

    pub fn tags(&self) -> HashMap<String, String> {
        self.state.read().tags.clone()
    }

    pub fn max_document_size(&self) -> usize {
        self.state.read().max_document_size.unwrap_or(crate::DEFAULT_MAX_DOCUMENT_SIZE)
    }

    pub fn average_latency(&self) -> Option<Duration> {
        self.state
            .read()
            .average_latency_ms
            .map(|ms| Duration::from_secs_f64(ms / 1000.0))
    }

    pub fn quality(&self) -> ServerQuality {
        self.quality.lock().clone()
    }

    /// Applies an identity reply: role, tags, version, document size limit,
    /// and the latest latency sample.
    ///
    /// Demotion is immediate on any contradicting reply; promotion only
    /// happens on a positive identity.
    pub fn update_from(&self, document: &Document, round_trip: Duration) {
        let is_master = document.get_bool("ismaster").unwrap_or(false);
        let named_primary = document.get_str("primary");
        let is_secondary = document.get_bool("secondary").unwrap_or(false);
        let is_candidate = document.get_bool("arbiterOnly").unwrap_or(false)
            || document.get_bool("passive").unwrap_or(false)
            || document.get_bool("hidden").unwrap_or(false);

        let mut state = self.state.write();

        if is_master || named_primary == Some(self.name()) {
            if state.role != ServerRole::Writable {
                debug!("{} is now writable", self.name);
            }
            state.role = ServerRole::Writable;
        } else if is_candidate {
            state.role = ServerRole::Candidate;
        } else if is_secondary || document.contains_key("ismaster") {
            if state.role == ServerRole::Writable {
                debug!("{} is no longer writable", self.name);
            }
            state.role = ServerRole::NonWritable;
        }

        if let Some(tags) = document.get_document("tags") {
            state.tags = tags
                .iter()
                .filter_map(|(key, value)| value.as_str().map(|v| (key.clone(), v.to_owned())))
                .collect();
        }
        if let Some(version) = document.get_str("version").and_then(|v| v.parse().ok()) {
            state.version = Some(version);
        }
        if let Some(size) = document.get_i64("maxBsonObjectSize") {
            state.max_document_size = Some(size as usize);
        }

        Self::smooth_latency(&mut state, round_trip);
        drop(state);

        self.quality.lock().see();
    }

    /// Folds a latency sample into the running average.
    pub fn update_latency(&self, sample: Duration) {
        Self::smooth_latency(&mut self.state.write(), sample);
    }

    fn smooth_latency(state: &mut ServerState, sample: Duration) {
        let sample_ms = sample.as_secs_f64() * 1000.0;
        state.average_latency_ms = Some(match state.average_latency_ms {
            Some(average) => {
                crate::LATENCY_SMOOTHING_FACTOR * sample_ms + (1.0 - crate::LATENCY_SMOOTHING_FACTOR) * average
            }
            None => sample_ms,
        });
    }

    /// Demotes a writable server, typically after its connection broke.
    pub fn demote(&self) {
        let mut state = self.state.write();
        if state.role == ServerRole::Writable {
            debug!("{} is no longer writable", self.name);
            state.role = ServerRole::NonWritable;
        }
    }

    pub(crate) fn promote_writable(&self) {
        self.state.write().role = ServerRole::Writable;
    }

    #[inline]
    pub fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::Relaxed)
    }

    /// Counts a probe failure; after enough in a row the server drops out of
    /// selection until a probe succeeds again.
    pub(crate) fn record_probe_failure(&self) {
        let failures = self.probe_failures.fetch_add(1, Ordering::SeqCst) + 1;
        self.quality.lock().last_failure = Some(Utc::now());
        if failures >= crate::PING_FAILURE_THRESHOLD && self.reachable.swap(false, Ordering::SeqCst) {
            warn!("{} is unreachable after {} failed probes", self.name, failures);
        }
    }

    pub(crate) fn record_probe_success(&self) {
        self.probe_failures.store(0, Ordering::SeqCst);
        if !self.reachable.swap(true, Ordering::SeqCst) {
            info!("{} is reachable again", self.name);
        }
    }

    pub(crate) fn record_connection_open(&self) {
        self.connection_opens.fetch_add(1, Ordering::Relaxed);
        let mut quality = self.quality.lock();
        quality.see();
        quality.last_connected = Some(Utc::now());
    }

    pub(crate) fn record_connection_failure(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
        self.quality.lock().last_failure = Some(Utc::now());
    }

    pub(crate) fn record_message_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reply_received(&self) {
        self.replies_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    pub fn replies_received(&self) -> u64 {
        self.replies_received.load(Ordering::Relaxed)
    }

    pub fn connection_opens(&self) -> u64 {
        self.connection_opens.load(Ordering::Relaxed)
    }

    pub fn connection_failures(&self) -> u64 {
        self.connection_failures.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("name", &self.name)
            .field("role", &self.role())
            .field("reachable", &self.is_reachable())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    fn server(name: &str) -> Server {
        Server::new(name.to_owned(), vec!["127.0.0.1:27017".parse().unwrap()])
    }

    #[test]
    fn positive_identity_promotes() {
        let server = server("db1:27017");
        assert_eq!(server.role(), ServerRole::Unknown);

        server.update_from(&doc! { "ismaster" => true }, Duration::from_millis(5));
        assert_eq!(server.role(), ServerRole::Writable);
    }

    #[test]
    fn naming_in_the_primary_field_promotes() {
        let server = server("db1:27017");
        server.update_from(
            &doc! { "ismaster" => false, "primary" => "db1:27017" },
            Duration::from_millis(5),
        );
        assert_eq!(server.role(), ServerRole::Writable);
    }

    #[test]
    fn contradiction_demotes_immediately() {
        let server = server("db1:27017");
        server.update_from(&doc! { "ismaster" => true }, Duration::from_millis(5));
        server.update_from(
            &doc! { "ismaster" => false, "secondary" => true, "primary" => "db2:27017" },
            Duration::from_millis(5),
        );
        assert_eq!(server.role(), ServerRole::NonWritable);
    }

    #[test]
    fn silence_on_role_does_not_promote() {
        let server = server("db1:27017");
        server.update_from(&doc! { "version" => "4.0.2" }, Duration::from_millis(5));
        assert_eq!(server.role(), ServerRole::Unknown);
        assert_eq!(server.version(), Some(ServerVersion::new(vec![4, 0, 2])));
    }

    #[test]
    fn arbiters_become_candidates() {
        let server = server("db1:27017");
        server.update_from(
            &doc! { "ismaster" => false, "arbiterOnly" => true },
            Duration::from_millis(5),
        );
        assert_eq!(server.role(), ServerRole::Candidate);
        assert!(!server.is_readable());
    }

    #[test]
    fn latency_is_smoothed_not_replaced() {
        let server = server("db1:27017");
        server.update_latency(Duration::from_millis(100));
        server.update_latency(Duration::from_millis(200));

        // 0.25 * 200 + 0.75 * 100 = 125
        let average = server.average_latency().unwrap();
        assert!((average.as_secs_f64() * 1000.0 - 125.0).abs() < 1e-6);
    }

    #[test]
    fn identity_reply_fills_in_metadata() {
        let server = server("db1:27017");
        server.update_from(
            &doc! {
                "ismaster" => true,
                "maxBsonObjectSize" => 8 * 1024 * 1024,
                "tags" => doc! { "dc" => "east" },
            },
            Duration::from_millis(5),
        );
        assert_eq!(server.max_document_size(), 8 * 1024 * 1024);
        assert_eq!(server.tags().get("dc").map(String::as_str), Some("east"));
    }

    #[test]
    fn repeated_probe_failures_mark_unreachable() {
        let server = server("db1:27017");
        for _ in 0..crate::PING_FAILURE_THRESHOLD {
            server.record_probe_failure();
        }
        assert!(!server.is_reachable());

        server.record_probe_success();
        assert!(server.is_reachable());
    }
}
