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

mod common;

use common::MockServer;
use docnet::{
    cluster::{Cluster, ClusterPinger, LatencyServerSelector, ServerRole, ServerSelector, ServerVersion},
    codec::JsonCodec,
    config::Config,
    doc,
    factory::SocketConnectionFactory,
};

use std::{sync::Arc, time::Duration};

fn fast_config(servers: Vec<String>) -> Arc<Config> {
    let mut config = Config::new(servers);
    config.set_connect_timeout(Duration::from_secs(2));
    config.set_read_timeout(Duration::from_millis(500));
    Arc::new(config)
}

#[tokio::test]
async fn the_initial_sweep_classifies_every_server() {
    let mock = MockServer::with_identity(doc! {
        "ismaster" => true,
        "version" => "4.0.2",
        "maxBsonObjectSize" => 8 * 1024 * 1024,
        "tags" => doc! { "dc" => "east" },
        "ok" => 1,
    })
    .await;

    let cluster = Arc::new(Cluster::new());
    cluster.add(&mock.name()).unwrap();
    let config = fast_config(vec![mock.name()]);
    let factory = SocketConnectionFactory::new(config, cluster.clone(), Arc::new(JsonCodec));
    let pinger = ClusterPinger::new(cluster.clone(), factory, Duration::from_secs(10));

    pinger.initial_sweep().await;

    let server = cluster.get(&mock.name()).unwrap();
    assert_eq!(server.role(), ServerRole::Writable);
    assert_eq!(server.version(), Some(ServerVersion::new(vec![4, 0, 2])));
    assert_eq!(server.max_document_size(), 8 * 1024 * 1024);
    assert_eq!(server.tags().get("dc").map(String::as_str), Some("east"));
    assert!(server.average_latency().is_some());
    assert!(server.is_reachable());

    pinger.stop().await;
}

#[tokio::test]
async fn repeated_probe_failures_take_a_server_out_of_selection() {
    let live = MockServer::with_identity(common::standalone_identity()).await;
    let dead = common::dead_server_name().await;

    let cluster = Arc::new(Cluster::new());
    cluster.add(&live.name()).unwrap();
    cluster.add(&dead).unwrap();
    let config = fast_config(vec![live.name(), dead.clone()]);
    let factory = SocketConnectionFactory::new(config, cluster.clone(), Arc::new(JsonCodec));
    let pinger = ClusterPinger::new(cluster.clone(), factory, Duration::from_secs(10));

    for _ in 0..docnet::PING_FAILURE_THRESHOLD {
        pinger.initial_sweep().await;
    }

    let dead_server = cluster.get(&dead).unwrap();
    assert!(!dead_server.is_reachable());
    assert!(cluster.get(&live.name()).unwrap().is_reachable());

    // The unreachable member drops out of selection but stays registered.
    let picked = LatencyServerSelector::new(cluster.clone()).pick_servers();
    assert_eq!(picked.len(), 1);
    assert_eq!(picked[0].name(), live.name());
    assert_eq!(cluster.len(), 2);

    pinger.stop().await;
}

#[tokio::test]
async fn the_periodic_task_keeps_latencies_fresh() {
    let mock = MockServer::with_identity(common::standalone_identity()).await;

    let cluster = Arc::new(Cluster::new());
    cluster.add(&mock.name()).unwrap();
    let config = fast_config(vec![mock.name()]);
    let factory = SocketConnectionFactory::new(config, cluster.clone(), Arc::new(JsonCodec));
    let pinger = ClusterPinger::new(cluster.clone(), factory, Duration::from_millis(100));

    pinger.initial_sweep().await;
    let probes_before = mock.request_count();
    pinger.start();

    wait_until!(5, mock.request_count() > probes_before + 1);

    let server = cluster.get(&mock.name()).unwrap();
    assert_eq!(server.role(), ServerRole::Writable);
    assert!(server.average_latency().is_some());

    pinger.stop().await;
}
