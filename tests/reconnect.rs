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

use common::{standalone_identity, MockServer};
use docnet::{
    cluster::{Cluster, LatencyServerSelector, ServerSelector},
    codec::JsonCodec,
    config::Config,
    doc,
    factory::SocketConnectionFactory,
    reconnect::{ReplicaSetReconnectStrategy, SimpleReconnectStrategy},
};

use parking_lot::Mutex;
use std::{sync::Arc, time::Duration};

fn fast_config(servers: Vec<String>) -> Arc<Config> {
    let mut config = Config::new(servers);
    config.set_connect_timeout(Duration::from_secs(2));
    config.set_read_timeout(Duration::from_millis(500));
    Arc::new(config)
}

#[tokio::test]
async fn the_simple_strategy_falls_over_to_a_healthy_server() {
    common::start_logger();
    let dead = common::dead_server_name().await;
    let live = MockServer::with_identity(standalone_identity()).await;

    let cluster = Arc::new(Cluster::new());
    cluster.add(&dead).unwrap();
    cluster.add(&live.name()).unwrap();

    let config = fast_config(vec![dead.clone(), live.name()]);
    let factory = SocketConnectionFactory::new(config.clone(), cluster.clone(), Arc::new(JsonCodec));
    let selector: Arc<dyn ServerSelector> = Arc::new(LatencyServerSelector::new(cluster.clone()));
    let strategy = SimpleReconnectStrategy::new(cluster.clone(), selector.clone(), config.clone(), factory);

    // The broken server is retried first, then the selector's candidates;
    // only the live server passes the status ping.
    let replacement = strategy.reconnect(&dead).await.unwrap();
    assert_eq!(replacement.server_name(), live.name());

    assert!(Arc::ptr_eq(strategy.cluster(), &cluster));
    assert!(Arc::ptr_eq(strategy.selector(), &selector));
    assert!(Arc::ptr_eq(strategy.config(), &config));
    assert!(Arc::ptr_eq(strategy.factory().cluster(), &cluster));

    let _ = replacement.shutdown(true).await;
}

#[tokio::test]
async fn the_simple_strategy_gives_up_when_every_candidate_is_down() {
    let dead = common::dead_server_name().await;
    let also_dead = common::dead_server_name().await;

    let cluster = Arc::new(Cluster::new());
    cluster.add(&dead).unwrap();
    cluster.add(&also_dead).unwrap();

    let config = fast_config(vec![dead.clone(), also_dead]);
    let factory = SocketConnectionFactory::new(config.clone(), cluster.clone(), Arc::new(JsonCodec));
    let selector: Arc<dyn ServerSelector> = Arc::new(LatencyServerSelector::new(cluster.clone()));
    let strategy = SimpleReconnectStrategy::new(cluster, selector, config, factory);

    assert!(strategy.reconnect(&dead).await.is_none());
}

/// A member that reports the given primary (or none) for every identity
/// query.
async fn member_reporting(primary: Option<String>) -> MockServer {
    let identity = match primary {
        Some(primary) => doc! {
            "ismaster" => false,
            "secondary" => true,
            "primary" => primary,
            "ok" => 1,
        },
        None => doc! {
            "ismaster" => false,
            "secondary" => true,
            "ok" => 1,
        },
    };
    MockServer::with_identity(identity).await
}

/// A member that claims to be the primary itself.
async fn self_proclaimed_primary() -> MockServer {
    let own_name: Arc<Mutex<Option<String>>> = Default::default();
    let own_name_clone = own_name.clone();
    let mock = MockServer::start(Arc::new(move |request: &common::ParsedRequest| {
        if request.header.opcode != docnet::message::OpCode::Query {
            return None;
        }
        let name = own_name_clone.lock().clone().unwrap();
        Some(common::MockReply::document(doc! {
            "ismaster" => true,
            "primary" => name,
            "ok" => 1,
        }))
    }))
    .await;
    *own_name.lock() = Some(mock.name());
    mock
}

#[tokio::test]
async fn two_confirmations_elect_the_new_primary() {
    common::start_logger();
    let new_primary = self_proclaimed_primary().await;
    let confirming = member_reporting(Some(new_primary.name())).await;
    let undecided = member_reporting(None).await;

    let cluster = Arc::new(Cluster::new());
    cluster.add(&new_primary.name()).unwrap();
    cluster.add(&confirming.name()).unwrap();
    cluster.add(&undecided.name()).unwrap();

    let mut config = Config::new(vec![new_primary.name()]);
    config.set_connect_timeout(Duration::from_secs(2));
    config.set_reconnect_timeout(Duration::from_secs(5));
    let config = Arc::new(config);

    let factory = SocketConnectionFactory::new(config.clone(), cluster.clone(), Arc::new(JsonCodec));
    let strategy = ReplicaSetReconnectStrategy::new(cluster.clone(), config, factory);

    let connection = strategy.rediscover(None).await.unwrap();
    assert_eq!(connection.server_name(), new_primary.name());

    let writable: Vec<String> = cluster
        .writable_servers()
        .iter()
        .map(|server| server.name().to_owned())
        .collect();
    assert_eq!(writable, vec![new_primary.name()]);

    let _ = connection.shutdown(true).await;
}

#[tokio::test]
async fn disagreement_elects_nobody_and_empties_the_writable_set() {
    let bystander = member_reporting(None).await;
    let first_claimer = member_reporting(Some(bystander.name())).await;
    let second_claimer = member_reporting(Some(first_claimer.name())).await;

    let cluster = Arc::new(Cluster::new());
    cluster.add(&bystander.name()).unwrap();
    cluster.add(&first_claimer.name()).unwrap();
    cluster.add(&second_claimer.name()).unwrap();

    // The stale view: one member still looks writable before the search.
    cluster
        .get(&first_claimer.name())
        .unwrap()
        .update_from(&doc! { "ismaster" => true }, Duration::from_millis(1));
    assert_eq!(cluster.writable_servers().len(), 1);

    let mut config = Config::new(vec![bystander.name()]);
    config.set_connect_timeout(Duration::from_secs(2));
    config.set_reconnect_timeout(Duration::from_millis(600));
    let config = Arc::new(config);

    let factory = SocketConnectionFactory::new(config.clone(), cluster.clone(), Arc::new(JsonCodec));
    let strategy = ReplicaSetReconnectStrategy::new(cluster.clone(), config, factory);

    assert!(strategy.rediscover(None).await.is_none());
    assert!(cluster.writable_servers().is_empty());
}

#[tokio::test]
async fn a_single_confirmation_is_not_a_quorum() {
    let phantom = common::dead_server_name().await;
    let lone_claimer = member_reporting(Some(phantom.clone())).await;
    let undecided = member_reporting(None).await;

    let cluster = Arc::new(Cluster::new());
    cluster.add(&lone_claimer.name()).unwrap();
    cluster.add(&undecided.name()).unwrap();

    let mut config = Config::new(vec![lone_claimer.name()]);
    config.set_connect_timeout(Duration::from_secs(2));
    config.set_reconnect_timeout(Duration::from_millis(600));
    let config = Arc::new(config);

    let factory = SocketConnectionFactory::new(config.clone(), cluster.clone(), Arc::new(JsonCodec));
    let strategy = ReplicaSetReconnectStrategy::new(cluster, config, factory);

    assert!(strategy.rediscover(None).await.is_none());
}

#[tokio::test]
async fn the_broken_primary_is_demoted_up_front() {
    let broken = common::dead_server_name().await;
    let member = member_reporting(None).await;

    let cluster = Arc::new(Cluster::new());
    cluster.add(&broken).unwrap();
    cluster.add(&member.name()).unwrap();
    cluster
        .get(&broken)
        .unwrap()
        .update_from(&doc! { "ismaster" => true }, Duration::from_millis(1));

    let mut config = Config::new(vec![member.name()]);
    config.set_connect_timeout(Duration::from_secs(2));
    config.set_reconnect_timeout(Duration::from_millis(400));
    let config = Arc::new(config);

    let factory = SocketConnectionFactory::new(config.clone(), cluster.clone(), Arc::new(JsonCodec));
    let strategy = ReplicaSetReconnectStrategy::new(cluster.clone(), config, factory);

    assert!(strategy.rediscover(Some(&broken)).await.is_none());
    assert!(cluster.writable_servers().is_empty());
}
