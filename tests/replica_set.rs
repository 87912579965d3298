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

use common::{MockReply, MockServer, ParsedRequest};
use docnet::{
    cluster::ReadPreference,
    codec::JsonCodec,
    config::Config,
    connection::reply_future,
    doc,
    errors::DriverError,
    factory::{Connection, ConnectionFactory, ReplicaSetConnectionFactory},
    message::Message,
};

use parking_lot::Mutex;
use std::{sync::Arc, time::Duration};

fn query_with(preference: ReadPreference) -> Message {
    Message::Query {
        namespace: "db.coll".to_owned(),
        skip: 0,
        batch_size: 0,
        query: doc! {},
        fields: None,
        read_preference: preference,
    }
}

fn fast_config(servers: Vec<String>) -> Arc<Config> {
    let mut config = Config::new(servers);
    config.set_connect_timeout(Duration::from_secs(2));
    config.set_read_timeout(Duration::from_millis(500));
    Arc::new(config)
}

/// A member whose identity names the set's primary and full host list. The
/// names are filled in after both servers are bound.
fn member(
    is_primary: bool,
    primary_name: Arc<Mutex<Option<String>>>,
    all_hosts: Arc<Mutex<Vec<String>>>,
) -> common::Responder {
    Arc::new(move |request: &ParsedRequest| {
        if request.header.opcode != docnet::message::OpCode::Query {
            return None;
        }
        if request.is_command("ismaster") {
            let primary = primary_name.lock().clone().unwrap();
            let hosts = all_hosts.lock().clone();
            return Some(MockReply::document(doc! {
                "ismaster" => is_primary,
                "secondary" => !is_primary,
                "setName" => "rs0",
                "primary" => primary,
                "hosts" => hosts,
                "ok" => 1,
            }));
        }
        // Data queries reveal which member served them.
        Some(MockReply::document(doc! {
            "served_by_primary" => is_primary,
            "ok" => 1,
        }))
    })
}

async fn replica_set_of_two() -> (MockServer, MockServer, ReplicaSetConnectionFactory) {
    let primary_name: Arc<Mutex<Option<String>>> = Default::default();
    let all_hosts: Arc<Mutex<Vec<String>>> = Default::default();

    let primary = MockServer::start(member(true, primary_name.clone(), all_hosts.clone())).await;
    let secondary = MockServer::start(member(false, primary_name.clone(), all_hosts.clone())).await;
    *primary_name.lock() = Some(primary.name());
    *all_hosts.lock() = vec![primary.name(), secondary.name()];

    let config = fast_config(vec![primary.name()]);
    let factory = ReplicaSetConnectionFactory::bootstrap(config, Arc::new(JsonCodec))
        .await
        .unwrap();
    (primary, secondary, factory)
}

async fn served_by_primary(connection: &dyn Connection, preference: ReadPreference) -> bool {
    let (sender, future) = reply_future();
    connection
        .send(query_with(preference), Some(Box::new(sender)))
        .await
        .unwrap();
    let reply = future.wait().await.unwrap();
    reply.first_document().unwrap().get_bool("served_by_primary").unwrap()
}

#[tokio::test]
async fn bootstrap_discovers_every_member() {
    let (primary, secondary, factory) = replica_set_of_two().await;

    assert_eq!(factory.cluster().len(), 2);
    let writable: Vec<String> = factory
        .cluster()
        .writable_servers()
        .iter()
        .map(|server| server.name().to_owned())
        .collect();
    assert_eq!(writable, vec![primary.name()]);
    assert!(factory.cluster().get(&secondary.name()).is_some());

    factory.close().await;
}

#[tokio::test]
async fn reads_route_by_preference() {
    let (primary, secondary, factory) = replica_set_of_two().await;
    let connection = factory.connect().await.unwrap();
    assert_eq!(connection.server_name(), primary.name());

    // Primary reads and writes stay on the primary.
    assert!(served_by_primary(&*connection, ReadPreference::primary()).await);
    connection
        .send(
            Message::Insert {
                namespace: "db.coll".to_owned(),
                documents: vec![doc! { "value" => 1 }],
                continue_on_error: false,
            },
            None,
        )
        .await
        .unwrap();

    // Secondary-routed reads land on the secondary.
    assert!(!served_by_primary(&*connection, ReadPreference::secondary()).await);
    assert!(!served_by_primary(&*connection, ReadPreference::secondary_preferred()).await);

    let data_requests = |mock: &MockServer| {
        mock.requests()
            .into_iter()
            .filter(|request| request.namespace.as_deref() == Some("db.coll"))
            .collect::<Vec<ParsedRequest>>()
    };
    // The fire-and-forget insert races the assertions; wait for it to land.
    wait_until!(5, data_requests(&primary).len() == 2);
    assert_eq!(data_requests(&secondary).len(), 2);

    let _ = connection.shutdown(true).await;
    factory.close().await;
}

#[tokio::test]
async fn secondary_preferred_falls_back_to_the_primary() {
    // The set claims a second member that never answers.
    let primary_name: Arc<Mutex<Option<String>>> = Default::default();
    let all_hosts: Arc<Mutex<Vec<String>>> = Default::default();

    let primary = MockServer::start(member(true, primary_name.clone(), all_hosts.clone())).await;
    let ghost = common::dead_server_name().await;
    *primary_name.lock() = Some(primary.name());
    *all_hosts.lock() = vec![primary.name(), ghost];

    let config = fast_config(vec![primary.name()]);
    let factory = ReplicaSetConnectionFactory::bootstrap(config, Arc::new(JsonCodec))
        .await
        .unwrap();
    let connection = factory.connect().await.unwrap();

    assert!(served_by_primary(&*connection, ReadPreference::secondary_preferred()).await);

    // A strict secondary preference has nowhere to go.
    let strict = connection
        .send(query_with(ReadPreference::secondary()), None)
        .await;
    assert!(matches!(strict, Err(DriverError::AllServersUnavailable)));

    let _ = connection.shutdown(true).await;
    factory.close().await;
}
