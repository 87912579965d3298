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

use crate::{client::Durability, cluster::ReadPreference, codec::Document, doc, message::Message};

use sha2::{Digest, Sha256};

/// The database every server answers administrative commands on.
pub const ADMIN_DATABASE: &str = "admin";

/// The collection a router tier registers its members in.
pub const ROUTER_REGISTRY_NAMESPACE: &str = "config.mongos";

/// Builds a single-result command query against `<database>.$cmd`.
fn command(database: &str, body: Document) -> Message {
    Message::Query {
        namespace: format!("{}.$cmd", database),
        skip: 0,
        batch_size: -1,
        query: body,
        fields: None,
        // Commands issued by the runtime itself must run on whichever server
        // they were addressed to, primary or not.
        read_preference: ReadPreference::nearest(),
    }
}

/// The identity/status probe: reports the server's role, peers, version,
/// tags, and document size limit.
pub fn is_master() -> Message {
    command(ADMIN_DATABASE, doc! { "ismaster" => 1 })
}

/// A minimal liveness check.
pub fn ping() -> Message {
    command(ADMIN_DATABASE, doc! { "ping" => 1 })
}

/// Requests a server nonce for the challenge-response handshake.
pub fn get_nonce(database: &str) -> Message {
    command(database, doc! { "getnonce" => 1 })
}

/// Answers a nonce challenge with the derived key.
pub fn authenticate(database: &str, username: &str, nonce: &str, key: &str) -> Message {
    command(
        database,
        doc! {
            "authenticate" => 1,
            "user" => username,
            "nonce" => nonce,
            "key" => key,
        },
    )
}

/// Derives the challenge-response key for `authenticate`.
pub fn auth_key(nonce: &str, username: &str, password: &str) -> String {
    let credential_digest = hex::encode(Sha256::digest(
        format!("{}:docnet:{}", username, password).as_bytes(),
    ));
    hex::encode(Sha256::digest(
        format!("{}{}{}", nonce, username, credential_digest).as_bytes(),
    ))
}

/// Asks for the outcome of the preceding write on the same connection,
/// waiting for whatever the durability level demands.
pub fn get_last_error(database: &str, durability: &Durability) -> Message {
    let mut body = doc! { "getlasterror" => 1 };
    match durability {
        Durability::None | Durability::Acknowledged => {}
        Durability::Journaled => {
            body.insert("j", true);
        }
        Durability::ReplicaAcknowledged(count) => {
            body.insert("w", *count);
        }
    }
    command(database, body)
}

/// Queries the router registry for every router in the tier.
pub fn router_registry() -> Message {
    Message::Query {
        namespace: ROUTER_REGISTRY_NAMESPACE.to_owned(),
        skip: 0,
        batch_size: 0,
        query: doc! {},
        fields: None,
        read_preference: ReadPreference::nearest(),
    }
}
