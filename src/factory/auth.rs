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
    config::Credentials,
    errors::DriverError,
    factory::{request_on, ClusterType, Connection, ConnectionFactory, ReconnectStrategyKind},
    message::commands,
};

use async_trait::async_trait;
use std::sync::Arc;

/// Decorates another factory so every opened connection completes a nonce
/// challenge-response handshake before it is handed out.
pub struct AuthenticatingConnectionFactory {
    inner: Arc<dyn ConnectionFactory>,
    credentials: Credentials,
}

impl AuthenticatingConnectionFactory {
    pub fn new(inner: Arc<dyn ConnectionFactory>, credentials: Credentials) -> Self {
        AuthenticatingConnectionFactory { inner, credentials }
    }

    pub fn inner(&self) -> &Arc<dyn ConnectionFactory> {
        &self.inner
    }

    async fn authenticate(&self, connection: &dyn Connection) -> Result<(), DriverError> {
        let database = &self.credentials.database;

        let reply = request_on(connection, commands::get_nonce(database)).await?;
        let nonce = reply
            .first_document()
            .and_then(|document| document.get_str("nonce"))
            .ok_or_else(|| DriverError::AuthenticationFailed("the server offered no nonce".to_owned()))?
            .to_owned();

        let key = commands::auth_key(&nonce, &self.credentials.username, &self.credentials.password);
        let challenge = commands::authenticate(database, &self.credentials.username, &nonce, &key);
        match request_on(connection, challenge).await {
            Ok(_reply) => {
                debug!("Authenticated as {} against {}", self.credentials.username, database);
                Ok(())
            }
            Err(DriverError::Reply(failure)) => Err(DriverError::AuthenticationFailed(failure.to_string())),
            Err(error) => Err(error),
        }
    }
}

#[async_trait]
impl ConnectionFactory for AuthenticatingConnectionFactory {
    async fn connect(&self) -> Result<Box<dyn Connection>, DriverError> {
        let connection = self.inner.connect().await?;
        if let Err(error) = self.authenticate(&*connection).await {
            let _ = connection.shutdown(true).await;
            return Err(error);
        }
        Ok(connection)
    }

    async fn reconnect(&self, broken_server: &str) -> Option<Box<dyn Connection>> {
        let connection = self.inner.reconnect(broken_server).await?;
        match self.authenticate(&*connection).await {
            Ok(()) => Some(connection),
            Err(error) => {
                warn!("Couldn't authenticate the replacement connection: {}", error);
                let _ = connection.shutdown(true).await;
                None
            }
        }
    }

    fn cluster_type(&self) -> ClusterType {
        self.inner.cluster_type()
    }

    fn reconnect_strategy_kind(&self) -> ReconnectStrategyKind {
        self.inner.reconnect_strategy_kind()
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}
