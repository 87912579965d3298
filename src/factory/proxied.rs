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

use crate::{connection::ReplyCallback, errors::DriverError, factory::Connection, message::Message};

use async_trait::async_trait;

/// The decorator base for multi-server connection facades: every operation
/// forwards to the proxied connection unless a wrapper overrides it.
pub struct ProxiedConnection {
    inner: Box<dyn Connection>,
}

impl ProxiedConnection {
    pub fn new(inner: Box<dyn Connection>) -> Self {
        ProxiedConnection { inner }
    }

    /// The connection operations are forwarded to.
    pub fn proxied(&self) -> &dyn Connection {
        &*self.inner
    }

    pub fn into_inner(self) -> Box<dyn Connection> {
        self.inner
    }
}

#[async_trait]
impl Connection for ProxiedConnection {
    async fn send(
        &self,
        message: Message,
        callback: Option<Box<dyn ReplyCallback>>,
    ) -> Result<String, DriverError> {
        self.inner.send(message, callback).await
    }

    async fn flush(&self) -> Result<(), DriverError> {
        self.inner.flush().await
    }

    async fn shutdown(&self, force: bool) -> Result<(), DriverError> {
        self.inner.shutdown(force).await
    }

    fn is_available(&self) -> bool {
        self.inner.is_available()
    }

    fn is_idle(&self) -> bool {
        self.inner.is_idle()
    }

    fn server_name(&self) -> String {
        self.inner.server_name()
    }
}
