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
    cluster::ServerVersion,
    errors::{DocumentError, MessageError, MessageHeaderError, ReplyFailure},
};

use std::{fmt, io::ErrorKind, net::SocketAddr};

#[derive(Debug)]
pub enum DriverError {
    /// Every configured or discovered server refused the connection attempt.
    AllServersUnavailable,
    AuthenticationFailed(String),
    /// The TCP connect did not complete within `connect_timeout`.
    ConnectTimeout(SocketAddr),
    /// The socket was closed or failed while requests were in flight.
    ConnectionLost(String),
    /// The connection is draining or closed and accepts no new messages.
    ConnectionShutDown,
    Document(DocumentError),
    /// An outgoing document exceeds the target server's size limit.
    DocumentTooLarge(usize, usize),
    Header(MessageHeaderError),
    Io(std::io::Error),
    Message(MessageError),
    MessageTooBig(usize),
    /// The bootstrap probe recognized no topology; every `connect()` fails.
    NoDelegateFactory,
    /// A later reply correlated past this message; the server sent no reply for it.
    NoReply,
    NoWritableServer,
    /// The pending queue is full and the caller cannot block for a slot.
    PendingQueueFull,
    Reply(ReplyFailure),
    /// The message requires a newer server than the target (required, actual).
    ServerVersionMismatch(ServerVersion, ServerVersion),
    UnresolvedAddress(String),
    ZeroLengthMessage,
}

impl DriverError {
    /// Returns `true` if the error invalidates the connection it occurred on.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Io(err) => [
                ErrorKind::BrokenPipe,
                ErrorKind::ConnectionReset,
                ErrorKind::UnexpectedEof,
            ]
            .contains(&err.kind()),
            Self::ConnectionLost(_) | Self::Header(_) | Self::MessageTooBig(..) | Self::ZeroLengthMessage => true,
            _ => false,
        }
    }

    /// Returns `true` if the error is expected during failover and safe to retry elsewhere.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Io(err) => matches!(
                err.kind(),
                ErrorKind::BrokenPipe
                    | ErrorKind::ConnectionReset
                    | ErrorKind::UnexpectedEof
                    | ErrorKind::TimedOut
                    | ErrorKind::ConnectionRefused
            ),
            Self::ConnectTimeout(_) | Self::ConnectionLost(_) | Self::NoReply => true,
            _ => false,
        }
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<std::io::Error> for DriverError {
    fn from(error: std::io::Error) -> Self {
        DriverError::Io(error)
    }
}

impl From<DocumentError> for DriverError {
    fn from(error: DocumentError) -> Self {
        DriverError::Document(error)
    }
}

impl From<MessageHeaderError> for DriverError {
    fn from(error: MessageHeaderError) -> Self {
        DriverError::Header(error)
    }
}

impl From<MessageError> for DriverError {
    fn from(error: MessageError) -> Self {
        DriverError::Message(error)
    }
}

impl From<ReplyFailure> for DriverError {
    fn from(error: ReplyFailure) -> Self {
        DriverError::Reply(error)
    }
}

impl From<DriverError> for anyhow::Error {
    fn from(error: DriverError) -> Self {
        error!("{}", error);
        Self::msg(error.to_string())
    }
}
