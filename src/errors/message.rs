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

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MessageHeaderError {
    #[error("invalid message header length {}; expected {} bytes", _0, crate::HEADER_SIZE)]
    InvalidLength(usize),

    #[error("declared frame length {} exceeds the {} byte cap", _0, _1)]
    TooBig(usize, usize),

    #[error("declared frame length {} is shorter than the header", _0)]
    TooShort(usize),

    #[error("unknown operation code {}", _0)]
    UnknownOpCode(i32),
}

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("{}", _0)]
    Document(DocumentError),

    #[error("namespace `{}` contains a nul byte", _0)]
    NamespaceContainsNul(String),

    #[error("a reply declared {} documents but its body ended after {}", _0, _1)]
    TruncatedReply(i32, usize),
}

impl From<DocumentError> for MessageError {
    fn from(error: DocumentError) -> Self {
        MessageError::Document(error)
    }
}

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("{}: {}", _0, _1)]
    Crate(&'static str, String),

    #[error("a document must encode as an object, found {}", _0)]
    NotAnObject(&'static str),

    #[error("the document bytes end before the declared length")]
    Truncated,
}

impl From<serde_json::Error> for DocumentError {
    fn from(error: serde_json::Error) -> Self {
        DocumentError::Crate("serde_json", format!("{:?}", error))
    }
}
