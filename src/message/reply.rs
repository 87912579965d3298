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
    codec::{Document, DocumentCodec},
    errors::MessageError,
};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

const FLAG_CURSOR_NOT_FOUND: u32 = 1;
const FLAG_QUERY_FAILED: u32 = 1 << 1;
const FLAG_SHARD_CONFIG_STALE: u32 = 1 << 2;
const FLAG_AWAIT_CAPABLE: u32 = 1 << 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplyFlags {
    pub cursor_not_found: bool,
    pub query_failed: bool,
    pub shard_config_stale: bool,
    pub await_capable: bool,
}

impl ReplyFlags {
    pub fn from_bits(bits: u32) -> Self {
        ReplyFlags {
            cursor_not_found: bits & FLAG_CURSOR_NOT_FOUND != 0,
            query_failed: bits & FLAG_QUERY_FAILED != 0,
            shard_config_stale: bits & FLAG_SHARD_CONFIG_STALE != 0,
            await_capable: bits & FLAG_AWAIT_CAPABLE != 0,
        }
    }

    pub fn as_bits(&self) -> u32 {
        let mut bits = 0;
        if self.cursor_not_found {
            bits |= FLAG_CURSOR_NOT_FOUND;
        }
        if self.query_failed {
            bits |= FLAG_QUERY_FAILED;
        }
        if self.shard_config_stale {
            bits |= FLAG_SHARD_CONFIG_STALE;
        }
        if self.await_capable {
            bits |= FLAG_AWAIT_CAPABLE;
        }
        bits
    }
}

/// A decoded server response.
///
/// A cursor id of zero means the server has exhausted the cursor; acting on
/// that is the cursor layer's business, the runtime only carries the value.
#[derive(Debug, Clone)]
pub struct Reply {
    /// The request id this reply answers.
    pub response_to: i32,
    pub flags: ReplyFlags,
    pub cursor_id: i64,
    pub starting_from: i32,
    pub documents: Vec<Document>,
}

impl Reply {
    /// Decodes a reply body: flags, cursor id, starting-from index, the
    /// returned-document count, then that many documents.
    pub fn deserialize(response_to: i32, body: &[u8], codec: &dyn DocumentCodec) -> Result<Self, MessageError> {
        let mut rdr = Cursor::new(body);
        let bits = rdr.read_u32::<LittleEndian>().map_err(|_| truncated(0, 0))?;
        let cursor_id = rdr.read_i64::<LittleEndian>().map_err(|_| truncated(0, 0))?;
        let starting_from = rdr.read_i32::<LittleEndian>().map_err(|_| truncated(0, 0))?;
        let number_returned = rdr.read_i32::<LittleEndian>().map_err(|_| truncated(0, 0))?;

        let mut remaining = &body[rdr.position() as usize..];
        let mut documents = Vec::with_capacity(number_returned.max(0) as usize);
        for _ in 0..number_returned {
            if remaining.is_empty() {
                return Err(truncated(number_returned, documents.len()));
            }
            documents.push(codec.decode(&mut remaining)?);
        }

        Ok(Reply {
            response_to,
            flags: ReplyFlags::from_bits(bits),
            cursor_id,
            starting_from,
            documents,
        })
    }

    /// Encodes the reply body in the same layout `deserialize` reads.
    pub fn serialize_body(&self, codec: &dyn DocumentCodec, target: &mut Vec<u8>) -> Result<(), MessageError> {
        target
            .write_u32::<LittleEndian>(self.flags.as_bits())
            .expect("writing to a vec");
        target.write_i64::<LittleEndian>(self.cursor_id).expect("writing to a vec");
        target
            .write_i32::<LittleEndian>(self.starting_from)
            .expect("writing to a vec");
        target
            .write_i32::<LittleEndian>(self.documents.len() as i32)
            .expect("writing to a vec");
        for document in &self.documents {
            codec.encode(document, target)?;
        }
        Ok(())
    }

    #[inline]
    pub fn number_returned(&self) -> i32 {
        self.documents.len() as i32
    }

    pub fn first_document(&self) -> Option<&Document> {
        self.documents.first()
    }
}

fn truncated(declared: i32, read: usize) -> MessageError {
    MessageError::TruncatedReply(declared, read)
}
