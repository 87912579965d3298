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
    cluster::{ReadPreference, ServerVersion},
    codec::{Document, DocumentCodec},
    errors::MessageError,
    message::OpCode,
};

use byteorder::{LittleEndian, WriteBytesExt};

const QUERY_FLAG_SLAVE_OK: i32 = 1 << 2;
const INSERT_FLAG_CONTINUE_ON_ERROR: i32 = 1;
const UPDATE_FLAG_UPSERT: i32 = 1;
const UPDATE_FLAG_MULTI: i32 = 1 << 1;
const DELETE_FLAG_SINGLE: i32 = 1;

/// A client-originated request.
///
/// Fire-and-forget operations (insert, update, delete, kill-cursors) elicit no
/// reply on their own; queries and get-mores always do.
#[derive(Debug, Clone)]
pub enum Message {
    Query {
        namespace: String,
        skip: i32,
        batch_size: i32,
        query: Document,
        fields: Option<Document>,
        read_preference: ReadPreference,
    },
    GetMore {
        namespace: String,
        cursor_id: i64,
        batch_size: i32,
    },
    Insert {
        namespace: String,
        documents: Vec<Document>,
        continue_on_error: bool,
    },
    Update {
        namespace: String,
        selector: Document,
        update: Document,
        upsert: bool,
        multi: bool,
    },
    Delete {
        namespace: String,
        selector: Document,
        single: bool,
    },
    KillCursors {
        cursor_ids: Vec<i64>,
    },
}

impl Message {
    pub fn name(&self) -> &'static str {
        match self {
            Message::Query { .. } => "query",
            Message::GetMore { .. } => "get_more",
            Message::Insert { .. } => "insert",
            Message::Update { .. } => "update",
            Message::Delete { .. } => "delete",
            Message::KillCursors { .. } => "kill_cursors",
        }
    }

    pub fn opcode(&self) -> OpCode {
        match self {
            Message::Query { .. } => OpCode::Query,
            Message::GetMore { .. } => OpCode::GetMore,
            Message::Insert { .. } => OpCode::Insert,
            Message::Update { .. } => OpCode::Update,
            Message::Delete { .. } => OpCode::Delete,
            Message::KillCursors { .. } => OpCode::KillCursors,
        }
    }

    /// Returns `true` if the server answers this message with a reply frame.
    pub fn expects_reply(&self) -> bool {
        matches!(self, Message::Query { .. } | Message::GetMore { .. })
    }

    pub fn namespace(&self) -> Option<&str> {
        match self {
            Message::Query { namespace, .. }
            | Message::GetMore { namespace, .. }
            | Message::Insert { namespace, .. }
            | Message::Update { namespace, .. }
            | Message::Delete { namespace, .. } => Some(namespace),
            Message::KillCursors { .. } => None,
        }
    }

    pub fn read_preference(&self) -> Option<&ReadPreference> {
        match self {
            Message::Query { read_preference, .. } => Some(read_preference),
            _ => None,
        }
    }

    /// The minimum server version this message requires, if any.
    pub fn required_server_version(&self) -> Option<ServerVersion> {
        match self {
            // Server-side time limits predate nothing else the runtime emits.
            Message::Query { query, .. } if query.contains_key("$maxTimeMS") => {
                Some(ServerVersion::new(vec![2, 6, 0]))
            }
            _ => None,
        }
    }

    /// The size of the largest document in this message once encoded.
    pub fn largest_document_size(&self, codec: &dyn DocumentCodec) -> Result<usize, MessageError> {
        let mut largest = 0;
        for document in self.documents() {
            largest = largest.max(codec.encoded_size(document)?);
        }
        Ok(largest)
    }

    fn documents(&self) -> Vec<&Document> {
        match self {
            Message::Query { query, fields, .. } => {
                let mut documents = vec![query];
                documents.extend(fields.as_ref());
                documents
            }
            Message::GetMore { .. } | Message::KillCursors { .. } => vec![],
            Message::Insert { documents, .. } => documents.iter().collect(),
            Message::Update { selector, update, .. } => vec![selector, update],
            Message::Delete { selector, .. } => vec![selector],
        }
    }

    /// Appends the opcode-specific body to `target`.
    pub fn serialize_body(&self, codec: &dyn DocumentCodec, target: &mut Vec<u8>) -> Result<(), MessageError> {
        match self {
            Message::Query {
                namespace,
                skip,
                batch_size,
                query,
                fields,
                read_preference,
            } => {
                let flags = if read_preference.allows_secondaries() {
                    QUERY_FLAG_SLAVE_OK
                } else {
                    0
                };
                target.write_i32::<LittleEndian>(flags).expect("writing to a vec");
                write_cstring(namespace, target)?;
                target.write_i32::<LittleEndian>(*skip).expect("writing to a vec");
                target.write_i32::<LittleEndian>(*batch_size).expect("writing to a vec");
                codec.encode(query, target)?;
                if let Some(fields) = fields {
                    codec.encode(fields, target)?;
                }
            }
            Message::GetMore {
                namespace,
                cursor_id,
                batch_size,
            } => {
                target.write_i32::<LittleEndian>(0).expect("writing to a vec");
                write_cstring(namespace, target)?;
                target.write_i32::<LittleEndian>(*batch_size).expect("writing to a vec");
                target.write_i64::<LittleEndian>(*cursor_id).expect("writing to a vec");
            }
            Message::Insert {
                namespace,
                documents,
                continue_on_error,
            } => {
                let flags = if *continue_on_error { INSERT_FLAG_CONTINUE_ON_ERROR } else { 0 };
                target.write_i32::<LittleEndian>(flags).expect("writing to a vec");
                write_cstring(namespace, target)?;
                for document in documents {
                    codec.encode(document, target)?;
                }
            }
            Message::Update {
                namespace,
                selector,
                update,
                upsert,
                multi,
            } => {
                target.write_i32::<LittleEndian>(0).expect("writing to a vec");
                write_cstring(namespace, target)?;
                let mut flags = 0;
                if *upsert {
                    flags |= UPDATE_FLAG_UPSERT;
                }
                if *multi {
                    flags |= UPDATE_FLAG_MULTI;
                }
                target.write_i32::<LittleEndian>(flags).expect("writing to a vec");
                codec.encode(selector, target)?;
                codec.encode(update, target)?;
            }
            Message::Delete {
                namespace,
                selector,
                single,
            } => {
                target.write_i32::<LittleEndian>(0).expect("writing to a vec");
                write_cstring(namespace, target)?;
                let flags = if *single { DELETE_FLAG_SINGLE } else { 0 };
                target.write_i32::<LittleEndian>(flags).expect("writing to a vec");
                codec.encode(selector, target)?;
            }
            Message::KillCursors { cursor_ids } => {
                target.write_i32::<LittleEndian>(0).expect("writing to a vec");
                target
                    .write_i32::<LittleEndian>(cursor_ids.len() as i32)
                    .expect("writing to a vec");
                for cursor_id in cursor_ids {
                    target.write_i64::<LittleEndian>(*cursor_id).expect("writing to a vec");
                }
            }
        }
        Ok(())
    }
}

fn write_cstring(value: &str, target: &mut Vec<u8>) -> Result<(), MessageError> {
    if value.as_bytes().contains(&0) {
        return Err(MessageError::NamespaceContainsNul(value.to_owned()));
    }
    target.extend_from_slice(value.as_bytes());
    target.push(0);
    Ok(())
}
