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

use crate::errors::DocumentError;

use byteorder::{ByteOrder, LittleEndian};
use serde_json::{Map, Value};

/// An ordered set of key/value fields, opaque to the connection layer.
///
/// The runtime only ever inspects documents it produced itself (identity and
/// status replies); user payloads pass through untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document(Map<String, Value>);

impl Document {
    pub fn new() -> Self {
        Document(Map::new())
    }

    pub fn insert<V: Into<Value>>(&mut self, key: &str, value: V) -> &mut Self {
        self.0.insert(key.to_owned(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_i64)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Value::as_f64)
    }

    pub fn get_document(&self, key: &str) -> Option<Document> {
        self.get(key).and_then(Value::as_object).cloned().map(Document)
    }

    pub fn get_array(&self, key: &str) -> Option<&Vec<Value>> {
        self.get(key).and_then(Value::as_array)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl From<Map<String, Value>> for Document {
    fn from(map: Map<String, Value>) -> Self {
        Document(map)
    }
}

impl From<Document> for Value {
    fn from(document: Document) -> Self {
        Value::Object(document.0)
    }
}

/// Builds a [`Document`] from `key => value` pairs.
#[macro_export]
macro_rules! doc {
    () => { $crate::codec::Document::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut document = $crate::codec::Document::new();
        $(document.insert($key, $value);)+
        document
    }};
}

/// Encodes and decodes single documents within a frame body.
///
/// The wire protocol treats each document as an opaque, self-delimiting blob;
/// the codec is the collaborator that gives the blob a shape.
pub trait DocumentCodec: Send + Sync {
    /// Appends the encoded form of `document` to `target`.
    fn encode(&self, document: &Document, target: &mut Vec<u8>) -> Result<(), DocumentError>;

    /// Decodes one document from the front of `source`, advancing it past the
    /// consumed bytes.
    fn decode(&self, source: &mut &[u8]) -> Result<Document, DocumentError>;

    /// Returns the number of bytes `document` will occupy on the wire.
    fn encoded_size(&self, document: &Document) -> Result<usize, DocumentError>;
}

/// The default codec: a 4-byte little-endian length prefix followed by UTF-8
/// JSON. The prefix covers itself, so a document is never shorter than 4 bytes.
pub struct JsonCodec;

const LENGTH_PREFIX_SIZE: usize = 4;

impl DocumentCodec for JsonCodec {
    fn encode(&self, document: &Document, target: &mut Vec<u8>) -> Result<(), DocumentError> {
        let json = serde_json::to_vec(&Value::from(document.clone()))?;
        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        LittleEndian::write_u32(&mut prefix, (json.len() + LENGTH_PREFIX_SIZE) as u32);
        target.extend_from_slice(&prefix);
        target.extend_from_slice(&json);
        Ok(())
    }

    fn decode(&self, source: &mut &[u8]) -> Result<Document, DocumentError> {
        if source.len() < LENGTH_PREFIX_SIZE {
            return Err(DocumentError::Truncated);
        }
        let declared = LittleEndian::read_u32(&source[..LENGTH_PREFIX_SIZE]) as usize;
        if declared < LENGTH_PREFIX_SIZE || declared > source.len() {
            return Err(DocumentError::Truncated);
        }
        let value: Value = serde_json::from_slice(&source[LENGTH_PREFIX_SIZE..declared])?;
        *source = &source[declared..];
        match value {
            Value::Object(map) => Ok(Document(map)),
            other => Err(DocumentError::NotAnObject(json_kind(&other))),
        }
    }

    fn encoded_size(&self, document: &Document) -> Result<usize, DocumentError> {
        let json = serde_json::to_vec(&Value::from(document.clone()))?;
        Ok(json.len() + LENGTH_PREFIX_SIZE)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
