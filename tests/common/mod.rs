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

#![allow(dead_code)]

use docnet::{
    codec::{Document, DocumentCodec, JsonCodec},
    message::{MessageHeader, OpCode, Reply, ReplyFlags},
    HEADER_SIZE,
};

use byteorder::{ByteOrder, LittleEndian};
use parking_lot::Mutex;
use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicI32, AtomicUsize, Ordering},
        Arc,
    },
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    task,
};

/// Polls a condition until it holds or the time limit passes.
#[macro_export]
macro_rules! wait_until {
    ($limit_secs: expr, $condition: expr) => {
        let now = std::time::Instant::now();
        loop {
            if $condition {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            assert!(
                now.elapsed() <= std::time::Duration::from_secs($limit_secs),
                "timed out!"
            );
        }
    };
}

/// Renders the crate's log output during a test run; safe to call from
/// every test.
pub fn start_logger() {
    let _ = tracing_subscriber::fmt::try_init();
}

/// One decoded request as the mock server saw it.
#[derive(Debug, Clone)]
pub struct ParsedRequest {
    pub header: MessageHeader,
    pub namespace: Option<String>,
    pub documents: Vec<Document>,
}

impl ParsedRequest {
    pub fn is_command(&self, name: &str) -> bool {
        self.namespace
            .as_deref()
            .map_or(false, |namespace| namespace.ends_with(".$cmd"))
            && self.documents.first().map_or(false, |doc| doc.contains_key(name))
    }
}

/// What the scripted responder wants sent back.
#[derive(Debug, Clone, Default)]
pub struct MockReply {
    pub flags: ReplyFlags,
    pub cursor_id: i64,
    pub documents: Vec<Document>,
}

impl MockReply {
    pub fn documents(documents: Vec<Document>) -> Self {
        MockReply {
            documents,
            ..Default::default()
        }
    }

    pub fn document(document: Document) -> Self {
        Self::documents(vec![document])
    }
}

pub type Responder = Arc<dyn Fn(&ParsedRequest) -> Option<MockReply> + Send + Sync>;

/// A scripted stand-in for a database server: accepts connections, decodes
/// frames, and answers whatever the responder scripts.
pub struct MockServer {
    address: SocketAddr,
    requests: Arc<Mutex<Vec<ParsedRequest>>>,
    connections: Arc<AtomicUsize>,
    handle: task::JoinHandle<()>,
}

impl MockServer {
    pub async fn start(responder: Responder) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let requests: Arc<Mutex<Vec<ParsedRequest>>> = Default::default();
        let connections: Arc<AtomicUsize> = Default::default();

        let requests_clone = requests.clone();
        let connections_clone = connections.clone();
        let handle = task::spawn(async move {
            let reply_ids = Arc::new(AtomicI32::new(1000));
            loop {
                let (stream, _peer) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(_) => break,
                };
                connections_clone.fetch_add(1, Ordering::SeqCst);
                let responder = responder.clone();
                let requests = requests_clone.clone();
                let reply_ids = reply_ids.clone();
                task::spawn(async move {
                    let _ = serve_connection(stream, responder, requests, reply_ids).await;
                });
            }
        });

        MockServer {
            address,
            requests,
            connections,
            handle,
        }
    }

    /// A server whose every query is answered with the given document.
    pub async fn with_identity(identity: Document) -> Self {
        Self::start(Arc::new(move |request: &ParsedRequest| {
            if request.header.opcode == OpCode::Query {
                Some(MockReply::document(identity.clone()))
            } else {
                None
            }
        }))
        .await
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// The canonical `host:port` name of this server.
    pub fn name(&self) -> String {
        self.address.to_string()
    }

    pub fn requests(&self) -> Vec<ParsedRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    responder: Responder,
    requests: Arc<Mutex<Vec<ParsedRequest>>>,
    reply_ids: Arc<AtomicI32>,
) -> std::io::Result<()> {
    let mut header_bytes = [0u8; HEADER_SIZE];
    loop {
        stream.read_exact(&mut header_bytes).await?;
        let header = MessageHeader::deserialize(&header_bytes).expect("the client sent a malformed header");
        let mut body = vec![0u8; header.length as usize - HEADER_SIZE];
        stream.read_exact(&mut body).await?;

        let request = parse_request(header, &body);
        requests.lock().push(request.clone());

        if let Some(scripted) = responder(&request) {
            let reply = Reply {
                response_to: header.request_id,
                flags: scripted.flags,
                cursor_id: scripted.cursor_id,
                starting_from: 0,
                documents: scripted.documents,
            };
            let mut reply_body = Vec::new();
            reply.serialize_body(&JsonCodec, &mut reply_body).unwrap();
            let reply_header = MessageHeader::new(
                (HEADER_SIZE + reply_body.len()) as u32,
                reply_ids.fetch_add(1, Ordering::SeqCst),
                header.request_id,
                OpCode::Reply,
            );
            stream.write_all(&reply_header.serialize()).await?;
            stream.write_all(&reply_body).await?;
            stream.flush().await?;
        }
    }
}

fn parse_request(header: MessageHeader, body: &[u8]) -> ParsedRequest {
    let mut namespace = None;
    let mut documents = Vec::new();

    match header.opcode {
        OpCode::Query => {
            // flags, namespace, skip, batch size, then the query document.
            let (name, consumed) = read_cstring(&body[4..]);
            namespace = Some(name);
            let mut rest = &body[4 + consumed + 8..];
            while !rest.is_empty() {
                match JsonCodec.decode(&mut rest) {
                    Ok(document) => documents.push(document),
                    Err(_) => break,
                }
            }
        }
        OpCode::Insert => {
            let (name, consumed) = read_cstring(&body[4..]);
            namespace = Some(name);
            let mut rest = &body[4 + consumed..];
            while !rest.is_empty() {
                match JsonCodec.decode(&mut rest) {
                    Ok(document) => documents.push(document),
                    Err(_) => break,
                }
            }
        }
        OpCode::Update | OpCode::Delete => {
            let (name, consumed) = read_cstring(&body[4..]);
            namespace = Some(name);
            let mut rest = &body[4 + consumed + 4..];
            while !rest.is_empty() {
                match JsonCodec.decode(&mut rest) {
                    Ok(document) => documents.push(document),
                    Err(_) => break,
                }
            }
        }
        OpCode::GetMore => {
            let (name, _consumed) = read_cstring(&body[4..]);
            namespace = Some(name);
        }
        OpCode::KillCursors | OpCode::Reply => {}
    }

    ParsedRequest {
        header,
        namespace,
        documents,
    }
}

fn read_cstring(bytes: &[u8]) -> (String, usize) {
    let end = bytes.iter().position(|b| *b == 0).expect("an unterminated namespace");
    (
        String::from_utf8(bytes[..end].to_vec()).expect("a non-utf8 namespace"),
        end + 1,
    )
}

/// A reachable-looking name whose port nothing listens on.
pub async fn dead_server_name() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    drop(listener);
    address.to_string()
}

/// An identity document for a standalone server process.
pub fn standalone_identity() -> Document {
    docnet::doc! {
        "ismaster" => true,
        "process" => "mongod",
        "maxBsonObjectSize" => 16 * 1024 * 1024,
        "version" => "4.0.2",
        "ok" => 1,
    }
}

pub fn read_bits(bytes: &[u8]) -> u32 {
    LittleEndian::read_u32(bytes)
}
