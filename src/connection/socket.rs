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
    cluster::Server,
    codec::DocumentCodec,
    config::Config,
    connection::{dispatch_completion, reply_future, PendingMessage, PendingQueue, ReplyCallback},
    errors::{classify_reply, DriverError},
    message::{commands, Message, MessageHeader, OpCode, Reply},
};

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::{
    net::SocketAddr,
    ops::Deref,
    sync::{
        atomic::{AtomicBool, AtomicI32, AtomicU8, Ordering},
        Arc,
    },
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::Mutex as AsyncMutex,
    task,
    time::timeout,
};

tokio::task_local! {
    static READER_CONTEXT: ();
}

/// Returns `true` when the current task is a connection's reader.
fn in_reader_context() -> bool {
    READER_CONTEXT.try_with(|_| ()).is_ok()
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[repr(u8)]
pub enum ConnectionState {
    Opening = 0,
    Open = 1,
    /// Draining: no new external messages, close once pending replies arrive.
    ShuttingDown = 2,
    Closed = 3,
}

#[derive(Default)]
struct StateCode(AtomicU8);

impl StateCode {
    fn get(&self) -> ConnectionState {
        match self.0.load(Ordering::SeqCst) {
            0 => ConnectionState::Opening,
            1 => ConnectionState::Open,
            2 => ConnectionState::ShuttingDown,
            _ => ConnectionState::Closed,
        }
    }

    fn set(&self, state: ConnectionState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    fn swap(&self, state: ConnectionState) -> ConnectionState {
        match self.0.swap(state as u8, Ordering::SeqCst) {
            0 => ConnectionState::Opening,
            1 => ConnectionState::Open,
            2 => ConnectionState::ShuttingDown,
            _ => ConnectionState::Closed,
        }
    }

    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

pub struct InnerConnection {
    /// The server this socket points at; owned by the cluster, not us.
    server: Arc<Server>,
    codec: Arc<dyn DocumentCodec>,
    config: Arc<Config>,
    state: StateCode,
    /// The next request id; sequential per connection.
    request_ids: AtomicI32,
    pending: PendingQueue,
    /// Bytes staged for the wire but not yet flushed.
    outbound: Mutex<Vec<u8>>,
    writer: AsyncMutex<OwnedWriteHalf>,
    /// Set by sends that cannot flush themselves; the reader consults it
    /// after every dispatched frame and before blocking again.
    reader_flush_needed: AtomicBool,
    reader_task: OnceCell<task::JoinHandle<()>>,
}

/// One pipelined socket to one server.
///
/// Any number of tasks may send concurrently; a single reader task owns the
/// receive half, correlates replies to their pending entries, and dispatches
/// callbacks. Cloning shares the connection.
#[derive(Clone)]
pub struct SocketConnection(Arc<InnerConnection>);

impl Deref for SocketConnection {
    type Target = InnerConnection;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// A non-owning handle to a shared connection.
#[derive(Clone)]
pub struct WeakSocketConnection(std::sync::Weak<InnerConnection>);

impl WeakSocketConnection {
    pub fn upgrade(&self) -> Option<SocketConnection> {
        self.0.upgrade().map(SocketConnection)
    }
}

impl SocketConnection {
    /// Opens a socket to `address`, applies the TCP options, and starts the
    /// reader task.
    pub async fn open(
        server: Arc<Server>,
        address: SocketAddr,
        codec: Arc<dyn DocumentCodec>,
        config: Arc<Config>,
    ) -> Result<Self, DriverError> {
        let stream = match timeout(config.connect_timeout(), TcpStream::connect(address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(error)) => return Err(error.into()),
            Err(_) => return Err(DriverError::ConnectTimeout(address)),
        };

        // Not every platform honors these; a refusal is not a reason to fail.
        if let Err(error) = stream.set_nodelay(true) {
            trace!("Couldn't disable Nagle on the connection to {}: {}", server.name(), error);
        }
        if let Err(error) = socket2::SockRef::from(&stream).set_keepalive(true) {
            trace!(
                "Couldn't enable keep-alive on the connection to {}: {}",
                server.name(),
                error
            );
        }

        server.record_connection_open();
        server.pin_address(address);

        let (reader, writer) = stream.into_split();
        let connection = SocketConnection(Arc::new(InnerConnection {
            server,
            codec,
            pending: PendingQueue::new(config.max_pending_per_connection(), config.lock_type()),
            config,
            state: Default::default(),
            request_ids: AtomicI32::new(1),
            outbound: Default::default(),
            writer: AsyncMutex::new(writer),
            reader_flush_needed: Default::default(),
            reader_task: Default::default(),
        }));
        connection.state.set(ConnectionState::Open);

        let reader_connection = connection.clone();
        let reader_task = task::spawn(READER_CONTEXT.scope((), async move {
            run_reader(reader_connection, reader).await;
        }));
        let _ = connection.reader_task.set(reader_task);

        debug!("Connected to {}", connection.server.name());
        Ok(connection)
    }

    pub fn downgrade(&self) -> WeakSocketConnection {
        WeakSocketConnection(Arc::downgrade(&self.0))
    }

    #[inline]
    pub fn server(&self) -> &Arc<Server> {
        &self.server
    }

    #[inline]
    pub fn server_name(&self) -> &str {
        self.server.name()
    }

    #[inline]
    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// `true` iff open and not draining.
    #[inline]
    pub fn is_available(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// `true` iff no requests are in flight.
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }

    /// Enqueues a message, blocking for a pending slot when the queue is
    /// full. Returns the canonical name of the server the bytes went to.
    ///
    /// When called from a callback on the reader task, this never blocks; it
    /// behaves like [`send_nowait`](Self::send_nowait).
    pub async fn send(
        &self,
        message: Message,
        callback: Option<Box<dyn ReplyCallback>>,
    ) -> Result<String, DriverError> {
        self.send_with_origin(message, callback, false).await
    }

    async fn send_with_origin(
        &self,
        message: Message,
        callback: Option<Box<dyn ReplyCallback>>,
        internal: bool,
    ) -> Result<String, DriverError> {
        self.ensure_accepting(internal)?;
        self.validate(&message)?;

        let mut body = Vec::new();
        message.serialize_body(&*self.codec, &mut body)?;

        if in_reader_context() {
            return self.stage_nowait(&message, body, callback);
        }

        self.pending.reserve().await;
        // The connection may have started draining while we waited for a slot.
        if let Err(error) = self.ensure_accepting(internal) {
            self.pending.unreserve();
            return Err(error);
        }
        let server_name = self.stage(&message, body, callback);

        if let Err(error) = self.flush().await {
            // The failure already reached the callback via the pending drain.
            warn!("Couldn't flush to {}: {}", server_name, error);
        }
        Ok(server_name)
    }

    /// The synchronous send used from reply callbacks: never blocks, leaves
    /// flushing to the reader. Fails with `PendingQueueFull` when no slot is
    /// free even after a flush is requested.
    pub fn send_nowait(
        &self,
        message: Message,
        callback: Option<Box<dyn ReplyCallback>>,
    ) -> Result<String, DriverError> {
        self.ensure_accepting(false)?;
        self.validate(&message)?;

        let mut body = Vec::new();
        message.serialize_body(&*self.codec, &mut body)?;
        self.stage_nowait(&message, body, callback)
    }

    /// Sends a message and awaits its reply.
    pub async fn request(&self, message: Message) -> Result<Reply, DriverError> {
        let (sender, future) = reply_future();
        self.send(message, Some(Box::new(sender))).await?;
        future.wait().await
    }

    fn ensure_accepting(&self, internal: bool) -> Result<(), DriverError> {
        match self.state() {
            ConnectionState::Open => Ok(()),
            ConnectionState::ShuttingDown if internal => Ok(()),
            _ => Err(DriverError::ConnectionShutDown),
        }
    }

    /// Pre-send validation; failures here never touch the socket.
    fn validate(&self, message: &Message) -> Result<(), DriverError> {
        let limit = self.server.max_document_size();
        let largest = message.largest_document_size(&*self.codec)?;
        if largest > limit {
            return Err(DriverError::DocumentTooLarge(largest, limit));
        }
        if let Some(required) = message.required_server_version() {
            if let Some(actual) = self.server.version() {
                if actual < required {
                    return Err(DriverError::ServerVersionMismatch(required, actual));
                }
            }
        }
        Ok(())
    }

    fn stage_nowait(
        &self,
        message: &Message,
        body: Vec<u8>,
        callback: Option<Box<dyn ReplyCallback>>,
    ) -> Result<String, DriverError> {
        if !self.pending.try_reserve() {
            self.reader_flush_needed.store(true, Ordering::SeqCst);
            return Err(DriverError::PendingQueueFull);
        }
        let server_name = self.stage(message, body, callback);
        self.reader_flush_needed.store(true, Ordering::SeqCst);
        Ok(server_name)
    }

    /// Assigns the request id, records the pending entry, and stages the
    /// frame bytes, all under the outbound lock so wire order matches id
    /// order. The pending entry exists before any byte can reach the wire.
    fn stage(&self, message: &Message, body: Vec<u8>, callback: Option<Box<dyn ReplyCallback>>) -> String {
        let mut outbound = self.outbound.lock();
        let request_id = self.request_ids.fetch_add(1, Ordering::SeqCst);
        let header = MessageHeader::new(
            (crate::HEADER_SIZE + body.len()) as u32,
            request_id,
            0,
            message.opcode(),
        );
        trace!("Sending {} #{} to {}", message.name(), request_id, self.server.name());
        self.pending
            .push_reserved(PendingMessage::new(request_id, message.name(), callback));
        outbound.extend_from_slice(&header.serialize());
        outbound.extend_from_slice(&body);
        drop(outbound);

        self.server.record_message_sent();
        self.server.name().to_owned()
    }

    /// Forces any staged bytes onto the wire.
    pub async fn flush(&self) -> Result<(), DriverError> {
        let mut writer = self.writer.lock().await;
        let bytes = std::mem::take(&mut *self.outbound.lock());
        if bytes.is_empty() {
            return Ok(());
        }
        let result = async {
            writer.write_all(&bytes).await?;
            writer.flush().await
        }
        .await;
        drop(writer);

        match result {
            Ok(()) => Ok(()),
            Err(error) => {
                self.close_now(true).await;
                Err(error.into())
            }
        }
    }

    /// Shuts the connection down.
    ///
    /// `force` closes the socket immediately and fails every pending callback
    /// with `ConnectionLost`. Otherwise the connection drains: external sends
    /// are refused, a no-op keep-alive wakes the reader, and the socket
    /// closes once the pending queue empties.
    pub async fn shutdown(&self, force: bool) -> Result<(), DriverError> {
        if force {
            debug!("Closing the connection to {}", self.server.name());
            self.close_now(true).await;
            return Ok(());
        }

        if !self.state.transition(ConnectionState::Open, ConnectionState::ShuttingDown) {
            return Ok(());
        }
        debug!("Draining the connection to {}", self.server.name());

        if self.pending.is_empty() {
            self.close_now(true).await;
            return Ok(());
        }
        if let Err(error) = self.send_with_origin(commands::is_master(), None, true).await {
            trace!("Couldn't send the drain keep-alive to {}: {}", self.server.name(), error);
        }
        Ok(())
    }

    /// Marks the connection closed, shuts the socket down, and blanket-fails
    /// the pending queue. Idempotent.
    async fn close_now(&self, abort_reader: bool) {
        if self.state.swap(ConnectionState::Closed) == ConnectionState::Closed {
            return;
        }
        // Best effort: a writer stuck on a dead peer must not stall teardown.
        if let Ok(mut writer) = self.writer.try_lock() {
            let _ = writer.shutdown().await;
        }
        if abort_reader && !in_reader_context() {
            if let Some(task) = self.reader_task.get() {
                task.abort();
            }
        }
        self.fail_pending();
    }

    fn fail_pending(&self) {
        for mut entry in self.pending.drain() {
            trace!(
                "Failing {} #{} on the lost connection to {}",
                entry.message_name(),
                entry.request_id(),
                self.server.name()
            );
            if let Some(callback) = entry.take_callback() {
                dispatch_completion(
                    self.config.executor(),
                    callback,
                    Err(DriverError::ConnectionLost(self.server.name().to_owned())),
                );
            }
        }
    }

    fn take_flush_request(&self) -> bool {
        self.reader_flush_needed.swap(false, Ordering::SeqCst)
    }

    /// Routes one inbound frame: skipped entries complete with `NoReply`, the
    /// matching entry gets the decoded reply, an unmatched reply is dropped.
    fn dispatch_frame(&self, header: &MessageHeader, body: &[u8]) {
        if header.opcode != OpCode::Reply {
            warn!(
                "Dropping an unexpected {} frame from {}",
                header.opcode,
                self.server.name()
            );
            return;
        }
        self.server.record_reply_received();

        let (skipped, matched) = self.pending.correlate(header.response_to_id);
        for mut entry in skipped {
            trace!(
                "{} #{} got no reply from {}",
                entry.message_name(),
                entry.request_id(),
                self.server.name()
            );
            if let Some(callback) = entry.take_callback() {
                dispatch_completion(self.config.executor(), callback, Err(DriverError::NoReply));
            }
        }

        let mut entry = match matched {
            Some(entry) => entry,
            None => {
                debug!(
                    "Discarding a reply to unknown request #{} from {}",
                    header.response_to_id,
                    self.server.name()
                );
                return;
            }
        };
        trace!(
            "Reply to {} #{} from {} after {:?}",
            entry.message_name(),
            entry.request_id(),
            self.server.name(),
            entry.elapsed()
        );

        let callback = match entry.take_callback() {
            Some(callback) => callback,
            None => return,
        };
        let result = match Reply::deserialize(header.response_to_id, body, &*self.codec) {
            Ok(reply) => match classify_reply(&reply) {
                Some(failure) => Err(DriverError::Reply(failure)),
                None => Ok(reply),
            },
            Err(error) => Err(DriverError::Message(error)),
        };
        dispatch_completion(self.config.executor(), callback, result);
    }

    /// Begins an idle-triggered drain from inside the reader. Returns `true`
    /// when there is nothing left to wait for.
    fn request_drain(&self) -> bool {
        if !self.state.transition(ConnectionState::Open, ConnectionState::ShuttingDown) {
            return self.pending.is_empty();
        }
        debug!("Draining the idle connection to {}", self.server.name());
        if self.pending.is_empty() {
            return true;
        }
        let keepalive = commands::is_master();
        let mut body = Vec::new();
        if keepalive.serialize_body(&*self.codec, &mut body).is_ok() {
            let _ = self.stage_nowait(&keepalive, body, None);
        }
        false
    }
}

async fn run_reader(connection: SocketConnection, mut reader: OwnedReadHalf) {
    let read_timeout = connection.config.read_timeout();
    let max_idle_ticks = connection.config.max_idle_tick_count();
    let mut header_bytes = [0u8; crate::HEADER_SIZE];
    let mut body = Vec::new();
    let mut idle_ticks: u32 = 0;

    loop {
        if connection.take_flush_request() && connection.flush().await.is_err() {
            break;
        }
        match connection.state() {
            ConnectionState::Closed => break,
            ConnectionState::ShuttingDown if connection.pending.is_empty() => break,
            _ => {}
        }

        match timeout(read_timeout, reader.read_exact(&mut header_bytes)).await {
            // One idle tick per consecutive read timeout.
            Err(_elapsed) => {
                idle_ticks += 1;
                if idle_ticks >= max_idle_ticks && connection.request_drain() {
                    break;
                }
                // The drain keep-alive went unanswered for a further full
                // idle cycle; stop waiting.
                if idle_ticks >= max_idle_ticks.saturating_mul(2) {
                    warn!("Giving up on draining the connection to {}", connection.server.name());
                    break;
                }
            }
            Ok(Err(error)) => {
                if connection.state() == ConnectionState::Open {
                    warn!("The connection to {} failed: {}", connection.server.name(), error);
                }
                break;
            }
            Ok(Ok(_)) => {
                idle_ticks = 0;
                let header = match MessageHeader::deserialize(&header_bytes) {
                    Ok(header) => header,
                    Err(error) => {
                        error!("Invalid frame from {}: {}", connection.server.name(), error);
                        break;
                    }
                };
                body.resize(header.body_length(), 0);
                match timeout(read_timeout, reader.read_exact(&mut body)).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(error)) => {
                        warn!("The connection to {} failed: {}", connection.server.name(), error);
                        break;
                    }
                    Err(_elapsed) => {
                        warn!("The connection to {} stalled mid-frame", connection.server.name());
                        break;
                    }
                }
                connection.dispatch_frame(&header, &body);
            }
        }
    }

    connection.close_now(false).await;
    debug!("Disconnected from {}", connection.server.name());
}
