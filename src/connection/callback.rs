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

use crate::{errors::DriverError, message::Reply};

use std::sync::Arc;
use tokio::sync::oneshot;

/// Receives the outcome of one request, exactly once.
///
/// A lightweight callback promises a non-blocking body and is invoked
/// directly on the reader task; anything else is handed to the configured
/// executor when one exists.
pub trait ReplyCallback: Send + 'static {
    fn complete(self: Box<Self>, result: Result<Reply, DriverError>);

    fn is_lightweight(&self) -> bool {
        false
    }
}

impl<F> ReplyCallback for F
where
    F: FnOnce(Result<Reply, DriverError>) + Send + 'static,
{
    fn complete(self: Box<Self>, result: Result<Reply, DriverError>) {
        (*self)(result)
    }
}

/// A completion task produced by the reader for the executor.
pub type CallbackTask = Box<dyn FnOnce() + Send + 'static>;

/// Runs non-lightweight callbacks off the reader task.
///
/// A bounded executor may reject a task; the rejected task is handed back so
/// the reader can degrade to running it inline.
pub trait CallbackExecutor: Send + Sync {
    fn execute(&self, task: CallbackTask) -> Result<(), CallbackTask>;
}

/// An executor backed by the runtime's blocking pool.
pub struct SpawnExecutor;

impl CallbackExecutor for SpawnExecutor {
    fn execute(&self, task: CallbackTask) -> Result<(), CallbackTask> {
        tokio::task::spawn_blocking(task);
        Ok(())
    }
}

/// Routes a completed result to its callback under the dispatch rules:
/// lightweight and executor-less callbacks run inline, everything else goes
/// to the executor, and a rejected task falls back to inline execution.
pub(crate) fn dispatch_completion(
    executor: Option<&Arc<dyn CallbackExecutor>>,
    callback: Box<dyn ReplyCallback>,
    result: Result<Reply, DriverError>,
) {
    if callback.is_lightweight() {
        callback.complete(result);
        return;
    }
    match executor {
        None => callback.complete(result),
        Some(executor) => {
            let task: CallbackTask = Box::new(move || callback.complete(result));
            if let Err(task) = executor.execute(task) {
                task();
            }
        }
    }
}

/// The sending half of a one-shot reply channel; lightweight by construction.
pub struct ReplySender(oneshot::Sender<Result<Reply, DriverError>>);

impl ReplyCallback for ReplySender {
    fn complete(self: Box<Self>, result: Result<Reply, DriverError>) {
        // The receiver may have given up waiting; that is not our problem.
        let _ = self.0.send(result);
    }

    fn is_lightweight(&self) -> bool {
        true
    }
}

/// The receiving half of a one-shot reply channel.
pub struct ReplyFuture(oneshot::Receiver<Result<Reply, DriverError>>);

impl ReplyFuture {
    pub async fn wait(self) -> Result<Reply, DriverError> {
        match self.0.await {
            Ok(result) => result,
            Err(_) => Err(DriverError::ConnectionShutDown),
        }
    }
}

/// Creates a linked callback/future pair for await-style requests.
pub fn reply_future() -> (ReplySender, ReplyFuture) {
    let (sender, receiver) = oneshot::channel();
    (ReplySender(sender), ReplyFuture(receiver))
}
