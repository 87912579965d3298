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

use crate::{config::LockType, connection::ReplyCallback};

use parking_lot::{FairMutex, Mutex};
use std::{collections::VecDeque, fmt, time::Instant};
use tokio::sync::Semaphore;

/// One in-flight request awaiting its reply.
///
/// The entry exists from the moment a send is staged until its reply arrives,
/// a later reply correlates past it, or the connection tears down.
pub struct PendingMessage {
    request_id: i32,
    message_name: &'static str,
    callback: Option<Box<dyn ReplyCallback>>,
    sent_at: Instant,
}

impl PendingMessage {
    pub fn new(request_id: i32, message_name: &'static str, callback: Option<Box<dyn ReplyCallback>>) -> Self {
        PendingMessage {
            request_id,
            message_name,
            callback,
            sent_at: Instant::now(),
        }
    }

    #[inline]
    pub fn request_id(&self) -> i32 {
        self.request_id
    }

    #[inline]
    pub fn message_name(&self) -> &'static str {
        self.message_name
    }

    /// Time since the message was staged for the wire.
    pub fn elapsed(&self) -> std::time::Duration {
        self.sent_at.elapsed()
    }

    pub(crate) fn take_callback(&mut self) -> Option<Box<dyn ReplyCallback>> {
        self.callback.take()
    }
}

impl fmt::Debug for PendingMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PendingMessage")
            .field("request_id", &self.request_id)
            .field("message_name", &self.message_name)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

enum Slots {
    Plain(Mutex<VecDeque<PendingMessage>>),
    Fair(FairMutex<VecDeque<PendingMessage>>),
}

impl Slots {
    fn with<R>(&self, f: impl FnOnce(&mut VecDeque<PendingMessage>) -> R) -> R {
        match self {
            Slots::Plain(slots) => f(&mut slots.lock()),
            Slots::Fair(slots) => f(&mut slots.lock()),
        }
    }
}

/// The bounded queue of in-flight requests on one connection.
///
/// Capacity is tracked by a semaphore so producers can wait for a slot
/// without holding the queue lock; the reader drains without ever blocking.
/// Entries are kept in send order, which the correlation logic relies on.
pub struct PendingQueue {
    slots: Slots,
    vacancies: Semaphore,
    capacity: usize,
}

impl PendingQueue {
    pub fn new(capacity: usize, lock_type: LockType) -> Self {
        let slots = match lock_type {
            LockType::Mutex => Slots::Plain(Mutex::new(VecDeque::with_capacity(capacity))),
            LockType::Fair => Slots::Fair(FairMutex::new(VecDeque::with_capacity(capacity))),
        };
        PendingQueue {
            slots,
            vacancies: Semaphore::new(capacity),
            capacity,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.slots.with(|slots| slots.len())
    }

    pub fn is_empty(&self) -> bool {
        self.slots.with(|slots| slots.is_empty())
    }

    /// Waits for a free slot. Every reservation must be followed by exactly
    /// one `push_reserved` or `unreserve`.
    pub async fn reserve(&self) {
        self.vacancies
            .acquire()
            .await
            .expect("the pending-queue semaphore is never closed")
            .forget();
    }

    /// Claims a free slot without waiting.
    pub fn try_reserve(&self) -> bool {
        match self.vacancies.try_acquire() {
            Ok(permit) => {
                permit.forget();
                true
            }
            Err(_) => false,
        }
    }

    pub fn unreserve(&self) {
        self.vacancies.add_permits(1);
    }

    /// Appends an entry into a previously reserved slot.
    pub fn push_reserved(&self, entry: PendingMessage) {
        self.slots.with(|slots| slots.push_back(entry));
    }

    /// Removes entries for an incoming reply.
    ///
    /// Entries are popped in FIFO order: everything older than the answered
    /// request was skipped by the server, and the matching entry (if present)
    /// is returned separately. Request ids increase monotonically, so an
    /// unknown `response_to` never consumes newer entries.
    pub fn correlate(&self, response_to: i32) -> (Vec<PendingMessage>, Option<PendingMessage>) {
        let (skipped, matched) = self.slots.with(|slots| {
            let mut skipped = Vec::new();
            let mut matched = None;
            while let Some(head) = slots.front() {
                if head.request_id() == response_to {
                    matched = slots.pop_front();
                    break;
                }
                if head.request_id() > response_to {
                    break;
                }
                skipped.push(slots.pop_front().expect("the head was just observed"));
            }
            (skipped, matched)
        });

        let released = skipped.len() + matched.is_some() as usize;
        if released > 0 {
            self.vacancies.add_permits(released);
        }
        (skipped, matched)
    }

    /// Empties the queue, releasing every slot. Used on teardown to fail all
    /// in-flight callbacks.
    pub fn drain(&self) -> Vec<PendingMessage> {
        let drained: Vec<PendingMessage> = self.slots.with(|slots| slots.drain(..).collect());
        if !drained.is_empty() {
            self.vacancies.add_permits(drained.len());
        }
        drained
    }
}
