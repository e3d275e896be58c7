/*
 * Copyright © 2024, United States Government, as represented by the Administrator of
 * the National Aeronautics and Space Administration. All rights reserved.
 *
 * The “ODIN” software is licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License. You may obtain a copy
 * of the License at http://www.apache.org/licenses/LICENSE-2.0.
 *
 * Unless required by applicable law or agreed to in writing, software distributed under
 * the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND,
 * either express or implied. See the License for the specific language governing permissions
 * and limitations under the License.
 */

//! `ConnectionPool`: the per-recipient routing layer above a connection's
//! writer (spec §4.9). Keeps a queue of not-yet-sent messages, tracks
//! connection lifecycle, pins synchronous sends to one connection per
//! recipient, and retries `AwaitResponse`/`Idempotent` sends that were lost
//! to a connection failure.
//!
//! A concrete connection (socket + reactor handler + [`crate::mprpc::writer::MessageWriter`])
//! is a collaborator this module only sees through [`ConnectionSink`] -- the
//! pool's job is the routing/retry policy, not socket I/O.

use std::collections::VecDeque;

use crate::errors::{Error, Result};
use crate::mprpc::message::{MessageBundle, MessageCompletion, MessageFlags, MessageHeader, MessageId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Resolving,
    Connecting,
    Active,
    Closed,
}

/// the pool's view of one connection to the recipient. Ownership of the
/// actual socket/writer lives with the reactor; the pool only drives it
/// through this seam.
pub trait ConnectionSink: Send {
    /// attempt to hand the message to this connection's writer. `Ok(false)`
    /// means the writer is at capacity right now, not that it failed.
    fn try_enqueue(&mut self, header: MessageHeader, bundle: MessageBundle) -> Result<bool>;
    fn state(&self) -> ConnectionState;

    /// whether the pool may currently route sends through this connection.
    /// Defaults to `state() == Active`; a connection constructed under
    /// `ConnectionStartState::Passive` (spec §6) overrides this to stay
    /// `false` until something on its own side (e.g. the first inbound
    /// message) activates it, even while `state()` already reports `Active`.
    fn can_send(&self) -> bool {
        self.state() == ConnectionState::Active
    }
}

/// re-synthesizes a fresh [`MessageBundle`] for a retried send. Plain
/// re-delivery of a partially-streamed serializer isn't possible in general
/// (the writer consumes it byte-by-byte), so a retryable send is described
/// by a factory rather than a one-shot bundle.
pub type BundleFactory = Box<dyn FnMut() -> MessageBundle + Send>;

struct QueuedMessage {
    id: MessageId,
    header: MessageHeader,
    make_bundle: BundleFactory,
    retries_left: u32,
}

struct ConnectionSlot {
    sink: Box<dyn ConnectionSink>,
    /// whether this connection currently owns the pool's synchronous lane.
    holds_sync_pin: bool,
}

pub struct ConnectionPool {
    recipient: String,
    connections: Vec<ConnectionSlot>,
    queue: VecDeque<QueuedMessage>,
    sync_pin: Option<usize>,
    next_local_idx: u64,
    max_active: usize,
    max_pending_connections: usize,
    default_retry_budget: u32,
}

impl ConnectionPool {
    pub fn new(recipient: impl Into<String>, max_active: usize, max_pending_connections: usize, default_retry_budget: u32) -> ConnectionPool {
        ConnectionPool {
            recipient: recipient.into(),
            connections: Vec::new(),
            queue: VecDeque::new(),
            sync_pin: None,
            next_local_idx: 0,
            max_active,
            max_pending_connections,
            default_retry_budget,
        }
    }

    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    pub fn add_connection(&mut self, sink: Box<dyn ConnectionSink>) -> Result<usize> {
        if self.connections.len() >= self.max_active + self.max_pending_connections {
            return Err(Error::LimitReached(format!("pool {}: connection cap reached", self.recipient)));
        }
        self.connections.push(ConnectionSlot { sink, holds_sync_pin: false });
        Ok(self.connections.len() - 1)
    }

    fn alloc_id(&mut self) -> MessageId {
        let idx = self.next_local_idx;
        self.next_local_idx += 1;
        MessageId(crate::ids::UniqueId::new(idx, 0))
    }

    /// route a message to this recipient (spec §4.9 `sendMessage`). If no
    /// idle connection accepts it immediately, it waits in the pool queue
    /// for the next `on_writable` drain.
    pub fn send_message(&mut self, header: MessageHeader, mut make_bundle: BundleFactory) -> Result<MessageId> {
        let id = self.alloc_id();
        let synchronous = header.flags.contains(MessageFlags::SYNCHRONOUS);

        if let Some(idx) = self.pick_connection(synchronous) {
            let bundle = make_bundle();
            if self.connections[idx].sink.try_enqueue(header, bundle)? {
                if synchronous {
                    self.pin_sync(idx);
                }
                return Ok(id);
            }
        }

        self.queue.push_back(QueuedMessage { id, header, make_bundle, retries_left: self.default_retry_budget });
        Ok(id)
    }

    fn pin_sync(&mut self, idx: usize) {
        if let Some(old) = self.sync_pin.take() {
            if let Some(slot) = self.connections.get_mut(old) {
                slot.holds_sync_pin = false;
            }
        }
        self.sync_pin = Some(idx);
        self.connections[idx].holds_sync_pin = true;
    }

    fn pick_connection(&self, synchronous: bool) -> Option<usize> {
        if synchronous {
            if let Some(idx) = self.sync_pin {
                return self.connections.get(idx).filter(|c| c.sink.can_send()).map(|_| idx);
            }
        }
        self.connections
            .iter()
            .enumerate()
            .find(|(_, c)| c.sink.can_send() && !c.holds_sync_pin)
            .map(|(i, _)| i)
            .or_else(|| self.connections.iter().position(|c| c.sink.can_send()))
    }

    /// called by the reactor handler when `connections[idx]` becomes
    /// writable again; drains as much of the pool queue into it as it'll take.
    pub fn on_writable(&mut self, idx: usize) -> Result<()> {
        loop {
            let Some(msg) = self.queue.front_mut() else { break };
            let synchronous = msg.header.flags.contains(MessageFlags::SYNCHRONOUS);
            if synchronous && self.sync_pin.is_some_and(|p| p != idx) {
                break; // this message must wait for its pinned connection, not this one
            }
            let bundle = (msg.make_bundle)();
            let header = msg.header;
            if !self.connections[idx].sink.try_enqueue(header, bundle)? {
                break;
            }
            if synchronous {
                self.pin_sync(idx);
            }
            self.queue.pop_front();
        }
        Ok(())
    }

    /// connection `idx` failed (resolve/connect error or a live socket
    /// error). `AwaitResponse`/`Idempotent` sends it was still holding get
    /// one more retry budget tick and are pushed back onto the pool queue;
    /// everything else is failed immediately (spec §4.9, §6 "retries on pool
    /// are bounded").
    pub fn on_connection_failed(&mut self, idx: usize, in_flight: Vec<(MessageHeader, BundleFactory, u32)>) {
        if let Some(slot) = self.connections.get_mut(idx) {
            if slot.holds_sync_pin {
                slot.holds_sync_pin = false;
                self.sync_pin = None;
            }
        }

        for (header, mut make_bundle, retries_left) in in_flight {
            let retryable = header.flags.contains(MessageFlags::AWAIT_RESPONSE) || header.flags.contains(MessageFlags::IDEMPOTENT);
            if retryable && retries_left > 0 {
                let id = self.alloc_id();
                self.queue.push_back(QueuedMessage { id, header, make_bundle, retries_left: retries_left - 1 });
            } else {
                let mut bundle = make_bundle();
                bundle.complete(MessageCompletion::Error(Error::ConnectionClosed));
            }
        }
    }

    pub fn queued_count(&self) -> usize {
        self.queue.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mprpc::message::Serializer;

    struct NoopSerializer;
    impl Serializer for NoopSerializer {
        fn write(&mut self, _buf: &mut [u8]) -> (usize, bool) {
            (0, true)
        }
    }

    fn make_bundle(flags: MessageFlags) -> MessageBundle {
        MessageBundle { flags, message_type_id: 1, message_url: None, serializer: Box::new(NoopSerializer), complete_fn: None }
    }

    struct FakeConn {
        state: ConnectionState,
        accepted: usize,
        capacity: usize,
    }

    impl ConnectionSink for FakeConn {
        fn try_enqueue(&mut self, _header: MessageHeader, _bundle: MessageBundle) -> Result<bool> {
            if self.accepted < self.capacity {
                self.accepted += 1;
                Ok(true)
            } else {
                Ok(false)
            }
        }
        fn state(&self) -> ConnectionState {
            self.state
        }
    }

    #[test]
    fn sends_directly_when_a_connection_is_active_and_idle() {
        let mut pool = ConnectionPool::new("peer", 1, 1, 2);
        pool.add_connection(Box::new(FakeConn { state: ConnectionState::Active, accepted: 0, capacity: 4 })).unwrap();
        let id = pool.send_message(MessageHeader::default(), Box::new(|| make_bundle(MessageFlags::NONE))).unwrap();
        assert!(id.is_valid());
        assert_eq!(pool.queued_count(), 0);
    }

    #[test]
    fn queues_when_no_connection_is_active_yet() {
        let mut pool = ConnectionPool::new("peer", 1, 1, 2);
        pool.add_connection(Box::new(FakeConn { state: ConnectionState::Connecting, accepted: 0, capacity: 4 })).unwrap();
        pool.send_message(MessageHeader::default(), Box::new(|| make_bundle(MessageFlags::NONE))).unwrap();
        assert_eq!(pool.queued_count(), 1);
    }

    #[test]
    fn synchronous_sends_pin_to_one_connection() {
        let mut pool = ConnectionPool::new("peer", 2, 1, 2);
        pool.add_connection(Box::new(FakeConn { state: ConnectionState::Active, accepted: 0, capacity: 4 })).unwrap();
        pool.add_connection(Box::new(FakeConn { state: ConnectionState::Active, accepted: 0, capacity: 4 })).unwrap();
        pool.send_message(MessageHeader { flags: MessageFlags::SYNCHRONOUS, ..Default::default() }, Box::new(|| make_bundle(MessageFlags::SYNCHRONOUS))).unwrap();
        let pinned = pool.sync_pin.expect("first synchronous send should claim the lane");
        pool.send_message(MessageHeader { flags: MessageFlags::SYNCHRONOUS, ..Default::default() }, Box::new(|| make_bundle(MessageFlags::SYNCHRONOUS))).unwrap();
        assert_eq!(pool.sync_pin, Some(pinned), "second synchronous send must stay on the pinned connection");
    }

    #[test]
    fn connection_failure_retries_await_response_sends_and_drops_non_idempotent_fire_and_forget() {
        let mut pool = ConnectionPool::new("peer", 1, 1, 2);
        let completed = std::sync::Arc::new(std::sync::Mutex::new(false));
        let completed2 = completed.clone();
        pool.on_connection_failed(
            0,
            vec![
                (MessageHeader { flags: MessageFlags::AWAIT_RESPONSE, ..Default::default() }, Box::new(|| make_bundle(MessageFlags::AWAIT_RESPONSE)), 1),
                (MessageHeader::default(), Box::new(move || {
                    let mut b = make_bundle(MessageFlags::NONE);
                    b.complete_fn = Some(Box::new({
                        let completed2 = completed2.clone();
                        move |_| *completed2.lock().unwrap() = true
                    }));
                    b
                }), 0),
            ],
        );
        assert_eq!(pool.queued_count(), 1, "only the retryable AwaitResponse send should be requeued");
        assert!(*completed.lock().unwrap(), "the non-retryable send should have its complete_fn invoked with an error");
    }
}
