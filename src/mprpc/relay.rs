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

//! On a relay node, forwards messages between two connections with
//! buffer-permit accounting (spec §4.2 "RelayEngine", §8 scenario 5).
//!
//! Permits are tracked symmetrically on both the send and receive side of a
//! hop (SPEC_FULL.md §3 supplement, grounded in `original_source`): a sender
//! must hold a free send permit to accept a new [`RelayData`], and a
//! receiver must hold a free recv permit before handing one to its own
//! writer. Permits are returned when the packet that carried the
//! corresponding fragment is acknowledged.

use std::sync::Mutex;

use crate::errors::{poisoned_lock, Result};
use crate::mprpc::message::MessageHeader;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RelayFlags(pub u8);

impl RelayFlags {
    pub const MESSAGE_BEGIN: RelayFlags = RelayFlags(0x01);
    pub const MESSAGE_END: RelayFlags = RelayFlags(0x02);
    pub const MESSAGE_LAST: RelayFlags = RelayFlags(0x04);
    pub const REQUEST: RelayFlags = RelayFlags(0x08);

    pub fn contains(self, other: RelayFlags) -> bool { (self.0 & other.0) == other.0 }
    pub fn with(self, other: RelayFlags) -> RelayFlags { RelayFlags(self.0 | other.0) }
}

/// an opaque, permit-accounted buffer reference carrying one fragment of a
/// relayed message. `header` is only populated on the first fragment
/// (`MESSAGE_BEGIN`).
pub struct RelayData {
    pub flags: RelayFlags,
    pub header: Option<MessageHeader>,
    pub data: Vec<u8>,
}

impl RelayData {
    pub fn len(&self) -> usize { self.data.len() }
    pub fn is_empty(&self) -> bool { self.data.is_empty() }
}

struct Permits {
    send_free: u32,
    recv_free: u32,
}

pub struct RelayEngine {
    permits: Mutex<Permits>,
}

impl RelayEngine {
    pub fn new(initial_free: u32) -> RelayEngine {
        RelayEngine { permits: Mutex::new(Permits { send_free: initial_free, recv_free: initial_free }) }
    }

    /// sender-side: true and consumes one permit iff a permit was free.
    pub fn try_accept_send(&self) -> Result<bool> {
        let mut g = self.permits.lock().map_err(|_| poisoned_lock("relay permits"))?;
        if g.send_free > 0 { g.send_free -= 1; Ok(true) } else { Ok(false) }
    }

    /// consumer acknowledged `n` relay buffers on the send side; sender's free count grows back.
    pub fn ack_send(&self, n: u32) -> Result<()> {
        let mut g = self.permits.lock().map_err(|_| poisoned_lock("relay permits"))?;
        g.send_free += n;
        Ok(())
    }

    pub fn try_accept_recv(&self) -> Result<bool> {
        let mut g = self.permits.lock().map_err(|_| poisoned_lock("relay permits"))?;
        if g.recv_free > 0 { g.recv_free -= 1; Ok(true) } else { Ok(false) }
    }

    pub fn ack_recv(&self, n: u32) -> Result<()> {
        let mut g = self.permits.lock().map_err(|_| poisoned_lock("relay permits"))?;
        g.recv_free += n;
        Ok(())
    }

    pub fn send_free_count(&self) -> u32 {
        self.permits.lock().map(|g| g.send_free).unwrap_or(0)
    }

    pub fn recv_free_count(&self) -> u32 {
        self.permits.lock().map(|g| g.recv_free).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permits_return_on_ack_and_block_when_exhausted() {
        let engine = RelayEngine::new(1);
        assert!(engine.try_accept_send().unwrap());
        assert!(!engine.try_accept_send().unwrap(), "only one permit was available");
        engine.ack_send(1).unwrap();
        assert_eq!(engine.send_free_count(), 1);
        assert!(engine.try_accept_send().unwrap());
    }

    #[test]
    fn send_and_recv_permits_are_tracked_independently() {
        let engine = RelayEngine::new(2);
        assert!(engine.try_accept_send().unwrap());
        assert_eq!(engine.recv_free_count(), 2);
    }
}
