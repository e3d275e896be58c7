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

//! Message header/flags, the writer-side bundle record, and the opaque
//! serialization seam (spec §3 "Message"/"MessageBundle", §1 non-goals).

use crate::errors::Error;
use crate::ids::UniqueId;

/// opaque stable handle identifying a slot in either a pool queue or a
/// connection's writer/reader vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MessageId(pub UniqueId);

impl MessageId {
    pub const INVALID: MessageId = MessageId(UniqueId::INVALID);
    pub fn is_valid(&self) -> bool { self.0.is_valid() }
}

macro_rules! flag_bits {
    ($name:ident : $repr:ty { $( $bit:ident = $val:expr ),* $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
        pub struct $name(pub $repr);

        impl $name {
            $( pub const $bit: $name = $name($val); )*
            pub const NONE: $name = $name(0);

            pub fn contains(self, other: $name) -> bool { (self.0 & other.0) == other.0 }
            pub fn insert(&mut self, other: $name) { self.0 |= other.0; }
            pub fn remove(&mut self, other: $name) { self.0 &= !other.0; }
            pub fn with(self, other: $name) -> $name { $name(self.0 | other.0) }
            pub fn without(self, other: $name) -> $name { $name(self.0 & !other.0) }
        }

        impl std::ops::BitOr for $name {
            type Output = $name;
            fn bitor(self, rhs: $name) -> $name { $name(self.0 | rhs.0) }
        }
    };
}

flag_bits!(MessageFlags: u32 {
    SYNCHRONOUS   = 0x0001,
    AWAIT_RESPONSE = 0x0002,
    IDEMPOTENT    = 0x0004,
    STARTED_SEND  = 0x0008,
    DONE_SEND     = 0x0010,
    CANCELED      = 0x0020,
    ONE_SHOT_SEND = 0x0040,
    RESPONSE      = 0x0080,
    RESPONSE_PART = 0x0100,
    RESPONSE_LAST = 0x0200,
    ON_PEER       = 0x0400,
    BACK_ON_SENDER = 0x0800,
    RELAYED       = 0x1000,
});

/// pure function implementing the ping-pong direction state machine (spec §4.8):
/// `sender(OnPeer=0) -> peer(OnPeer=1) -> sender(OnPeer=0, BackOnSender=1)`.
/// Applying it twice to a freshly-sent message's flags yields exactly the
/// "response arrived back at the sender" state.
pub fn update_state_flags(flags: MessageFlags) -> MessageFlags {
    if !flags.contains(MessageFlags::ON_PEER) {
        flags.with(MessageFlags::ON_PEER)
    } else {
        flags.without(MessageFlags::ON_PEER).with(MessageFlags::BACK_ON_SENDER)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RelayHeader {
    pub group_id: u64,
    pub replica_id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MessageHeader {
    pub flags: MessageFlags,
    pub sender_req_id: MessageId,
    pub recipient_req_id: MessageId,
    pub relay_header: Option<RelayHeader>,
}

/// `(buf) -> (bytes_produced, finished)`. The wire encoding of the user
/// payload itself is an external collaborator (spec §1 non-goals); this is
/// the seam the writer drives it through.
pub trait Serializer: Send {
    fn write(&mut self, buf: &mut [u8]) -> (usize, bool);
}

/// `(buf) -> bytes_consumed`. End-of-message is signaled out of band by the
/// `EndMessageFlag` bit on the wire command, not by the deserializer itself.
pub trait Deserializer: Send {
    fn read(&mut self, buf: &[u8]) -> usize;
}

pub enum MessageCompletion {
    Sent,
    Response(MessageHeader),
    Canceled,
    Error(Error),
}

pub type CompleteFn = Box<dyn FnOnce(MessageCompletion) + Send>;

/// the writer-side record handed to [`crate::mprpc::writer::MessageWriter::enqueue`].
pub struct MessageBundle {
    pub flags: MessageFlags,
    pub message_type_id: u32,
    pub message_url: Option<String>,
    pub serializer: Box<dyn Serializer>,
    pub complete_fn: Option<CompleteFn>,
}

impl MessageBundle {
    pub fn complete(&mut self, outcome: MessageCompletion) {
        if let Some(f) = self.complete_fn.take() {
            f(outcome);
        }
    }
}

pub struct Message {
    pub header: MessageHeader,
    pub bundle: MessageBundle,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_state_flags_implements_the_ping_pong_law() {
        let sender = MessageFlags::NONE;
        let once = update_state_flags(sender);
        assert!(once.contains(MessageFlags::ON_PEER));
        assert!(!once.contains(MessageFlags::BACK_ON_SENDER));

        let twice = update_state_flags(once);
        assert!(!twice.contains(MessageFlags::ON_PEER));
        assert!(twice.contains(MessageFlags::BACK_ON_SENDER));
    }
}
