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

//! Per-connection incoming demultiplexer: the inverse of
//! [`crate::mprpc::writer::MessageWriter`] (spec §4.7, "MessageReader").
//! Defragments the packet stream into commands and dispatches headers/bodies
//! to per-message decoders, surfacing cancel/ack commands to the caller for
//! correlation against the writer and the connection pool.

use crate::errors::{Error, Result};
use crate::mprpc::message::{Deserializer, MessageHeader};
use crate::mprpc::wire::{decode_command, decode_message_header, Command, PacketHeader, PacketType, PACKET_HEADER_SIZE};

/// an incoming message whose header and body bytes have not yet been exhausted.
/// The actual type dispatch (which `Deserializer` to build for a given header)
/// is an external collaborator, supplied here as `new_deserializer`.
#[derive(Debug)]
pub enum ReaderEvent {
    NewMessage { msg_idx: u64, header: MessageHeader },
    MessageProgress { msg_idx: u64, consumed: usize, end: bool },
    CancelMessage { msg_idx: u64 },
    CancelRequest { req_idx: u64, req_unique: u64 },
    AckdCount { n: u8 },
}

/// bound on a peer-asserted `msg_idx`/`head_size`, to keep a misbehaving peer
/// from forcing an unbounded allocation.
const MAX_SLOT_INDEX: u64 = 1 << 20;

pub struct MessageReader {
    pending: Vec<u8>,
    slots: Vec<Option<Box<dyn Deserializer>>>,
    new_deserializer: Box<dyn FnMut(&MessageHeader) -> Box<dyn Deserializer> + Send>,
}

impl MessageReader {
    pub fn new(new_deserializer: Box<dyn FnMut(&MessageHeader) -> Box<dyn Deserializer> + Send>) -> MessageReader {
        MessageReader { pending: Vec::new(), slots: Vec::new(), new_deserializer }
    }

    fn slot_mut(&mut self, idx: usize) -> Option<&mut Box<dyn Deserializer>> {
        self.slots.get_mut(idx).and_then(|s| s.as_mut())
    }

    fn ensure_capacity(&mut self, idx: usize) {
        if idx >= self.slots.len() {
            self.slots.resize_with(idx + 1, || None);
        }
    }

    /// feed newly-read socket bytes in; returns every event decoded from the
    /// complete packets now available. Bytes belonging to a still-incomplete
    /// packet are retained for the next call.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<ReaderEvent>> {
        self.pending.extend_from_slice(data);
        let mut events = Vec::new();
        let mut consumed = 0usize;

        loop {
            let remaining = &self.pending[consumed..];
            if remaining.len() < PACKET_HEADER_SIZE {
                break;
            }
            let header = PacketHeader::decode(remaining)?;
            let total_len = PACKET_HEADER_SIZE + header.size as usize;
            if remaining.len() < total_len {
                break; // wait for the rest of this packet
            }
            if header.kind == PacketType::KeepAlive {
                consumed += total_len;
                continue;
            }
            let payload = &remaining[PACKET_HEADER_SIZE..total_len];
            self.decode_commands(payload, &mut events)?;
            consumed += total_len;
        }

        if consumed > 0 {
            self.pending.drain(..consumed);
        }
        Ok(events)
    }

    fn decode_commands(&mut self, mut payload: &[u8], events: &mut Vec<ReaderEvent>) -> Result<()> {
        while !payload.is_empty() {
            let (cmd, n) = decode_command(payload)?;
            match cmd {
                Command::NewMessage { msg_idx, head } => {
                    if msg_idx >= MAX_SLOT_INDEX {
                        return Err(Error::Protocol(format!("msg_idx {msg_idx} out of bounds")));
                    }
                    let (header, _) = decode_message_header(head)?;
                    let idx = msg_idx as usize;
                    self.ensure_capacity(idx);
                    self.slots[idx] = Some((self.new_deserializer)(&header));
                    events.push(ReaderEvent::NewMessage { msg_idx, header });
                }
                Command::Message { msg_idx, body, end } => {
                    let idx = msg_idx as usize;
                    let consumed = match self.slot_mut(idx) {
                        Some(deser) => deser.read(body),
                        None => return Err(Error::NoSuchMessage(crate::mprpc::message::MessageId::INVALID)),
                    };
                    if end {
                        self.ensure_capacity(idx);
                        self.slots[idx] = None;
                    }
                    events.push(ReaderEvent::MessageProgress { msg_idx, consumed, end });
                }
                Command::CancelMessage { msg_idx } => {
                    let idx = msg_idx as usize;
                    if idx < self.slots.len() {
                        self.slots[idx] = None;
                    }
                    events.push(ReaderEvent::CancelMessage { msg_idx });
                }
                Command::CancelRequest { req_idx, req_unique } => {
                    events.push(ReaderEvent::CancelRequest { req_idx, req_unique });
                }
                Command::AckdCount { n } => {
                    events.push(ReaderEvent::AckdCount { n });
                }
            }
            payload = &payload[n..];
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mprpc::message::{MessageFlags, MessageId};
    use crate::mprpc::wire::{encode_cmd_ackd_count, encode_cmd_cancel_message, encode_cmd_new_message, encode_message_header, PacketFlags, PacketType};

    struct Sink(Vec<u8>);
    impl Deserializer for Sink {
        fn read(&mut self, buf: &[u8]) -> usize {
            self.0.extend_from_slice(buf);
            buf.len()
        }
    }

    fn packet(payload: &[u8]) -> Vec<u8> {
        let header = PacketHeader { kind: PacketType::Data, flags: PacketFlags::NONE, size: payload.len() as u16 };
        let mut out = vec![0u8; PACKET_HEADER_SIZE];
        header.encode((&mut out[..]).try_into().unwrap());
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn decodes_new_message_then_routes_body_to_the_right_slot() {
        let mut reader = MessageReader::new(Box::new(|_h| Box::new(Sink(Vec::new()))));
        let header = MessageHeader { flags: MessageFlags::NONE, sender_req_id: MessageId::INVALID, recipient_req_id: MessageId::INVALID, relay_header: None };
        let mut head_bytes = Vec::new();
        encode_message_header(&header, &mut head_bytes);
        let mut payload = Vec::new();
        encode_cmd_new_message(&mut payload, 0, &head_bytes);
        let bytes = packet(&payload);
        let events = reader.feed(&bytes).unwrap();
        assert!(matches!(events[0], ReaderEvent::NewMessage { msg_idx: 0, .. }));
    }

    #[test]
    fn a_packet_split_across_two_feeds_is_still_decoded() {
        let mut reader = MessageReader::new(Box::new(|_h| Box::new(Sink(Vec::new()))));
        let mut payload = Vec::new();
        encode_cmd_ackd_count(&mut payload, 3);
        let bytes = packet(&payload);
        let (first, second) = bytes.split_at(2);
        assert!(reader.feed(first).unwrap().is_empty());
        let events = reader.feed(second).unwrap();
        assert!(matches!(events[0], ReaderEvent::AckdCount { n: 3 }));
    }

    #[test]
    fn cancel_message_clears_the_slot() {
        let mut reader = MessageReader::new(Box::new(|_h| Box::new(Sink(Vec::new()))));
        let mut payload = Vec::new();
        encode_cmd_cancel_message(&mut payload, 0);
        let events = reader.feed(&packet(&payload)).unwrap();
        assert!(matches!(events[0], ReaderEvent::CancelMessage { msg_idx: 0 }));
    }
}
