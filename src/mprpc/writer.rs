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

//! Per-connection outgoing multiplexer (spec §4.7). Interleaves the byte
//! streams of however many messages are in flight into the packet stream
//! `Reactor`/`mio` hands to the socket.
//!
//! The historical writer threads three intrusive lists (`order`, `write`,
//! `cache`) through a single slot array using raw next/prev pointers. This
//! port keeps the arena-plus-stable-index shape (the same one `TimeStore` and
//! `Reactor`'s actor/handler tables use) but threads the lists with
//! `VecDeque<usize>`/`Vec<usize>` over slot indices instead of unsafe
//! pointer-threading -- same externally observable FIFO/eligible-subset/free
//! behavior, safe Rust.

use std::collections::VecDeque;

use crate::errors::{Error, Result};
use crate::mprpc::message::{MessageBundle, MessageCompletion, MessageFlags, MessageHeader, MessageId};
use crate::mprpc::relay::{RelayData, RelayFlags};
use crate::mprpc::wire::{
    encode_cmd_ackd_count, encode_cmd_cancel_message, encode_cmd_cancel_request, encode_cmd_message,
    encode_cmd_new_message, encode_message_header, PacketFlags, PacketHeader, PacketType, PACKET_HEADER_SIZE,
};
use crate::ids::UniqueId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteState {
    /// header not yet (fully) emitted; folds the conceptual "not started" state in.
    WriteHead,
    WriteBody,
    /// awaiting a response; parked out of the `write` list.
    WriteWait,
    /// parked awaiting a response, but a cancel arrived in the meantime.
    WriteWaitCanceled,
    /// cancel must still be flushed to the peer.
    WriteCanceled,
    RelayedHead,
    RelayedBody,
    RelayedWait,
    RelayedCancel,
}

struct MessageStub {
    unique: u32,
    bundle: Option<MessageBundle>,
    header: MessageHeader,
    head_bytes: Option<Vec<u8>>,
    head_pos: usize,
    relay_data: Option<RelayData>,
    relay_pos: usize,
    state: WriteState,
    /// packets claimed continuously since the last fairness reset (spec §4.7.4).
    packet_count: u32,
    yielded_once: bool,
}

/// outcome of [`MessageWriter::check_response_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseState {
    None,
    Wait,
    WaitCanceled,
    RelayedWait,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    pub send_keepalive_if_idle: bool,
}

enum Eligibility {
    Take,
    Rotate,
}

pub struct MessageWriter {
    slots: Vec<Option<MessageStub>>,
    /// insertion order over all live slots, for `cancel_oldest`.
    order: VecDeque<usize>,
    /// the subset of live slots with bytes still owed to the wire.
    write: VecDeque<usize>,
    cache: Vec<usize>,
    write_sync_idx: Option<usize>,
    max_multiplex: usize,
    max_response_wait: usize,
    max_continuous_packet_count: u32,
    min_free_packet_data_size: usize,
    can_send_relay: bool,
}

impl MessageWriter {
    pub fn new(
        max_multiplex: usize,
        max_response_wait: usize,
        max_continuous_packet_count: u32,
        min_free_packet_data_size: usize,
    ) -> MessageWriter {
        let total = max_multiplex + max_response_wait;
        MessageWriter {
            slots: (0..total).map(|_| None).collect(),
            order: VecDeque::with_capacity(total),
            write: VecDeque::with_capacity(max_multiplex),
            cache: (0..total).rev().collect(),
            write_sync_idx: None,
            max_multiplex,
            max_response_wait,
            max_continuous_packet_count: max_continuous_packet_count.max(1),
            min_free_packet_data_size,
            can_send_relay: true,
        }
    }

    pub fn set_can_send_relay(&mut self, can: bool) {
        self.can_send_relay = can;
    }

    fn outstanding_wait_count(&self) -> usize {
        self.order.len() - self.write.len()
    }

    /// queue a locally-originated message for sending (spec §4.7.2).
    pub fn enqueue(&mut self, header: MessageHeader, bundle: MessageBundle) -> Result<MessageId> {
        if self.write.len() >= self.max_multiplex {
            return Err(Error::LimitReached("writer: multiplex slots exhausted".into()));
        }
        if bundle.flags.contains(MessageFlags::AWAIT_RESPONSE)
            && self.outstanding_wait_count() >= self.max_response_wait
        {
            return Err(Error::LimitReached("writer: response-wait slots exhausted".into()));
        }
        let idx = self
            .cache
            .pop()
            .ok_or_else(|| Error::LimitReached("writer: no free slots".into()))?;
        let unique = self.slots[idx].as_ref().map(|s| s.unique).unwrap_or(0);
        let mut head_bytes = Vec::new();
        encode_message_header(&header, &mut head_bytes);
        self.slots[idx] = Some(MessageStub {
            unique,
            bundle: Some(bundle),
            header,
            head_bytes: Some(head_bytes),
            head_pos: 0,
            relay_data: None,
            relay_pos: 0,
            state: WriteState::WriteHead,
            packet_count: 0,
            yielded_once: false,
        });
        self.order.push_back(idx);
        self.write.push_back(idx);
        Ok(MessageId(UniqueId::new(idx as u64, unique)))
    }

    /// start (`RelayFlags::MESSAGE_BEGIN`) or continue relaying a fragment
    /// forwarded from the other side of a relay hop (SPEC_FULL.md §3 supplement).
    pub fn enqueue_relay(&mut self, continuation: Option<MessageId>, data: RelayData) -> Result<MessageId> {
        if let Some(msg_id) = continuation {
            let idx = msg_id.0.index as usize;
            let stub = self
                .slots
                .get_mut(idx)
                .and_then(|s| s.as_mut())
                .filter(|s| s.unique == msg_id.0.unique)
                .ok_or_else(|| Error::NoSuchMessage(msg_id))?;
            if stub.relay_data.is_some() {
                return Err(Error::Protocol("relay slot already has a pending fragment".into()));
            }
            stub.relay_pos = 0;
            stub.relay_data = Some(data);
            if !self.write.contains(&idx) {
                self.write.push_back(idx);
            }
            return Ok(msg_id);
        }

        if self.write.len() >= self.max_multiplex {
            return Err(Error::LimitReached("writer: multiplex slots exhausted".into()));
        }
        let idx = self
            .cache
            .pop()
            .ok_or_else(|| Error::LimitReached("writer: no free slots".into()))?;
        let unique = self.slots[idx].as_ref().map(|s| s.unique).unwrap_or(0);
        self.slots[idx] = Some(MessageStub {
            unique,
            bundle: None,
            header: MessageHeader::default(),
            head_bytes: None,
            head_pos: 0,
            relay_data: Some(data),
            relay_pos: 0,
            state: WriteState::RelayedHead,
            packet_count: 0,
            yielded_once: false,
        });
        self.order.push_back(idx);
        self.write.push_back(idx);
        Ok(MessageId(UniqueId::new(idx as u64, unique)))
    }

    fn free_slot(&mut self, idx: usize) {
        self.order.retain(|&i| i != idx);
        self.write.retain(|&i| i != idx);
        self.release_sync_pin(idx);
        if let Some(stub) = self.slots[idx].as_mut() {
            stub.unique = stub.unique.wrapping_add(1);
        }
        self.slots[idx] = None;
        self.cache.push(idx);
    }

    /// releases the synchronous lane pin if `idx` currently holds it. Must be
    /// called whenever a slot leaves `write` without going through
    /// `free_slot` -- e.g. parking on `WriteWait`/`RelayedWait` to await a
    /// response -- since the pin otherwise outlives the slot's time as the
    /// thing actually being serialized and starves every other synchronous
    /// message on the connection until the parked one is freed.
    fn release_sync_pin(&mut self, idx: usize) {
        if self.write_sync_idx == Some(idx) {
            self.write_sync_idx = None;
        }
    }

    fn finish_local_message(&mut self, idx: usize) {
        let await_response = self.slots[idx]
            .as_ref()
            .map(|s| s.bundle.as_ref().map(|b| b.flags.contains(MessageFlags::AWAIT_RESPONSE)).unwrap_or(false))
            .unwrap_or(false);
        if await_response {
            self.write.retain(|&i| i != idx);
            self.release_sync_pin(idx);
            if let Some(stub) = self.slots[idx].as_mut() {
                stub.state = WriteState::WriteWait;
                stub.head_bytes = None;
            }
        } else {
            if let Some(stub) = self.slots[idx].as_mut() {
                if let Some(bundle) = stub.bundle.as_mut() {
                    bundle.complete(MessageCompletion::Sent);
                }
            }
            self.free_slot(idx);
        }
    }

    /// cancel an outstanding local message. `force` completes and frees it
    /// immediately even if a response might already be in flight from the
    /// peer (spec §4.7.6).
    pub fn cancel(&mut self, msg_id: MessageId, force: bool) -> Result<()> {
        let idx = msg_id.0.index as usize;
        let matches = self
            .slots
            .get(idx)
            .and_then(|s| s.as_ref())
            .map(|s| s.unique == msg_id.0.unique)
            .unwrap_or(false);
        if !matches {
            return Ok(()); // already completed/freed; cancel-after-the-fact is a no-op
        }
        let state = self.slots[idx].as_ref().unwrap().state;
        match state {
            WriteState::WriteHead | WriteState::WriteBody => {
                self.slots[idx].as_mut().unwrap().state = WriteState::WriteCanceled;
                if !self.write.contains(&idx) {
                    self.write.push_back(idx);
                }
            }
            WriteState::WriteWait => {
                if force {
                    if let Some(bundle) = self.slots[idx].as_mut().unwrap().bundle.as_mut() {
                        bundle.complete(MessageCompletion::Canceled);
                    }
                    self.free_slot(idx);
                } else {
                    self.slots[idx].as_mut().unwrap().state = WriteState::WriteWaitCanceled;
                }
            }
            WriteState::RelayedHead | WriteState::RelayedBody => {
                self.slots[idx].as_mut().unwrap().state = WriteState::RelayedCancel;
                if !self.write.contains(&idx) {
                    self.write.push_back(idx);
                }
            }
            WriteState::WriteCanceled
            | WriteState::WriteWaitCanceled
            | WriteState::RelayedCancel
            | WriteState::RelayedWait => {} // already on its way out
        }
        Ok(())
    }

    pub fn cancel_oldest(&mut self, force: bool) -> Result<Option<MessageId>> {
        let Some(&idx) = self.order.front() else { return Ok(None) };
        let unique = self.slots[idx].as_ref().unwrap().unique;
        let id = MessageId(UniqueId::new(idx as u64, unique));
        self.cancel(id, force)?;
        Ok(Some(id))
    }

    /// correlate an arriving response/cancel-ack with the outstanding
    /// request slot it answers, without mutating writer state.
    pub fn check_response_state(&self, msg_id: MessageId) -> ResponseState {
        let idx = msg_id.0.index as usize;
        match self.slots.get(idx).and_then(|s| s.as_ref()) {
            Some(stub) if stub.unique == msg_id.0.unique => match stub.state {
                WriteState::WriteWait => ResponseState::Wait,
                WriteState::WriteWaitCanceled => ResponseState::WaitCanceled,
                WriteState::RelayedWait => ResponseState::RelayedWait,
                _ => ResponseState::None,
            },
            _ => ResponseState::None,
        }
    }

    /// deliver a response header to a waiting slot and free it (called by
    /// the reader once it has decoded the matching `Message`/`NewMessage` pair).
    pub fn complete_response(&mut self, msg_id: MessageId, response: MessageHeader) -> Result<()> {
        let idx = msg_id.0.index as usize;
        let matches = self
            .slots
            .get(idx)
            .and_then(|s| s.as_ref())
            .map(|s| s.unique == msg_id.0.unique)
            .unwrap_or(false);
        if !matches {
            return Err(Error::NoSuchMessage(msg_id));
        }
        if let Some(bundle) = self.slots[idx].as_mut().unwrap().bundle.as_mut() {
            bundle.complete(MessageCompletion::Response(response));
        }
        self.free_slot(idx);
        Ok(())
    }

    fn try_take_eligible(&mut self, idx: usize) -> Eligibility {
        let stub = self.slots[idx].as_ref().unwrap();

        // never split a header across packets; a header-forming slot always goes first.
        if matches!(stub.state, WriteState::WriteHead | WriteState::RelayedHead) {
            return Eligibility::Take;
        }

        if stub.bundle.as_ref().map(|b| b.flags.contains(MessageFlags::SYNCHRONOUS)).unwrap_or(false) {
            match self.write_sync_idx {
                Some(sync_idx) if sync_idx != idx => return Eligibility::Rotate,
                _ => self.write_sync_idx = Some(idx),
            }
        }

        if matches!(stub.state, WriteState::RelayedBody | WriteState::RelayedCancel) && !self.can_send_relay {
            return Eligibility::Rotate;
        }

        if stub.packet_count >= self.max_continuous_packet_count {
            if stub.yielded_once {
                let stub = self.slots[idx].as_mut().unwrap();
                stub.packet_count = 0;
                stub.yielded_once = false;
            } else {
                self.slots[idx].as_mut().unwrap().yielded_once = true;
                return Eligibility::Rotate;
            }
        }

        Eligibility::Take
    }

    /// emit one fragment from `idx` into `payload`, advancing its state.
    /// Returns bytes appended, or `0` if nothing fit in `space`.
    fn emit_fragment(
        &mut self,
        idx: usize,
        payload: &mut Vec<u8>,
        space: usize,
        relay_free_count: &mut u32,
        relay_accept_requested: &mut bool,
    ) -> Result<usize> {
        let before = payload.len();
        let state = self.slots[idx].as_ref().unwrap().state;
        const CMD_OVERHEAD: usize = 1 + 9 + 2; // tag + worst-case varuint idx + u16 len

        match state {
            WriteState::WriteHead => {
                let stub = self.slots[idx].as_mut().unwrap();
                let head = stub.head_bytes.as_ref().unwrap();
                let remaining = &head[stub.head_pos..];
                if space < CMD_OVERHEAD + remaining.len() {
                    return Ok(0);
                }
                encode_cmd_new_message(payload, idx as u64, remaining);
                stub.head_pos = head.len();
                stub.head_bytes = None;
                stub.state = WriteState::WriteBody;
                stub.packet_count += 1;
                Ok(payload.len() - before)
            }
            WriteState::WriteBody => {
                if space <= CMD_OVERHEAD {
                    return Ok(0);
                }
                let body_budget = (space - CMD_OVERHEAD).min(u16::MAX as usize);
                let mut body = vec![0u8; body_budget];
                let (n, finished) = {
                    let stub = self.slots[idx].as_mut().unwrap();
                    stub.bundle.as_mut().unwrap().serializer.write(&mut body)
                };
                body.truncate(n);
                encode_cmd_message(payload, idx as u64, &body, finished);
                self.slots[idx].as_mut().unwrap().packet_count += 1;
                if finished {
                    self.finish_local_message(idx);
                }
                Ok(payload.len() - before)
            }
            WriteState::WriteCanceled => {
                if space < CMD_OVERHEAD {
                    return Ok(0);
                }
                encode_cmd_cancel_message(payload, idx as u64);
                if let Some(stub) = self.slots[idx].as_mut() {
                    if let Some(bundle) = stub.bundle.as_mut() {
                        bundle.complete(MessageCompletion::Canceled);
                    }
                }
                self.free_slot(idx);
                Ok(payload.len() - before)
            }
            WriteState::RelayedHead => {
                let stub = self.slots[idx].as_mut().unwrap();
                let header_bytes = {
                    let rd = stub.relay_data.as_ref().unwrap();
                    let header = rd.header.ok_or_else(|| Error::Protocol("relay: missing header on first fragment".into()))?;
                    let mut bytes = Vec::new();
                    encode_message_header(&header, &mut bytes);
                    bytes
                };
                if space < CMD_OVERHEAD + header_bytes.len() {
                    return Ok(0);
                }
                encode_cmd_new_message(payload, idx as u64, &header_bytes);
                stub.state = WriteState::RelayedBody;
                stub.packet_count += 1;
                // the header fragment carries no payload bytes; the first body
                // fragment is emitted on the next pass over this slot.
                Ok(payload.len() - before)
            }
            WriteState::RelayedBody => {
                if space <= CMD_OVERHEAD {
                    return Ok(0);
                }
                if *relay_free_count == 0 && !*relay_accept_requested {
                    return Ok(0);
                }
                let (end, last, chunk_len) = {
                    let stub = self.slots[idx].as_ref().unwrap();
                    let rd = stub.relay_data.as_ref().unwrap();
                    let remaining = rd.len() - stub.relay_pos;
                    let chunk_len = remaining.min(space - CMD_OVERHEAD).min(u16::MAX as usize);
                    (
                        rd.flags.contains(RelayFlags::MESSAGE_END) && stub.relay_pos + chunk_len == rd.len(),
                        rd.flags.contains(RelayFlags::MESSAGE_LAST) && stub.relay_pos + chunk_len == rd.len(),
                        chunk_len,
                    )
                };
                let stub = self.slots[idx].as_mut().unwrap();
                let rd = stub.relay_data.as_ref().unwrap();
                let chunk = rd.data[stub.relay_pos..stub.relay_pos + chunk_len].to_vec();
                encode_cmd_message(payload, idx as u64, &chunk, end);
                stub.relay_pos += chunk_len;
                stub.packet_count += 1;
                if *relay_free_count > 0 {
                    *relay_free_count -= 1;
                } else {
                    *relay_accept_requested = true;
                }
                if stub.relay_pos == rd.len() {
                    stub.relay_data = None;
                    stub.relay_pos = 0;
                    if last {
                        self.free_slot(idx);
                    } else if end {
                        stub.state = WriteState::RelayedWait;
                        self.write.retain(|&i| i != idx);
                        self.release_sync_pin(idx);
                    }
                    // else: this fragment is exhausted but more will arrive via
                    // `enqueue_relay`'s continuation path; the slot stays parked
                    // in `write` with no `relay_data` until then, so the picker
                    // must tolerate a RelayedBody slot with nothing to emit.
                }
                Ok(payload.len() - before)
            }
            WriteState::RelayedCancel => {
                if space < CMD_OVERHEAD {
                    return Ok(0);
                }
                encode_cmd_cancel_message(payload, idx as u64);
                self.free_slot(idx);
                Ok(payload.len() - before)
            }
            WriteState::WriteWait | WriteState::WriteWaitCanceled | WriteState::RelayedWait => Ok(0),
        }
    }

    fn write_one_packet(
        &mut self,
        buf: &mut [u8],
        ackd_buf_count: &mut u32,
        cancel_requests: &mut VecDeque<(u64, u64)>,
        relay_free_count: &mut u32,
        relay_accept_requested: &mut bool,
    ) -> Result<usize> {
        if buf.len() < PACKET_HEADER_SIZE + 1 {
            return Ok(0);
        }
        let budget = buf.len() - PACKET_HEADER_SIZE;
        let mut payload = Vec::with_capacity(budget.min(4096));

        if *ackd_buf_count > 0 {
            let n = (*ackd_buf_count).min(255) as u8;
            encode_cmd_ackd_count(&mut payload, n);
            *ackd_buf_count -= n as u32;
        }

        while let Some(&(req_idx, req_unique)) = cancel_requests.front() {
            if payload.len() + 1 + 18 > budget {
                break;
            }
            encode_cmd_cancel_request(&mut payload, req_idx, req_unique);
            cancel_requests.pop_front();
        }

        let mut stalled_rotations = 0usize;
        while payload.len() < budget && !self.write.is_empty() {
            if stalled_rotations > self.write.len() * 2 + 2 {
                break; // nothing in `write` currently fits or is eligible
            }
            let idx = *self.write.front().unwrap();
            match self.try_take_eligible(idx) {
                Eligibility::Rotate => {
                    self.write.rotate_left(1);
                    stalled_rotations += 1;
                }
                Eligibility::Take => {
                    let space = budget - payload.len();
                    let wrote = self.emit_fragment(idx, &mut payload, space, relay_free_count, relay_accept_requested)?;
                    if wrote == 0 {
                        if self.write.front() == Some(&idx) {
                            // this slot can't progress in the space left; try a sibling instead.
                            self.write.rotate_left(1);
                            stalled_rotations += 1;
                        }
                        if space == budget {
                            break; // nothing written at all and no room improves by rotating further
                        }
                    } else {
                        stalled_rotations = 0;
                    }
                }
            }
        }

        if payload.is_empty() {
            return Ok(0);
        }

        let header = PacketHeader { kind: PacketType::Data, flags: PacketFlags::NONE, size: payload.len() as u16 };
        let mut hdr_bytes = [0u8; PACKET_HEADER_SIZE];
        header.encode(&mut hdr_bytes);
        buf[..PACKET_HEADER_SIZE].copy_from_slice(&hdr_bytes);
        buf[PACKET_HEADER_SIZE..PACKET_HEADER_SIZE + payload.len()].copy_from_slice(&payload);
        Ok(PACKET_HEADER_SIZE + payload.len())
    }

    fn write_keepalive_packet(buf: &mut [u8]) -> usize {
        if buf.len() < PACKET_HEADER_SIZE {
            return 0;
        }
        let header = PacketHeader { kind: PacketType::KeepAlive, flags: PacketFlags::NONE, size: 0 };
        let mut hdr_bytes = [0u8; PACKET_HEADER_SIZE];
        header.encode(&mut hdr_bytes);
        buf[..PACKET_HEADER_SIZE].copy_from_slice(&hdr_bytes);
        PACKET_HEADER_SIZE
    }

    /// pack as many fragments as fit into `buf` (spec §4.7.3). `ackd_buf_count`
    /// and `cancel_requests` are drained as far as space allows; leftovers
    /// stay queued for the next call. One relay accept request is emitted per
    /// call at most, to avoid a single hop starving its siblings of permits.
    pub fn write(
        &mut self,
        buf: &mut [u8],
        options: WriteOptions,
        ackd_buf_count: &mut u32,
        cancel_requests: &mut VecDeque<(u64, u64)>,
        relay_free_count: &mut u32,
    ) -> Result<usize> {
        let mut total = 0usize;
        let mut relay_accept_requested = false;
        while buf.len() - total >= self.min_free_packet_data_size + PACKET_HEADER_SIZE {
            let produced = self.write_one_packet(
                &mut buf[total..],
                ackd_buf_count,
                cancel_requests,
                relay_free_count,
                &mut relay_accept_requested,
            )?;
            if produced == 0 {
                break;
            }
            total += produced;
        }
        if total == 0 && options.send_keepalive_if_idle {
            total += Self::write_keepalive_packet(&mut buf[total..]);
        }
        Ok(total)
    }

    pub fn is_idle(&self) -> bool {
        self.write.is_empty()
    }

    pub fn live_count(&self) -> usize {
        self.order.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mprpc::message::Serializer;

    struct FixedBody(Vec<u8>, usize);
    impl Serializer for FixedBody {
        fn write(&mut self, buf: &mut [u8]) -> (usize, bool) {
            let remaining = &self.0[self.1..];
            let n = remaining.len().min(buf.len());
            buf[..n].copy_from_slice(&remaining[..n]);
            self.1 += n;
            (n, self.1 == self.0.len())
        }
    }

    fn bundle(flags: MessageFlags, body: Vec<u8>) -> MessageBundle {
        MessageBundle { flags, message_type_id: 1, message_url: None, serializer: Box::new(FixedBody(body, 0)), complete_fn: None }
    }

    #[test]
    fn enqueue_then_write_produces_a_new_message_packet() {
        let mut w = MessageWriter::new(4, 4, 4, 16);
        let id = w.enqueue(MessageHeader::default(), bundle(MessageFlags::NONE, vec![1, 2, 3])).unwrap();
        assert!(id.is_valid());
        let mut buf = vec![0u8; 512];
        let mut ackd = 0;
        let mut cancels = VecDeque::new();
        let mut relay_free = 0;
        let n = w.write(&mut buf, WriteOptions::default(), &mut ackd, &mut cancels, &mut relay_free).unwrap();
        assert!(n > PACKET_HEADER_SIZE);
        assert!(w.is_idle(), "one-shot message should fully drain and free its slot in one write() call");
    }

    #[test]
    fn multiplex_limit_is_enforced() {
        let mut w = MessageWriter::new(1, 1, 4, 16);
        w.enqueue(MessageHeader::default(), bundle(MessageFlags::AWAIT_RESPONSE, vec![1])).unwrap();
        let err = w.enqueue(MessageHeader::default(), bundle(MessageFlags::NONE, vec![1]));
        assert!(err.is_err());
    }

    #[test]
    fn await_response_message_parks_after_send_and_completes_on_response() {
        let mut w = MessageWriter::new(4, 4, 4, 16);
        let id = w.enqueue(MessageHeader::default(), bundle(MessageFlags::AWAIT_RESPONSE, vec![9])).unwrap();
        let mut buf = vec![0u8; 512];
        let mut ackd = 0;
        let mut cancels = VecDeque::new();
        let mut relay_free = 0;
        w.write(&mut buf, WriteOptions::default(), &mut ackd, &mut cancels, &mut relay_free).unwrap();
        assert_eq!(w.check_response_state(id), ResponseState::Wait);
        w.complete_response(id, MessageHeader::default()).unwrap();
        assert_eq!(w.check_response_state(id), ResponseState::None);
    }

    #[test]
    fn synchronous_await_response_message_releases_the_lane_once_sent() {
        let mut w = MessageWriter::new(4, 4, 4, 4096);
        let flags = MessageFlags::SYNCHRONOUS | MessageFlags::AWAIT_RESPONSE;
        let first = w.enqueue(MessageHeader::default(), bundle(flags, vec![1])).unwrap();
        let second = w.enqueue(MessageHeader::default(), bundle(flags, vec![2])).unwrap();
        let mut buf = vec![0u8; 4096];
        let mut ackd = 0;
        let mut cancels = VecDeque::new();
        let mut relay_free = 0;
        // first call sends the first synchronous request and parks it awaiting a response
        w.write(&mut buf, WriteOptions::default(), &mut ackd, &mut cancels, &mut relay_free).unwrap();
        assert_eq!(w.check_response_state(first), ResponseState::Wait);
        // the lane must already be free: the second synchronous message should not
        // have to wait for the first one's response before it can be serialized
        let n = w.write(&mut buf, WriteOptions::default(), &mut ackd, &mut cancels, &mut relay_free).unwrap();
        assert!(n > 0, "second synchronous message should have been sent once the first left the wire");
        assert_eq!(w.check_response_state(second), ResponseState::Wait);
    }

    #[test]
    fn cancel_before_any_bytes_leave_still_emits_cancel_message() {
        let mut w = MessageWriter::new(4, 4, 4, 4096);
        let id = w.enqueue(MessageHeader::default(), bundle(MessageFlags::NONE, vec![0u8; 1])).unwrap();
        w.cancel(id, false).unwrap();
        let mut buf = vec![0u8; 512];
        let mut ackd = 0;
        let mut cancels = VecDeque::new();
        let mut relay_free = 0;
        let n = w.write(&mut buf, WriteOptions::default(), &mut ackd, &mut cancels, &mut relay_free).unwrap();
        assert!(n > 0);
        assert!(w.is_idle());
    }

    #[test]
    fn keepalive_is_emitted_only_when_idle_and_requested() {
        let mut w = MessageWriter::new(4, 4, 4, 16);
        let mut buf = vec![0u8; 512];
        let mut ackd = 0;
        let mut cancels = VecDeque::new();
        let mut relay_free = 0;
        let n = w.write(&mut buf, WriteOptions { send_keepalive_if_idle: true }, &mut ackd, &mut cancels, &mut relay_free).unwrap();
        assert_eq!(n, PACKET_HEADER_SIZE);
    }
}
