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

//! On-wire framing: `PacketHeader`, the command stream inside a Data
//! packet's payload, and the `varuint` encoding they're built from (spec §6).
//!
//! The source leaves the exact varuint check bits an open question ("pin
//! down the exact check by round-tripping against a reference corpus"); this
//! port picks a concrete, self-contained scheme documented here and in
//! DESIGN.md rather than guessing at the original bit layout: the leading
//! byte's low 3 bits hold `byte_len - 1` (so 1..=8 value bytes, covering all
//! of `u64`), and its high 5 bits hold a checksum folded from `byte_len` and
//! every value byte. `decode` recomputes and compares that checksum before
//! trusting the length it read, which is what keeps a varuint
//! self-synchronizing in the face of a corrupt stream.

use crate::errors::Error;

pub mod varuint {
    use super::*;

    fn value_len(v: u64) -> usize {
        let bits = 64 - v.leading_zeros() as usize;
        ((bits + 7) / 8).max(1)
    }

    fn checksum(len: u8, bytes: &[u8]) -> u8 {
        let mut c = len;
        for &b in bytes { c ^= b; }
        c & 0x1f
    }

    /// append the varuint encoding of `v` to `out`. Infallible: every `u64` fits.
    pub fn encode_into(v: u64, out: &mut Vec<u8>) {
        let len = value_len(v);
        let bytes = v.to_le_bytes();
        let used = &bytes[..len];
        let chk = checksum(len as u8, used);
        out.push(((len as u8 - 1) & 0x07) | (chk << 3));
        out.extend_from_slice(used);
    }

    pub fn encode(v: u64) -> Vec<u8> {
        let mut out = Vec::with_capacity(9);
        encode_into(v, &mut out);
        out
    }

    /// decode a varuint from the front of `buf`, returning `(value, bytes_consumed)`.
    pub fn decode(buf: &[u8]) -> Result<(u64, usize), Error> {
        let b0 = *buf.first().ok_or_else(|| Error::Protocol("varuint: empty input".into()))?;
        let len = ((b0 & 0x07) + 1) as usize;
        let expected_chk = b0 >> 3;
        if buf.len() < 1 + len {
            return Err(Error::Protocol("varuint: truncated".into()));
        }
        let value_bytes = &buf[1..1 + len];
        if checksum(len as u8, value_bytes) != expected_chk {
            return Err(Error::Protocol("varuint: checksum mismatch".into()));
        }
        let mut arr = [0u8; 8];
        arr[..len].copy_from_slice(value_bytes);
        Ok((u64::from_le_bytes(arr), 1 + len))
    }

    /// the widest value a varuint can carry; used by callers that need to
    /// reject an out-of-range value before encoding (e.g. a `u128` id space).
    pub const MAX: u64 = u64::MAX;

    pub fn encode_checked(v: u128) -> Result<Vec<u8>, Error> {
        if v > MAX as u128 {
            Err(Error::Protocol(format!("varuint: {v} exceeds max {MAX}")))
        } else {
            Ok(encode(v as u64))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Data = 1,
    KeepAlive = 2,
}

impl PacketType {
    pub fn from_u8(b: u8) -> Result<PacketType, Error> {
        match b {
            1 => Ok(PacketType::Data),
            2 => Ok(PacketType::KeepAlive),
            other => Err(Error::Protocol(format!("unknown packet type {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketFlags(pub u8);

impl PacketFlags {
    pub const ACK_REQUEST: PacketFlags = PacketFlags(0x01);
    pub const COMPRESSED: PacketFlags = PacketFlags(0x02);
    pub const NONE: PacketFlags = PacketFlags(0);

    pub fn contains(self, other: PacketFlags) -> bool { (self.0 & other.0) == other.0 }
    pub fn with(self, other: PacketFlags) -> PacketFlags { PacketFlags(self.0 | other.0) }
}

pub const PACKET_HEADER_SIZE: usize = 4; // type:u8 | flags:u8 | size:u16

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub kind: PacketType,
    pub flags: PacketFlags,
    pub size: u16,
}

impl PacketHeader {
    pub fn encode(&self, out: &mut [u8; PACKET_HEADER_SIZE]) {
        out[0] = self.kind as u8;
        out[1] = self.flags.0;
        out[2..4].copy_from_slice(&self.size.to_le_bytes());
    }

    pub fn decode(buf: &[u8]) -> Result<PacketHeader, Error> {
        if buf.len() < PACKET_HEADER_SIZE {
            return Err(Error::Protocol("packet header truncated".into()));
        }
        let kind = PacketType::from_u8(buf[0])?;
        let flags = PacketFlags(buf[1]);
        let size = u16::from_le_bytes([buf[2], buf[3]]);
        Ok(PacketHeader { kind, flags, size })
    }
}

const CMD_NEW_MESSAGE: u8 = 0x01;
const CMD_MESSAGE: u8 = 0x02;
const CMD_CANCEL_MESSAGE: u8 = 0x03;
const CMD_CANCEL_REQUEST: u8 = 0x04;
const CMD_ACKD_COUNT: u8 = 0x05;
pub const END_MESSAGE_FLAG: u8 = 0x80;

/// a parsed command, borrowing its payload bytes from the packet buffer it was read from.
#[derive(Debug, PartialEq, Eq)]
pub enum Command<'a> {
    NewMessage { msg_idx: u64, head: &'a [u8] },
    Message { msg_idx: u64, body: &'a [u8], end: bool },
    CancelMessage { msg_idx: u64 },
    CancelRequest { req_idx: u64, req_unique: u64 },
    AckdCount { n: u8 },
}

pub fn encode_cmd_new_message(out: &mut Vec<u8>, msg_idx: u64, head: &[u8]) {
    out.push(CMD_NEW_MESSAGE);
    varuint::encode_into(msg_idx, out);
    out.extend_from_slice(&(head.len() as u16).to_le_bytes());
    out.extend_from_slice(head);
}

pub fn encode_cmd_message(out: &mut Vec<u8>, msg_idx: u64, body: &[u8], end: bool) {
    out.push(if end { CMD_MESSAGE | END_MESSAGE_FLAG } else { CMD_MESSAGE });
    varuint::encode_into(msg_idx, out);
    out.extend_from_slice(&(body.len() as u16).to_le_bytes());
    out.extend_from_slice(body);
}

pub fn encode_cmd_cancel_message(out: &mut Vec<u8>, msg_idx: u64) {
    out.push(CMD_CANCEL_MESSAGE);
    varuint::encode_into(msg_idx, out);
}

pub fn encode_cmd_cancel_request(out: &mut Vec<u8>, req_idx: u64, req_unique: u64) {
    out.push(CMD_CANCEL_REQUEST);
    varuint::encode_into(req_idx, out);
    varuint::encode_into(req_unique, out);
}

pub fn encode_cmd_ackd_count(out: &mut Vec<u8>, n: u8) {
    out.push(CMD_ACKD_COUNT);
    out.push(n);
}

/// decode one command from the front of `buf`, returning `(command, bytes_consumed)`.
pub fn decode_command(buf: &[u8]) -> Result<(Command<'_>, usize), Error> {
    let id = *buf.first().ok_or_else(|| Error::Protocol("command: empty input".into()))?;
    let base = id & !END_MESSAGE_FLAG;
    let mut pos = 1usize;
    match base {
        CMD_NEW_MESSAGE => {
            let (msg_idx, n) = varuint::decode(&buf[pos..])?; pos += n;
            let size = read_u16(buf, pos)?; pos += 2;
            let head = read_bytes(buf, pos, size as usize)?; pos += size as usize;
            Ok((Command::NewMessage { msg_idx, head }, pos))
        }
        CMD_MESSAGE => {
            let (msg_idx, n) = varuint::decode(&buf[pos..])?; pos += n;
            let size = read_u16(buf, pos)?; pos += 2;
            let body = read_bytes(buf, pos, size as usize)?; pos += size as usize;
            Ok((Command::Message { msg_idx, body, end: (id & END_MESSAGE_FLAG) != 0 }, pos))
        }
        CMD_CANCEL_MESSAGE => {
            let (msg_idx, n) = varuint::decode(&buf[pos..])?; pos += n;
            Ok((Command::CancelMessage { msg_idx }, pos))
        }
        CMD_CANCEL_REQUEST => {
            let (req_idx, n) = varuint::decode(&buf[pos..])?; pos += n;
            let (req_unique, n2) = varuint::decode(&buf[pos..])?; pos += n2;
            Ok((Command::CancelRequest { req_idx, req_unique }, pos))
        }
        CMD_ACKD_COUNT => {
            let n = *buf.get(pos).ok_or_else(|| Error::Protocol("AckdCount: truncated".into()))?;
            pos += 1;
            Ok((Command::AckdCount { n }, pos))
        }
        other => Err(Error::Protocol(format!("unknown command id {other}"))),
    }
}

fn read_u16(buf: &[u8], pos: usize) -> Result<u16, Error> {
    if buf.len() < pos + 2 { return Err(Error::Protocol("command: truncated u16".into())); }
    Ok(u16::from_le_bytes([buf[pos], buf[pos + 1]]))
}

fn read_bytes(buf: &[u8], pos: usize, len: usize) -> Result<&[u8], Error> {
    buf.get(pos..pos + len).ok_or_else(|| Error::Protocol("command: truncated payload".into()))
}

/// `flags | sender_req_idx | sender_req_unique | recipient_req_idx | recipient_req_unique | [group_id | replica_id]`
/// (spec §6, the `NewMessage` head bytes).
pub fn encode_message_header(header: &crate::mprpc::message::MessageHeader, out: &mut Vec<u8>) {
    varuint::encode_into(header.flags.0 as u64, out);
    varuint::encode_into(header.sender_req_id.0.index, out);
    varuint::encode_into(header.sender_req_id.0.unique as u64, out);
    varuint::encode_into(header.recipient_req_id.0.index, out);
    varuint::encode_into(header.recipient_req_id.0.unique as u64, out);
    if let Some(rh) = header.relay_header {
        varuint::encode_into(rh.group_id, out);
        varuint::encode_into(rh.replica_id, out);
    }
}

pub fn decode_message_header(buf: &[u8]) -> Result<(crate::mprpc::message::MessageHeader, usize), Error> {
    use crate::mprpc::message::{MessageFlags, MessageHeader, MessageId, RelayHeader};
    use crate::ids::UniqueId;

    let mut pos = 0usize;
    let (flags_raw, n) = varuint::decode(&buf[pos..])?; pos += n;
    let flags = MessageFlags(flags_raw as u32);
    let (sidx, n) = varuint::decode(&buf[pos..])?; pos += n;
    let (suniq, n) = varuint::decode(&buf[pos..])?; pos += n;
    let (ridx, n) = varuint::decode(&buf[pos..])?; pos += n;
    let (runiq, n) = varuint::decode(&buf[pos..])?; pos += n;
    let relay_header = if flags.contains(MessageFlags::RELAYED) {
        let (group_id, n) = varuint::decode(&buf[pos..])?; pos += n;
        let (replica_id, n) = varuint::decode(&buf[pos..])?; pos += n;
        Some(RelayHeader { group_id, replica_id })
    } else {
        None
    };
    let header = MessageHeader {
        flags,
        sender_req_id: MessageId(UniqueId::new(sidx, suniq as u32)),
        recipient_req_id: MessageId(UniqueId::new(ridx, runiq as u32)),
        relay_header,
    };
    Ok((header, pos))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varuint_round_trips_across_the_byte_length_boundaries() {
        for &v in &[0u64, 1, 127, 128, 255, 256, 65535, 65536, u32::MAX as u64, u64::MAX] {
            let enc = varuint::encode(v);
            let (dec, consumed) = varuint::decode(&enc).unwrap();
            assert_eq!(dec, v);
            assert_eq!(consumed, enc.len());
        }
    }

    #[test]
    fn varuint_detects_corrupted_checksum() {
        let mut enc = varuint::encode(300);
        enc[0] ^= 0x08; // flip a checksum bit, leave the length field alone
        assert!(varuint::decode(&enc).is_err());
    }

    #[test]
    fn varuint_checked_rejects_values_above_max() {
        assert!(varuint::encode_checked(u64::MAX as u128).is_ok());
        assert!(varuint::encode_checked(u64::MAX as u128 + 1).is_err());
    }

    #[test]
    fn packet_header_round_trips() {
        let hdr = PacketHeader { kind: PacketType::Data, flags: PacketFlags::ACK_REQUEST, size: 123 };
        let mut buf = [0u8; PACKET_HEADER_SIZE];
        hdr.encode(&mut buf);
        let back = PacketHeader::decode(&buf).unwrap();
        assert_eq!(hdr, back);
    }

    #[test]
    fn new_message_and_message_commands_round_trip() {
        let mut out = Vec::new();
        encode_cmd_new_message(&mut out, 7, b"head");
        encode_cmd_message(&mut out, 7, b"body", true);
        encode_cmd_cancel_request(&mut out, 1, 2);
        encode_cmd_ackd_count(&mut out, 3);

        let (c1, n1) = decode_command(&out).unwrap();
        assert_eq!(c1, Command::NewMessage { msg_idx: 7, head: b"head" });
        let (c2, n2) = decode_command(&out[n1..]).unwrap();
        assert_eq!(c2, Command::Message { msg_idx: 7, body: b"body", end: true });
        let (c3, n3) = decode_command(&out[n1 + n2..]).unwrap();
        assert_eq!(c3, Command::CancelRequest { req_idx: 1, req_unique: 2 });
        let (c4, _) = decode_command(&out[n1 + n2 + n3..]).unwrap();
        assert_eq!(c4, Command::AckdCount { n: 3 });
    }

    #[test]
    fn exactly_one_command_carries_the_end_message_flag() {
        let mut out = Vec::new();
        encode_cmd_message(&mut out, 1, b"a", false);
        encode_cmd_message(&mut out, 1, b"b", true);
        let (c1, n1) = decode_command(&out).unwrap();
        let (c2, _) = decode_command(&out[n1..]).unwrap();
        match (c1, c2) {
            (Command::Message { end: e1, .. }, Command::Message { end: e2, .. }) => {
                assert!(!e1 && e2);
            }
            _ => panic!("expected two Message commands"),
        }
    }
}
