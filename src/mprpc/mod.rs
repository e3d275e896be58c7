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

//! The multiplexed RPC transport: a length-delimited framed protocol running
//! over one or more reactor-driven connections per peer, carrying any
//! number of concurrent typed messages.

pub mod message;
pub mod wire;
pub mod writer;
pub mod reader;
pub mod pool;
pub mod relay;

pub use message::{Message, MessageBundle, MessageFlags, MessageHeader, MessageId, Serializer, Deserializer, CompleteFn, MessageCompletion};
pub use wire::{varuint, Command, PacketHeader, PacketFlags, PacketType};
pub use writer::{MessageWriter, ResponseState, WriteOptions};
pub use reader::{MessageReader, ReaderEvent};
pub use pool::{ConnectionPool, ConnectionSink, ConnectionState, BundleFactory};
pub use relay::{RelayEngine, RelayData, RelayFlags};
