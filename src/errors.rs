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

use thiserror::Error;
use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("limit reached: {0}")]
    LimitReached(String),

    #[error("canceled")]
    Canceled,

    #[error("no such message {0:?}")]
    NoSuchMessage(crate::mprpc::message::MessageId),

    #[error("relay back-pressure: {0} permits free")]
    RelayBackPressure(u32),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("resolve error: {0}")]
    Resolve(String),

    #[error("IO error {0}")]
    IOError(#[from] std::io::Error),

    #[error("config parse error {0}")]
    ConfigParseError(String),

    #[error("poisoned lock error {0}")]
    PoisonedLockError(String),

    #[error("failed to join reactor thread")]
    JoinError,

    #[error("operation failed: {0}")]
    OpFailed(String),
}

pub fn poisoned_lock<T: ToString>(op: T) -> Error {
    Error::PoisonedLockError(op.to_string())
}

pub fn op_failed(msg: impl ToString) -> Error {
    Error::OpFailed(msg.to_string())
}
