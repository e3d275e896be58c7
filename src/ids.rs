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

//! Stable identifiers. The historical source has several inconsistent bit-split
//! `IndexT`/`UidT` layouts (`UINDEX32` vs `UINDEX64`); this port picks one
//! uniform scheme and does not preserve the bit-split (see DESIGN.md).

use std::fmt;

/// `(index, unique)` pair. Identity is stable across the lifetime of a slot;
/// `unique` is bumped every time the slot is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UniqueId {
    pub index: u64,
    pub unique: u32,
}

impl UniqueId {
    pub const INVALID: UniqueId = UniqueId { index: u64::MAX, unique: 0 };

    pub fn new(index: u64, unique: u32) -> Self {
        UniqueId { index, unique }
    }

    pub fn is_valid(&self) -> bool {
        self.index != u64::MAX
    }
}

impl Default for UniqueId {
    fn default() -> Self { UniqueId::INVALID }
}

impl fmt::Display for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.index, self.unique)
    }
}

/// Identity of an actor within a [`crate::service::Service`].
pub type ActorId = UniqueId;

/// Identity of an actor's slot within the [`crate::reactor::Reactor`] it currently runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunId {
    pub reactor_index: usize,
    pub slot: UniqueId,
}

impl RunId {
    pub const INVALID: RunId = RunId { reactor_index: usize::MAX, slot: UniqueId::INVALID };

    pub fn is_valid(&self) -> bool {
        self.reactor_index != usize::MAX && self.slot.is_valid()
    }
}

impl Default for RunId {
    fn default() -> Self { RunId::INVALID }
}
