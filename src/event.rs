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

use std::any::Any;
use crate::ids::UniqueId;

/// readiness mask reported to a [`crate::handler::CompletionHandler`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IoReadiness {
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
}

impl IoReadiness {
    pub fn is_empty(&self) -> bool { !self.readable && !self.writable && !self.error }
}

/// an event delivered either to an actor's `on_event` hook or to a specific
/// handler's `handle_completion`.
pub enum Event {
    Init,
    Clear,
    Timer { store_index: usize },
    IoReady(IoReadiness),
    User { tag: u32, payload: Box<dyn Any + Send> },
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Event::Init => write!(f, "Init"),
            Event::Clear => write!(f, "Clear"),
            Event::Timer { store_index } => write!(f, "Timer({store_index})"),
            Event::IoReady(m) => write!(f, "IoReady({m:?})"),
            Event::User { tag, .. } => write!(f, "User(tag={tag})"),
        }
    }
}

/// target of a queued work item: either the actor's own dispatch, or a
/// specific completion handler owned by that actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecTarget {
    Actor,
    Handler(UniqueId),
}

/// closure queued for execution without any readiness condition.
pub type PostedClosure = Box<dyn FnOnce(&crate::reactor::ReactorContext) + Send>;

/// a queued work item: `(actor_uid, handler_uid | actor, optional closure, event)`.
/// If the target is a handler, the event/closure is delivered to that handler's
/// `handle_completion`; otherwise to the actor's `on_event`.
///
/// `StopRepost`/`StopFinal` implement the two-phase stop protocol (spec §4.3,
/// §9): `StopRepost` is the sentinel `post_actor_stop()` enqueues; when
/// dispatched it fans out `Clear` to every handler the actor still owns and
/// re-enqueues itself as `StopFinal`, which then frees the actor slot. Because
/// the exec queue is FIFO, anything already queued for the actor ahead of
/// `StopRepost` runs before teardown begins, and the handler `Clear`s always
/// run before `StopFinal`.
pub enum ExecStub {
    Event { actor: UniqueId, target: ExecTarget, event: Event },
    Closure { actor: UniqueId, closure: PostedClosure },
    StopRepost { actor: UniqueId },
    StopFinal { actor: UniqueId },
}

impl ExecStub {
    pub fn actor_uid(&self) -> UniqueId {
        match self {
            ExecStub::Event { actor, .. } => *actor,
            ExecStub::Closure { actor, .. } => *actor,
            ExecStub::StopRepost { actor } => *actor,
            ExecStub::StopFinal { actor } => *actor,
        }
    }
}
