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

//! Cooperative unit of execution. An actor is not thread-bound beyond "runs
//! on its reactor's thread" -- it is pushed onto exactly one reactor at a
//! time by the [`crate::scheduler::Scheduler`] and owns a list of
//! [`crate::handler::CompletionHandler`]s for the lifetime of its run.

use crate::event::Event;
use crate::ids::{ActorId, RunId, UniqueId};
use crate::reactor::{ReactorContext, ReactorProxy};
use std::sync::Arc;

/// `on_event` is the actor's single dispatch entry point; it is only ever
/// called from the reactor thread that currently owns the actor.
pub trait Actor: Send {
    fn on_event(&mut self, ctx: &mut ActorContext<'_, '_>, event: Event);
}

/// the capability an actor (or one of its handlers) uses to reach back into
/// its own reactor during a callback. Constructed fresh for the duration of
/// each dispatch -- never stored past the call that received it, which is
/// what breaks the cyclic actor/reactor/service reference graphs the source
/// relied on raw pointers for. Two lifetimes: `'a` for this wrapper, `'rc`
/// for the reactor-tick state it borrows (time store, exec queue, registry).
pub struct ActorContext<'a, 'rc> {
    pub actor_id: ActorId,
    pub run_id: RunId,
    pub reactor: &'a mut ReactorContext<'rc>,
}

impl<'a, 'rc> ActorContext<'a, 'rc> {
    /// enqueue a closure for this actor, to be drained on the current tick's exec pass.
    pub fn post(&mut self, closure: impl FnOnce(&ReactorContext) + Send + 'static) {
        self.reactor.post_self(self.run_id.slot, Box::new(closure));
    }

    /// enqueues the two-phase stop sentinel for this actor (see [`crate::event::ExecStub`]).
    pub fn stop(&mut self) {
        self.reactor.stop_actor(self.run_id.slot);
    }

    pub fn now(&self) -> std::time::Instant { self.reactor.now() }
}

/// a cheap, cloneable, cross-thread handle to an actor already placed on a
/// reactor. Used by code that does not live on the actor's own reactor
/// thread (other reactors, the service, RPC connection objects) to raise
/// events at it without ever touching the actor's state directly.
#[derive(Clone)]
pub struct ActorRef {
    pub actor_id: ActorId,
    pub run_id: RunId,
    proxy: ReactorProxy,
}

impl ActorRef {
    pub fn new(actor_id: ActorId, run_id: RunId, proxy: ReactorProxy) -> Self {
        ActorRef { actor_id, run_id, proxy }
    }

    /// cross-reactor send: atomically appends to the target reactor's raise
    /// buffer, waking it if the buffer was previously empty. Delivery is
    /// filtered by the actor's current `unique` at drain time, so a stale
    /// `ActorRef` to an already-stopped actor is silently dropped.
    pub fn raise_user(&self, tag: u32, payload: Box<dyn std::any::Any + Send>) {
        self.proxy.raise(self.run_id.slot, Event::User { tag, payload });
    }

    pub fn post(&self, closure: impl FnOnce(&ReactorContext) + Send + 'static) {
        self.proxy.push_closure(self.run_id.slot, Box::new(closure));
    }

    pub fn stop(&self) {
        self.proxy.stop_actor(self.run_id.slot);
    }
}

pub(crate) struct ActorSlot {
    pub unique: u32,
    pub service_id: ActorId,
    pub handler_ids: Vec<UniqueId>,
    pub actor: Option<Box<dyn Actor>>,
}
