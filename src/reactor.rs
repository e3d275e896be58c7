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

//! Per-thread event loop: OS readiness poll + [`TimeStore`] + task queues
//! dispatch to completion handlers and actors. This is the central
//! component of the runtime (spec §4.5); everything else either feeds it
//! work or is driven by it.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::sync::mpsc::Sender;
use std::time::{Duration, Instant};

use mio::{Events, Poll, Token, Waker};

use crate::actor::{Actor, ActorContext, ActorSlot};
use crate::errors::{poisoned_lock, Result};
use crate::event::{Event, ExecStub, ExecTarget, IoReadiness, PostedClosure};
use crate::handler::{CompletionHandler, HandlerSlot};
use crate::ids::{ActorId, RunId, UniqueId};
use crate::time_store::TimeStore;
use crate::{debug, trace};

/// called with an actor's service-registry id once the reactor has fully
/// torn the actor down, so the registry entry can be released (spec §3, §4.6).
/// Set after construction, once a [`crate::service::Service`] exists to point
/// back to -- `Reactor::new`/`Scheduler::start` run before there is one.
pub type UnregisterHook = Arc<dyn Fn(ActorId) + Send + Sync>;

const WAKE_TOKEN: Token = Token(usize::MAX);

struct TimerEntry {
    actor: UniqueId,
    handler: Option<UniqueId>,
}

/// an actor handed to a reactor by the scheduler, still awaiting slot installation.
pub struct PendingActor {
    pub service_id: ActorId,
    pub actor: Box<dyn Actor>,
    pub reply: Sender<RunId>,
}

struct RaiseItem {
    actor: UniqueId,
    event: Event,
}

/// shared, cross-thread state a [`ReactorProxy`] mutates under a short lock.
struct Shared {
    push: Mutex<Vec<PendingActor>>,
    raise: Mutex<Vec<RaiseItem>>,
    closures: Mutex<Vec<(UniqueId, PostedClosure)>>,
    stops: Mutex<Vec<UniqueId>>,
    waker: Waker,
    stop_requested: std::sync::atomic::AtomicBool,
    unregister_hook: Mutex<Option<UnregisterHook>>,
}

/// cheap, cloneable, cross-thread handle to a reactor. The only way code
/// running on a different thread (another reactor, the service, an RPC
/// connection object) reaches into a reactor.
#[derive(Clone)]
pub struct ReactorProxy {
    index: usize,
    shared: Arc<Shared>,
}

impl ReactorProxy {
    pub fn index(&self) -> usize { self.index }

    /// hand a freshly constructed actor to this reactor for installation.
    pub fn schedule(&self, service_id: ActorId, actor: Box<dyn Actor>, reply: Sender<RunId>) -> Result<()> {
        let mut guard = self.shared.push.lock().map_err(|_| poisoned_lock("reactor push queue"))?;
        let was_empty = guard.is_empty();
        guard.push(PendingActor { service_id, actor, reply });
        drop(guard);
        if was_empty { let _ = self.shared.waker.wake(); }
        Ok(())
    }

    /// cross-reactor send: atomically appends to the raise buffer, waking the
    /// reactor if the buffer was previously empty (spec §4.5 "raise contract").
    pub fn raise(&self, actor: UniqueId, event: Event) {
        if let Ok(mut guard) = self.shared.raise.lock() {
            let was_empty = guard.is_empty();
            guard.push(RaiseItem { actor, event });
            drop(guard);
            if was_empty { let _ = self.shared.waker.wake(); }
        }
    }

    pub fn push_closure(&self, actor: UniqueId, closure: PostedClosure) {
        if let Ok(mut guard) = self.shared.closures.lock() {
            let was_empty = guard.is_empty();
            guard.push((actor, closure));
            drop(guard);
            if was_empty { let _ = self.shared.waker.wake(); }
        }
    }

    pub fn stop_actor(&self, actor: UniqueId) {
        if let Ok(mut guard) = self.shared.stops.lock() {
            guard.push(actor);
            let _ = self.shared.waker.wake();
        }
    }

    /// ask the reactor to stop: it finishes draining events for still-running
    /// actors, then exits (spec §4.5 step 7, §4.4).
    pub fn request_stop(&self) {
        self.shared.stop_requested.store(true, std::sync::atomic::Ordering::SeqCst);
        let _ = self.shared.waker.wake();
    }

    /// current load used by the scheduler's least-loaded placement.
    pub fn load_hint(&self) -> usize {
        self.shared.push.lock().map(|g| g.len()).unwrap_or(0)
            + self.shared.raise.lock().map(|g| g.len()).unwrap_or(0)
    }

    /// install the callback the reactor invokes with an actor's service id
    /// once that actor's `StopFinal` has freed its slot.
    pub fn set_unregister_hook(&self, hook: UnregisterHook) {
        if let Ok(mut guard) = self.shared.unregister_hook.lock() {
            *guard = Some(hook);
        }
    }
}

/// the capability a callback (actor or completion handler) has into its
/// reactor for the duration of the dispatch that invoked it. Never stored
/// past that call.
pub struct ReactorContext<'a> {
    pub(crate) time_store: &'a mut TimeStore<TimerEntry>,
    pub(crate) exec_q: &'a mut VecDeque<ExecStub>,
    pub(crate) registry: &'a mio::Registry,
    pub(crate) now: Instant,
}

impl<'a> ReactorContext<'a> {
    /// arm a timer for `actor` (optionally scoped to one of its handlers), firing at `now + delay`.
    pub fn arm_timer(&mut self, actor: UniqueId, handler: Option<UniqueId>, delay: Duration) -> usize {
        self.time_store.push(self.now + delay, TimerEntry { actor, handler })
    }

    pub fn reschedule_timer(&mut self, store_index: usize, delay: Duration) {
        self.time_store.update(store_index, self.now + delay);
    }

    pub fn disarm_timer(&mut self, store_index: usize) {
        self.time_store.pop(store_index);
    }

    /// enqueue a closure for `actor`, drained later in the *same* tick's exec pass -- never re-entrantly.
    pub fn post_self(&mut self, actor: UniqueId, closure: PostedClosure) {
        self.exec_q.push_back(ExecStub::Closure { actor, closure });
    }

    /// two-phase stop: enqueues `StopRepost`, which guarantees events already
    /// queued for the actor are processed before teardown begins (spec §4.5, §9).
    pub fn stop_actor(&mut self, actor: UniqueId) {
        self.exec_q.push_back(ExecStub::StopRepost { actor });
    }

    pub fn registry(&self) -> &mio::Registry { self.registry }

    pub fn now(&self) -> Instant { self.now }
}

/// per-thread event loop state. Single-writer: only the thread running
/// [`Reactor::run`] ever touches `actors`/`handlers`/`time_store`/`exec_q`
/// directly; everything else reaches in through a [`ReactorProxy`].
pub struct Reactor {
    index: usize,
    actors: Vec<Option<ActorSlot>>,
    actors_free: Vec<usize>,
    handlers: Vec<Option<HandlerSlot>>,
    handlers_free: Vec<usize>,
    time_store: TimeStore<TimerEntry>,
    exec_q: VecDeque<ExecStub>,
    poll: Poll,
    shared: Arc<Shared>,
    stopping: bool,
}

impl Reactor {
    pub fn new(index: usize) -> Result<(Reactor, ReactorProxy)> {
        let poll = Poll::new()?;
        let waker = Waker::new(poll.registry(), WAKE_TOKEN)?;
        let shared = Arc::new(Shared {
            push: Mutex::new(Vec::new()),
            raise: Mutex::new(Vec::new()),
            closures: Mutex::new(Vec::new()),
            stops: Mutex::new(Vec::new()),
            waker,
            stop_requested: std::sync::atomic::AtomicBool::new(false),
            unregister_hook: Mutex::new(None),
        });
        let reactor = Reactor {
            index,
            actors: Vec::new(),
            actors_free: Vec::new(),
            handlers: Vec::new(),
            handlers_free: Vec::new(),
            time_store: TimeStore::new(),
            exec_q: VecDeque::new(),
            poll,
            shared: shared.clone(),
            stopping: false,
        };
        let proxy = ReactorProxy { index, shared };
        Ok((reactor, proxy))
    }

    pub fn index(&self) -> usize { self.index }

    /// number of actors currently resident plus pending exec work, used by
    /// the scheduler's least-loaded placement (spec §4.4).
    pub fn load(&self) -> usize {
        (self.actors.len() - self.actors_free.len()) + self.exec_q.len()
    }

    fn reserve_actor_slot(&mut self) -> (usize, u32) {
        if let Some(i) = self.actors_free.pop() {
            let unique = self.actors[i].as_ref().map(|s| s.unique).unwrap_or(0);
            (i, unique)
        } else {
            self.actors.push(None);
            (self.actors.len() - 1, 0)
        }
    }

    fn reserve_handler_slot(&mut self) -> (usize, u32) {
        if let Some(i) = self.handlers_free.pop() {
            (i, self.handlers[i].as_ref().map(|s| s.unique).unwrap_or(0))
        } else {
            self.handlers.push(None);
            (self.handlers.len() - 1, 0)
        }
    }

    /// register a completion handler owned by `owning_actor`; returns the handler id.
    /// the handler is initialized (receives [`Event::Init`]) on the next tick.
    pub fn register_handler(&mut self, owning_actor: UniqueId, handler: Box<dyn CompletionHandler>) -> UniqueId {
        let (idx, unique) = self.reserve_handler_slot();
        self.handlers[idx] = Some(HandlerSlot { unique, owning_actor, handler: Some(handler) });
        if let Some(Some(slot)) = self.actors.get_mut(owning_actor.index as usize) {
            slot.handler_ids.push(UniqueId::new(idx as u64, unique));
        }
        let hid = UniqueId::new(idx as u64, unique);
        self.exec_q.push_back(ExecStub::Event { actor: owning_actor, target: ExecTarget::Handler(hid), event: Event::Init });
        hid
    }

    pub fn unregister_handler(&mut self, hid: UniqueId) {
        if let Some(slot) = self.handlers.get(hid.index as usize).and_then(|s| s.as_ref()) {
            if slot.unique == hid.unique {
                self.exec_q.push_back(ExecStub::Event { actor: slot.owning_actor, target: ExecTarget::Handler(hid), event: Event::Clear });
            }
        }
    }

    /// spec §4.5 step 1: `min(time_store.min_expiry - now, bound); 0 if exec_q non-empty`.
    fn compute_wait(&mut self) -> Option<Duration> {
        if !self.exec_q.is_empty() { return Some(Duration::ZERO); }
        match self.time_store.min_expiry() {
            Some(expiry) => {
                let now = Instant::now();
                Some(expiry.saturating_duration_since(now))
            }
            None => Some(Duration::from_secs(1)), // bound: periodically re-check stop_requested/external buffers
        }
    }

    fn free_handler(&mut self, idx: usize) {
        if let Some(slot) = self.handlers.get_mut(idx) {
            if let Some(mut s) = slot.take() {
                s.unique = s.unique.wrapping_add(1);
                self.handlers[idx] = Some(HandlerSlot { unique: s.unique, owning_actor: s.owning_actor, handler: None });
                self.handlers_free.push(idx);
            }
        }
    }

    /// frees the reactor slot and reports `service_id` back to the
    /// registry hook, if one is installed, so `Service::lookup` stops
    /// resolving to it (spec §3, §4.6).
    fn free_actor(&mut self, idx: usize) {
        if let Some(slot) = self.actors.get_mut(idx) {
            if let Some(mut s) = slot.take() {
                s.unique = s.unique.wrapping_add(1);
                let service_id = s.service_id;
                self.actors[idx] = Some(ActorSlot { unique: s.unique, service_id, handler_ids: Vec::new(), actor: None });
                self.actors_free.push(idx);
                if let Ok(guard) = self.shared.unregister_hook.lock() {
                    if let Some(hook) = guard.as_ref() {
                        hook(service_id);
                    }
                }
            }
        }
    }

    /// drive this reactor until asked to stop and drained. Blocks the calling thread.
    pub fn run(&mut self) -> Result<()> {
        let mut events = Events::with_capacity(1024);
        loop {
            let wait = self.compute_wait();
            trace!("reactor {} poll wait {:?}", self.index, wait);
            if let Err(e) = self.poll.poll(&mut events, wait) {
                if e.kind() != std::io::ErrorKind::Interrupted { return Err(e.into()); }
            }

            let now = Instant::now();

            // 1. external pushes (new actors)
            let pushed: Vec<PendingActor> = {
                let mut g = self.shared.push.lock().map_err(|_| poisoned_lock("push"))?;
                std::mem::take(&mut *g)
            };
            for p in pushed {
                let (idx, unique) = self.reserve_actor_slot();
                let actor_uid = UniqueId::new(idx as u64, unique);
                self.actors[idx] = Some(ActorSlot { unique, service_id: p.service_id, handler_ids: Vec::new(), actor: Some(p.actor) });
                let run_id = RunId { reactor_index: self.index, slot: actor_uid };
                let _ = p.reply.send(run_id);
                self.exec_q.push_back(ExecStub::Event { actor: actor_uid, target: ExecTarget::Actor, event: Event::Init });
            }

            // 2. external raises, filtered by stale unique at dispatch time
            let raised: Vec<RaiseItem> = {
                let mut g = self.shared.raise.lock().map_err(|_| poisoned_lock("raise"))?;
                std::mem::take(&mut *g)
            };
            for r in raised {
                self.exec_q.push_back(ExecStub::Event { actor: r.actor, target: ExecTarget::Actor, event: r.event });
            }

            let closures: Vec<(UniqueId, PostedClosure)> = {
                let mut g = self.shared.closures.lock().map_err(|_| poisoned_lock("closures"))?;
                std::mem::take(&mut *g)
            };
            for (actor, closure) in closures {
                self.exec_q.push_back(ExecStub::Closure { actor, closure });
            }

            let stops: Vec<UniqueId> = {
                let mut g = self.shared.stops.lock().map_err(|_| poisoned_lock("stops"))?;
                std::mem::take(&mut *g)
            };
            for actor in stops {
                self.exec_q.push_back(ExecStub::StopRepost { actor });
            }

            // 3. expired timers
            let mut expired = Vec::new();
            self.time_store.pop_expired(now, |entry, _, store_index| expired.push((entry, store_index)));
            for (entry, store_index) in expired {
                let target = entry.handler.map(ExecTarget::Handler).unwrap_or(ExecTarget::Actor);
                self.exec_q.push_back(ExecStub::Event { actor: entry.actor, target, event: Event::Timer { store_index } });
            }

            // 4. IO readiness from the OS poll
            for ev in events.iter() {
                if ev.token() == WAKE_TOKEN { continue; }
                if let Some((actor, hid)) = self.handler_for_token(ev.token()) {
                    let readiness = IoReadiness { readable: ev.is_readable(), writable: ev.is_writable(), error: ev.is_error() };
                    self.exec_q.push_back(ExecStub::Event { actor, target: ExecTarget::Handler(hid), event: Event::IoReady(readiness) });
                }
            }

            // 5. drain exec queue; closures/events may enqueue more, processed this same tick, never recursively
            while let Some(stub) = self.exec_q.pop_front() {
                self.dispatch(stub, now);
            }

            if self.shared.stop_requested.load(std::sync::atomic::Ordering::SeqCst) {
                self.stopping = true;
            }
            if self.stopping && self.actors.len() == self.actors_free.len() && self.exec_q.is_empty() {
                debug!("reactor {} drained, exiting", self.index);
                return Ok(());
            }
        }
    }

    /// token-to-handler mapping: mio tokens are the handler's slot index so
    /// lookup is O(1) without a side table.
    fn handler_for_token(&self, token: Token) -> Option<(UniqueId, UniqueId)> {
        let idx = token.0;
        let slot = self.handlers.get(idx)?.as_ref()?;
        Some((slot.owning_actor, UniqueId::new(idx as u64, slot.unique)))
    }

    /// validate `actor.unique` (and, for handler-scoped stubs, `handler.unique`)
    /// before invoking; mismatches are silently dropped (spec §4.5 step 6, §8).
    fn dispatch(&mut self, stub: ExecStub, now: Instant) {
        let actor_idx = stub.actor_uid().index as usize;
        let actor_unique = match self.actors.get(actor_idx).and_then(|s| s.as_ref()) {
            Some(s) => s.unique,
            None => return,
        };
        if actor_unique != stub.actor_uid().unique { return; }

        match stub {
            ExecStub::Closure { closure, .. } => {
                let ctx = ReactorContext { time_store: &mut self.time_store, exec_q: &mut self.exec_q, registry: self.poll.registry(), now };
                closure(&ctx);
            }
            ExecStub::Event { actor, target: ExecTarget::Actor, event } => {
                self.dispatch_to_actor(actor, event, now);
            }
            ExecStub::Event { target: ExecTarget::Handler(hid), event, .. } => {
                self.dispatch_to_handler(hid, event, now);
            }
            ExecStub::StopRepost { actor } => {
                if let Some(slot) = self.actors.get(actor_idx).and_then(|s| s.as_ref()) {
                    for &hid in &slot.handler_ids {
                        self.exec_q.push_back(ExecStub::Event { actor, target: ExecTarget::Handler(hid), event: Event::Clear });
                    }
                }
                self.exec_q.push_back(ExecStub::StopFinal { actor });
            }
            ExecStub::StopFinal { actor } => {
                self.free_actor(actor_idx);
                let _ = actor;
            }
        }
    }

    fn dispatch_to_actor(&mut self, actor: UniqueId, event: Event, now: Instant) {
        let idx = actor.index as usize;
        let Some(mut inner) = self.actors.get_mut(idx).and_then(|s| s.as_mut()).and_then(|s| s.actor.take()) else { return };
        {
            let mut reactor_ctx = ReactorContext { time_store: &mut self.time_store, exec_q: &mut self.exec_q, registry: self.poll.registry(), now };
            let mut ctx = ActorContext { actor_id: actor, run_id: RunId { reactor_index: self.index, slot: actor }, reactor: &mut reactor_ctx };
            inner.on_event(&mut ctx, event);
        }
        if let Some(Some(slot)) = self.actors.get_mut(idx) {
            slot.actor = Some(inner);
        }
    }

    fn dispatch_to_handler(&mut self, hid: UniqueId, event: Event, now: Instant) {
        let idx = hid.index as usize;
        let current_unique = match self.handlers.get(idx).and_then(|s| s.as_ref()) {
            Some(s) => s.unique,
            None => return,
        };
        if current_unique != hid.unique { return; } // stale event, handler slot was reused

        let Some(mut inner) = self.handlers.get_mut(idx).and_then(|s| s.as_mut()).and_then(|s| s.handler.take()) else { return };
        {
            let mut ctx = ReactorContext { time_store: &mut self.time_store, exec_q: &mut self.exec_q, registry: self.poll.registry(), now };
            inner.handle_completion(&mut ctx, hid, &event);
        }
        if matches!(event, Event::Clear) {
            self.free_handler(idx);
        } else if let Some(Some(slot)) = self.handlers.get_mut(idx) {
            slot.handler = Some(inner);
        }
    }
}
