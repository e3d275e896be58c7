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

//! Process-wide registry mapping stable [`ActorId`]s to actor slots. This is
//! the routing domain the `mprpc` module addresses connections' owning
//! actors through.

use std::sync::{Arc, Mutex, Weak};

use crate::actor::{Actor, ActorRef};
use crate::errors::{poisoned_lock, Result};
use crate::ids::{ActorId, RunId};
use crate::reactor::ReactorProxy;
use crate::scheduler::Scheduler;

struct Entry {
    unique: u32,
    run_id: RunId,
    lock: Arc<Mutex<()>>,
}

struct Inner {
    entries: Vec<Option<Entry>>,
    free: Vec<usize>,
}

pub struct Service {
    scheduler: Arc<Scheduler>,
    inner: Mutex<Inner>,
}

impl Service {
    /// wraps `scheduler` and wires every one of its reactors to call back
    /// into this service's registry when an actor finishes stopping (spec
    /// §3: "unregistered from Reactor then from Service, slot's `unique`
    /// incremented"). Returned as `Arc` because the reactors hold a `Weak`
    /// reference back, and only an `Arc<Service>` can be downgraded.
    pub fn new(scheduler: Arc<Scheduler>) -> Arc<Service> {
        let service = Arc::new(Service { scheduler, inner: Mutex::new(Inner { entries: Vec::new(), free: Vec::new() }) });
        for i in 0..service.scheduler.reactor_count() {
            let weak: Weak<Service> = Arc::downgrade(&service);
            service.scheduler.proxy(i).set_unregister_hook(Arc::new(move |actor_id| {
                if let Some(service) = weak.upgrade() {
                    let _ = service.unregister(actor_id);
                }
            }));
        }
        service
    }

    /// register `actor` with this service and schedule it onto a reactor in
    /// one call. The registration mutex is held across both steps -- the
    /// same short critical section the source uses to serialize slot
    /// visibility with the reactor's first dispatch (spec §4.6).
    pub fn spawn(&self, actor: Box<dyn Actor>) -> Result<ActorRef> {
        let mut guard = self.inner.lock().map_err(|_| poisoned_lock("service registry"))?;
        let (index, unique) = match guard.free.pop() {
            Some(i) => (i, guard.entries[i].as_ref().map(|e| e.unique).unwrap_or(0)),
            None => { guard.entries.push(None); (guard.entries.len() - 1, 0) }
        };
        let actor_id = ActorId::new(index as u64, unique);
        let run_id = self.scheduler.schedule(actor_id, actor)?;
        guard.entries[index] = Some(Entry { unique, run_id, lock: Arc::new(Mutex::new(())) });
        drop(guard);
        let proxy = self.scheduler.proxy(run_id.reactor_index).clone();
        Ok(ActorRef::new(actor_id, run_id, proxy))
    }

    /// releases the registry slot, bumping its `unique` so any `RunId` still
    /// held by a stale caller fails the next `lookup`. Invoked through the
    /// hook `Service::new` installs on every reactor; not meant to be called
    /// directly by user code, which owns teardown timing through `ActorRef::stop`.
    pub fn unregister(&self, actor_id: ActorId) -> Result<()> {
        let mut guard = self.inner.lock().map_err(|_| poisoned_lock("service registry"))?;
        if let Some(idx) = Some(actor_id.index as usize).filter(|&i| i < guard.entries.len()) {
            if let Some(entry) = guard.entries[idx].as_mut() {
                if entry.unique == actor_id.unique {
                    entry.unique = entry.unique.wrapping_add(1);
                    guard.free.push(idx);
                }
            }
        }
        Ok(())
    }

    pub fn lookup(&self, actor_id: ActorId) -> Result<Option<RunId>> {
        let guard = self.inner.lock().map_err(|_| poisoned_lock("service registry"))?;
        Ok(guard.entries.get(actor_id.index as usize)
            .and_then(|e| e.as_ref())
            .filter(|e| e.unique == actor_id.unique)
            .map(|e| e.run_id))
    }

    /// per-actor lock used by the RPC layer for pool-level coordination (spec §4.6).
    pub fn actor_mutex(&self, actor_id: ActorId) -> Result<Arc<Mutex<()>>> {
        let guard = self.inner.lock().map_err(|_| poisoned_lock("service registry"))?;
        guard.entries.get(actor_id.index as usize)
            .and_then(|e| e.as_ref())
            .filter(|e| e.unique == actor_id.unique)
            .map(|e| e.lock.clone())
            .ok_or_else(|| crate::errors::op_failed("no such actor"))
    }

    pub fn reactor_proxy(&self, reactor_index: usize) -> ReactorProxy {
        self.scheduler.proxy(reactor_index).clone()
    }
}
