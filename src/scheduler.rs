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

//! Round-robin/least-loaded placement of new actors onto a fixed pool of
//! reactor threads; lifecycle of that reactor pool.

use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use crate::actor::Actor;
use crate::errors::{op_failed, Result};
use crate::ids::{ActorId, RunId};
use crate::reactor::{Reactor, ReactorProxy};
use crate::debug;

pub struct Scheduler {
    proxies: Vec<ReactorProxy>,
    threads: Vec<JoinHandle<Result<()>>>,
}

impl Scheduler {
    /// spawn `n` reactor threads, one OS thread running one [`Reactor::run`] each.
    pub fn start(n: usize) -> Result<Scheduler> {
        let mut proxies = Vec::with_capacity(n);
        let mut threads = Vec::with_capacity(n);
        for i in 0..n {
            let (mut reactor, proxy) = Reactor::new(i)?;
            let handle = thread::Builder::new()
                .name(format!("reactor-{i}"))
                .spawn(move || reactor.run())?;
            proxies.push(proxy);
            threads.push(handle);
        }
        Ok(Scheduler { proxies, threads })
    }

    pub fn reactor_count(&self) -> usize { self.proxies.len() }

    pub fn proxy(&self, index: usize) -> &ReactorProxy { &self.proxies[index] }

    /// picks the reactor with `load = actors + pending_exec` lowest, pushes
    /// the actor onto it, and blocks until it reports back the `RunId` it was
    /// installed under (spec §4.4).
    pub fn schedule(&self, service_id: ActorId, actor: Box<dyn Actor>) -> Result<RunId> {
        let idx = self.least_loaded_index();
        let (tx, rx) = mpsc::channel();
        self.proxies[idx].schedule(service_id, actor, tx)?;
        rx.recv().map_err(|_| op_failed("reactor closed before installing actor"))
    }

    fn least_loaded_index(&self) -> usize {
        self.proxies
            .iter()
            .enumerate()
            .min_by_key(|(_, p)| p.load_hint())
            .map(|(i, _)| i)
            .unwrap_or(0)
    }

    /// ask every reactor to stop; each finishes draining events for its
    /// still-running actors before exiting, then we join the threads.
    pub fn stop(self) -> Result<()> {
        for p in &self.proxies {
            p.request_stop();
        }
        for (i, t) in self.threads.into_iter().enumerate() {
            match t.join() {
                Ok(res) => res?,
                Err(_) => debug!("reactor {} thread panicked", i),
            }
        }
        Ok(())
    }
}
