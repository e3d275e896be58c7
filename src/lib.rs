/*
 * Copyright (c) 2024, United States Government, as represented by the
 * Administrator of the National Aeronautics and Space Administration.
 * All rights reserved.
 *
 * The ODIN - Open Data Integration Framework is licensed under the
 * Apache License, Version 2.0 (the "License"); you may not use this file
 * except in compliance with the License. You may obtain a copy of the
 * License at http://www.apache.org/licenses/LICENSE-2.0.
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! SolidFrame's reactor core and multiplexed RPC transport.
//!
//! A fixed pool of single-threaded [`reactor::Reactor`]s drives completion
//! handlers (sockets, timers) belonging to [`actor::Actor`]s. The
//! [`scheduler::Scheduler`] places new actors onto reactors; the
//! [`service::Service`] is the process-wide, stable-id routing domain that the
//! `mprpc` module builds its multiplexed RPC transport on top of.

use std::time::Duration;

pub mod errors;
pub use errors::{Error, Result};

pub mod config;
pub use config::Config;

pub mod ids;
pub use ids::{UniqueId, ActorId, RunId};

pub mod time_store;
pub use time_store::TimeStore;

pub mod event;
pub use event::{Event, ExecStub, IoReadiness};

pub mod handler;
pub use handler::{CompletionHandler, HandlerId};

pub mod actor;
pub use actor::{Actor, ActorContext, ActorRef};

pub mod reactor;
pub use reactor::{Reactor, ReactorProxy, ReactorContext, UnregisterHook};

pub mod scheduler;
pub use scheduler::Scheduler;

pub mod service;
pub use service::Service;

pub mod mprpc;

#[inline] pub fn days(n: u64) -> Duration { Duration::from_secs(n * 60 * 60 * 24) }
#[inline] pub fn hours(n: u64) -> Duration { Duration::from_secs(n * 60 * 60) }
#[inline] pub fn minutes(n: u64) -> Duration { Duration::from_secs(n * 60) }
#[inline] pub fn secs(n: u64) -> Duration { Duration::from_secs(n) }
#[inline] pub fn millis(n: u64) -> Duration { Duration::from_millis(n) }
#[inline] pub fn micros(n: u64) -> Duration { Duration::from_micros(n) }
#[inline] pub fn nanos(n: u64) -> Duration { Duration::from_nanos(n) }

/*
 * we intercept logging/tracing macros here to have a central place where we can remove/replace them
 */

#[macro_export]
macro_rules! trace {
    ( $( $id:ident = $e:expr ),* ) => { tracing::trace!( $( $id = $e ),* ) };
    ( $( $e: expr ),* ) => { tracing::trace!( $( $e ),* ) }
}

#[macro_export]
macro_rules! debug {
    ( $( $id:ident = $e:expr ),* ) => { tracing::debug!( $( $id = $e ),* ) };
    ( $( $e: expr ),* ) => { tracing::debug!( $( $e ),* ) }
}

#[macro_export]
macro_rules! info {
    ( $( $id:ident = $e:expr ),* ) => { tracing::info!( $( $id = $e ),* ) };
    ( $( $e: expr ),* ) => { tracing::info!( $( $e ),* ) }
}

#[macro_export]
macro_rules! warn {
    ( $( $id:ident = $e:expr ),* ) => { tracing::warn!( $( $id = $e ),* ) };
    ( $( $e: expr ),* ) => { tracing::warn!( $( $e ),* ) }
}

#[macro_export]
macro_rules! error {
    ( $( $id:ident = $e:expr ),* ) => { tracing::error!( $( $id = $e ),* ) };
    ( $( $e: expr ),* ) => { tracing::error!( $( $e ),* ) }
}
