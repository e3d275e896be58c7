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

//! Leaf capability: a reactive resource (socket, timer) bound to exactly one
//! actor and registered with exactly one reactor.

use crate::event::Event;
use crate::ids::UniqueId;
use crate::reactor::ReactorContext;

pub type HandlerId = UniqueId;

/// `handle_completion` runs only on the reactor thread that owns this handler.
/// Between `Init` and `Clear` the handler may register/unregister readiness
/// interest, arm or disarm a timer, or post a closure back to its own actor --
/// all through `ctx`, never by storing a reference into the reactor itself.
pub trait CompletionHandler: Send {
    fn handle_completion(&mut self, ctx: &mut ReactorContext, id: HandlerId, event: &Event);
}

/// bookkeeping the reactor keeps per handler slot, independent of the
/// handler's own state.
pub(crate) struct HandlerSlot {
    pub unique: u32,
    pub owning_actor: UniqueId,
    pub handler: Option<Box<dyn CompletionHandler>>,
}
