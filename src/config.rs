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

//! Flat configuration table for the reactor pool and the MPRPC writer/pool,
//! loaded with `ron` the way the wider ODIN workspace loads its `*.ron` configs.

use serde::{Deserialize, Serialize};
use crate::errors::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStartState {
    /// no sends proceed through the connection, even pool-routed ones, until it becomes Active
    Passive,
    Active,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// max slots simultaneously in a writer's `write` list
    pub max_message_count_multiplex: usize,

    /// additional slots reserved for messages awaiting response
    pub max_message_count_response_wait: usize,

    /// fairness quantum: packets a single message may claim before yielding to siblings
    pub max_message_continuous_packet_count: u32,

    /// low-water mark for packet payload before a `write()` call stops emitting fragments
    pub min_free_packet_data_size: usize,

    /// KeepAlive cadence, measured in idle write-call ticks
    pub connection_inactivity_keepalive_count: u32,

    /// initial relay buffer permits handed to a fresh relay hop
    pub relay_free_count_initial: u32,

    /// connections per recipient pool
    pub pool_max_active_connection_count: usize,

    /// pending-connect cap per pool
    pub pool_max_pending_connection_count: usize,

    /// whether newly-established connections may send immediately
    pub connection_start_state: ConnectionStartState,

    /// number of reactor threads the scheduler starts
    pub reactor_count: usize,

    /// default packet payload capacity
    pub packet_data_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_message_count_multiplex: 64,
            max_message_count_response_wait: 64,
            max_message_continuous_packet_count: 4,
            min_free_packet_data_size: 256,
            connection_inactivity_keepalive_count: 30,
            relay_free_count_initial: 4,
            pool_max_active_connection_count: 1,
            pool_max_pending_connection_count: 1,
            connection_start_state: ConnectionStartState::Active,
            reactor_count: 1,
            packet_data_size: 4096,
        }
    }
}

impl Config {
    pub fn from_ron_str(s: &str) -> Result<Config> {
        ron::de::from_str(s).map_err(|e| Error::ConfigParseError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_ron() {
        let cfg = Config::default();
        let s = ron::ser::to_string(&cfg).unwrap();
        let back = Config::from_ron_str(&s).unwrap();
        assert_eq!(back.max_message_count_multiplex, cfg.max_message_count_multiplex);
        assert_eq!(back.connection_start_state, cfg.connection_start_state);
    }

    #[test]
    fn partial_ron_uses_defaults_for_missing_fields() {
        let cfg = Config::from_ron_str("(max_message_count_multiplex: 8)").unwrap();
        assert_eq!(cfg.max_message_count_multiplex, 8);
        assert_eq!(cfg.pool_max_active_connection_count, Config::default().pool_max_active_connection_count);
    }
}
