// Copyright 2025 bgped Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::bgp::utils::Ipv4Net;
use crate::rib::{RibDelta, Route};
use std::collections::HashMap;
use std::net::Ipv4Addr;

/// Adj-RIB-Out: routes selected for advertisement toward one peer, kept in
/// sync with Loc-RIB best-path deltas. Routes learned from the peer itself
/// are never placed in its own out-table.
pub struct AdjRibOut {
    remote_id: Ipv4Addr,
    routes: HashMap<Ipv4Net, Route>,
}

impl AdjRibOut {
    pub fn new(remote_id: Ipv4Addr) -> Self {
        AdjRibOut {
            remote_id,
            routes: HashMap::new(),
        }
    }

    pub fn apply_delta(&mut self, delta: &RibDelta) {
        for prefix in &delta.withdrawn {
            self.routes.remove(prefix);
        }
        for route in &delta.announced {
            if route.learned_from == self.remote_id {
                continue;
            }
            self.routes.insert(route.prefix, route.clone());
        }
    }

    pub fn routes(&self) -> Vec<Route> {
        self.routes.values().cloned().collect()
    }

    pub fn prefix_count(&self) -> usize {
        self.routes.len()
    }
}
