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
use crate::rib::rib_loc::{LocRibHandle, RibSignal};
use crate::rib::{RibUpdate, Route};
use std::collections::HashMap;
use std::net::Ipv4Addr;

/// Adj-RIB-In: routes received from one specific peer, before best-path
/// selection. Each applied update is forwarded to the Loc-RIB.
pub struct AdjRibIn {
    remote_id: Ipv4Addr,
    routes: HashMap<Ipv4Net, Route>,
    loc_rib: LocRibHandle,
}

impl AdjRibIn {
    pub fn new(remote_id: Ipv4Addr, loc_rib: LocRibHandle) -> Self {
        AdjRibIn {
            remote_id,
            routes: HashMap::new(),
            loc_rib,
        }
    }

    /// Apply one converted UPDATE to this table and forward it to the
    /// Loc-RIB for best-path selection.
    pub fn handle_update(&mut self, update: RibUpdate) {
        for prefix in &update.withdrawn {
            self.routes.remove(prefix);
        }
        for route in &update.announced {
            self.routes.insert(route.prefix, route.clone());
        }
        self.loc_rib
            .handle_signal(RibSignal::Update(update, self.remote_id));
    }

    pub fn routes(&self) -> Vec<Route> {
        self.routes.values().cloned().collect()
    }

    pub fn prefix_count(&self) -> usize {
        self.routes.len()
    }
}
