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

//! Routing Information Base (RIB) module
//!
//! - Adj-RIB-In: per-peer table of routes received from that peer (owned by
//!   the peer, feeds the Loc-RIB)
//! - Loc-RIB: best paths across all peers; runs as its own task and is the
//!   only cross-peer shared resource
//! - Adj-RIB-Out: per-peer table of routes advertised toward that peer,
//!   fed by Loc-RIB best-path deltas

pub mod rib_in;
pub mod rib_loc;
pub mod rib_out;

pub use rib_in::AdjRibIn;
pub use rib_loc::{LocRib, LocRibHandle, RibSignal, RibSubscription};
pub use rib_out::AdjRibOut;

use crate::bgp::msg_update::{Origin, UpdateMessage};
use crate::bgp::utils::Ipv4Net;
use std::net::Ipv4Addr;

#[derive(Debug, Clone, PartialEq)]
pub struct RouteAttrs {
    pub origin: Origin,
    pub as_path: Vec<u16>,
    pub next_hop: Ipv4Addr,
    pub med: Option<u32>,
    pub local_pref: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub prefix: Ipv4Net,
    pub attrs: RouteAttrs,
    /// Peer the route was learned from.
    pub learned_from: Ipv4Addr,
}

/// One UPDATE message converted to the RIB representation.
#[derive(Debug, Clone, PartialEq)]
pub struct RibUpdate {
    pub withdrawn: Vec<Ipv4Net>,
    pub announced: Vec<Route>,
}

impl RibUpdate {
    pub fn from_update(update: &UpdateMessage, learned_from: Ipv4Addr) -> Self {
        let announced = match (update.next_hop(), update.nlri.is_empty()) {
            (Some(next_hop), false) => {
                let attrs = RouteAttrs {
                    origin: update.origin().unwrap_or(Origin::Incomplete),
                    as_path: update.as_path(),
                    next_hop,
                    med: update.med(),
                    local_pref: update.local_pref(),
                };
                update
                    .nlri
                    .iter()
                    .map(|prefix| Route {
                        prefix: *prefix,
                        attrs: attrs.clone(),
                        learned_from,
                    })
                    .collect()
            }
            _ => Vec::new(),
        };

        RibUpdate {
            withdrawn: update.withdrawn_routes.clone(),
            announced,
        }
    }
}

/// Best-path changes fanned out from the Loc-RIB to Adj-RIB-Out
/// subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct RibDelta {
    pub withdrawn: Vec<Ipv4Net>,
    pub announced: Vec<Route>,
}
