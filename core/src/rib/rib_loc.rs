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
use crate::rib::{RibDelta, RibUpdate, Route};
use crate::{debug, info};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use tokio::sync::{mpsc, oneshot};

/// Signals accepted by the Loc-RIB task. All callers go through
/// `LocRibHandle::handle_signal`, which serializes them on one channel.
pub enum RibSignal {
    /// Routes learned from a peer changed.
    Update(RibUpdate, Ipv4Addr),
    /// A peer session went down; flush its routes.
    PeerDown(Ipv4Addr),
    /// Attach an Adj-RIB-Out to best-path change broadcasts.
    Subscribe(RibSubscription),
    Unsubscribe(Ipv4Addr),
    GetRoutes(oneshot::Sender<Vec<Route>>),
}

pub struct RibSubscription {
    pub remote_id: Ipv4Addr,
    pub tx: mpsc::UnboundedSender<RibDelta>,
}

#[derive(Clone)]
pub struct LocRibHandle {
    tx: mpsc::UnboundedSender<RibSignal>,
}

impl LocRibHandle {
    pub fn handle_signal(&self, signal: RibSignal) {
        // The Loc-RIB task lives for the whole process; a send failure only
        // happens during shutdown and is safe to ignore.
        let _ = self.tx.send(signal);
    }

    /// Snapshot of the current best paths.
    pub async fn routes(&self) -> Vec<Route> {
        let (tx, rx) = oneshot::channel();
        self.handle_signal(RibSignal::GetRoutes(tx));
        rx.await.unwrap_or_default()
    }
}

/// Loc-RIB: the local speaker's selected routes. Keeps every candidate
/// path per prefix and broadcasts best-path changes to subscribers.
pub struct LocRib {
    // Candidate paths per prefix, at most one per peer
    candidates: HashMap<Ipv4Net, Vec<Route>>,
    subscribers: Vec<RibSubscription>,
}

impl LocRib {
    /// Spawn the Loc-RIB task and return its handle.
    pub fn spawn() -> LocRibHandle {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut rib = LocRib {
            candidates: HashMap::new(),
            subscribers: Vec::new(),
        };
        tokio::spawn(async move {
            while let Some(signal) = rx.recv().await {
                rib.handle(signal);
            }
        });
        LocRibHandle { tx }
    }

    fn handle(&mut self, signal: RibSignal) {
        match signal {
            RibSignal::Update(update, remote_id) => self.apply_update(update, remote_id),
            RibSignal::PeerDown(remote_id) => self.flush_peer(remote_id),
            RibSignal::Subscribe(subscription) => {
                debug!("rib-out subscribed", "peer_ip" => subscription.remote_id.to_string());
                // Bring the new subscriber up to date with current best paths
                let announced = self.best_routes();
                if !announced.is_empty() {
                    let _ = subscription.tx.send(RibDelta {
                        withdrawn: vec![],
                        announced,
                    });
                }
                self.subscribers
                    .retain(|s| s.remote_id != subscription.remote_id);
                self.subscribers.push(subscription);
            }
            RibSignal::Unsubscribe(remote_id) => {
                debug!("rib-out unsubscribed", "peer_ip" => remote_id.to_string());
                self.subscribers.retain(|s| s.remote_id != remote_id);
            }
            RibSignal::GetRoutes(reply) => {
                let _ = reply.send(self.best_routes());
            }
        }
    }

    /// Preference order: shortest AS_PATH, then lowest peer address.
    fn better(a: &Route, b: &Route) -> bool {
        (a.attrs.as_path.len(), a.learned_from) < (b.attrs.as_path.len(), b.learned_from)
    }

    fn best(&self, prefix: &Ipv4Net) -> Option<&Route> {
        self.candidates.get(prefix).and_then(|paths| {
            paths.iter().reduce(|best, candidate| {
                if Self::better(candidate, best) {
                    candidate
                } else {
                    best
                }
            })
        })
    }

    fn best_routes(&self) -> Vec<Route> {
        let mut routes: Vec<Route> = self
            .candidates
            .keys()
            .filter_map(|prefix| self.best(prefix).cloned())
            .collect();
        routes.sort_by_key(|r| r.prefix);
        routes
    }

    fn apply_update(&mut self, update: RibUpdate, remote_id: Ipv4Addr) {
        let mut affected: Vec<Ipv4Net> = update.withdrawn.clone();
        for route in &update.announced {
            if !affected.contains(&route.prefix) {
                affected.push(route.prefix);
            }
        }
        let old_best: HashMap<Ipv4Net, Option<Route>> = affected
            .iter()
            .map(|p| (*p, self.best(p).cloned()))
            .collect();

        for prefix in &update.withdrawn {
            info!("route withdrawn", "prefix" => prefix.to_string(), "peer_ip" => remote_id.to_string());
            self.remove_candidate(*prefix, remote_id);
        }
        for route in update.announced {
            info!("route announced", "prefix" => route.prefix.to_string(), "peer_ip" => remote_id.to_string());
            let paths = self.candidates.entry(route.prefix).or_default();
            match paths.iter_mut().find(|r| r.learned_from == remote_id) {
                Some(existing) => *existing = route,
                None => paths.push(route),
            }
        }

        self.broadcast_changes(affected, old_best, Some(remote_id));
    }

    fn flush_peer(&mut self, remote_id: Ipv4Addr) {
        let affected: Vec<Ipv4Net> = self
            .candidates
            .iter()
            .filter(|(_, paths)| paths.iter().any(|r| r.learned_from == remote_id))
            .map(|(prefix, _)| *prefix)
            .collect();
        if affected.is_empty() {
            return;
        }
        info!("flushing peer routes", "peer_ip" => remote_id.to_string(), "prefixes" => affected.len());

        let old_best: HashMap<Ipv4Net, Option<Route>> = affected
            .iter()
            .map(|p| (*p, self.best(p).cloned()))
            .collect();
        for prefix in &affected {
            self.remove_candidate(*prefix, remote_id);
        }
        self.broadcast_changes(affected, old_best, Some(remote_id));
    }

    fn remove_candidate(&mut self, prefix: Ipv4Net, remote_id: Ipv4Addr) {
        if let Some(paths) = self.candidates.get_mut(&prefix) {
            paths.retain(|r| r.learned_from != remote_id);
            if paths.is_empty() {
                self.candidates.remove(&prefix);
            }
        }
    }

    /// Send the delta of best-path changes to every subscriber except the
    /// originating peer.
    fn broadcast_changes(
        &mut self,
        affected: Vec<Ipv4Net>,
        old_best: HashMap<Ipv4Net, Option<Route>>,
        origin: Option<Ipv4Addr>,
    ) {
        let mut withdrawn = Vec::new();
        let mut announced = Vec::new();
        for prefix in affected {
            let new_best = self.best(&prefix).cloned();
            if old_best.get(&prefix) == Some(&new_best) {
                continue;
            }
            match new_best {
                Some(route) => announced.push(route),
                None => withdrawn.push(prefix),
            }
        }
        if withdrawn.is_empty() && announced.is_empty() {
            return;
        }

        let delta = RibDelta {
            withdrawn,
            announced,
        };
        self.subscribers.retain(|subscriber| {
            if Some(subscriber.remote_id) == origin {
                return true;
            }
            // A closed receiver means the peer task is gone
            subscriber.tx.send(delta.clone()).is_ok()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rib::test_helpers::*;

    fn new_rib() -> LocRib {
        LocRib {
            candidates: HashMap::new(),
            subscribers: Vec::new(),
        }
    }

    fn peer(n: u8) -> Ipv4Addr {
        Ipv4Addr::new(n, n, n, n)
    }

    #[test]
    fn test_best_path_prefers_shortest_as_path() {
        let mut rib = new_rib();
        let p = prefix(10, 1, 0, 0, 16);

        rib.handle(RibSignal::Update(
            RibUpdate {
                withdrawn: vec![],
                announced: vec![route(p, vec![65001, 64512, 64513], peer(1))],
            },
            peer(1),
        ));
        rib.handle(RibSignal::Update(
            RibUpdate {
                withdrawn: vec![],
                announced: vec![route(p, vec![65002], peer(2))],
            },
            peer(2),
        ));

        let best = rib.best(&p).unwrap();
        assert_eq!(best.learned_from, peer(2));
    }

    #[test]
    fn test_best_path_tie_breaks_on_peer_address() {
        let mut rib = new_rib();
        let p = prefix(10, 1, 0, 0, 16);

        for n in [2u8, 1] {
            rib.handle(RibSignal::Update(
                RibUpdate {
                    withdrawn: vec![],
                    announced: vec![route(p, vec![65000], peer(n))],
                },
                peer(n),
            ));
        }

        assert_eq!(rib.best(&p).unwrap().learned_from, peer(1));
    }

    #[test]
    fn test_withdraw_falls_back_to_next_best() {
        let mut rib = new_rib();
        let p = prefix(10, 1, 0, 0, 16);

        rib.handle(RibSignal::Update(
            RibUpdate {
                withdrawn: vec![],
                announced: vec![route(p, vec![65001], peer(1))],
            },
            peer(1),
        ));
        rib.handle(RibSignal::Update(
            RibUpdate {
                withdrawn: vec![],
                announced: vec![route(p, vec![65002, 64512], peer(2))],
            },
            peer(2),
        ));
        rib.handle(RibSignal::Update(
            RibUpdate {
                withdrawn: vec![p],
                announced: vec![],
            },
            peer(1),
        ));

        assert_eq!(rib.best(&p).unwrap().learned_from, peer(2));
    }

    #[test]
    fn test_peer_down_flushes_routes() {
        let mut rib = new_rib();
        rib.handle(RibSignal::Update(
            RibUpdate {
                withdrawn: vec![],
                announced: vec![
                    route(prefix(10, 1, 0, 0, 16), vec![65001], peer(1)),
                    route(prefix(10, 2, 0, 0, 16), vec![65001], peer(1)),
                ],
            },
            peer(1),
        ));
        rib.handle(RibSignal::Update(
            RibUpdate {
                withdrawn: vec![],
                announced: vec![route(prefix(10, 2, 0, 0, 16), vec![65002], peer(2))],
            },
            peer(2),
        ));

        rib.handle(RibSignal::PeerDown(peer(1)));

        assert!(rib.best(&prefix(10, 1, 0, 0, 16)).is_none());
        assert_eq!(
            rib.best(&prefix(10, 2, 0, 0, 16)).unwrap().learned_from,
            peer(2)
        );
    }

    #[test]
    fn test_subscriber_receives_deltas_but_not_own_updates() {
        let mut rib = new_rib();
        let (tx, mut rx) = mpsc::unbounded_channel();
        rib.handle(RibSignal::Subscribe(RibSubscription {
            remote_id: peer(9),
            tx,
        }));

        // Update from another peer is broadcast
        rib.handle(RibSignal::Update(
            RibUpdate {
                withdrawn: vec![],
                announced: vec![route(prefix(10, 1, 0, 0, 16), vec![65001], peer(1))],
            },
            peer(1),
        ));
        let delta = rx.try_recv().unwrap();
        assert_eq!(delta.announced.len(), 1);

        // The subscriber's own updates are not echoed back
        rib.handle(RibSignal::Update(
            RibUpdate {
                withdrawn: vec![],
                announced: vec![route(prefix(10, 2, 0, 0, 16), vec![65009], peer(9))],
            },
            peer(9),
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_late_subscriber_gets_current_best_paths() {
        let mut rib = new_rib();
        rib.handle(RibSignal::Update(
            RibUpdate {
                withdrawn: vec![],
                announced: vec![route(prefix(10, 1, 0, 0, 16), vec![65001], peer(1))],
            },
            peer(1),
        ));

        let (tx, mut rx) = mpsc::unbounded_channel();
        rib.handle(RibSignal::Subscribe(RibSubscription {
            remote_id: peer(9),
            tx,
        }));

        let delta = rx.try_recv().unwrap();
        assert_eq!(delta.announced.len(), 1);
        assert!(delta.withdrawn.is_empty());
    }

    #[test]
    fn test_no_delta_when_best_unchanged() {
        let mut rib = new_rib();
        rib.handle(RibSignal::Update(
            RibUpdate {
                withdrawn: vec![],
                announced: vec![route(prefix(10, 1, 0, 0, 16), vec![65001], peer(1))],
            },
            peer(1),
        ));

        let (tx, mut rx) = mpsc::unbounded_channel();
        rib.handle(RibSignal::Subscribe(RibSubscription {
            remote_id: peer(9),
            tx,
        }));
        let _ = rx.try_recv().unwrap(); // catch-up delta

        // A longer path from another peer does not displace the best
        rib.handle(RibSignal::Update(
            RibUpdate {
                withdrawn: vec![],
                announced: vec![route(prefix(10, 1, 0, 0, 16), vec![65002, 64512], peer(2))],
            },
            peer(2),
        ));
        assert!(rx.try_recv().is_err());
    }
}
