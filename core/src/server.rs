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

//! Speaker assembly and listener dispatch.
//!
//! The speaker owns one peer task per configured neighbor and the shared
//! Loc-RIB. The accept loop resolves each inbound connection's source
//! address against the neighbor table and forwards it to the matching
//! peer; unknown sources are closed immediately.

use crate::cli::Command;
use crate::config::SpeakerConfig;
use crate::peer::{Peer, PeerHandle};
use crate::rib::{LocRib, LocRibHandle};
use crate::{info, warn};
use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug)]
pub enum ServerError {
    BindError(io::Error),
    IoError(io::Error),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerError::BindError(e) => write!(f, "failed to bind listener: {}", e),
            ServerError::IoError(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for ServerError {}

pub struct Speaker {
    config: SpeakerConfig,
    peers: HashMap<Ipv4Addr, PeerHandle>,
    /// Join handles for the peer tasks, awaited on shutdown so every
    /// peer finishes its ManualStop teardown before the speaker returns.
    peer_tasks: Vec<JoinHandle<()>>,
    loc_rib: LocRibHandle,
}

impl Speaker {
    /// Build the Loc-RIB task and one peer task per configured neighbor.
    pub fn new(config: SpeakerConfig) -> Self {
        let loc_rib = LocRib::spawn();
        let mut peers = HashMap::new();
        let mut peer_tasks = Vec::new();
        for neighbor in &config.neighbors {
            let (handle, task) = Peer::spawn(&config, neighbor, loc_rib.clone());
            info!("configured neighbor",
                "peer_ip" => neighbor.remote_id.to_string(),
                "peer_port" => neighbor.remote_port);
            peers.insert(neighbor.remote_id, handle);
            peer_tasks.push(task);
        }
        Speaker {
            config,
            peers,
            peer_tasks,
            loc_rib,
        }
    }

    /// Cloneable handles to every peer task.
    pub fn peer_handles(&self) -> Vec<PeerHandle> {
        self.peers.values().cloned().collect()
    }

    pub fn loc_rib(&self) -> LocRibHandle {
        self.loc_rib.clone()
    }

    /// Bind the configured local port and serve until `exit`.
    pub async fn run(self, commands: mpsc::Receiver<Command>) -> Result<(), ServerError> {
        let listener = TcpListener::bind(("0.0.0.0", self.config.local_port))
            .await
            .map_err(ServerError::BindError)?;
        self.run_with_listener(listener, commands).await
    }

    /// Serve on an already-bound listener (tests bind port 0 themselves).
    pub async fn run_with_listener(
        mut self,
        listener: TcpListener,
        mut commands: mpsc::Receiver<Command>,
    ) -> Result<(), ServerError> {
        let local_port = listener.local_addr().map_err(ServerError::IoError)?.port();
        info!("speaker listening",
            "speaker" => &self.config.name,
            "local_id" => self.config.local_id.to_string(),
            "local_asn" => self.config.local_asn,
            "local_port" => local_port);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => self.dispatch_connection(stream, addr),
                        Err(error) => {
                            warn!("accept failed", "error" => error.to_string());
                        }
                    }
                }
                command = commands.recv() => {
                    match command {
                        Some(Command::Exit) | None => {
                            info!("speaker shutting down");
                            for peer in self.peers.values() {
                                peer.shutdown();
                            }
                            // Wait for every peer to finish its ManualStop
                            // teardown before letting the process exit
                            for task in self.peer_tasks.drain(..) {
                                let _ = task.await;
                            }
                            return Ok(());
                        }
                        Some(command) => self.handle_command(command).await,
                    }
                }
            }
        }
    }

    /// Route an accepted transport to the peer configured for its source
    /// address; close it if no such peer exists.
    fn dispatch_connection(&mut self, stream: TcpStream, addr: SocketAddr) {
        let source = match addr.ip() {
            IpAddr::V4(source) => source,
            IpAddr::V6(_) => {
                info!("rejecting non-IPv4 connection", "source" => addr.to_string());
                return;
            }
        };
        match self.peers.get(&source) {
            Some(peer) => {
                info!("inbound connection", "peer_ip" => source.to_string());
                peer.inbound(stream);
            }
            None => {
                info!("rejecting unknown peer", "source" => addr.to_string());
                drop(stream);
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start => {
                for peer in self.peers.values() {
                    peer.start();
                }
            }
            Command::Stop => {
                for peer in self.peers.values() {
                    peer.stop();
                }
            }
            Command::ShowFsm => self.show_fsm().await,
            Command::ShowDevice => self.show_device(),
            Command::ShowRib => self.show_rib(false).await,
            Command::ShowRibDetail => self.show_rib(true).await,
            // Exit terminates the serve loop before reaching here
            Command::Exit => {}
        }
    }

    async fn show_fsm(&self) {
        for peer in self.peers.values() {
            match peer.status().await {
                Some(status) => {
                    println!(
                        "neighbor {} state {} retries {} hold {}s keepalive {}s",
                        status.remote_id,
                        status.state,
                        status.conn_retry_counter,
                        status.hold_time_s,
                        status.keepalive_time_s,
                    );
                    let s = &status.statistics;
                    println!(
                        "  sent: open {} keepalive {} update {} notification {} dropped {}",
                        s.open_sent,
                        s.keepalive_sent,
                        s.update_sent,
                        s.notification_sent,
                        s.writes_dropped,
                    );
                    println!(
                        "  received: open {} keepalive {} update {} notification {}",
                        s.open_received,
                        s.keepalive_received,
                        s.update_received,
                        s.notification_received,
                    );
                }
                None => println!("neighbor {} unavailable", peer.remote_id),
            }
        }
    }

    fn show_device(&self) {
        println!(
            "speaker {} local_id {} asn {} port {}",
            self.config.name, self.config.local_id, self.config.local_asn, self.config.local_port,
        );
        for neighbor in &self.config.neighbors {
            println!(
                "  neighbor {} port {}",
                neighbor.remote_id, neighbor.remote_port
            );
        }
    }

    async fn show_rib(&self, detail: bool) {
        let routes = self.loc_rib.routes().await;
        if routes.is_empty() {
            println!("rib: empty");
            return;
        }
        for route in routes {
            if detail {
                println!(
                    "{} via {} from {} as_path {:?} origin {:?} med {:?} local_pref {:?}",
                    route.prefix,
                    route.attrs.next_hop,
                    route.learned_from,
                    route.attrs.as_path,
                    route.attrs.origin,
                    route.attrs.med,
                    route.attrs.local_pref,
                );
            } else {
                println!(
                    "{} via {} from {}",
                    route.prefix, route.attrs.next_hop, route.learned_from
                );
            }
        }
    }
}
