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

//! Peer connection coordinator.
//!
//! One task per configured neighbor owns all of that peer's mutable state.
//! Every input (operator commands, inbound connections, connect
//! completions, flow reads, timer fires, RIB deltas) arrives as a
//! `PeerMsg` on one unbounded channel and is processed to completion
//! before the next, so FSM transitions and their actions are atomic with
//! respect to other events for this peer.
//!
//! Connect tasks and flow readers carry a generation token; a completion
//! whose token no longer matches the live slot is stale (the slot was
//! cleared before cancellation) and is dropped without touching the FSM.

mod executor;

use crate::bgp::msg::BgpMessage;
use crate::bgp::msg_notification::BgpError;
use crate::bgp::utils::ParserError;
use crate::config::{NeighborConfig, SpeakerConfig};
use crate::framed::{MessageReader, MessageWriter, ReadError};
use crate::fsm::{Event, Fsm, State};
use crate::rib::{AdjRibIn, AdjRibOut, LocRibHandle, RibDelta};
use crate::timer::{SessionTimer, TimerKind};
use crate::{debug, info, warn};
use std::io;
use std::net::Ipv4Addr;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Inputs to a peer task. Operator-facing entries are sent through
/// `PeerHandle`; the rest come from tasks the peer itself spawned.
pub enum PeerMsg {
    /// Operator start (FSM ManualStart).
    Start,
    /// Operator stop (FSM ManualStop).
    Stop,
    /// ManualStop, then terminate the peer task.
    Shutdown,
    Status(oneshot::Sender<PeerStatus>),
    /// Inbound connection accepted by the listener for this peer.
    Inbound(TcpStream),
    ConnectDone {
        token: u64,
        result: io::Result<TcpStream>,
    },
    FlowRead {
        token: u64,
        result: Result<BgpMessage, ReadError>,
    },
    TimerExpired {
        kind: TimerKind,
        generation: u64,
    },
    RibDelta(RibDelta),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnDirection {
    Inbound,
    Outbound,
}

/// Message counters, reported through `show fsm`.
#[derive(Debug, Clone, Default)]
pub struct PeerStatistics {
    pub open_sent: u64,
    pub keepalive_sent: u64,
    pub update_sent: u64,
    pub notification_sent: u64,
    pub open_received: u64,
    pub keepalive_received: u64,
    pub update_received: u64,
    pub notification_received: u64,
    /// Writes dropped because the flow was gone or the transport failed.
    pub writes_dropped: u64,
}

#[derive(Debug, Clone)]
pub struct PeerStatus {
    pub remote_id: Ipv4Addr,
    pub state: State,
    pub conn_retry_counter: u32,
    pub hold_time_s: u16,
    pub keepalive_time_s: u16,
    pub statistics: PeerStatistics,
}

/// A spawned helper task identified by its generation token.
struct TaskSlot {
    token: u64,
    handle: JoinHandle<()>,
}

/// Adj-RIB-Out plus the task forwarding Loc-RIB deltas into this peer's
/// channel.
struct OutRib {
    table: AdjRibOut,
    forwarder: JoinHandle<()>,
}

pub struct Peer {
    remote_id: Ipv4Addr,
    remote_port: u16,
    local_id: Ipv4Addr,
    local_asn: u32,
    fsm: Fsm,
    /// Write half of the established transport; the read half lives in
    /// the flow reader task.
    flow: Option<MessageWriter<OwnedWriteHalf>>,
    conn_retry_timer: Option<SessionTimer>,
    hold_timer: Option<SessionTimer>,
    keepalive_timer: Option<SessionTimer>,
    conn_starter: Option<TaskSlot>,
    flow_reader: Option<TaskSlot>,
    input_rib: Option<AdjRibIn>,
    output_rib: Option<OutRib>,
    loc_rib: LocRibHandle,
    statistics: PeerStatistics,
    conn_retry_generation: u64,
    hold_generation: u64,
    keepalive_generation: u64,
    next_token: u64,
    msg_tx: mpsc::UnboundedSender<PeerMsg>,
    msg_rx: mpsc::UnboundedReceiver<PeerMsg>,
}

/// Cloneable address of a peer task.
#[derive(Clone)]
pub struct PeerHandle {
    pub remote_id: Ipv4Addr,
    tx: mpsc::UnboundedSender<PeerMsg>,
}

impl PeerHandle {
    pub fn start(&self) {
        let _ = self.tx.send(PeerMsg::Start);
    }

    pub fn stop(&self) {
        let _ = self.tx.send(PeerMsg::Stop);
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(PeerMsg::Shutdown);
    }

    pub fn inbound(&self, stream: TcpStream) {
        let _ = self.tx.send(PeerMsg::Inbound(stream));
    }

    pub async fn status(&self) -> Option<PeerStatus> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(PeerMsg::Status(tx)).ok()?;
        rx.await.ok()
    }
}

impl Peer {
    pub fn new(
        speaker: &SpeakerConfig,
        neighbor: &NeighborConfig,
        loc_rib: LocRibHandle,
    ) -> (Peer, PeerHandle) {
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        let handle = PeerHandle {
            remote_id: neighbor.remote_id,
            tx: msg_tx.clone(),
        };
        let peer = Peer {
            remote_id: neighbor.remote_id,
            remote_port: neighbor.remote_port,
            local_id: speaker.local_id,
            local_asn: speaker.local_asn,
            fsm: Fsm::new(
                speaker.connect_retry_secs,
                speaker.hold_time_secs,
                speaker.keepalive_secs,
            ),
            flow: None,
            conn_retry_timer: None,
            hold_timer: None,
            keepalive_timer: None,
            conn_starter: None,
            flow_reader: None,
            input_rib: None,
            output_rib: None,
            loc_rib,
            statistics: PeerStatistics::default(),
            conn_retry_generation: 0,
            hold_generation: 0,
            keepalive_generation: 0,
            next_token: 0,
            msg_tx,
            msg_rx,
        };
        (peer, handle)
    }

    /// Spawn the peer task. The join handle must be awaited after
    /// `PeerHandle::shutdown` for the teardown to be guaranteed complete.
    pub fn spawn(
        speaker: &SpeakerConfig,
        neighbor: &NeighborConfig,
        loc_rib: LocRibHandle,
    ) -> (PeerHandle, JoinHandle<()>) {
        let (peer, handle) = Peer::new(speaker, neighbor, loc_rib);
        let task = tokio::spawn(peer.run());
        (handle, task)
    }

    /// Main peer loop: drain the channel until shutdown.
    pub async fn run(mut self) {
        debug!("peer task started", "peer_ip" => self.remote_id.to_string());
        while let Some(msg) = self.msg_rx.recv().await {
            if self.dispatch(msg).await {
                break;
            }
        }
        debug!("peer task stopped", "peer_ip" => self.remote_id.to_string());
    }

    /// Process one input. Returns true when the task should exit.
    async fn dispatch(&mut self, msg: PeerMsg) -> bool {
        match msg {
            PeerMsg::Start => {
                info!("ManualStart", "peer_ip" => self.remote_id.to_string());
                self.handle_event(Event::ManualStart).await;
            }
            PeerMsg::Stop => {
                info!("ManualStop", "peer_ip" => self.remote_id.to_string());
                self.handle_event(Event::ManualStop).await;
            }
            PeerMsg::Shutdown => {
                self.handle_event(Event::ManualStop).await;
                return true;
            }
            PeerMsg::Status(reply) => {
                let _ = reply.send(self.status());
            }
            PeerMsg::Inbound(stream) => {
                self.on_connection(stream, ConnDirection::Inbound).await;
            }
            PeerMsg::ConnectDone { token, result } => {
                self.on_connect_done(token, result).await;
            }
            PeerMsg::FlowRead { token, result } => {
                self.on_flow_read(token, result).await;
            }
            PeerMsg::TimerExpired { kind, generation } => {
                self.on_timer(kind, generation).await;
            }
            PeerMsg::RibDelta(delta) => {
                if let Some(out) = self.output_rib.as_mut() {
                    out.table.apply_delta(&delta);
                }
            }
        }
        false
    }

    /// Run one FSM step and execute its actions in emitted order.
    async fn handle_event(&mut self, event: Event) {
        let (next, actions) = self.fsm.handle(&event);
        if next.state != self.fsm.state {
            info!("state transition",
                "peer_ip" => self.remote_id.to_string(),
                "from" => self.fsm.state.to_string(),
                "to" => next.state.to_string(),
                "event" => event.label());
        }
        self.fsm = next;
        for action in actions {
            self.execute(action).await;
        }
    }

    /// Connection arbitration (RFC 4271 6.8): decide what to do with a
    /// fresh transport based on the FSM state at this moment.
    async fn on_connection(&mut self, stream: TcpStream, direction: ConnDirection) {
        match self.fsm.state() {
            State::Idle | State::Established => {
                debug!("closing unexpected connection",
                    "peer_ip" => self.remote_id.to_string(),
                    "state" => self.fsm.state().to_string());
                drop(stream);
            }
            State::Connect | State::Active => {
                self.install_flow(stream);
                self.handle_event(direction.confirm_event()).await;
            }
            State::OpenSent | State::OpenConfirmed => {
                // Tie-break: the speaker with the higher BGP identifier
                // keeps its own initiated connection.
                let keep_existing = match direction {
                    ConnDirection::Inbound => self.local_id > self.remote_id,
                    ConnDirection::Outbound => self.local_id < self.remote_id,
                };
                if keep_existing {
                    info!("collision: closing new connection",
                        "peer_ip" => self.remote_id.to_string(),
                        "direction" => direction.label());
                    drop(stream);
                    return;
                }

                info!("collision: replacing existing connection",
                    "peer_ip" => self.remote_id.to_string(),
                    "direction" => direction.label());
                self.handle_event(Event::OpenCollisionDump).await;
                // Resume as a connecting peer, retry bookkeeping intact,
                // before the replacement flow goes in.
                self.fsm = Fsm {
                    state: State::Connect,
                    ..self.fsm.clone()
                };
                self.install_flow(stream);
                self.handle_event(direction.confirm_event()).await;
            }
        }
    }

    async fn on_connect_done(&mut self, token: u64, result: io::Result<TcpStream>) {
        match self.conn_starter.as_ref() {
            Some(slot) if slot.token == token => {
                self.conn_starter = None;
            }
            _ => {
                debug!("stale connect completion", "peer_ip" => self.remote_id.to_string());
                return;
            }
        }
        match result {
            Ok(stream) => self.on_connection(stream, ConnDirection::Outbound).await,
            Err(error) => {
                debug!("outbound connect failed",
                    "peer_ip" => self.remote_id.to_string(),
                    "error" => error.to_string());
                self.handle_event(Event::TcpConnectionFail).await;
            }
        }
    }

    async fn on_flow_read(&mut self, token: u64, result: Result<BgpMessage, ReadError>) {
        if self.flow_reader.as_ref().map(|slot| slot.token) != Some(token) {
            debug!("stale flow read", "peer_ip" => self.remote_id.to_string());
            return;
        }
        match result {
            Ok(message) => {
                self.track_received(&message);
                let event = match message {
                    BgpMessage::Open(open) => Event::BgpOpen(open),
                    BgpMessage::KeepAlive(_) => Event::KeepaliveMsg,
                    BgpMessage::Update(update) => Event::UpdateMsg(update),
                    BgpMessage::Notification(notif) => Event::NotifMsg(notif.error().clone()),
                };
                self.handle_event(event).await;
            }
            Err(error) => {
                // The reader task terminates after surfacing an error
                self.flow_reader = None;
                debug!("flow read failed",
                    "peer_ip" => self.remote_id.to_string(),
                    "error" => error.to_string());
                let event = match &error {
                    ReadError::Parse(ParserError::BgpError { error, .. }) => match error {
                        BgpError::OpenMessageError(_) => Event::BgpOpenMsgErr,
                        _ => Event::BgpHeaderErr,
                    },
                    ReadError::Closed
                    | ReadError::Refused
                    | ReadError::Timeout
                    | ReadError::TransportOther(_) => Event::TcpConnectionFail,
                };
                self.handle_event(event).await;
            }
        }
    }

    async fn on_timer(&mut self, kind: TimerKind, generation: u64) {
        let current = match kind {
            TimerKind::ConnRetry => self.conn_retry_generation,
            TimerKind::Hold => self.hold_generation,
            TimerKind::Keepalive => self.keepalive_generation,
        };
        if generation != current {
            debug!("stale timer fire", "peer_ip" => self.remote_id.to_string());
            return;
        }
        // One-shot: the slot is spent
        *self.timer_slot(kind) = None;
        let event = match kind {
            TimerKind::ConnRetry => Event::ConnRetryTimerExpired,
            TimerKind::Hold => Event::HoldTimerExpired,
            TimerKind::Keepalive => Event::KeepaliveTimerExpired,
        };
        self.handle_event(event).await;
    }

    /// Install a new transport: tear down any previous flow, keep the
    /// write half, and run the read loop in its own task.
    fn install_flow(&mut self, stream: TcpStream) {
        if let Some(reader) = self.flow_reader.take() {
            reader.handle.abort();
        }
        self.flow = None;

        let (read_half, write_half) = stream.into_split();
        self.flow = Some(MessageWriter::new(write_half));

        self.next_token += 1;
        let token = self.next_token;
        let tx = self.msg_tx.clone();
        let handle = tokio::spawn(async move {
            let mut reader = MessageReader::new(read_half);
            loop {
                let result = reader.read().await;
                let failed = result.is_err();
                if tx.send(PeerMsg::FlowRead { token, result }).is_err() {
                    return;
                }
                if failed {
                    return;
                }
            }
        });
        self.flow_reader = Some(TaskSlot { token, handle });
    }

    fn track_received(&mut self, message: &BgpMessage) {
        match message {
            BgpMessage::Open(open) => {
                self.statistics.open_received += 1;
                info!("received OPEN",
                    "peer_ip" => self.remote_id.to_string(),
                    "asn" => open.asn,
                    "hold_time" => open.hold_time);
            }
            BgpMessage::Update(_) => {
                self.statistics.update_received += 1;
                debug!("received UPDATE", "peer_ip" => self.remote_id.to_string());
            }
            BgpMessage::KeepAlive(_) => {
                self.statistics.keepalive_received += 1;
                debug!("received KEEPALIVE", "peer_ip" => self.remote_id.to_string());
            }
            BgpMessage::Notification(notif) => {
                self.statistics.notification_received += 1;
                warn!("received NOTIFICATION",
                    "peer_ip" => self.remote_id.to_string(),
                    "error" => format!("{:?}", notif.error()));
            }
        }
    }

    fn timer_slot(&mut self, kind: TimerKind) -> &mut Option<SessionTimer> {
        match kind {
            TimerKind::ConnRetry => &mut self.conn_retry_timer,
            TimerKind::Hold => &mut self.hold_timer,
            TimerKind::Keepalive => &mut self.keepalive_timer,
        }
    }

    fn status(&self) -> PeerStatus {
        PeerStatus {
            remote_id: self.remote_id,
            state: self.fsm.state(),
            conn_retry_counter: self.fsm.conn_retry_counter,
            hold_time_s: self.fsm.hold_time_s,
            keepalive_time_s: self.fsm.keepalive_time_s,
            statistics: self.statistics.clone(),
        }
    }
}

impl ConnDirection {
    fn confirm_event(self) -> Event {
        match self {
            ConnDirection::Inbound => Event::TcpConnectionConfirmed,
            ConnDirection::Outbound => Event::TcpCrAcked,
        }
    }

    fn label(self) -> &'static str {
        match self {
            ConnDirection::Inbound => "inbound",
            ConnDirection::Outbound => "outbound",
        }
    }
}

#[cfg(test)]
pub(crate) mod test_helpers {
    use super::*;
    use crate::rib::LocRib;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    pub fn test_speaker(local_id: Ipv4Addr) -> SpeakerConfig {
        SpeakerConfig::new("test", local_id, 65002, 0)
    }

    pub fn test_neighbor(remote_id: Ipv4Addr) -> NeighborConfig {
        NeighborConfig {
            remote_id,
            remote_port: 179,
        }
    }

    /// A peer in a given state with a live loopback transport installed.
    /// The remote end of the transport is drained by a background task.
    pub async fn peer_with_flow(state: State, local_id: Ipv4Addr, remote_id: Ipv4Addr) -> Peer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = vec![0u8; 4096];
                while stream.read(&mut buf).await.is_ok_and(|n| n > 0) {}
            }
        });
        let stream = TcpStream::connect(addr).await.unwrap();

        let (mut peer, _handle) = Peer::new(
            &test_speaker(local_id),
            &test_neighbor(remote_id),
            LocRib::spawn(),
        );
        peer.install_flow(stream);
        peer.fsm = Fsm {
            state,
            ..peer.fsm.clone()
        };
        peer
    }
}
