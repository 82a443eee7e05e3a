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

//! Interprets FSM actions against the peer runtime.
//!
//! Actions from one transition execute sequentially, in emitted order; a
//! `Stop` followed by a `Start` on the same timer therefore always leaves
//! the new timer live. Write failures are logged and counted but never
//! fed back as FSM events; the subsequent read failure drives the FSM.

use super::{OutRib, Peer, PeerMsg, TaskSlot};
use crate::bgp::msg::BgpMessage;
use crate::bgp::msg_open::OpenMessage;
use crate::fsm::Action;
use crate::rib::{AdjRibIn, AdjRibOut, RibSignal, RibSubscription, RibUpdate};
use crate::timer::{SessionTimer, TimerKind};
use crate::{debug, warn};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

impl Peer {
    pub(super) async fn execute(&mut self, action: Action) {
        match action {
            Action::InitiateTcpConnection => self.initiate_connection(),
            Action::DropTcpConnection => self.drop_connection(),
            Action::SendOpenMsg => {
                let open = BgpMessage::Open(OpenMessage::new(
                    self.local_asn as u16,
                    self.fsm.hold_time_s,
                    u32::from(self.local_id),
                ));
                self.send(open).await;
            }
            Action::SendMsg(message) => self.send(message).await,
            Action::StartConnRetryTimer | Action::ResetConnRetryTimer => {
                self.start_timer(TimerKind::ConnRetry, self.fsm.conn_retry_time_s);
            }
            Action::StopConnRetryTimer => self.stop_timer(TimerKind::ConnRetry),
            Action::StartHoldTimer(secs) | Action::ResetHoldTimer(secs) => {
                self.start_timer(TimerKind::Hold, secs);
            }
            Action::StopHoldTimer => self.stop_timer(TimerKind::Hold),
            Action::StartKeepaliveTimer | Action::ResetKeepaliveTimer => {
                self.start_timer(TimerKind::Keepalive, self.fsm.keepalive_time_s);
            }
            Action::StopKeepaliveTimer => self.stop_timer(TimerKind::Keepalive),
            Action::ProcessUpdateMsg(update) => self.process_update(update),
            Action::InitiateRib => self.initiate_rib(),
            Action::ReleaseRib => self.release_rib(),
        }
    }

    /// Spawn an outbound connect unless a transport attempt or flow
    /// already exists.
    pub(super) fn initiate_connection(&mut self) {
        if self.conn_starter.is_some() || self.flow.is_some() {
            debug!("connect suppressed, transport busy",
                "peer_ip" => self.remote_id.to_string());
            return;
        }
        self.next_token += 1;
        let token = self.next_token;
        let addr = SocketAddr::new(IpAddr::V4(self.remote_id), self.remote_port);
        let tx = self.msg_tx.clone();
        let handle = tokio::spawn(async move {
            let result = TcpStream::connect(addr).await;
            let _ = tx.send(PeerMsg::ConnectDone { token, result });
        });
        self.conn_starter = Some(TaskSlot { token, handle });
    }

    /// Tear down the transport: connect attempt, reader, and flow. Slots
    /// are cleared before cancellation so racing completions read as
    /// stale.
    pub(super) fn drop_connection(&mut self) {
        if let Some(starter) = self.conn_starter.take() {
            starter.handle.abort();
        }
        if let Some(reader) = self.flow_reader.take() {
            reader.handle.abort();
        }
        // Dropping the write half closes our side of the socket
        self.flow = None;
    }

    pub(super) async fn send(&mut self, message: BgpMessage) {
        let kind = message.kind();
        let Some(flow) = self.flow.as_mut() else {
            self.statistics.writes_dropped += 1;
            debug!("write dropped, no flow",
                "peer_ip" => self.remote_id.to_string(),
                "type" => format!("{:?}", kind));
            return;
        };
        match flow.write(&message).await {
            Ok(()) => {
                match kind {
                    crate::bgp::msg::MessageType::Open => self.statistics.open_sent += 1,
                    crate::bgp::msg::MessageType::Update => self.statistics.update_sent += 1,
                    crate::bgp::msg::MessageType::KeepAlive => {
                        self.statistics.keepalive_sent += 1
                    }
                    crate::bgp::msg::MessageType::Notification => {
                        self.statistics.notification_sent += 1
                    }
                }
                debug!("sent message",
                    "peer_ip" => self.remote_id.to_string(),
                    "type" => format!("{:?}", kind));
            }
            Err(error) => {
                // Not an FSM event: the read side will fail shortly and
                // drive the state machine.
                self.statistics.writes_dropped += 1;
                warn!("write failed",
                    "peer_ip" => self.remote_id.to_string(),
                    "type" => format!("{:?}", kind),
                    "error" => error.to_string());
            }
        }
    }

    /// Arm (or re-arm) a timer. A configured value of zero means the
    /// timer is disabled and the action is a no-op.
    pub(super) fn start_timer(&mut self, kind: TimerKind, secs: u16) {
        if secs == 0 {
            return;
        }
        let generation = self.bump_generation(kind);
        let tx = self.msg_tx.clone();
        let timer = SessionTimer::start(Duration::from_secs(secs as u64), move || {
            let _ = tx.send(PeerMsg::TimerExpired { kind, generation });
        });
        if let Some(previous) = self.timer_slot(kind).replace(timer) {
            previous.cancel();
        }
    }

    pub(super) fn stop_timer(&mut self, kind: TimerKind) {
        self.bump_generation(kind);
        if let Some(timer) = self.timer_slot(kind).take() {
            timer.cancel();
        }
    }

    fn bump_generation(&mut self, kind: TimerKind) -> u64 {
        let generation = match kind {
            TimerKind::ConnRetry => &mut self.conn_retry_generation,
            TimerKind::Hold => &mut self.hold_generation,
            TimerKind::Keepalive => &mut self.keepalive_generation,
        };
        *generation += 1;
        *generation
    }

    pub(super) fn process_update(&mut self, update: crate::bgp::msg_update::UpdateMessage) {
        let converted = RibUpdate::from_update(&update, self.remote_id);
        match self.input_rib.as_mut() {
            Some(rib) => rib.handle_update(converted),
            // Only reachable through broken FSM/executor ordering; this is
            // a bug, not a protocol condition.
            None => panic!(
                "UPDATE processed with no input RIB (peer {})",
                self.remote_id
            ),
        }
    }

    pub(super) fn initiate_rib(&mut self) {
        self.input_rib = Some(AdjRibIn::new(self.remote_id, self.loc_rib.clone()));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let peer_tx = self.msg_tx.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(delta) = rx.recv().await {
                if peer_tx.send(PeerMsg::RibDelta(delta)).is_err() {
                    return;
                }
            }
        });
        self.loc_rib.handle_signal(RibSignal::Subscribe(RibSubscription {
            remote_id: self.remote_id,
            tx,
        }));
        self.output_rib = Some(OutRib {
            table: AdjRibOut::new(self.remote_id),
            forwarder,
        });
    }

    pub(super) fn release_rib(&mut self) {
        if self.input_rib.take().is_some() {
            self.loc_rib.handle_signal(RibSignal::PeerDown(self.remote_id));
        }
        if let Some(out) = self.output_rib.take() {
            self.loc_rib.handle_signal(RibSignal::Unsubscribe(self.remote_id));
            out.forwarder.abort();
        }
    }
}
