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

//! The BGP session FSM (RFC 4271 Section 8).
//!
//! `Fsm::handle` is a pure function from (state, event) to (state, actions).
//! It performs no I/O and never blocks; timers, sockets and the RIB are
//! manipulated by the action executor in the peer module, strictly in the
//! order the actions are emitted.

use crate::bgp::msg::BgpMessage;
use crate::bgp::msg_keepalive::KeepAliveMessage;
use crate::bgp::msg_notification::{BgpError, CeaseSubcode, NotificationMessage};
use crate::bgp::msg_open::OpenMessage;
use crate::bgp::msg_update::UpdateMessage;

/// RFC 4271 8.2.2: HoldTimer value used while waiting for the peer's OPEN
/// (4 minutes suggested).
pub const INITIAL_HOLD_TIME_SECS: u16 = 240;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Connect,
    Active,
    OpenSent,
    OpenConfirmed,
    Established,
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            State::Idle => "Idle",
            State::Connect => "Connect",
            State::Active => "Active",
            State::OpenSent => "OpenSent",
            State::OpenConfirmed => "OpenConfirmed",
            State::Established => "Established",
        };
        write!(f, "{}", name)
    }
}

/// FSM input events.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    ManualStart,
    ManualStop,
    ConnRetryTimerExpired,
    HoldTimerExpired,
    KeepaliveTimerExpired,
    /// Inbound TCP connection installed for this peer.
    TcpConnectionConfirmed,
    /// Our outbound connect completed.
    TcpCrAcked,
    TcpConnectionFail,
    BgpOpen(OpenMessage),
    BgpHeaderErr,
    BgpOpenMsgErr,
    NotifMsg(BgpError),
    KeepaliveMsg,
    UpdateMsg(UpdateMessage),
    /// Collision resolver decided the existing session loses; tear it down
    /// with a cease NOTIFICATION so the replacement flow can be installed.
    OpenCollisionDump,
}

impl Event {
    /// Short name for logging; UPDATE payloads are too large to dump.
    pub fn label(&self) -> &'static str {
        match self {
            Event::ManualStart => "ManualStart",
            Event::ManualStop => "ManualStop",
            Event::ConnRetryTimerExpired => "ConnRetryTimerExpired",
            Event::HoldTimerExpired => "HoldTimerExpired",
            Event::KeepaliveTimerExpired => "KeepaliveTimerExpired",
            Event::TcpConnectionConfirmed => "TcpConnectionConfirmed",
            Event::TcpCrAcked => "TcpCrAcked",
            Event::TcpConnectionFail => "TcpConnectionFail",
            Event::BgpOpen(_) => "BgpOpen",
            Event::BgpHeaderErr => "BgpHeaderErr",
            Event::BgpOpenMsgErr => "BgpOpenMsgErr",
            Event::NotifMsg(_) => "NotifMsg",
            Event::KeepaliveMsg => "KeepaliveMsg",
            Event::UpdateMsg(_) => "UpdateMsg",
            Event::OpenCollisionDump => "OpenCollisionDump",
        }
    }
}

/// FSM output actions, interpreted by the peer's action executor.
/// Order within one transition is significant.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    InitiateTcpConnection,
    DropTcpConnection,
    SendOpenMsg,
    SendMsg(BgpMessage),
    StartConnRetryTimer,
    StopConnRetryTimer,
    ResetConnRetryTimer,
    StartHoldTimer(u16),
    StopHoldTimer,
    ResetHoldTimer(u16),
    StartKeepaliveTimer,
    StopKeepaliveTimer,
    ResetKeepaliveTimer,
    ProcessUpdateMsg(UpdateMessage),
    InitiateRib,
    ReleaseRib,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fsm {
    pub state: State,
    pub conn_retry_counter: u32,
    pub conn_retry_time_s: u16,
    pub hold_time_s: u16,
    pub keepalive_time_s: u16,
}

fn keepalive() -> Action {
    Action::SendMsg(BgpMessage::KeepAlive(KeepAliveMessage {}))
}

fn notification(error: BgpError) -> Action {
    Action::SendMsg(BgpMessage::Notification(NotificationMessage::new(
        error,
        Vec::new(),
    )))
}

impl Fsm {
    pub fn new(conn_retry_time_s: u16, hold_time_s: u16, keepalive_time_s: u16) -> Self {
        Fsm {
            state: State::Idle,
            conn_retry_counter: 0,
            conn_retry_time_s,
            hold_time_s,
            keepalive_time_s,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Process one event. Returns the successor FSM value and the actions to
    /// execute, in order. Pure: equal inputs give equal outputs.
    pub fn handle(&self, event: &Event) -> (Fsm, Vec<Action>) {
        match self.state {
            State::Idle => self.handle_idle(event),
            State::Connect => self.handle_connect(event),
            State::Active => self.handle_active(event),
            State::OpenSent => self.handle_open_sent(event),
            State::OpenConfirmed => self.handle_open_confirmed(event),
            State::Established => self.handle_established(event),
        }
    }

    fn at(&self, state: State) -> Fsm {
        Fsm {
            state,
            ..self.clone()
        }
    }

    fn ignore(&self) -> (Fsm, Vec<Action>) {
        (self.clone(), Vec::new())
    }

    /// ManualStop from any non-idle state: stop everything, forget the
    /// session, reset the retry counter.
    fn manual_stop(&self) -> (Fsm, Vec<Action>) {
        let mut next = self.at(State::Idle);
        next.conn_retry_counter = 0;
        (
            next,
            vec![
                Action::StopConnRetryTimer,
                Action::StopHoldTimer,
                Action::StopKeepaliveTimer,
                Action::DropTcpConnection,
                Action::ReleaseRib,
            ],
        )
    }

    /// Collision loser path: cease the existing session so the replacement
    /// flow can take over. Timers are stopped to keep the idle-state
    /// invariant (no live timers in Idle).
    fn collision_dump(&self) -> (Fsm, Vec<Action>) {
        (
            self.at(State::Idle),
            vec![
                notification(BgpError::Cease(CeaseSubcode::ConnectionCollisionResolution)),
                Action::StopConnRetryTimer,
                Action::StopHoldTimer,
                Action::StopKeepaliveTimer,
                Action::DropTcpConnection,
                Action::ReleaseRib,
            ],
        )
    }

    /// Silent teardown used before a session exists (Connect/Active): no
    /// NOTIFICATION, no session timers to stop.
    fn fail_to_idle(&self) -> (Fsm, Vec<Action>) {
        let mut next = self.at(State::Idle);
        next.conn_retry_counter += 1;
        (
            next,
            vec![
                Action::StopConnRetryTimer,
                Action::DropTcpConnection,
                Action::ReleaseRib,
            ],
        )
    }

    /// Session teardown from OpenSent onward, optionally preceded by a
    /// NOTIFICATION to the peer.
    fn session_to_idle(&self, notify: Option<BgpError>) -> (Fsm, Vec<Action>) {
        let mut next = self.at(State::Idle);
        next.conn_retry_counter += 1;
        let mut actions = Vec::new();
        if let Some(error) = notify {
            actions.push(notification(error));
        }
        actions.extend([
            Action::StopConnRetryTimer,
            Action::StopHoldTimer,
            Action::StopKeepaliveTimer,
            Action::DropTcpConnection,
            Action::ReleaseRib,
        ]);
        (next, actions)
    }

    /// TCP came up (either direction): send OPEN, arm the large initial
    /// hold timer, wait for the peer's OPEN.
    fn tcp_up(&self) -> (Fsm, Vec<Action>) {
        (
            self.at(State::OpenSent),
            vec![
                Action::StopConnRetryTimer,
                Action::SendOpenMsg,
                Action::StartHoldTimer(INITIAL_HOLD_TIME_SECS),
            ],
        )
    }

    fn handle_idle(&self, event: &Event) -> (Fsm, Vec<Action>) {
        match event {
            Event::ManualStart => {
                let mut next = self.at(State::Connect);
                next.conn_retry_counter = 0;
                (
                    next,
                    vec![Action::InitiateTcpConnection, Action::StartConnRetryTimer],
                )
            }
            // Idempotent stop; everything else is ignored in Idle.
            _ => self.ignore(),
        }
    }

    fn handle_connect(&self, event: &Event) -> (Fsm, Vec<Action>) {
        match event {
            Event::ManualStart => self.ignore(),
            Event::ManualStop => self.manual_stop(),
            Event::ConnRetryTimerExpired => (
                self.at(State::Connect),
                vec![
                    Action::DropTcpConnection,
                    Action::ResetConnRetryTimer,
                    Action::InitiateTcpConnection,
                ],
            ),
            Event::TcpCrAcked | Event::TcpConnectionConfirmed => self.tcp_up(),
            Event::TcpConnectionFail => (
                self.at(State::Active),
                vec![Action::ResetConnRetryTimer, Action::DropTcpConnection],
            ),
            Event::OpenCollisionDump => self.collision_dump(),
            // Any other event before a session exists: give up this attempt.
            _ => self.fail_to_idle(),
        }
    }

    fn handle_active(&self, event: &Event) -> (Fsm, Vec<Action>) {
        match event {
            Event::ManualStart => self.ignore(),
            Event::ManualStop => self.manual_stop(),
            Event::ConnRetryTimerExpired => (
                self.at(State::Connect),
                vec![Action::ResetConnRetryTimer, Action::InitiateTcpConnection],
            ),
            Event::TcpCrAcked | Event::TcpConnectionConfirmed => self.tcp_up(),
            Event::TcpConnectionFail => self.fail_to_idle(),
            Event::OpenCollisionDump => self.collision_dump(),
            _ => self.fail_to_idle(),
        }
    }

    fn handle_open_sent(&self, event: &Event) -> (Fsm, Vec<Action>) {
        match event {
            Event::ManualStart => self.ignore(),
            Event::ManualStop => self.manual_stop(),
            Event::HoldTimerExpired => self.session_to_idle(Some(BgpError::HoldTimerExpired)),
            Event::TcpConnectionFail => (
                self.at(State::Active),
                vec![
                    Action::StopHoldTimer,
                    Action::ResetConnRetryTimer,
                    Action::DropTcpConnection,
                ],
            ),
            Event::BgpOpen(open) => {
                // RFC 4271 negotiation: the session hold time is the minimum
                // of ours and the peer's; keepalive is a third of that.
                let hold_time = self.hold_time_s.min(open.hold_time);
                let mut next = self.at(State::OpenConfirmed);
                next.hold_time_s = hold_time;
                next.keepalive_time_s = hold_time / 3;
                (
                    next,
                    vec![
                        keepalive(),
                        Action::ResetHoldTimer(hold_time),
                        Action::StartKeepaliveTimer,
                        Action::InitiateRib,
                    ],
                )
            }
            Event::BgpHeaderErr => self.session_to_idle(Some(BgpError::MessageHeaderError(
                crate::bgp::msg_notification::MessageHeaderError::Unspecific,
            ))),
            Event::BgpOpenMsgErr => self.session_to_idle(Some(BgpError::OpenMessageError(
                crate::bgp::msg_notification::OpenMessageError::Unspecific,
            ))),
            Event::NotifMsg(_) => self.session_to_idle(None),
            Event::OpenCollisionDump => self.collision_dump(),
            // KEEPALIVE/UPDATE before the peer's OPEN, or a stray timer
            Event::KeepaliveMsg
            | Event::UpdateMsg(_)
            | Event::ConnRetryTimerExpired
            | Event::KeepaliveTimerExpired => {
                self.session_to_idle(Some(BgpError::FiniteStateMachineError))
            }
            Event::TcpCrAcked | Event::TcpConnectionConfirmed => self.ignore(),
        }
    }

    fn handle_open_confirmed(&self, event: &Event) -> (Fsm, Vec<Action>) {
        match event {
            Event::ManualStart => self.ignore(),
            Event::ManualStop => self.manual_stop(),
            Event::HoldTimerExpired => self.session_to_idle(Some(BgpError::HoldTimerExpired)),
            Event::KeepaliveTimerExpired => (
                self.clone(),
                vec![keepalive(), Action::StartKeepaliveTimer],
            ),
            Event::TcpConnectionFail => self.session_to_idle(None),
            Event::KeepaliveMsg => (
                self.at(State::Established),
                vec![Action::ResetHoldTimer(self.hold_time_s)],
            ),
            Event::BgpHeaderErr => self.session_to_idle(Some(BgpError::MessageHeaderError(
                crate::bgp::msg_notification::MessageHeaderError::Unspecific,
            ))),
            Event::BgpOpenMsgErr => self.session_to_idle(Some(BgpError::OpenMessageError(
                crate::bgp::msg_notification::OpenMessageError::Unspecific,
            ))),
            Event::NotifMsg(_) => self.session_to_idle(None),
            Event::OpenCollisionDump => self.collision_dump(),
            // A second OPEN on the same flow, an UPDATE before keepalive
            // exchange, or a stray connect-retry expiry
            Event::BgpOpen(_) | Event::UpdateMsg(_) | Event::ConnRetryTimerExpired => {
                self.session_to_idle(Some(BgpError::FiniteStateMachineError))
            }
            Event::TcpCrAcked | Event::TcpConnectionConfirmed => self.ignore(),
        }
    }

    fn handle_established(&self, event: &Event) -> (Fsm, Vec<Action>) {
        match event {
            Event::ManualStart => self.ignore(),
            Event::ManualStop => self.manual_stop(),
            Event::HoldTimerExpired => self.session_to_idle(Some(BgpError::HoldTimerExpired)),
            Event::KeepaliveTimerExpired => (
                self.clone(),
                vec![keepalive(), Action::StartKeepaliveTimer],
            ),
            Event::TcpConnectionFail => self.session_to_idle(None),
            Event::KeepaliveMsg => (
                self.clone(),
                vec![Action::ResetHoldTimer(self.hold_time_s)],
            ),
            Event::UpdateMsg(update) => (
                self.clone(),
                vec![
                    Action::ProcessUpdateMsg(update.clone()),
                    Action::ResetHoldTimer(self.hold_time_s),
                ],
            ),
            Event::BgpHeaderErr => self.session_to_idle(Some(BgpError::MessageHeaderError(
                crate::bgp::msg_notification::MessageHeaderError::Unspecific,
            ))),
            Event::BgpOpenMsgErr => self.session_to_idle(Some(BgpError::OpenMessageError(
                crate::bgp::msg_notification::OpenMessageError::Unspecific,
            ))),
            Event::NotifMsg(_) => self.session_to_idle(None),
            Event::OpenCollisionDump => self.collision_dump(),
            Event::BgpOpen(_) | Event::ConnRetryTimerExpired => {
                self.session_to_idle(Some(BgpError::FiniteStateMachineError))
            }
            Event::TcpCrAcked | Event::TcpConnectionConfirmed => self.ignore(),
        }
    }
}
