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

//! End-to-end session tests: a real speaker against a scripted remote on
//! loopback sockets.

use bgped::bgp::msg::BgpMessage;
use bgped::bgp::msg_keepalive::KeepAliveMessage;
use bgped::bgp::msg_notification::BgpError;
use bgped::bgp::msg_open::OpenMessage;
use bgped::bgp::msg_update::{
    AsPathSegment, AsPathSegmentType, Origin, PathAttrValue, UpdateMessage,
};
use bgped::bgp::utils::Ipv4Net;
use bgped::cli::Command;
use bgped::config::{NeighborConfig, SpeakerConfig};
use bgped::framed::{MessageReader, MessageWriter, ReadError};
use bgped::fsm::State;
use bgped::peer::PeerHandle;
use bgped::rib::LocRibHandle;
use bgped::server::Speaker;
use std::net::Ipv4Addr;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Duration};

fn speaker_config(neighbor_port: u16, hold: u16, keepalive: u16) -> SpeakerConfig {
    let mut config = SpeakerConfig::new("r2", Ipv4Addr::new(2, 2, 2, 2), 65002, 0);
    config.hold_time_secs = hold;
    config.keepalive_secs = keepalive;
    config.neighbors.push(NeighborConfig {
        remote_id: Ipv4Addr::new(127, 0, 0, 1),
        remote_port: neighbor_port,
    });
    config
}

async fn spawn_speaker(
    config: SpeakerConfig,
) -> (Vec<PeerHandle>, u16, mpsc::Sender<Command>, LocRibHandle) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let speaker = Speaker::new(config);
    let handles = speaker.peer_handles();
    let loc_rib = speaker.loc_rib();
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(speaker.run_with_listener(listener, rx));
    (handles, port, tx, loc_rib)
}

async fn wait_for_state(peer: &PeerHandle, state: State) {
    let result = timeout(Duration::from_secs(5), async {
        loop {
            if peer.status().await.map(|s| s.state) == Some(state) {
                return;
            }
            sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "peer did not reach {:?}", state);
}

struct Remote {
    reader: MessageReader<OwnedReadHalf>,
    writer: MessageWriter<OwnedWriteHalf>,
}

impl Remote {
    fn new(stream: TcpStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        Remote {
            reader: MessageReader::new(read_half),
            writer: MessageWriter::new(write_half),
        }
    }

    /// Play the remote side of the handshake: read the speaker's OPEN,
    /// answer with OPEN + KEEPALIVE, then wait for the speaker's
    /// KEEPALIVE. Returns the speaker's OPEN.
    async fn handshake(&mut self, hold_time: u16) -> OpenMessage {
        let open = match self.reader.read().await.unwrap() {
            BgpMessage::Open(open) => open,
            other => panic!("expected OPEN, got {:?}", other),
        };
        self.writer
            .write(&BgpMessage::Open(OpenMessage::new(
                65001, hold_time, 0x01010101,
            )))
            .await
            .unwrap();
        self.writer
            .write(&BgpMessage::KeepAlive(KeepAliveMessage {}))
            .await
            .unwrap();
        match self.reader.read().await.unwrap() {
            BgpMessage::KeepAlive(_) => {}
            other => panic!("expected KEEPALIVE, got {:?}", other),
        }
        open
    }
}

#[tokio::test]
async fn test_happy_path_session() {
    let remote_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let remote_port = remote_listener.local_addr().unwrap().port();

    let (handles, _, commands, loc_rib) =
        spawn_speaker(speaker_config(remote_port, 45, 15)).await;
    let peer = &handles[0];
    commands.send(Command::Start).await.unwrap();

    let (stream, _) = timeout(Duration::from_secs(5), remote_listener.accept())
        .await
        .unwrap()
        .unwrap();
    let mut remote = Remote::new(stream);

    let open = remote.handshake(180).await;
    assert_eq!(open.version, 4);
    assert_eq!(open.asn, 65002);
    assert_eq!(open.hold_time, 45);
    assert_eq!(open.bgp_identifier, 0x02020202);

    wait_for_state(peer, State::Established).await;
    let status = peer.status().await.unwrap();
    // Negotiated down to our configured values: min(45, 180) and a third
    assert_eq!(status.hold_time_s, 45);
    assert_eq!(status.keepalive_time_s, 15);
    assert_eq!(status.statistics.open_sent, 1);
    assert_eq!(status.statistics.open_received, 1);
    assert!(status.statistics.keepalive_sent >= 1);

    // Announce a route and watch it land in the Loc-RIB
    let update = UpdateMessage::new(
        vec![],
        vec![
            PathAttrValue::Origin(Origin::Igp),
            PathAttrValue::AsPath(vec![AsPathSegment {
                segment_type: AsPathSegmentType::AsSequence,
                asn_list: vec![65001],
            }]),
            PathAttrValue::NextHop(Ipv4Addr::new(10, 0, 0, 1)),
        ],
        vec![Ipv4Net {
            address: Ipv4Addr::new(10, 1, 0, 0),
            prefix_length: 16,
        }],
    );
    remote.writer.write(&BgpMessage::Update(update)).await.unwrap();

    let routes = timeout(Duration::from_secs(5), async {
        loop {
            let routes = loc_rib.routes().await;
            if !routes.is_empty() {
                return routes;
            }
            sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].attrs.next_hop, Ipv4Addr::new(10, 0, 0, 1));
    assert_eq!(routes[0].learned_from, Ipv4Addr::new(127, 0, 0, 1));
}

#[tokio::test]
async fn test_hold_timer_expiry_tears_session_down() {
    let remote_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let remote_port = remote_listener.local_addr().unwrap().port();

    // Short timers so the test completes quickly: hold 3s, keepalive 1s
    let (handles, _, commands, _) = spawn_speaker(speaker_config(remote_port, 3, 1)).await;
    let peer = &handles[0];
    commands.send(Command::Start).await.unwrap();

    let (stream, _) = timeout(Duration::from_secs(5), remote_listener.accept())
        .await
        .unwrap()
        .unwrap();
    let mut remote = Remote::new(stream);
    remote.handshake(3).await;
    wait_for_state(peer, State::Established).await;

    // Send nothing further; the speaker's hold timer must fire. Its
    // keepalives keep arriving until the NOTIFICATION.
    let notification = timeout(Duration::from_secs(10), async {
        loop {
            match remote.reader.read().await {
                Ok(BgpMessage::KeepAlive(_)) => continue,
                Ok(BgpMessage::Notification(notification)) => return notification,
                other => panic!("expected NOTIFICATION, got {:?}", other),
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(notification.error(), &BgpError::HoldTimerExpired);

    wait_for_state(peer, State::Idle).await;
    let status = peer.status().await.unwrap();
    assert_eq!(status.conn_retry_counter, 1);

    // The flow is gone: the remote sees EOF
    assert_eq!(remote.reader.read().await, Err(ReadError::Closed));
}

#[tokio::test]
async fn test_manual_stop_and_restart() {
    let remote_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let remote_port = remote_listener.local_addr().unwrap().port();

    let (handles, _, commands, _) = spawn_speaker(speaker_config(remote_port, 45, 15)).await;
    let peer = &handles[0];
    commands.send(Command::Start).await.unwrap();

    let (stream, _) = timeout(Duration::from_secs(5), remote_listener.accept())
        .await
        .unwrap()
        .unwrap();
    let mut remote = Remote::new(stream);
    remote.handshake(180).await;
    wait_for_state(peer, State::Established).await;

    commands.send(Command::Stop).await.unwrap();
    wait_for_state(peer, State::Idle).await;
    let status = peer.status().await.unwrap();
    assert_eq!(status.conn_retry_counter, 0);

    // Stop closes the flow without a NOTIFICATION
    let eof = timeout(Duration::from_secs(5), async {
        loop {
            match remote.reader.read().await {
                Ok(BgpMessage::KeepAlive(_)) => continue,
                other => return other,
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(eof, Err(ReadError::Closed));

    // A second start opens a fresh session
    commands.send(Command::Start).await.unwrap();
    let (stream, _) = timeout(Duration::from_secs(5), remote_listener.accept())
        .await
        .unwrap()
        .unwrap();
    let mut remote = Remote::new(stream);
    let open = remote.handshake(180).await;
    assert_eq!(open.asn, 65002);
    wait_for_state(peer, State::Established).await;
}

#[tokio::test]
async fn test_exit_completes_peer_teardown() {
    let remote_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let remote_port = remote_listener.local_addr().unwrap().port();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let speaker = Speaker::new(speaker_config(remote_port, 45, 15));
    let handles = speaker.peer_handles();
    let (commands, rx) = mpsc::channel(16);
    let server_task = tokio::spawn(speaker.run_with_listener(listener, rx));

    commands.send(Command::Start).await.unwrap();
    let (stream, _) = timeout(Duration::from_secs(5), remote_listener.accept())
        .await
        .unwrap()
        .unwrap();
    let mut remote = Remote::new(stream);
    remote.handshake(180).await;
    wait_for_state(&handles[0], State::Established).await;

    // Exit must not return until every peer has finished its ManualStop
    // teardown
    commands.send(Command::Exit).await.unwrap();
    timeout(Duration::from_secs(5), server_task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    // The flow was closed as part of the teardown
    let eof = timeout(Duration::from_secs(5), async {
        loop {
            match remote.reader.read().await {
                Ok(BgpMessage::KeepAlive(_)) => continue,
                other => return other,
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(eof, Err(ReadError::Closed));

    // The peer task itself has exited
    assert!(handles[0].status().await.is_none());
}

#[tokio::test]
async fn test_unknown_source_is_rejected() {
    let mut config = SpeakerConfig::new("r2", Ipv4Addr::new(2, 2, 2, 2), 65002, 0);
    config.neighbors.push(NeighborConfig {
        remote_id: Ipv4Addr::new(10, 99, 0, 1),
        remote_port: 179,
    });
    let (_, port, _commands, _) = spawn_speaker(config).await;

    // We connect from 127.0.0.1, which is not in the neighbor table
    let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let mut reader = MessageReader::new(stream);
    assert_eq!(
        timeout(Duration::from_secs(5), reader.read()).await.unwrap(),
        Err(ReadError::Closed)
    );
}

#[tokio::test]
async fn test_inbound_closed_while_idle() {
    let (_, port, _commands, _) = spawn_speaker(speaker_config(179, 45, 15)).await;

    // The peer is configured but never started: its FSM is Idle and the
    // coordinator closes the dispatched connection.
    let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let mut reader = MessageReader::new(stream);
    assert_eq!(
        timeout(Duration::from_secs(5), reader.read()).await.unwrap(),
        Err(ReadError::Closed)
    );
}

#[tokio::test]
async fn test_inbound_accepted_in_active_state() {
    // A neighbor port that refuses connections pushes the peer to Active
    let refused_port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        port
    };

    let (handles, port, commands, _) = spawn_speaker(speaker_config(refused_port, 45, 15)).await;
    let peer = &handles[0];
    commands.send(Command::Start).await.unwrap();
    wait_for_state(peer, State::Active).await;

    // Now the remote side dials in; the peer accepts and sends OPEN
    let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let mut remote = Remote::new(stream);
    let open = remote.handshake(180).await;
    assert_eq!(open.asn, 65002);
    assert_eq!(open.bgp_identifier, 0x02020202);

    wait_for_state(peer, State::Established).await;
}
