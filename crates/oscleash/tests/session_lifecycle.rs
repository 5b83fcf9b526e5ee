// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Session manager against a fake peer on loopback.

use oscleash::osc::{decode_packet, encode_message};
use oscleash::session::AVATAR_CHANGE_ADDRESS;
use oscleash::{
    ControlSettings, LeashHandle, OscArg, OscMessage, ParameterAliases, SessionManager,
};
use oscquery::{
    AccessMode, HostInfo, OscNode, ParamValue, QueryClient, QueryDocuments, QueryEvent,
    QueryServer,
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

fn free_udp_addr() -> SocketAddr {
    let socket = std::net::UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    socket.local_addr().unwrap()
}

async fn recv_message(peer: &UdpSocket) -> OscMessage {
    let mut buf = vec![0u8; 1500];
    let (len, _) = timeout(Duration::from_secs(2), peer.recv_from(&mut buf))
        .await
        .expect("no datagram")
        .unwrap();
    decode_packet(&buf[..len]).unwrap().remove(0)
}

#[tokio::test]
async fn test_session_starts_with_stop_command() {
    let peer = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let mut manager = SessionManager::new(
        LeashHandle::new(),
        ControlSettings::default(),
        ParameterAliases::default().addresses(),
        free_udp_addr(),
    );
    manager.start_session(peer.local_addr().unwrap()).unwrap();

    let first = recv_message(&peer).await;
    assert_eq!(first.address, "/input/Vertical");
    assert_eq!(first.first_arg(), Some(&OscArg::Float(0.0)));
    let second = recv_message(&peer).await;
    assert_eq!(second.address, "/input/Horizontal");
    let third = recv_message(&peer).await;
    assert_eq!(third.address, "/input/Run");
    assert_eq!(third.first_arg(), Some(&OscArg::Int(0)));

    manager.stop().await;
}

#[tokio::test]
async fn test_inbound_parameters_update_leash() {
    let peer = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let listen = free_udp_addr();
    let leash = LeashHandle::new();
    let mut manager = SessionManager::new(
        leash.clone(),
        ControlSettings::default(),
        ParameterAliases::default().addresses(),
        listen,
    );
    manager.start_session(peer.local_addr().unwrap()).unwrap();

    let sends = [
        OscMessage::new("/avatar/parameters/Leash_Z+", vec![OscArg::Float(0.6)]),
        OscMessage::new("/avatar/parameters/Leash_Stretch", vec![OscArg::Float(0.9)]),
        OscMessage::new("/avatar/parameters/Leash_IsGrabbed", vec![OscArg::Bool(true)]),
        // Wrong type: ignored, field keeps its value.
        OscMessage::new("/avatar/parameters/Leash_Z-", vec![OscArg::Int(1)]),
    ];
    for msg in &sends {
        peer.send_to(&encode_message(msg).unwrap(), listen)
            .await
            .unwrap();
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let state = leash.snapshot();
        if state.grabbed && state.z_positive == 0.6 && state.stretch == 0.9 {
            assert_eq!(state.z_negative, 0.0);
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "leash never updated");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // The loop now runs: a run command arrives.
    let mut saw_run = false;
    for _ in 0..30 {
        let msg = recv_message(&peer).await;
        if msg.address == "/input/Run" && msg.first_arg() == Some(&OscArg::Int(1)) {
            saw_run = true;
            break;
        }
    }
    assert!(saw_run);

    manager.stop().await;
}

#[tokio::test]
async fn test_replacement_moves_output_to_new_peer() {
    let old_peer = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let new_peer = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let mut manager = SessionManager::new(
        LeashHandle::new(),
        ControlSettings::default(),
        ParameterAliases::default().addresses(),
        free_udp_addr(),
    );

    manager.start_session(old_peer.local_addr().unwrap()).unwrap();
    manager.start_session(new_peer.local_addr().unwrap()).unwrap();
    assert_eq!(manager.active_peer(), Some(new_peer.local_addr().unwrap()));

    let msg = recv_message(&new_peer).await;
    assert_eq!(msg.address, "/input/Vertical");

    manager.stop().await;
    assert_eq!(manager.active_peer(), None);
}

fn avatar_tree(avatar_id: &str) -> OscNode {
    let params = OscNode::branch("/avatar/parameters", AccessMode::NoValue).with_child(
        "Leash_Stretch",
        OscNode::leaf(
            "/avatar/parameters/Leash_Stretch",
            AccessMode::ReadWrite,
            ParamValue::Float(0.25),
            "f",
        ),
    );
    let avatar = OscNode::branch("/avatar", AccessMode::WriteOnly)
        .with_child("parameters", params)
        .with_child(
            "change",
            OscNode::leaf(
                "/avatar/change",
                AccessMode::ReadWrite,
                ParamValue::Text(avatar_id.into()),
                "s",
            ),
        );
    OscNode::branch("/", AccessMode::NoValue).with_child("avatar", avatar)
}

#[tokio::test]
async fn test_avatar_change_refreshes_parameters() {
    let cancel = CancellationToken::new();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let http = listener.local_addr().unwrap();
    let host = HostInfo::udp("VRChat-Client-TEST", IpAddr::V4(Ipv4Addr::LOCALHOST), 9000);
    let docs = QueryDocuments::new(&host, &avatar_tree("avtr_leash")).unwrap();
    let server = tokio::spawn(QueryServer::new(docs).serve(listener, cancel.clone()));

    let client = Arc::new(QueryClient::new().unwrap());
    let seeded = client.refresh_parameters(http).await.unwrap();
    assert_eq!(seeded.avatar_id, "avtr_leash");

    let (events_tx, mut events_rx) = mpsc::channel(4);
    let peer = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let mut manager = SessionManager::new(
        LeashHandle::new(),
        ControlSettings::default(),
        ParameterAliases::default().addresses(),
        free_udp_addr(),
    )
    .with_parameter_refresh(Arc::clone(&client), events_tx);
    manager.start_session(peer.local_addr().unwrap()).unwrap();

    let change = OscMessage::new(AVATAR_CHANGE_ADDRESS, vec![OscArg::Str("avtr_leash".into())]);
    peer.send_to(&encode_message(&change).unwrap(), manager.listen_addr())
        .await
        .unwrap();

    let event = timeout(Duration::from_secs(5), events_rx.recv())
        .await
        .expect("no parameter update")
        .unwrap();
    match event {
        QueryEvent::ParametersUpdated(update) => {
            assert_eq!(update.avatar_id, "avtr_leash");
            assert_eq!(
                update.parameters.get("/avatar/parameters/Leash_Stretch"),
                Some(&ParamValue::Float(0.25))
            );
        }
        other => panic!("unexpected event {:?}", other),
    }

    manager.stop().await;
    cancel.cancel();
    server.await.unwrap().unwrap();
}
