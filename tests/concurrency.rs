#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;

use bot_socket::config::NetworkConfig;
use bot_socket::core::packet::Packet;
use bot_socket::core::serialization::PayloadType;
use bot_socket::protocol::command::Command;
use bot_socket::protocol::handshake::{client_accept_grant, client_open_session};
use bot_socket::protocol::message::UptimeReport;
use bot_socket::protocol::session::SessionManager;
use bot_socket::service::{Server, Step};
use tokio::task::JoinSet;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_sessions_verify_independently() {
    let sessions = Arc::new(SessionManager::default());
    let mut tasks = JoinSet::new();

    for _ in 0..16 {
        let sessions = sessions.clone();
        tasks.spawn(async move {
            let grant = sessions.open().unwrap();
            for nonce in 1..=2_000u64 {
                sessions.verify(&grant.token, nonce).unwrap();
                assert!(sessions.verify(&grant.token, nonce).is_err());
            }
            grant.token
        });
    }

    let mut tokens = Vec::new();
    while let Some(res) = tasks.join_next().await {
        tokens.push(res.unwrap());
    }
    assert_eq!(sessions.len(), 16);
    tokens.sort();
    tokens.dedup();
    assert_eq!(tokens.len(), 16);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_packets_through_one_server() {
    let server = Server::from_config(&NetworkConfig::default()).unwrap();
    let mut tasks = JoinSet::new();

    for worker in 0..8u64 {
        let server = server.clone();
        tasks.spawn(async move {
            let request = client_open_session(worker + 1, PayloadType::Binary).unwrap();
            let Step::Reply(Some(reply)) = server.handle_packet(&request).unwrap() else {
                panic!("open-session must be answered");
            };
            let grant = client_accept_grant(&reply).unwrap();

            for nonce in 1..=500u64 {
                let packet = Packet::encode(
                    Command::GetUptime,
                    &[],
                    PayloadType::Binary,
                    Some(&grant.token),
                    nonce,
                )
                .unwrap();
                let packet = Packet::from_bytes(&packet.to_bytes().unwrap()).unwrap();
                let Step::Reply(Some(reply)) = server.handle_packet(&packet).unwrap() else {
                    panic!("uptime must be answered");
                };
                let reply = Packet::from_bytes(&reply.to_bytes().unwrap()).unwrap();
                assert_eq!(reply.session(), Some(grant.token));
                let report: UptimeReport = reply.decode_value().unwrap();
                assert!(report.uptime.starts_with("Uptime: "));
            }

            let close = Packet::encode(
                Command::CloseSession,
                &[],
                PayloadType::Binary,
                Some(&grant.token),
                501,
            )
            .unwrap();
            assert!(matches!(server.handle_packet(&close).unwrap(), Step::Close));
        });
    }

    while let Some(res) = tasks.join_next().await {
        res.unwrap();
    }
    assert!(server.sessions().is_empty());
    let snapshot = server.metrics().snapshot();
    assert_eq!(snapshot.sessions_opened, 8);
    assert_eq!(snapshot.sessions_closed, 8);
}
