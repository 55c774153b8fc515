//! Relay integration: real TLS server, two clients, opaque pass-through.

use std::time::Duration;
use tallow_net::transport::relay_tcp::{RelayChannel, RelayRole, RelayTrust};
use tallow_net::transport::PeerChannel;
use tallow_protocol::wire::{ChunkFrame, Frame};
use tallow_relay::config::RelayConfig;
use tallow_relay::server::RelayServer;
use tokio_util::sync::CancellationToken;

async fn start_relay(config: RelayConfig) -> (std::net::SocketAddr, [u8; 32], CancellationToken) {
    let server = RelayServer::bind(config).await.unwrap();
    let addr = server.local_addr().unwrap();
    let fingerprint = server.cert_fingerprint();
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    tokio::spawn(async move {
        let _ = server.run(token).await;
    });
    (addr, fingerprint, shutdown)
}

fn test_config() -> RelayConfig {
    RelayConfig {
        port: 0, // ephemeral
        drain_timeout: Duration::from_millis(100),
        ..Default::default()
    }
}

#[tokio::test]
async fn relay_pumps_frames_between_peers() {
    let (addr, fingerprint, shutdown) = start_relay(test_config()).await;
    let code_hash = [0x42u8; 32];

    let creator = tokio::spawn({
        let addr = addr.to_string();
        async move {
            RelayChannel::connect(
                &addr,
                "tallow-relay",
                RelayTrust::Pinned(fingerprint),
                code_hash,
                RelayRole::Create,
            )
            .await
            .unwrap()
        }
    });
    // Give the creator a moment to bind the room
    tokio::time::sleep(Duration::from_millis(100)).await;
    let mut joiner = RelayChannel::connect(
        &addr.to_string(),
        "tallow-relay",
        RelayTrust::Pinned(fingerprint),
        code_hash,
        RelayRole::Join,
    )
    .await
    .unwrap();
    let mut creator = creator.await.unwrap();

    // Creator -> joiner
    let frame = Frame::Chunk(ChunkFrame {
        index: 3,
        nonce: [7u8; 12],
        ciphertext: vec![0xAB; 256],
    });
    creator.send(frame.clone()).await.unwrap();
    let received = tokio::time::timeout(Duration::from_secs(5), joiner.recv())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(received, frame);

    // Joiner -> creator
    let reply = Frame::Chunk(ChunkFrame {
        index: 4,
        nonce: [8u8; 12],
        ciphertext: vec![0xCD; 128],
    });
    joiner.send(reply.clone()).await.unwrap();
    let received = tokio::time::timeout(Duration::from_secs(5), creator.recv())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(received, reply);

    shutdown.cancel();
}

#[tokio::test]
async fn join_without_room_is_refused() {
    let (addr, fingerprint, shutdown) = start_relay(test_config()).await;
    let result = RelayChannel::connect(
        &addr.to_string(),
        "tallow-relay",
        RelayTrust::Pinned(fingerprint),
        [0x99u8; 32],
        RelayRole::Join,
    )
    .await;
    assert!(result.is_err());
    shutdown.cancel();
}

#[tokio::test]
async fn byte_cap_closes_the_room() {
    let config = RelayConfig {
        max_bytes_per_room: 4 * 1024, // tiny cap
        ..test_config()
    };
    let (addr, fingerprint, shutdown) = start_relay(config).await;
    let code_hash = [0x55u8; 32];

    let creator = tokio::spawn({
        let addr = addr.to_string();
        async move {
            RelayChannel::connect(
                &addr,
                "tallow-relay",
                RelayTrust::Pinned(fingerprint),
                code_hash,
                RelayRole::Create,
            )
            .await
            .unwrap()
        }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    let mut joiner = RelayChannel::connect(
        &addr.to_string(),
        "tallow-relay",
        RelayTrust::Pinned(fingerprint),
        code_hash,
        RelayRole::Join,
    )
    .await
    .unwrap();
    let mut creator = creator.await.unwrap();

    // Push well past the cap; the relay must close rather than keep
    // pumping
    for i in 0..64u64 {
        let frame = Frame::Chunk(ChunkFrame {
            index: i,
            nonce: [0u8; 12],
            ciphertext: vec![0u8; 1024],
        });
        if creator.send(frame).await.is_err() {
            break;
        }
    }

    // The joiner eventually observes the close
    let mut closed = false;
    for _ in 0..64 {
        match tokio::time::timeout(Duration::from_secs(2), joiner.recv()).await {
            Ok(Ok(Some(_))) => continue,
            _ => {
                closed = true;
                break;
            }
        }
    }
    assert!(closed, "room should close after the byte cap");
    let _ = creator.close().await;
    shutdown.cancel();
}

#[tokio::test]
async fn wrong_code_hash_lands_in_empty_room() {
    // Two different code hashes never meet: the joiner of a different
    // hash is refused outright (no room), demonstrating the relay pairs
    // strictly by hash and learns nothing else
    let (addr, fingerprint, shutdown) = start_relay(test_config()).await;

    let _creator = tokio::spawn({
        let addr = addr.to_string();
        async move {
            RelayChannel::connect(
                &addr,
                "tallow-relay",
                RelayTrust::Pinned(fingerprint),
                [1u8; 32],
                RelayRole::Create,
            )
            .await
        }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let result = RelayChannel::connect(
        &addr.to_string(),
        "tallow-relay",
        RelayTrust::Pinned(fingerprint),
        [2u8; 32],
        RelayRole::Join,
    )
    .await;
    assert!(result.is_err());
    shutdown.cancel();
}
