//! Parallel channels over hole-punched datagram pairs: round-robin
//! distribution, merged arrival, reordering left to the chunk index.

use std::collections::HashSet;
use std::sync::Arc;
use tallow_net::transport::datagram::DatagramChannel;
use tallow_net::transport::{Channel, ParallelChannels};
use tallow_protocol::wire::{ChunkFrame, Frame};
use tokio::net::UdpSocket;

async fn channel_pair() -> (Channel, Channel) {
    let a = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
    let b = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
    let a_addr = a.local_addr().unwrap();
    let b_addr = b.local_addr().unwrap();
    (
        Channel::Datagram(DatagramChannel::established(a, b_addr)),
        Channel::Datagram(DatagramChannel::established(b, a_addr)),
    )
}

#[tokio::test]
async fn parallel_set_delivers_all_chunks() {
    let (a1, b1) = channel_pair().await;
    let (a2, b2) = channel_pair().await;
    let (a3, b3) = channel_pair().await;

    let mut sender = ParallelChannels::new(vec![a1, a2, a3]).unwrap();
    let mut receiver = ParallelChannels::new(vec![b1, b2, b3]).unwrap();
    assert_eq!(sender.channel_count(), 3);

    const COUNT: u64 = 48;
    for index in 0..COUNT {
        sender
            .send(Frame::Chunk(ChunkFrame {
                index,
                nonce: [0u8; 12],
                ciphertext: vec![index as u8; 512],
            }))
            .await
            .unwrap();
    }

    // Arrival order is unspecified across channels; the index set must
    // be complete
    let mut seen = HashSet::new();
    while seen.len() < COUNT as usize {
        let frame = tokio::time::timeout(std::time::Duration::from_secs(5), receiver.recv())
            .await
            .expect("frames should keep arriving")
            .unwrap()
            .expect("channel should stay open");
        match frame {
            Frame::Chunk(chunk) => {
                assert!(seen.insert(chunk.index), "duplicate chunk {}", chunk.index);
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    sender.close().await;
    receiver.close().await;
}

#[tokio::test]
async fn parallel_set_rejects_empty() {
    assert!(ParallelChannels::new(vec![]).is_err());
}

#[tokio::test]
async fn parallel_set_caps_at_four() {
    let mut channels = Vec::new();
    for _ in 0..6 {
        let (a, _b) = channel_pair().await;
        channels.push(a);
    }
    let set = ParallelChannels::new(channels).unwrap();
    assert_eq!(set.channel_count(), 4);
}
