//! End-to-end transfer engine properties, no sockets involved:
//! chunk → seal → reorder → open → bitmap → root, plus the resume and
//! delta-sync byte bounds.

use std::io::Write;
use tallow_crypto::symmetric::nonce::Direction;
use tallow_crypto::symmetric::CipherSuite;
use tallow_protocol::chunk::{self, Chunker, TransferCipher};
use tallow_protocol::transfer::delta::{self, DeltaConfig};
use tallow_protocol::transfer::resume::{negotiate, ResumeOutcome};
use tallow_protocol::transfer::{ChunkBitmap, Status, TransferRecord};

const CHUNK_SIZE: usize = 4 * 1024;

fn temp_file(content: &[u8]) -> tempfile::NamedTempFile {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    f.write_all(content).unwrap();
    f.flush().unwrap();
    f
}

fn manifest(path: &std::path::Path) -> (Vec<[u8; 32]>, [u8; 32], u64, u64) {
    let mut chunker = Chunker::open(path, CHUNK_SIZE).unwrap();
    let total = chunker.total_chunks();
    let size = chunker.file_size();
    let mut hashes = Vec::new();
    for c in chunker.by_ref() {
        hashes.push(tallow_crypto::hash::blake3::hash(&c.unwrap().data));
    }
    let root = chunk::finalize(&hashes);
    (hashes, root, total, size)
}

fn record_for(path: &std::path::Path) -> TransferRecord {
    let (hashes, root, total, size) = manifest(path);
    let mut record = TransferRecord::new(
        [7u8; 16],
        vec![],
        size,
        CHUNK_SIZE as u32,
        total,
        hashes,
        root,
        [1u8; 32],
        1000,
    )
    .unwrap();
    record.transition(Status::Transferring, 1001).unwrap();
    record
}

#[test]
fn out_of_order_transfer_reassembles_and_verifies() {
    let content: Vec<u8> = (0..CHUNK_SIZE * 7 + 123).map(|i| (i % 251) as u8).collect();
    let f = temp_file(&content);
    let (hashes, root, total, _) = manifest(f.path());

    let key = [0x33u8; 32];
    let mut sender = TransferCipher::new(CipherSuite::default(), &key, Direction::Send, root);
    let receiver = TransferCipher::new(CipherSuite::default(), &key, Direction::Send, root);

    // Seal every chunk, then deliver in a shuffled order
    let mut chunker = Chunker::open(f.path(), CHUNK_SIZE).unwrap();
    let mut frames = Vec::new();
    for index in 0..total {
        let data = chunker.read_chunk(index).unwrap().data;
        frames.push((index, sender.seal_chunk(index, &data).unwrap()));
    }
    frames.reverse();
    frames.swap(0, 3);

    let mut bitmap = ChunkBitmap::new(total);
    let mut received = vec![Vec::new(); total as usize];
    for (index, sealed) in &frames {
        let plaintext = receiver
            .open_chunk(&sealed.frame, &hashes[*index as usize])
            .unwrap();
        received[*index as usize] = plaintext;
        bitmap.set(*index).unwrap();
    }

    assert!(bitmap.is_complete());
    let received_hashes: Vec<[u8; 32]> = received
        .iter()
        .map(|c| tallow_crypto::hash::blake3::hash(c))
        .collect();
    assert_eq!(chunk::finalize(&received_hashes), root);
    assert_eq!(received.concat(), content);
}

#[test]
fn resume_retransmits_at_most_missing_plus_one() {
    let content = vec![0xA5u8; CHUNK_SIZE * 40];
    let f = temp_file(&content);
    let record = record_for(f.path());
    let total = record.total_chunks;

    // Interrupted at 50%: the receiver holds the first half plus one
    // in-flight chunk that never committed
    let mut receiver_bitmap = ChunkBitmap::new(total);
    for i in 0..total / 2 {
        receiver_bitmap.set(i).unwrap();
    }

    let outcome = negotiate(&record, &receiver_bitmap).unwrap();
    let ResumeOutcome::Retransmit(missing) = outcome else {
        panic!("expected retransmission");
    };

    let retransmitted_bytes = missing.len() as u64 * CHUNK_SIZE as u64;
    let remaining_bytes = (total - receiver_bitmap.set_count()) * CHUNK_SIZE as u64;
    assert!(retransmitted_bytes <= remaining_bytes + CHUNK_SIZE as u64);
}

#[test]
fn resume_of_completed_transfer_is_noop() {
    let content = vec![1u8; CHUNK_SIZE * 4];
    let f = temp_file(&content);
    let mut record = record_for(f.path());
    for i in 0..record.total_chunks {
        record.ack_chunk(i, 2000).unwrap();
    }
    record.transition(Status::Completed, 2001).unwrap();

    let empty = ChunkBitmap::new(record.total_chunks);
    assert_eq!(
        negotiate(&record, &empty).unwrap(),
        ResumeOutcome::AlreadyComplete
    );
    assert_eq!(record.status, Status::Completed);
}

#[test]
fn small_edit_delta_stays_under_ten_percent() {
    // 20 MiB file with a 100-byte edit: delta sync must move < 10%
    const MIB: usize = 1024 * 1024;
    let mut content: Vec<u8> = (0..20 * MIB).map(|i| (i % 253) as u8).collect();
    let old = temp_file(&content);

    let block_size = DeltaConfig::default().block_size_for(content.len() as u64);
    let old_sigs =
        delta::compute_signatures(std::fs::File::open(old.path()).unwrap(), block_size).unwrap();

    // Edit 100 bytes in the middle
    let offset = 11 * MIB + 77;
    for b in &mut content[offset..offset + 100] {
        *b = !*b;
    }
    let new = temp_file(&content);
    let new_sigs =
        delta::compute_signatures(std::fs::File::open(new.path()).unwrap(), block_size).unwrap();

    let changed = delta::changed_blocks(&new_sigs, &old_sigs);
    let bytes_to_send: u64 = changed.len() as u64 * block_size;
    assert!(
        bytes_to_send * 10 <= content.len() as u64,
        "delta sends {} of {} bytes",
        bytes_to_send,
        content.len()
    );
}

#[test]
fn empty_file_completes_immediately() {
    let f = temp_file(b"");
    let (hashes, root, total, size) = manifest(f.path());
    assert_eq!(total, 0);
    assert_eq!(size, 0);
    assert!(hashes.is_empty());
    assert_eq!(root, tallow_crypto::hash::blake3::hash(b""));

    let record = TransferRecord::new(
        [9u8; 16],
        vec![],
        0,
        CHUNK_SIZE as u32,
        0,
        hashes,
        root,
        [0u8; 32],
        0,
    )
    .unwrap();
    assert!(record.bitmap.is_complete());
    assert!(record.verify_complete().is_ok());
}

#[test]
fn exact_chunk_multiple_has_no_partial_tail() {
    let content = vec![3u8; CHUNK_SIZE * 8];
    let f = temp_file(&content);
    let chunker = Chunker::open(f.path(), CHUNK_SIZE).unwrap();
    assert_eq!(chunker.total_chunks(), 8);
    for chunk in chunker {
        assert_eq!(chunk.unwrap().data.len(), CHUNK_SIZE);
    }
}

#[test]
fn single_byte_file_transfers() {
    let f = temp_file(b"x");
    let (hashes, root, total, _) = manifest(f.path());
    assert_eq!(total, 1);

    let key = [9u8; 32];
    let mut sender = TransferCipher::new(CipherSuite::default(), &key, Direction::Send, root);
    let receiver = TransferCipher::new(CipherSuite::default(), &key, Direction::Send, root);

    let sealed = sender.seal_chunk(0, b"x").unwrap();
    assert_eq!(receiver.open_chunk(&sealed.frame, &hashes[0]).unwrap(), b"x");
}

#[test]
fn record_serialization_roundtrip() {
    let content = vec![7u8; CHUNK_SIZE * 3 + 17];
    let f = temp_file(&content);
    let mut record = record_for(f.path());
    record.ack_chunk(1, 1500).unwrap();
    record.record_retry(2, 1501);

    let bytes = postcard::to_stdvec(&record).unwrap();
    let back: TransferRecord = postcard::from_bytes(&bytes).unwrap();
    assert_eq!(back, record);
}
