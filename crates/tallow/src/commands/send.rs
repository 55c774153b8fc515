//! Send command: offer, stream, resend, complete
//!
//! Protocol from the sender's side:
//!
//! 1. open the room, handshake, print the code
//! 2. `Offer` with the manifest (sealed name, sizes, chunk hashes, root)
//! 3. receiver answers `Accept` (optionally with a resume bitmap) or
//!    `DeltaSignatures` (it holds an older version of the file)
//! 4. stream exactly the chunks the receiver needs
//! 5. `Complete`; answer `ResendRequest`s until the receiver confirms

use super::session::{self, Event};
use super::CliError;
use crate::cli::SendArgs;
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use rand::RngCore;
use std::collections::VecDeque;
use tallow_crypto::symmetric::nonce::Direction;
use tallow_crypto::symmetric::CipherSuite;
use tallow_net::transport::PeerChannel;
use tallow_protocol::chunk::{self, Chunker, ChunkSize, TransferCipher};
use tallow_protocol::room::RoomCode;
use tallow_protocol::transfer::delta;
use tallow_protocol::transfer::{RetryPolicy, Status, TransferRecord};
use tallow_protocol::wire::{ControlFrame, Frame};
use tallow_store::identity::Identity;
use tallow_store::{now_unix, Config, TransferStore};
use tracing::{debug, info, warn};

/// Sync interval for opportunistic control reads, in chunks
const CONTROL_POLL_EVERY: u64 = 16;

/// Execute the send command
pub async fn execute(args: SendArgs) -> Result<(), CliError> {
    let config = Config::load().map_err(|e| CliError::User(format!("config: {}", e)))?;
    let identity = Identity::load_or_generate(&config.data_dir)?;
    let store = TransferStore::open(&config.data_dir)?;
    if let Ok(collected) = store.gc_stale(now_unix()) {
        if collected > 0 {
            debug!(collected, "collected stale transfer records");
        }
    }

    session::require(args.file.is_file(), "file does not exist or is not a regular file")?;
    let file_name = args
        .file
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| CliError::User("file name is not valid UTF-8".into()))?
        .to_string();

    let code = match &args.code {
        Some(code) => RoomCode::parse(code).map_err(|e| CliError::User(e.to_string()))?,
        None => RoomCode::generate(),
    };
    println!("Room code: {}", code.as_str().bold().green());
    println!("On the other machine: tallow receive {}", code.as_str());

    let nat = session::probe_nat(&config).await;

    let relay = args.relay.clone().unwrap_or_else(|| config.relay_url.clone());
    info!(relay = %relay, "waiting for peer");

    let established = session::establish_as_sender(
        &config,
        &identity,
        &code,
        args.password.as_deref(),
        &relay,
        nat.as_ref(),
    )
    .await?;
    let mut channel = established.channel;
    let outcome = established.outcome;
    let mut ratchet = outcome.session;
    info!(
        peer = %hex::encode(&outcome.peer_fingerprint[..8]),
        transport = %channel.description(),
        "session established"
    );

    // Manifest pass: chunk the file once for hashes and the root
    let chunk_size = ChunkSize::default();
    let mut chunker = Chunker::open(&args.file, chunk_size.bytes())?;
    let total_chunks = chunker.total_chunks();
    let file_size = chunker.file_size();

    let mut chunk_hashes = Vec::with_capacity(total_chunks as usize);
    chunker.seek_to(0)?;
    for chunk in chunker.by_ref() {
        let chunk = chunk?;
        chunk_hashes.push(tallow_crypto::hash::blake3::hash(&chunk.data));
    }
    let merkle_root = chunk::finalize(&chunk_hashes);

    let mut transfer_id = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut transfer_id);

    let mut record = TransferRecord::new(
        transfer_id,
        session::seal_filename(&outcome.transfer_secret, &file_name)?,
        file_size,
        chunk_size.bytes() as u32,
        total_chunks,
        chunk_hashes.clone(),
        merkle_root,
        outcome.peer_fingerprint,
        now_unix(),
    )?;
    store.save(&record)?;

    session::send_control(
        &mut ratchet,
        &mut channel,
        &ControlFrame::Offer {
            transfer_id,
            file_name_ciphertext: record.file_name_ciphertext.clone(),
            file_size,
            chunk_size: chunk_size.bytes() as u32,
            total_chunks,
            chunk_hashes: chunk_hashes.clone(),
            merkle_root,
        },
    )
    .await?;

    // Wait for the receiver's answer
    let mut send_queue: VecDeque<u64> = loop {
        match session::next_event(&mut ratchet, &mut channel).await? {
            Event::Control(ControlFrame::Accept {
                transfer_id: id,
                have_bitmap,
            }) if id == transfer_id => match have_bitmap {
                Some(bytes) => {
                    let bitmap =
                        tallow_protocol::transfer::ChunkBitmap::from_bytes(total_chunks, bytes)?;
                    let missing = bitmap.missing();
                    info!(
                        have = bitmap.set_count(),
                        missing = missing.len(),
                        "resuming transfer"
                    );
                    break missing.into();
                }
                None => break (0..total_chunks).collect(),
            },
            Event::Control(ControlFrame::DeltaSignatures {
                transfer_id: id,
                block_size,
                signatures,
            }) if id == transfer_id => {
                let theirs = delta::decode_signatures(&signatures)?;
                let file = std::fs::File::open(&args.file)?;
                let ours = delta::compute_signatures(file, block_size as u64)?;
                let changed = delta::changed_blocks(&ours, &theirs);
                info!(
                    changed = changed.len(),
                    total = ours.len(),
                    "delta sync: sending changed blocks only"
                );
                session::send_control(
                    &mut ratchet,
                    &mut channel,
                    &ControlFrame::DeltaPlan {
                        transfer_id,
                        changed_blocks: changed.clone(),
                    },
                )
                .await?;
                break chunks_for_blocks(&changed, block_size as u64, chunk_size.bytes() as u64, total_chunks);
            }
            Event::Control(ControlFrame::Cancel { .. }) => {
                record.transition(Status::Cancelled, now_unix())?;
                store.save(&record)?;
                return Err(CliError::User("peer cancelled the transfer".into()));
            }
            Event::Control(other) => debug!("ignoring control frame before accept: {:?}", other),
            Event::Chunk(_) => debug!("ignoring stray chunk frame before accept"),
            Event::Closed => {
                return Err(CliError::Transport("peer closed before accepting".into()))
            }
        }
    };

    record.transition(Status::Transferring, now_unix())?;
    store.save(&record)?;

    let data_key = session::transfer_data_key(&outcome.transfer_secret, &transfer_id);
    let mut cipher = TransferCipher::new(
        CipherSuite::default(),
        &data_key,
        Direction::Send,
        merkle_root,
    );

    let bar = ProgressBar::new(send_queue.len() as u64);
    bar.set_style(
        ProgressStyle::with_template("{bar:32} {pos}/{len} chunks {bytes_per_sec}")
            .expect("static template"),
    );

    let retry = RetryPolicy::default();
    let mut sent_since_poll = 0u64;

    while let Some(index) = send_queue.pop_front() {
        let chunk = chunker.read_chunk(index)?;
        let sealed = cipher.seal_chunk(index, &chunk.data)?;
        channel.send(Frame::Chunk(sealed.frame)).await?;
        bar.inc(1);
        record.nonce_counter = cipher.nonce_counter();

        sent_since_poll += 1;
        if sent_since_poll >= CONTROL_POLL_EVERY {
            sent_since_poll = 0;
            while let Some(event) = session::poll_event(&mut ratchet, &mut channel).await? {
                handle_midstream_event(
                    event,
                    &transfer_id,
                    &mut send_queue,
                    &mut record,
                    &retry,
                    &store,
                )?;
            }
        }
    }

    session::send_control(
        &mut ratchet,
        &mut channel,
        &ControlFrame::Complete {
            transfer_id,
            merkle_root,
        },
    )
    .await?;
    bar.finish_and_clear();

    // Resend until the receiver confirms completion
    loop {
        match session::next_event(&mut ratchet, &mut channel).await? {
            Event::Control(ControlFrame::Complete { transfer_id: id, .. }) if id == transfer_id => {
                record.transition(Status::Completed, now_unix())?;
                store.save(&record)?;
                println!("{}", "Transfer complete.".bold().green());
                channel.close().await;
                return Ok(());
            }
            Event::Control(ControlFrame::ResendRequest {
                transfer_id: id,
                indices,
            }) if id == transfer_id => {
                for index in indices {
                    let attempts = record.record_retry(index, now_unix());
                    if !retry.allows(attempts) {
                        record.transition(Status::Failed, now_unix())?;
                        store.save(&record)?;
                        return Err(CliError::Transport(format!(
                            "chunk {} failed after {} attempts",
                            index, attempts
                        )));
                    }
                    tokio::time::sleep(retry.backoff(attempts.saturating_sub(1))).await;
                    let chunk = chunker.read_chunk(index)?;
                    let sealed = cipher.seal_chunk(index, &chunk.data)?;
                    channel.send(Frame::Chunk(sealed.frame)).await?;
                }
                session::send_control(
                    &mut ratchet,
                    &mut channel,
                    &ControlFrame::Complete {
                        transfer_id,
                        merkle_root,
                    },
                )
                .await?;
            }
            Event::Control(ControlFrame::BitmapSync { .. }) => {}
            Event::Control(ControlFrame::Cancel { .. }) => {
                record.transition(Status::Cancelled, now_unix())?;
                store.save(&record)?;
                return Err(CliError::User("peer cancelled the transfer".into()));
            }
            Event::Control(other) => debug!("ignoring control frame at completion: {:?}", other),
            Event::Chunk(_) => {}
            Event::Closed => {
                warn!("connection lost before completion confirmation");
                record.transition(Status::Paused, now_unix())?;
                store.save(&record)?;
                return Err(CliError::Transport(
                    "connection lost; rerun with the same code to resume".into(),
                ));
            }
        }
    }
}

/// Handle a control frame that arrives while chunks are streaming
fn handle_midstream_event(
    event: Event,
    transfer_id: &[u8; 16],
    send_queue: &mut VecDeque<u64>,
    record: &mut TransferRecord,
    retry: &RetryPolicy,
    store: &TransferStore,
) -> Result<(), CliError> {
    match event {
        Event::Control(ControlFrame::ResendRequest {
            transfer_id: id,
            indices,
        }) if id == *transfer_id => {
            for index in indices {
                let attempts = record.record_retry(index, now_unix());
                if retry.allows(attempts) {
                    send_queue.push_back(index);
                } else {
                    return Err(CliError::Transport(format!(
                        "chunk {} failed after {} attempts",
                        index, attempts
                    )));
                }
            }
            Ok(())
        }
        Event::Control(ControlFrame::BitmapSync {
            transfer_id: id,
            bitmap,
        }) if id == *transfer_id => {
            if let Ok(theirs) =
                tallow_protocol::transfer::ChunkBitmap::from_bytes(record.total_chunks, bitmap)
            {
                // Mirror the receiver's progress into our record
                for index in 0..record.total_chunks {
                    if theirs.get(index) {
                        let _ = record.ack_chunk(index, now_unix());
                    }
                }
                let _ = store.save(record);
            }
            Ok(())
        }
        Event::Control(ControlFrame::Pause { .. }) => {
            // The receiver stops reading; our backpressure does the rest
            debug!("peer paused");
            Ok(())
        }
        Event::Control(ControlFrame::Cancel { .. }) => {
            record.transition(Status::Cancelled, now_unix())?;
            let _ = store.save(record);
            Err(CliError::User("peer cancelled the transfer".into()))
        }
        Event::Control(other) => {
            debug!("ignoring midstream control frame: {:?}", other);
            Ok(())
        }
        Event::Chunk(_) => Ok(()),
        Event::Closed => Err(CliError::Transport("connection lost mid-transfer".into())),
    }
}

/// The chunk indices covered by a set of delta blocks
fn chunks_for_blocks(
    blocks: &[u64],
    block_size: u64,
    chunk_size: u64,
    total_chunks: u64,
) -> VecDeque<u64> {
    let mut indices = Vec::new();
    for &block in blocks {
        let first = (block * block_size) / chunk_size;
        let last = ((block + 1) * block_size).div_ceil(chunk_size);
        for index in first..last.min(total_chunks) {
            indices.push(index);
        }
    }
    indices.sort_unstable();
    indices.dedup();
    indices.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunks_for_blocks_alignment() {
        // 1 MiB blocks over 64 KiB chunks: 16 chunks per block
        let chunks = chunks_for_blocks(&[0], 1 << 20, 64 << 10, 1000);
        assert_eq!(chunks.len(), 16);
        assert_eq!(chunks[0], 0);
        assert_eq!(chunks[15], 15);

        let chunks = chunks_for_blocks(&[2], 1 << 20, 64 << 10, 1000);
        assert_eq!(chunks[0], 32);
    }

    #[test]
    fn test_chunks_for_blocks_clamped_to_total() {
        let chunks = chunks_for_blocks(&[1], 1 << 20, 64 << 10, 20);
        // Block 1 covers chunks 16..32, but only 20 exist
        assert_eq!(chunks.iter().copied().max().unwrap(), 19);
    }

    #[test]
    fn test_chunks_for_blocks_dedup_adjacent() {
        let chunks = chunks_for_blocks(&[0, 1], 1 << 20, 64 << 10, 1000);
        assert_eq!(chunks.len(), 32);
    }
}
