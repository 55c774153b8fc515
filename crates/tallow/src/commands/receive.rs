//! Receive command: accept, reassemble, verify, finalize
//!
//! The receiver owns the transfer record: every committed chunk persists
//! the payload bytes before the bitmap bit, so a killed process resumes
//! from exactly what reached disk. On a repeat transfer of a file that
//! already exists at the destination, block signatures go back to the
//! sender and only changed blocks travel.

use super::session::{self, Event};
use super::CliError;
use crate::cli::ReceiveArgs;
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use std::path::PathBuf;
use tallow_crypto::symmetric::nonce::Direction;
use tallow_crypto::symmetric::CipherSuite;
use tallow_net::transport::{Channel, PeerChannel};
use tallow_protocol::chunk::TransferCipher;
use tallow_protocol::room::RoomCode;
use tallow_protocol::transfer::{delta, RetryPolicy, Status, TransferRecord};
use tallow_protocol::wire::{ChunkFrame, ControlFrame};
use tallow_store::identity::Identity;
use tallow_store::{now_unix, Config, TransferStore};
use tracing::{debug, info, warn};

/// Send a bitmap sync to the peer every N committed chunks
const BITMAP_SYNC_EVERY: u64 = 64;

/// The sender's manifest, as received
struct Offer {
    transfer_id: [u8; 16],
    file_name_ciphertext: Vec<u8>,
    file_size: u64,
    chunk_size: u32,
    total_chunks: u64,
    chunk_hashes: Vec<[u8; 32]>,
    merkle_root: [u8; 32],
}

/// Execute the receive command
pub async fn execute(args: ReceiveArgs) -> Result<(), CliError> {
    let config = Config::load().map_err(|e| CliError::User(format!("config: {}", e)))?;
    let identity = Identity::load_or_generate(&config.data_dir)?;
    let store = TransferStore::open(&config.data_dir)?;
    let _ = store.gc_stale(now_unix());

    let code = RoomCode::parse(&args.code).map_err(|e| CliError::User(e.to_string()))?;

    let nat = session::probe_nat(&config).await;

    // A quick LAN browse: when the sender is on this network the merged
    // device list prefers the local entry by fingerprint
    match tallow_net::discovery::browse(std::time::Duration::from_millis(800)).await {
        Ok(lan_peers) if !lan_peers.is_empty() => {
            let merged = tallow_net::discovery::merge_peers(lan_peers, Vec::new());
            for peer in &merged {
                info!(
                    fingerprint = %peer.fingerprint,
                    addr = %peer.addr,
                    "LAN peer visible"
                );
            }
        }
        Ok(_) => {}
        Err(e) => debug!("LAN browse unavailable: {}", e),
    }

    let relay = args.relay.clone().unwrap_or_else(|| config.relay_url.clone());
    info!(relay = %relay, "joining room");

    let established = session::establish_as_receiver(
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

    // Wait for the manifest
    let offer = loop {
        match session::next_event(&mut ratchet, &mut channel).await? {
            Event::Control(ControlFrame::Offer {
                transfer_id,
                file_name_ciphertext,
                file_size,
                chunk_size,
                total_chunks,
                chunk_hashes,
                merkle_root,
            }) => {
                break Offer {
                    transfer_id,
                    file_name_ciphertext,
                    file_size,
                    chunk_size,
                    total_chunks,
                    chunk_hashes,
                    merkle_root,
                }
            }
            Event::Control(other) => debug!("ignoring control frame before offer: {:?}", other),
            Event::Chunk(_) => debug!("ignoring chunk frame before offer"),
            Event::Closed => {
                return Err(CliError::Transport("peer closed before offering".into()))
            }
        }
    };

    if offer.chunk_hashes.len() as u64 != offer.total_chunks {
        return Err(CliError::Transport(
            "offer manifest is inconsistent".into(),
        ));
    }

    // Opaque fallback id keeps unsafe names out of the filesystem
    let file_name = match session::open_filename(&outcome.transfer_secret, &offer.file_name_ciphertext)
    {
        Ok(name) => name,
        Err(e) => {
            warn!("filename rejected ({}); using opaque name", e);
            format!("tallow-{}", hex::encode(&offer.transfer_id[..8]))
        }
    };
    let dest = destination_path(args.out.clone(), &file_name);
    info!(dest = %dest.display(), size = offer.file_size, "incoming file");

    // Resume: adopt a matching partial record if one survives
    let mut record = adopt_or_create(&store, &offer, outcome.peer_fingerprint)?;
    let resuming = record.bitmap.set_count() > 0;

    // Delta: the destination already holds an older version
    let mut delta_mode = false;
    if !resuming && dest.is_file() && record.bitmap.set_count() == 0 {
        let existing_size = std::fs::metadata(&dest)?.len();
        if existing_size > 0 {
            let block_size = delta::DeltaConfig::default().block_size_for(offer.file_size);
            let file = std::fs::File::open(&dest)?;
            let signatures = delta::compute_signatures(file, block_size)?;
            info!(
                blocks = signatures.len(),
                block_size, "destination exists; negotiating delta sync"
            );
            session::send_control(
                &mut ratchet,
                &mut channel,
                &ControlFrame::DeltaSignatures {
                    transfer_id: offer.transfer_id,
                    block_size: block_size as u32,
                    signatures: delta::encode_signatures(&signatures)?,
                },
            )
            .await?;
            delta_mode = true;
        }
    }

    if delta_mode {
        // The sender answers with the block plan; unchanged blocks are
        // copied locally and pre-acknowledged
        loop {
            match session::next_event(&mut ratchet, &mut channel).await? {
                Event::Control(ControlFrame::DeltaPlan {
                    transfer_id: id,
                    changed_blocks,
                }) if id == offer.transfer_id => {
                    let block_size = delta::DeltaConfig::default().block_size_for(offer.file_size);
                    preseed_unchanged(
                        &store,
                        &mut record,
                        &dest,
                        &changed_blocks,
                        block_size,
                    )?;
                    info!(
                        preseeded = record.bitmap.set_count(),
                        total = record.total_chunks,
                        "delta plan applied"
                    );
                    break;
                }
                Event::Control(other) => debug!("ignoring control frame awaiting plan: {:?}", other),
                Event::Chunk(_) => debug!("ignoring early chunk awaiting plan"),
                Event::Closed => {
                    return Err(CliError::Transport("peer closed during delta negotiation".into()))
                }
            }
        }
    } else {
        session::send_control(
            &mut ratchet,
            &mut channel,
            &ControlFrame::Accept {
                transfer_id: offer.transfer_id,
                have_bitmap: resuming.then(|| record.bitmap.as_bytes().to_vec()),
            },
        )
        .await?;
    }

    if record.status == Status::Pending {
        record.transition(Status::Transferring, now_unix())?;
    }
    store.save(&record)?;

    let data_key = session::transfer_data_key(&outcome.transfer_secret, &offer.transfer_id);
    let cipher = TransferCipher::new(
        CipherSuite::default(),
        &data_key,
        Direction::Send,
        offer.merkle_root,
    );

    let bar = ProgressBar::new(record.total_chunks);
    bar.set_position(record.bitmap.set_count());
    bar.set_style(
        ProgressStyle::with_template("{bar:32} {pos}/{len} chunks {bytes_per_sec}")
            .expect("static template"),
    );

    let retry = RetryPolicy::default();
    let mut committed_since_sync = 0u64;

    // Empty files complete without a single chunk frame
    ensure_partial_exists(&store, &record)?;

    loop {
        match session::next_event(&mut ratchet, &mut channel).await? {
            Event::Chunk(frame) => {
                if let Err(e) = accept_chunk(
                    &store,
                    &mut record,
                    &cipher,
                    &offer,
                    &frame,
                    &retry,
                    &mut ratchet,
                    &mut channel,
                )
                .await?
                {
                    // Retry already requested; e carries context for logs
                    debug!("chunk {} deferred: {}", frame.index, e);
                } else {
                    bar.set_position(record.bitmap.set_count());
                    committed_since_sync += 1;
                    if committed_since_sync >= BITMAP_SYNC_EVERY {
                        committed_since_sync = 0;
                        session::send_control(
                            &mut ratchet,
                            &mut channel,
                            &ControlFrame::BitmapSync {
                                transfer_id: offer.transfer_id,
                                bitmap: record.bitmap.as_bytes().to_vec(),
                            },
                        )
                        .await?;
                    }
                }
            }
            Event::Control(ControlFrame::Complete {
                transfer_id: id,
                merkle_root,
            }) if id == offer.transfer_id => {
                if merkle_root != offer.merkle_root {
                    return Err(CliError::Auth);
                }
                if record.bitmap.is_complete() {
                    record.verify_complete().map_err(|e| {
                        warn!("completion verification failed: {}", e);
                        CliError::Auth
                    })?;
                    store.finalize_payload(&record.id, &dest)?;
                    record.transition(Status::Completed, now_unix())?;
                    store.save(&record)?;
                    session::send_control(
                        &mut ratchet,
                        &mut channel,
                        &ControlFrame::Complete {
                            transfer_id: offer.transfer_id,
                            merkle_root,
                        },
                    )
                    .await?;
                    bar.finish_and_clear();
                    println!(
                        "{} {}",
                        "Received".bold().green(),
                        dest.display()
                    );
                    channel.close().await;
                    return Ok(());
                }
                // Not done: ask for exactly what is missing
                let missing = record.bitmap.missing();
                debug!(missing = missing.len(), "requesting resend");
                session::send_control(
                    &mut ratchet,
                    &mut channel,
                    &ControlFrame::ResendRequest {
                        transfer_id: offer.transfer_id,
                        indices: missing,
                    },
                )
                .await?;
            }
            Event::Control(ControlFrame::Cancel { .. }) => {
                record.transition(Status::Cancelled, now_unix())?;
                store.save(&record)?;
                return Err(CliError::User("peer cancelled the transfer".into()));
            }
            Event::Control(ControlFrame::Pause { transfer_id: id }) if id == offer.transfer_id => {
                record.transition(Status::Paused, now_unix())?;
                store.save(&record)?;
                info!("transfer paused by peer");
            }
            Event::Control(ControlFrame::Resume { transfer_id: id }) if id == offer.transfer_id => {
                if record.status == Status::Paused {
                    record.transition(Status::Transferring, now_unix())?;
                    store.save(&record)?;
                    info!("transfer resumed by peer");
                }
            }
            Event::Control(other) => debug!("ignoring control frame: {:?}", other),
            Event::Closed => {
                // Transport lost: auto-pause with everything persisted
                if record.status == Status::Transferring {
                    record.transition(Status::Paused, now_unix())?;
                    store.save(&record)?;
                }
                return Err(CliError::Transport(
                    "connection lost; rerun with the same code to resume".into(),
                ));
            }
        }
    }
}

/// Verify, persist, and acknowledge one chunk frame
///
/// Returns `Ok(Ok(()))` on commit, `Ok(Err(reason))` when the chunk was
/// rejected and a resend was requested, and `Err` for failures that end
/// the transfer.
#[allow(clippy::too_many_arguments)]
async fn accept_chunk(
    store: &TransferStore,
    record: &mut TransferRecord,
    cipher: &TransferCipher,
    offer: &Offer,
    frame: &ChunkFrame,
    retry: &RetryPolicy,
    ratchet: &mut tallow_crypto::ratchet::Session,
    channel: &mut Channel,
) -> Result<Result<(), String>, CliError> {
    if frame.index >= offer.total_chunks {
        return Ok(Err(format!("index {} out of range", frame.index)));
    }
    if record.bitmap.get(frame.index) {
        // Duplicate delivery is idempotent
        return Ok(Err("duplicate".into()));
    }

    let expected = &offer.chunk_hashes[frame.index as usize];
    match cipher.open_chunk(frame, expected) {
        Ok(plaintext) => {
            store.commit_chunk(record, frame.index, &plaintext, now_unix())?;
            Ok(Ok(()))
        }
        Err(e) => {
            // Integrity failure: bounded retries for this index, then abort
            let attempts = record.record_retry(frame.index, now_unix());
            warn!(
                chunk = frame.index,
                attempts, "chunk failed verification: {}", e
            );
            if !retry.allows(attempts) {
                record.transition(Status::Failed, now_unix())?;
                store.save(record)?;
                return Err(CliError::Auth);
            }
            tokio::time::sleep(retry.backoff(attempts.saturating_sub(1))).await;
            session::send_control(
                ratchet,
                channel,
                &ControlFrame::ResendRequest {
                    transfer_id: offer.transfer_id,
                    indices: vec![frame.index],
                },
            )
            .await?;
            Ok(Err(format!("verification failed: {}", e)))
        }
    }
}

/// Resolve the output path: explicit file, directory, or cwd
fn destination_path(out: Option<PathBuf>, file_name: &str) -> PathBuf {
    match out {
        Some(path) if path.is_dir() => path.join(file_name),
        Some(path) => path,
        None => PathBuf::from(file_name),
    }
}

/// Find an interrupted transfer of the same content and adopt it
fn adopt_or_create(
    store: &TransferStore,
    offer: &Offer,
    peer_fingerprint: [u8; 32],
) -> Result<TransferRecord, CliError> {
    let candidate = store
        .list()?
        .into_iter()
        .find(|r| {
            r.merkle_root == offer.merkle_root
                && r.file_size == offer.file_size
                && r.chunk_size == offer.chunk_size
                && !r.status.is_terminal()
        });

    if let Some(existing) = candidate {
        info!(
            have = existing.bitmap.set_count(),
            total = existing.total_chunks,
            "adopting interrupted transfer"
        );
        store.rename_transfer(&existing.id, &offer.transfer_id)?;
        let mut adopted = store.load(&offer.transfer_id)?;
        adopted.peer_fingerprint = peer_fingerprint;
        if adopted.status == Status::Paused {
            adopted.transition(Status::Transferring, now_unix())?;
        }
        return Ok(adopted);
    }

    Ok(TransferRecord::new(
        offer.transfer_id,
        offer.file_name_ciphertext.clone(),
        offer.file_size,
        offer.chunk_size,
        offer.total_chunks,
        offer.chunk_hashes.clone(),
        offer.merkle_root,
        peer_fingerprint,
        now_unix(),
    )?)
}

/// Copy unchanged delta blocks from the existing file and mark their
/// chunks acknowledged
fn preseed_unchanged(
    store: &TransferStore,
    record: &mut TransferRecord,
    existing: &std::path::Path,
    changed_blocks: &[u64],
    block_size: u64,
) -> Result<(), CliError> {
    use std::io::{Read, Seek, SeekFrom};

    let mut file = std::fs::File::open(existing)?;
    let old_size = file.metadata()?.len();
    let chunk_size = record.chunk_size as u64;

    for index in 0..record.total_chunks {
        let offset = index * chunk_size;
        let chunk_end = (offset + chunk_size).min(record.file_size);

        // A chunk is reusable only when every block it overlaps is
        // unchanged and the old file fully covers it
        let first_block = offset / block_size;
        let last_block = chunk_end.div_ceil(block_size);
        let untouched = (first_block..last_block).all(|b| !changed_blocks.contains(&b));
        if !untouched || chunk_end > old_size {
            continue;
        }

        let len = (chunk_end - offset) as usize;
        let mut data = vec![0u8; len];
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut data)?;

        // The old bytes must still match the manifest hash
        let hash = tallow_crypto::hash::blake3::hash(&data);
        if hash != record.chunk_hashes[index as usize] {
            debug!(chunk = index, "stale local block despite delta plan; refetching");
            continue;
        }
        store.commit_chunk(record, index, &data, now_unix())?;
    }
    Ok(())
}

/// Guarantee the partial payload file exists (empty-file transfers)
fn ensure_partial_exists(store: &TransferStore, record: &TransferRecord) -> Result<(), CliError> {
    let path = store.partial_payload_path(&record.id);
    if !path.exists() {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::File::create(&path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_path_default_is_cwd() {
        assert_eq!(
            destination_path(None, "hello.txt"),
            PathBuf::from("hello.txt")
        );
    }

    #[test]
    fn test_destination_path_directory() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(
            destination_path(Some(tmp.path().to_path_buf()), "hello.txt"),
            tmp.path().join("hello.txt")
        );
    }

    #[test]
    fn test_destination_path_explicit_file() {
        assert_eq!(
            destination_path(Some(PathBuf::from("/tmp/other.bin")), "hello.txt"),
            PathBuf::from("/tmp/other.bin")
        );
    }
}
