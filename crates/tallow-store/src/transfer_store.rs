//! Resumable transfer persistence
//!
//! One postcard record file per transfer id under `transfers/`, written
//! atomically (temp file + rename). Received chunk payloads land in the
//! partial file under `partial/<id>/data` *before* the bitmap bit
//! commits, so a crash between the two leaves at worst a re-fetchable
//! chunk, never a bitmap bit pointing at missing data.
//!
//! The store is single-writer: exactly one task owns it per process and
//! serializes all mutations.

use crate::error::{Result, StoreError};
use crate::paths;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tallow_protocol::transfer::{TransferId, TransferRecord};
use tracing::{debug, warn};

/// Stale-record garbage collection horizon: 7 days
pub const GC_MAX_AGE_SECS: u64 = 7 * 24 * 60 * 60;

/// Keyed store of transfer records and partial payloads
#[derive(Debug)]
pub struct TransferStore {
    data_dir: PathBuf,
}

fn record_path(data_dir: &Path, id: &TransferId) -> PathBuf {
    paths::transfers_dir(data_dir).join(format!("{}.record", hex::encode(id)))
}

fn partial_path(data_dir: &Path, id: &TransferId) -> PathBuf {
    paths::partial_dir(data_dir).join(hex::encode(id)).join("data")
}

/// Write bytes atomically: temp file in the same directory, then rename
fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().ok_or_else(|| {
        StoreError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "record path has no parent",
        ))
    })?;
    let tmp = dir.join(format!(
        ".{}.tmp",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("record")
    ));
    {
        let mut f = File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

impl TransferStore {
    /// Open (and create) the store under a data directory
    pub fn open(data_dir: &Path) -> Result<Self> {
        paths::ensure_dirs(data_dir)?;
        Ok(Self {
            data_dir: data_dir.to_path_buf(),
        })
    }

    /// Persist a record atomically
    pub fn save(&self, record: &TransferRecord) -> Result<()> {
        let bytes = postcard::to_stdvec(record)?;
        atomic_write(&record_path(&self.data_dir, &record.id), &bytes)
    }

    /// Load a record by id
    pub fn load(&self, id: &TransferId) -> Result<TransferRecord> {
        let path = record_path(&self.data_dir, id);
        if !path.exists() {
            return Err(StoreError::NotFound);
        }
        let bytes = std::fs::read(&path)?;
        Ok(postcard::from_bytes(&bytes)?)
    }

    /// Remove a record and its partial payload
    pub fn delete(&self, id: &TransferId) -> Result<()> {
        let record = record_path(&self.data_dir, id);
        if record.exists() {
            std::fs::remove_file(&record)?;
        }
        let partial = partial_path(&self.data_dir, id);
        if let Some(dir) = partial.parent() {
            if dir.exists() {
                std::fs::remove_dir_all(dir)?;
            }
        }
        Ok(())
    }

    /// All stored records
    pub fn list(&self) -> Result<Vec<TransferRecord>> {
        let mut records = Vec::new();
        for entry in std::fs::read_dir(paths::transfers_dir(&self.data_dir))? {
            let entry = entry?;
            if entry.path().extension().and_then(|e| e.to_str()) != Some("record") {
                continue;
            }
            match std::fs::read(entry.path()).map_err(StoreError::from).and_then(|b| {
                postcard::from_bytes::<TransferRecord>(&b).map_err(StoreError::from)
            }) {
                Ok(record) => records.push(record),
                Err(e) => warn!("skipping unreadable record {:?}: {}", entry.path(), e),
            }
        }
        Ok(records)
    }

    /// Commit one received chunk: payload first, bitmap second
    ///
    /// The chunk bytes are written at their offset in the partial file and
    /// synced before the record (with the bitmap bit set) is rewritten.
    /// Either both effects land, or the chunk is re-fetched on resume.
    pub fn commit_chunk(
        &self,
        record: &mut TransferRecord,
        index: u64,
        data: &[u8],
        now: u64,
    ) -> Result<()> {
        let path = partial_path(&self.data_dir, &record.id);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)?;
        file.seek(SeekFrom::Start(index * record.chunk_size as u64))?;
        file.write_all(data)?;
        file.sync_data()?;

        record.ack_chunk(index, now).map_err(|e| {
            StoreError::Corrupt(format!("bitmap update for chunk {}: {}", index, e))
        })?;
        self.save(record)?;
        debug!(
            chunk = index,
            done = record.bitmap.set_count(),
            total = record.total_chunks,
            "chunk committed"
        );
        Ok(())
    }

    /// Read one chunk back from the partial payload
    pub fn read_chunk(&self, record: &TransferRecord, index: u64) -> Result<Vec<u8>> {
        let path = partial_path(&self.data_dir, &record.id);
        let mut file = File::open(&path)?;
        let offset = index * record.chunk_size as u64;
        let remaining = record.file_size.saturating_sub(offset);
        let len = (record.chunk_size as u64).min(remaining) as usize;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Move the completed partial payload to its final destination
    pub fn finalize_payload(&self, id: &TransferId, dest: &Path) -> Result<()> {
        let partial = partial_path(&self.data_dir, id);
        if let Some(parent) = dest.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        // Rename within a filesystem; fall back to copy across mounts
        if std::fs::rename(&partial, dest).is_err() {
            std::fs::copy(&partial, dest)?;
            std::fs::remove_file(&partial)?;
        }
        if let Some(dir) = partial_path(&self.data_dir, id).parent() {
            let _ = std::fs::remove_dir(dir);
        }
        Ok(())
    }

    /// The partial payload path for a transfer (for zero-length creates)
    pub fn partial_payload_path(&self, id: &TransferId) -> PathBuf {
        partial_path(&self.data_dir, id)
    }

    /// Re-key a transfer under a new id (resume across sessions)
    ///
    /// A resumed transfer arrives with a fresh id from the sender; the
    /// receiver adopts its existing record and partial payload under the
    /// new id so commit and finalize paths keep working.
    pub fn rename_transfer(&self, old_id: &TransferId, new_id: &TransferId) -> Result<()> {
        let mut record = self.load(old_id)?;
        record.id = *new_id;
        self.save(&record)?;

        let old_partial = partial_path(&self.data_dir, old_id);
        if old_partial.exists() {
            let new_partial = partial_path(&self.data_dir, new_id);
            if let Some(dir) = new_partial.parent() {
                std::fs::create_dir_all(dir)?;
            }
            std::fs::rename(&old_partial, &new_partial)?;
            if let Some(dir) = old_partial.parent() {
                let _ = std::fs::remove_dir(dir);
            }
        }

        std::fs::remove_file(record_path(&self.data_dir, old_id))?;
        Ok(())
    }

    /// Delete records that have not been updated within the GC horizon
    ///
    /// Returns the number of records collected.
    pub fn gc_stale(&self, now: u64) -> Result<usize> {
        let mut removed = 0;
        for record in self.list()? {
            if now.saturating_sub(record.updated_at) > GC_MAX_AGE_SECS {
                debug!(id = %hex::encode(record.id), "collecting stale transfer");
                self.delete(&record.id)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}
