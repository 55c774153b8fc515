//! Lazy file chunking
//!
//! Reads a file as a finite iterator of `(index, offset, plaintext)`
//! chunks. The iterator is restartable from any index, which is what
//! resume and resend-request handling lean on.

use crate::error::{ProtocolError, Result};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// One plaintext chunk read from the file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChunk {
    /// Chunk index
    pub index: u64,
    /// Byte offset within the file
    pub offset: u64,
    /// Chunk bytes (full `chunk_size` except possibly the last chunk)
    pub data: Vec<u8>,
}

/// Lazy chunk reader over an open file
#[derive(Debug)]
pub struct Chunker {
    file: File,
    file_size: u64,
    chunk_size: usize,
    total_chunks: u64,
    next_index: u64,
}

/// Number of chunks a file of `file_size` splits into
pub fn chunk_count(file_size: u64, chunk_size: usize) -> u64 {
    if file_size == 0 {
        0
    } else {
        file_size.div_ceil(chunk_size as u64)
    }
}

impl Chunker {
    /// Open a file for chunking
    pub fn open(path: &Path, chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(ProtocolError::Validation("chunk size must be non-zero".into()));
        }
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        Ok(Self::from_file(file, file_size, chunk_size))
    }

    /// Wrap an already-open file
    pub fn from_file(file: File, file_size: u64, chunk_size: usize) -> Self {
        Self {
            file,
            file_size,
            chunk_size,
            total_chunks: chunk_count(file_size, chunk_size),
            next_index: 0,
        }
    }

    /// Total number of chunks (zero for an empty file)
    pub fn total_chunks(&self) -> u64 {
        self.total_chunks
    }

    /// File size in bytes
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Chunk size in bytes
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Restart iteration at the given chunk index
    pub fn seek_to(&mut self, index: u64) -> Result<()> {
        if index > self.total_chunks {
            return Err(ProtocolError::ChunkOutOfRange {
                index,
                total: self.total_chunks,
            });
        }
        self.next_index = index;
        Ok(())
    }

    /// Read one specific chunk without disturbing iteration order
    pub fn read_chunk(&mut self, index: u64) -> Result<FileChunk> {
        if index >= self.total_chunks {
            return Err(ProtocolError::ChunkOutOfRange {
                index,
                total: self.total_chunks,
            });
        }
        let offset = index * self.chunk_size as u64;
        let remaining = self.file_size - offset;
        let len = (self.chunk_size as u64).min(remaining) as usize;

        self.file.seek(SeekFrom::Start(offset))?;
        let mut data = vec![0u8; len];
        self.file.read_exact(&mut data)?;

        Ok(FileChunk {
            index,
            offset,
            data,
        })
    }
}

impl Iterator for Chunker {
    type Item = Result<FileChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_index >= self.total_chunks {
            return None;
        }
        let index = self.next_index;
        self.next_index += 1;
        Some(self.read_chunk(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_file(content: &[u8]) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn test_empty_file_has_zero_chunks() {
        let f = temp_file(b"");
        let mut chunker = Chunker::open(f.path(), 1024).unwrap();
        assert_eq!(chunker.total_chunks(), 0);
        assert!(chunker.next().is_none());
    }

    #[test]
    fn test_single_partial_chunk() {
        let f = temp_file(b"hello\n");
        let chunker = Chunker::open(f.path(), 1024).unwrap();
        let chunks: Vec<_> = chunker.map(|c| c.unwrap()).collect();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].data, b"hello\n");
        assert_eq!(chunks[0].offset, 0);
    }

    #[test]
    fn test_exact_multiple_has_no_partial_tail() {
        let content = vec![0xABu8; 4096];
        let f = temp_file(&content);
        let chunker = Chunker::open(f.path(), 1024).unwrap();
        assert_eq!(chunker.total_chunks(), 4);
        let chunks: Vec<_> = chunker.map(|c| c.unwrap()).collect();
        assert!(chunks.iter().all(|c| c.data.len() == 1024));
    }

    #[test]
    fn test_partial_tail() {
        let content = vec![1u8; 2500];
        let f = temp_file(&content);
        let chunker = Chunker::open(f.path(), 1024).unwrap();
        let chunks: Vec<_> = chunker.map(|c| c.unwrap()).collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].data.len(), 2500 - 2048);
    }

    #[test]
    fn test_seek_restarts_iteration() {
        let content: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        let f = temp_file(&content);
        let mut chunker = Chunker::open(f.path(), 1024).unwrap();
        let all: Vec<_> = chunker.by_ref().map(|c| c.unwrap()).collect();
        assert_eq!(all.len(), 4);

        chunker.seek_to(2).unwrap();
        let tail: Vec<_> = chunker.by_ref().map(|c| c.unwrap()).collect();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0], all[2]);
    }

    #[test]
    fn test_read_chunk_out_of_range() {
        let f = temp_file(b"data");
        let mut chunker = Chunker::open(f.path(), 1024).unwrap();
        assert!(chunker.read_chunk(5).is_err());
    }

    #[test]
    fn test_chunk_count_boundaries() {
        assert_eq!(chunk_count(0, 1024), 0);
        assert_eq!(chunk_count(1, 1024), 1);
        assert_eq!(chunk_count(1024, 1024), 1);
        assert_eq!(chunk_count(1025, 1024), 2);
    }
}
