//! Chunker — splits a byte stream into fixed-size, indexed chunks.
//!
//! Every chunk except possibly the last is exactly `chunk_size` bytes.
//! An empty input produces no chunks at all. The sequence is lazy: bytes
//! are read from the source only as the iterator advances, and re-opening
//! the source restarts it.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use bytes::Bytes;

/// Default chunk size: 256 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// One fixed-size segment of a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Zero-based position within the file.
    pub index: u64,
    pub data: Bytes,
}

#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    #[error("chunk size must be non-zero")]
    ZeroChunkSize,
    #[error("failed to open {0}: {1}")]
    Open(PathBuf, io::Error),
    #[error("read failed at chunk {index}: {source}")]
    Read { index: u64, source: io::Error },
    #[error("chunk {index} is out of range ({count} chunks)")]
    OutOfRange { index: u64, count: u64 },
    #[error("file changed while reading (chunk {index} no longer matches)")]
    Modified { index: u64 },
}

/// Number of chunks needed for `size` bytes.
pub fn chunk_count(size: u64, chunk_size: usize) -> u64 {
    size.div_ceil(chunk_size as u64)
}

/// Length of chunk `index` in a file of `size` bytes.
/// Returns 0 for indices past the end.
pub fn chunk_len(size: u64, chunk_size: usize, index: u64) -> usize {
    let start = index.saturating_mul(chunk_size as u64);
    if start >= size {
        return 0;
    }
    (size - start).min(chunk_size as u64) as usize
}

/// Lazy iterator of chunks over any reader.
pub struct Chunker<R> {
    reader: R,
    chunk_size: usize,
    next_index: u64,
    done: bool,
}

impl<R: Read> Chunker<R> {
    pub fn new(reader: R, chunk_size: usize) -> Result<Self, ChunkError> {
        if chunk_size == 0 {
            return Err(ChunkError::ZeroChunkSize);
        }
        Ok(Self {
            reader,
            chunk_size,
            next_index: 0,
            done: false,
        })
    }

    /// Fill `buf` as far as the reader allows. Short only at end of stream.
    fn fill(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }
}

impl Chunker<File> {
    /// Open a file and chunk it.
    pub fn open(path: &Path, chunk_size: usize) -> Result<Self, ChunkError> {
        let file = File::open(path).map_err(|e| ChunkError::Open(path.to_path_buf(), e))?;
        Self::new(file, chunk_size)
    }
}

impl<R: Read> Iterator for Chunker<R> {
    type Item = Result<Chunk, ChunkError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut buf = vec![0u8; self.chunk_size];
        let index = self.next_index;
        match self.fill(&mut buf) {
            Ok(0) => {
                self.done = true;
                None
            }
            Ok(n) => {
                if n < self.chunk_size {
                    self.done = true;
                }
                buf.truncate(n);
                self.next_index += 1;
                Some(Ok(Chunk {
                    index,
                    data: Bytes::from(buf),
                }))
            }
            Err(source) => {
                self.done = true;
                Some(Err(ChunkError::Read { index, source }))
            }
        }
    }
}

/// Random access to the chunks of a file on disk.
///
/// Upload workers read chunk `i` on demand instead of holding the whole
/// file in memory.
#[derive(Debug, Clone)]
pub struct ChunkReader {
    path: PathBuf,
    size: u64,
    chunk_size: usize,
}

impl ChunkReader {
    pub fn open(path: &Path, chunk_size: usize) -> Result<Self, ChunkError> {
        if chunk_size == 0 {
            return Err(ChunkError::ZeroChunkSize);
        }
        let size = std::fs::metadata(path)
            .map_err(|e| ChunkError::Open(path.to_path_buf(), e))?
            .len();
        Ok(Self {
            path: path.to_path_buf(),
            size,
            chunk_size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn count(&self) -> u64 {
        chunk_count(self.size, self.chunk_size)
    }

    /// Read chunk `index` from disk.
    pub fn read(&self, index: u64) -> Result<Chunk, ChunkError> {
        let count = self.count();
        if index >= count {
            return Err(ChunkError::OutOfRange { index, count });
        }
        let len = chunk_len(self.size, self.chunk_size, index);
        let offset = index * self.chunk_size as u64;

        let mut file =
            File::open(&self.path).map_err(|e| ChunkError::Open(self.path.clone(), e))?;
        let mut buf = vec![0u8; len];
        file.seek(SeekFrom::Start(offset))
            .and_then(|_| file.read_exact(&mut buf))
            .map_err(|source| ChunkError::Read { index, source })?;

        Ok(Chunk {
            index,
            data: Bytes::from(buf),
        })
    }
}
