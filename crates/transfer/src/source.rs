//! Range reads from the local file being uploaded.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use crate::plan::ByteRange;

/// File handle that serves chunk reads by absolute offset.
///
/// Every read seeks to the range start, so the same range can be re-read for
/// a retry regardless of what was read before.
#[derive(Debug)]
pub struct ChunkSource {
    file: File,
    len: u64,
}

impl ChunkSource {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self { file, len })
    }

    /// Length of the file at open time.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Reads exactly the bytes of `range`. Fails with `UnexpectedEof` if the
    /// file has shrunk underneath the transfer.
    pub fn read_range(&mut self, range: ByteRange) -> io::Result<Vec<u8>> {
        self.file.seek(SeekFrom::Start(range.start))?;
        let mut buf = vec![0u8; range.len() as usize];
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }
}
