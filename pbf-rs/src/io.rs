//! Shared file handle
//!
//! A PBF reader owns exactly one file handle. Every seek+read sequence runs
//! inside [`SharedFile::with_lock`], so a cursor is never reachable outside the
//! lock and two threads can never interleave seeks.

use anyhow::{anyhow, Context, Result};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::cache::XicCache;

/// Everything guarded by the file lock
#[derive(Debug)]
pub(crate) struct FileState {
    pub reader: BufReader<File>,
    pub xic_cache: XicCache,
}

#[derive(Debug)]
pub(crate) struct SharedFile {
    path: PathBuf,
    len: u64,
    state: Mutex<FileState>,
}

impl SharedFile {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("can't open {}", path.display()))?;
        let len = file.metadata().with_context(|| format!("can't stat {}", path.display()))?.len();

        Ok(Self {
            path: path.to_path_buf(),
            len,
            state: Mutex::new(FileState { reader: BufReader::new(file), xic_cache: XicCache::new() }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    /// Run `f` while holding the file lock.
    pub fn with_lock<T>(&self, f: impl FnOnce(&mut FileState) -> Result<T>) -> Result<T> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow!("file lock poisoned for {}", self.path.display()))?;
        f(&mut state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Seek, SeekFrom, Write};
    use std::sync::Arc;

    #[test]
    fn test_locked_reads_from_threads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bytes.bin");
        let content: Vec<u8> = (0..=255u8).collect();
        File::create(&path).unwrap().write_all(&content).unwrap();

        let shared = Arc::new(SharedFile::open(&path).unwrap());
        assert_eq!(shared.len(), 256);

        let handles: Vec<_> = (0..8u64)
            .map(|t| {
                let shared = Arc::clone(&shared);
                std::thread::spawn(move || {
                    for i in 0..200u64 {
                        let offset = (t * 31 + i * 7) % 250;
                        let bytes = shared
                            .with_lock(|state| {
                                let mut raw = [0u8; 4];
                                state.reader.seek(SeekFrom::Start(offset))?;
                                state.reader.read_exact(&mut raw)?;
                                Ok(raw)
                            })
                            .unwrap();
                        assert_eq!(bytes[0] as u64, offset);
                        assert_eq!(bytes[3] as u64, offset + 3);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = SharedFile::open(&dir.path().join("missing.pbf")).unwrap_err();
        assert!(err.to_string().contains("missing.pbf"));
    }
}
