//! Bounded segment-file descriptor pool
//!
//! A multi-segment image can span thousands of files; the pool keeps at most
//! `max_open` of them open at once and evicts least-recently-used
//! descriptors. Registered segments are addressed by index, and each entry
//! caches its file position so sequential reads issue no redundant seeks.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use ewfkit_core::{Error, IoOp, Result};
use tracing::debug;

struct PoolEntry {
    path: PathBuf,
    file: Option<File>,
    /// Cached file position, valid while `file` is Some
    position: u64,
    writable: bool,
}

/// LRU-bounded pool of open segment files
pub struct IoPool {
    entries: Vec<PoolEntry>,
    /// Indices of currently open entries, most recently used last
    open_order: VecDeque<usize>,
    /// Maximum simultaneously open descriptors, 0 = unbounded
    max_open: usize,
}

impl IoPool {
    pub fn new(max_open: usize) -> Self {
        Self {
            entries: Vec::new(),
            open_order: VecDeque::new(),
            max_open,
        }
    }

    /// Register a segment file for reading; the descriptor is opened lazily.
    ///
    /// The file must exist: registration stats it so a missing segment fails
    /// at open time rather than mid-read.
    pub fn open(&mut self, path: &Path) -> Result<usize> {
        if !path.is_file() {
            return Err(Error::io(
                IoOp::Open,
                path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "no such segment file"),
            ));
        }
        self.entries.push(PoolEntry {
            path: path.to_path_buf(),
            file: None,
            position: 0,
            writable: false,
        });
        Ok(self.entries.len() - 1)
    }

    /// Register and create a segment file for writing (truncates)
    pub fn create(&mut self, path: &Path) -> Result<usize> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| Error::io(IoOp::Open, path, e))?;
        let index = self.entries.len();
        self.entries.push(PoolEntry {
            path: path.to_path_buf(),
            file: Some(file),
            position: 0,
            writable: true,
        });
        self.touch(index);
        self.evict_over_budget();
        Ok(index)
    }

    /// Number of registered segments
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Path of a registered segment
    pub fn path(&self, segment: usize) -> &Path {
        &self.entries[segment].path
    }

    /// Size in bytes of a registered segment file
    pub fn file_size(&mut self, segment: usize) -> Result<u64> {
        let path = self.check_segment(segment)?;
        std::fs::metadata(&path)
            .map(|m| m.len())
            .map_err(|e| Error::io(IoOp::Open, path, e))
    }

    /// Read exactly `buf.len()` bytes at `offset`
    pub fn read_exact_at(&mut self, segment: usize, offset: u64, buf: &mut [u8]) -> Result<()> {
        let read = self.read_at(segment, offset, buf)?;
        if read != buf.len() {
            let path = self.entries[segment].path.clone();
            return Err(Error::io(
                IoOp::Read,
                path,
                std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("short read: {} of {} bytes", read, buf.len()),
                ),
            ));
        }
        Ok(())
    }

    /// Read up to `buf.len()` bytes at `offset`, returning the count read
    pub fn read_at(&mut self, segment: usize, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let path = self.check_segment(segment)?;
        self.seek_to(segment, offset)?;
        let entry = &mut self.entries[segment];
        let file = entry.file.as_mut().unwrap();

        let mut total = 0;
        while total < buf.len() {
            match file.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::io(IoOp::Read, path, e)),
            }
        }
        entry.position = offset + total as u64;
        Ok(total)
    }

    /// Write all of `buf` at `offset`
    pub fn write_at(&mut self, segment: usize, offset: u64, buf: &[u8]) -> Result<usize> {
        let path = self.check_segment(segment)?;
        if !self.entries[segment].writable {
            return Err(Error::io(
                IoOp::Write,
                path,
                std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only segment"),
            ));
        }
        self.seek_to(segment, offset)?;
        let entry = &mut self.entries[segment];
        let file = entry.file.as_mut().unwrap();
        file.write_all(buf)
            .map_err(|e| Error::io(IoOp::Write, path, e))?;
        entry.position = offset + buf.len() as u64;
        Ok(buf.len())
    }

    /// Flush a writable segment
    pub fn flush(&mut self, segment: usize) -> Result<()> {
        let entry = &mut self.entries[segment];
        if let Some(file) = entry.file.as_mut() {
            let path = entry.path.clone();
            file.flush().map_err(|e| Error::io(IoOp::Write, path, e))?;
        }
        Ok(())
    }

    /// Close every open descriptor; registrations survive
    pub fn close_all(&mut self) {
        for entry in &mut self.entries {
            entry.file = None;
        }
        self.open_order.clear();
    }

    fn check_segment(&self, segment: usize) -> Result<PathBuf> {
        match self.entries.get(segment) {
            Some(entry) => Ok(entry.path.clone()),
            None => Err(Error::invalid_argument(format!(
                "segment index {} not registered",
                segment
            ))),
        }
    }

    /// Position the segment's descriptor at `offset`, opening it if needed.
    /// A no-op when the cached position already matches.
    fn seek_to(&mut self, segment: usize, offset: u64) -> Result<()> {
        self.ensure_open(segment)?;
        self.touch(segment);
        let entry = &mut self.entries[segment];
        if entry.position != offset {
            entry
                .file
                .as_mut()
                .unwrap()
                .seek(SeekFrom::Start(offset))
                .map_err(|e| Error::io(IoOp::Seek, entry.path.clone(), e))?;
            entry.position = offset;
        }
        Ok(())
    }

    fn ensure_open(&mut self, segment: usize) -> Result<()> {
        if self.entries[segment].file.is_some() {
            return Ok(());
        }
        let entry = &mut self.entries[segment];
        let file = if entry.writable {
            OpenOptions::new()
                .read(true)
                .write(true)
                .open(&entry.path)
                .map_err(|e| Error::io(IoOp::Open, entry.path.clone(), e))?
        } else {
            File::open(&entry.path).map_err(|e| Error::io(IoOp::Open, entry.path.clone(), e))?
        };
        entry.file = Some(file);
        entry.position = 0;
        self.open_order.push_back(segment);
        self.evict_over_budget();
        Ok(())
    }

    /// Move `segment` to the most-recently-used end of the queue
    fn touch(&mut self, segment: usize) {
        if let Some(pos) = self.open_order.iter().position(|&i| i == segment) {
            self.open_order.remove(pos);
        }
        self.open_order.push_back(segment);
    }

    fn evict_over_budget(&mut self) {
        if self.max_open == 0 {
            return;
        }
        while self.open_order.len() > self.max_open {
            if let Some(victim) = self.open_order.pop_front() {
                debug!(segment = victim, "evicting segment descriptor");
                self.entries[victim].file = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_missing_file() {
        let mut pool = IoPool::new(4);
        let result = pool.open(Path::new("/nonexistent/disk.E01"));
        assert!(matches!(result, Err(Error::Io { op: IoOp::Open, .. })));
    }

    #[test]
    fn test_read_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg.E01");
        std::fs::write(&path, b"0123456789").unwrap();

        let mut pool = IoPool::new(4);
        let seg = pool.open(&path).unwrap();

        let mut buf = [0u8; 4];
        pool.read_exact_at(seg, 3, &mut buf).unwrap();
        assert_eq!(&buf, b"3456");
        assert_eq!(pool.file_size(seg).unwrap(), 10);
    }

    #[test]
    fn test_short_read_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg.E01");
        std::fs::write(&path, b"abc").unwrap();

        let mut pool = IoPool::new(4);
        let seg = pool.open(&path).unwrap();
        let mut buf = [0u8; 8];
        assert!(pool.read_exact_at(seg, 0, &mut buf).is_err());
        assert_eq!(pool.read_at(seg, 0, &mut buf).unwrap(), 3);
    }

    #[test]
    fn test_lru_eviction_keeps_reads_working() {
        let dir = tempdir().unwrap();
        let mut pool = IoPool::new(2);
        let mut segments = Vec::new();
        for i in 0..5 {
            let path = dir.path().join(format!("seg{}.E01", i));
            std::fs::write(&path, vec![i as u8; 16]).unwrap();
            segments.push(pool.open(&path).unwrap());
        }
        // Cycle through all segments twice; only 2 fds may be open at a time
        for _ in 0..2 {
            for (i, &seg) in segments.iter().enumerate() {
                let mut buf = [0u8; 16];
                pool.read_exact_at(seg, 0, &mut buf).unwrap();
                assert_eq!(buf, [i as u8; 16]);
            }
        }
        assert!(pool.open_order.len() <= 2);
    }

    #[test]
    fn test_write_then_read_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.E01");
        let mut pool = IoPool::new(0);
        let seg = pool.create(&path).unwrap();
        pool.write_at(seg, 0, b"header__").unwrap();
        pool.write_at(seg, 8, b"payload!").unwrap();
        pool.flush(seg).unwrap();

        let mut buf = [0u8; 16];
        pool.read_exact_at(seg, 0, &mut buf).unwrap();
        assert_eq!(&buf, b"header__payload!");
    }

    #[test]
    fn test_write_to_readonly_segment() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seg.E01");
        std::fs::write(&path, b"data").unwrap();
        let mut pool = IoPool::new(4);
        let seg = pool.open(&path).unwrap();
        assert!(pool.write_at(seg, 0, b"x").is_err());
    }
}
