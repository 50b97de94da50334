//! Spill-to-disk buffering for large bodies and uploads.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, Read, Write},
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use bytes::{Bytes, BytesMut};

/// A temporary file removed from disk when dropped.
#[derive(Debug)]
pub struct SpillFile {
    path: PathBuf,
    len: u64,
}

impl SpillFile {
    fn create(dir: &Path) -> io::Result<(Self, File)> {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        let seq = NEXT.fetch_add(1, Ordering::Relaxed);
        let path = dir.join(format!("wirechain-{}-{seq}.spill", std::process::id()));
        let file = OpenOptions::new().write(true).create_new(true).open(&path)?;
        log::debug!("spilling body to {}", path.display());
        Ok((Self { path, len: 0 }, file))
    }

    /// Location of the file on disk.
    #[must_use]
    pub fn path(&self) -> &Path { &self.path }

    /// Number of bytes written to the file.
    #[must_use]
    pub fn len(&self) -> u64 { self.len }

    /// Whether the file is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.len == 0 }
}

impl Drop for SpillFile {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove spill file");
            }
            _ => {}
        }
    }
}

/// Payload owned by a decoded message: in memory or spilled to disk.
#[derive(Debug)]
pub enum Body {
    /// Payload held in memory.
    Memory(Bytes),
    /// Payload stored in a temporary file deleted when the body is dropped.
    File(SpillFile),
}

impl Default for Body {
    fn default() -> Self { Self::Memory(Bytes::new()) }
}

impl Body {
    /// Payload length in bytes.
    #[must_use]
    pub fn len(&self) -> u64 {
        match self {
            Self::Memory(b) => b.len() as u64,
            Self::File(f) => f.len(),
        }
    }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Whether the payload lives on disk.
    #[must_use]
    pub fn is_spilled(&self) -> bool { matches!(self, Self::File(_)) }

    /// Path of the spill file, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Memory(_) => None,
            Self::File(f) => Some(f.path()),
        }
    }

    /// Borrow the in-memory payload, if not spilled.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Memory(b) => Some(b),
            Self::File(_) => None,
        }
    }

    /// Read the whole payload into memory.
    ///
    /// # Errors
    ///
    /// Returns an error if the spill file cannot be read.
    pub fn to_vec(&self) -> io::Result<Vec<u8>> {
        match self {
            Self::Memory(b) => Ok(b.to_vec()),
            Self::File(f) => {
                let mut out = Vec::new();
                File::open(f.path())?.read_to_end(&mut out)?;
                Ok(out)
            }
        }
    }
}

enum Storage {
    Memory(BytesMut),
    File(SpillFile, File),
}

/// Accumulates a payload, moving it to a temporary file once it grows past
/// `threshold` bytes.
pub struct SpillBuffer {
    threshold: usize,
    dir: PathBuf,
    storage: Storage,
}

impl SpillBuffer {
    /// Create an empty buffer spilling into `dir`.
    #[must_use]
    pub fn new(threshold: usize, dir: impl Into<PathBuf>) -> Self {
        Self {
            threshold,
            dir: dir.into(),
            storage: Storage::Memory(BytesMut::new()),
        }
    }

    /// Bytes written so far.
    #[must_use]
    pub fn len(&self) -> u64 {
        match &self.storage {
            Storage::Memory(b) => b.len() as u64,
            Storage::File(f, _) => f.len(),
        }
    }

    /// Whether nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Whether the buffer has moved to disk.
    #[must_use]
    pub fn is_spilled(&self) -> bool { matches!(self.storage, Storage::File(..)) }

    /// Append `data`, spilling to disk when the threshold is crossed.
    ///
    /// # Errors
    ///
    /// Returns an error if the spill file cannot be created or written.
    pub fn write(&mut self, data: &[u8]) -> io::Result<()> {
        if let Storage::Memory(buf) = &mut self.storage {
            if buf.len() + data.len() <= self.threshold {
                buf.extend_from_slice(data);
                return Ok(());
            }
            let (mut spill, mut file) = SpillFile::create(&self.dir)?;
            file.write_all(&buf[..])?;
            spill.len = buf.len() as u64;
            self.storage = Storage::File(spill, file);
        }
        if let Storage::File(spill, file) = &mut self.storage {
            file.write_all(data)?;
            spill.len += data.len() as u64;
        }
        Ok(())
    }

    /// Discard the contents, deleting any spill file.
    pub fn clear(&mut self) { self.storage = Storage::Memory(BytesMut::new()); }

    /// Hand the contents over as a [`Body`], leaving this buffer empty.
    ///
    /// # Errors
    ///
    /// Returns an error if a spill file cannot be flushed.
    pub fn take_body(&mut self) -> io::Result<Body> {
        match std::mem::replace(&mut self.storage, Storage::Memory(BytesMut::new())) {
            Storage::Memory(buf) => Ok(Body::Memory(buf.freeze())),
            Storage::File(spill, mut file) => {
                file.flush()?;
                Ok(Body::File(spill))
            }
        }
    }
}

impl std::fmt::Debug for SpillBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpillBuffer")
            .field("threshold", &self.threshold)
            .field("len", &self.len())
            .field("spilled", &self.is_spilled())
            .finish()
    }
}
