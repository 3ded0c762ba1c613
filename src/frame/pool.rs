//! Fixed-capacity buffer pool for frame copies.
//!
//! The driver's RX callback hands over a descriptor image that is only valid
//! for the duration of the call, so anything the worker will look at later
//! must be copied out first. The pool bounds both the copy size and the
//! number of in-flight copies; when it runs dry the frame is dropped and
//! counted, never queued by reference.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Number of buffers a session's pool holds.
pub const POOL_BUFFERS: usize = 8;

/// Size of each pool buffer. Descriptor images larger than this are dropped;
/// no sub-protocol frame comes close to it.
pub const POOL_BUFFER_LEN: usize = 1024;

type FreeList = Arc<Mutex<Vec<Box<[u8]>>>>;

/// Why a frame copy was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyError {
    /// Every buffer is checked out.
    Exhausted,
    /// The source is larger than one buffer.
    Oversize { len: usize, max: usize },
}

impl fmt::Display for CopyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted => write!(f, "frame pool exhausted"),
            Self::Oversize { len, max } => {
                write!(f, "frame too large for pool: {} bytes (max {})", len, max)
            }
        }
    }
}

impl std::error::Error for CopyError {}

/// Shared pool of fixed-size frame buffers.
///
/// Cloning shares the same buffers. Buffers return to the pool when the
/// [`PooledFrame`] holding them drops.
#[derive(Clone)]
pub struct FramePool {
    free: FreeList,
    buffer_len: usize,
    capacity: usize,
}

impl FramePool {
    /// Create a pool with `buffers` buffers of `buffer_len` bytes each.
    pub fn new(buffers: usize, buffer_len: usize) -> Self {
        let free = (0..buffers)
            .map(|_| vec![0u8; buffer_len].into_boxed_slice())
            .collect();
        Self {
            free: Arc::new(Mutex::new(free)),
            buffer_len,
            capacity: buffers,
        }
    }

    /// Check out an empty buffer at full length.
    pub fn acquire(&self) -> Result<PooledFrame, CopyError> {
        let buf = self
            .lock_free()
            .pop()
            .ok_or(CopyError::Exhausted)?;
        Ok(PooledFrame {
            free: self.free.clone(),
            buf: Some(buf),
            len: 0,
        })
    }

    /// Copy `src` into a checked-out buffer.
    pub fn copy_from(&self, src: &[u8]) -> Result<PooledFrame, CopyError> {
        if src.len() > self.buffer_len {
            return Err(CopyError::Oversize {
                len: src.len(),
                max: self.buffer_len,
            });
        }
        let mut frame = self.acquire()?;
        frame.write(src);
        Ok(frame)
    }

    /// Buffers currently available.
    pub fn available(&self) -> usize {
        self.lock_free().len()
    }

    /// Total buffers the pool was created with.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock_free(&self) -> std::sync::MutexGuard<'_, Vec<Box<[u8]>>> {
        // A panic while holding the lock leaves the list intact, keep going
        self.free.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for FramePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FramePool")
            .field("capacity", &self.capacity)
            .field("available", &self.available())
            .field("buffer_len", &self.buffer_len)
            .finish()
    }
}

/// A checked-out pool buffer holding one frame copy.
pub struct PooledFrame {
    free: FreeList,
    buf: Option<Box<[u8]>>,
    len: usize,
}

impl PooledFrame {
    /// The copied bytes.
    pub fn bytes(&self) -> &[u8] {
        match &self.buf {
            Some(buf) => &buf[..self.len],
            None => &[],
        }
    }

    /// Current copy length.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when nothing has been written yet.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Replace the contents with `src`, which must fit the buffer.
    pub fn write(&mut self, src: &[u8]) {
        if let Some(buf) = &mut self.buf {
            let n = src.len().min(buf.len());
            buf[..n].copy_from_slice(&src[..n]);
            self.len = n;
        }
    }

    /// Mutable access to the whole buffer for in-place assembly.
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        match &mut self.buf {
            Some(buf) => &mut buf[..],
            None => &mut [],
        }
    }

    /// Set the valid length after in-place assembly, clamped to the buffer.
    pub fn set_len(&mut self, len: usize) {
        let max = self.buf.as_ref().map(|b| b.len()).unwrap_or(0);
        self.len = len.min(max);
    }
}

impl fmt::Debug for PooledFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledFrame").field("len", &self.len).finish()
    }
}

impl Drop for PooledFrame {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.free
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(buf);
        }
    }
}
