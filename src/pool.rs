//! Staging buffers and where they come from.
//!
//! Every stream needs two buffers: one for compressed bytes pulled from the source and one for
//! decoded bytes waiting to be read. Creating lots of short-lived streams means allocating and
//! freeing those over and over, which a [`BufferPool`] can avoid. Pools are optional: without one
//! a stream simply allocates its buffers ([`Unpooled`]) and nothing else changes.

use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

/// What a buffer is going to be used for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferKind {
    /// Compressed bytes read from the source.
    Input,
    /// Decoded bytes not yet handed to the reader.
    Output,
}

impl BufferKind {
    fn index(self) -> usize {
        match self {
            BufferKind::Input => 0,
            BufferKind::Output => 1,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("no {kind:?} buffer available, {outstanding} are checked out already")]
    Exhausted { kind: BufferKind, outstanding: usize },
    #[error("got a {kind:?} buffer of {got} bytes but at least {wanted} are needed")]
    Undersized { kind: BufferKind, wanted: usize, got: usize },
    #[error("a {kind:?} buffer came back that was never handed out")]
    Foreign { kind: BufferKind },
}

/// Hands out and takes back staging buffers.
///
/// The usable size of a buffer is its *length* (not its `Vec` capacity). A stream checks out one
/// buffer of each kind on its first read and gives both back exactly once when it is closed or
/// dropped.
pub trait BufferPool {
    fn acquire(&self, kind: BufferKind, capacity: usize) -> Result<Vec<u8>, PoolError>;
    fn release(&self, kind: BufferKind, buffer: Vec<u8>) -> Result<(), PoolError>;
}

impl<P: BufferPool + ?Sized> BufferPool for &P {
    fn acquire(&self, kind: BufferKind, capacity: usize) -> Result<Vec<u8>, PoolError> {
        (**self).acquire(kind, capacity)
    }
    fn release(&self, kind: BufferKind, buffer: Vec<u8>) -> Result<(), PoolError> {
        (**self).release(kind, buffer)
    }
}

impl<P: BufferPool + ?Sized> BufferPool for Arc<P> {
    fn acquire(&self, kind: BufferKind, capacity: usize) -> Result<Vec<u8>, PoolError> {
        (**self).acquire(kind, capacity)
    }
    fn release(&self, kind: BufferKind, buffer: Vec<u8>) -> Result<(), PoolError> {
        (**self).release(kind, buffer)
    }
}

/// No pool at all: every buffer is freshly allocated and freed on release.
#[derive(Clone, Copy, Debug, Default)]
pub struct Unpooled;

impl BufferPool for Unpooled {
    fn acquire(&self, _kind: BufferKind, capacity: usize) -> Result<Vec<u8>, PoolError> {
        Ok(vec![0; capacity])
    }
    fn release(&self, _kind: BufferKind, _buffer: Vec<u8>) -> Result<(), PoolError> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Shelf {
    idle: Vec<Vec<u8>>,
    outstanding: usize,
}

/// A pool that keeps released buffers around for the next stream.
///
/// It is `Sync`, so wrap it in an `Arc` (or lend out `&RecyclingPool`) to share it between
/// streams on any number of threads.
#[derive(Debug)]
pub struct RecyclingPool {
    shelves: Mutex<[Shelf; 2]>,
    max_idle: usize,
    max_outstanding: Option<usize>,
}

impl Default for RecyclingPool {
    fn default() -> Self {
        RecyclingPool::new(16)
    }
}

impl RecyclingPool {
    /// Keep at most `max_idle` released buffers of each kind, drop the rest.
    pub fn new(max_idle: usize) -> Self {
        RecyclingPool {
            shelves: Mutex::new([Shelf::default(), Shelf::default()]),
            max_idle,
            max_outstanding: None,
        }
    }

    /// Refuse to hand out more than `limit` buffers of one kind at the same time.
    pub fn with_limit(max_idle: usize, limit: usize) -> Self {
        RecyclingPool {
            max_outstanding: Some(limit),
            ..RecyclingPool::new(max_idle)
        }
    }

    /// Number of released buffers of `kind` waiting for reuse.
    pub fn idle(&self, kind: BufferKind) -> usize {
        self.shelves.lock().unwrap_or_else(PoisonError::into_inner)[kind.index()].idle.len()
    }

    /// Number of buffers of `kind` currently checked out.
    pub fn outstanding(&self, kind: BufferKind) -> usize {
        self.shelves.lock().unwrap_or_else(PoisonError::into_inner)[kind.index()].outstanding
    }
}

impl BufferPool for RecyclingPool {
    fn acquire(&self, kind: BufferKind, capacity: usize) -> Result<Vec<u8>, PoolError> {
        let mut shelves = self.shelves.lock().unwrap_or_else(PoisonError::into_inner);
        let shelf = &mut shelves[kind.index()];
        if let Some(limit) = self.max_outstanding {
            if shelf.outstanding >= limit {
                return Err(PoolError::Exhausted { kind, outstanding: shelf.outstanding });
            }
        }

        let buffer = match shelf.idle.iter().position(|b| b.len() >= capacity) {
            Some(i) => shelf.idle.swap_remove(i),
            None => vec![0; capacity],
        };
        shelf.outstanding += 1;
        Ok(buffer)
    }

    fn release(&self, kind: BufferKind, buffer: Vec<u8>) -> Result<(), PoolError> {
        let mut shelves = self.shelves.lock().unwrap_or_else(PoisonError::into_inner);
        let shelf = &mut shelves[kind.index()];
        if shelf.outstanding == 0 {
            return Err(PoolError::Foreign { kind });
        }
        shelf.outstanding -= 1;
        if shelf.idle.len() < self.max_idle {
            shelf.idle.push(buffer);
        }
        Ok(())
    }
}

/// A checked-out buffer plus the window of it that holds live bytes.
#[derive(Debug)]
pub(crate) struct StagingBuffer {
    data: Vec<u8>,
    pos: usize,
    end: usize,
}

impl StagingBuffer {
    /// Check out a buffer, rejecting pools that hand out less than asked for.
    pub fn checkout<P: BufferPool>(pool: &P, kind: BufferKind, capacity: usize) -> Result<Self, PoolError> {
        let data = pool.acquire(kind, capacity)?;
        if data.len() < capacity {
            let got = data.len();
            // the pool is broken anyway, don't let a second error hide the first
            let _ = pool.release(kind, data);
            return Err(PoolError::Undersized { kind, wanted: capacity, got });
        }
        Ok(StagingBuffer { data, pos: 0, end: 0 })
    }

    pub fn into_inner(self) -> Vec<u8> { self.data }

    /// Live bytes.
    pub fn filled(&self) -> &[u8] { &self.data[self.pos..self.end] }

    /// Room behind the live bytes.
    pub fn spare(&mut self) -> &mut [u8] { &mut self.data[self.end..] }

    pub fn len(&self) -> usize { self.end - self.pos }

    pub fn is_empty(&self) -> bool { self.pos == self.end }

    /// Mark `n` bytes of `spare()` as live.
    pub fn commit(&mut self, n: usize) {
        self.end += n;
        debug_assert!(self.end <= self.data.len());
    }

    /// Drop `n` live bytes from the front.
    pub fn consume(&mut self, n: usize) {
        self.pos += n;
        assert!(self.pos <= self.end, "consumed more bytes than there are");
        if self.pos == self.end {
            self.pos = 0;
            self.end = 0;
        }
    }

    /// Move the live bytes to the front so `spare()` is as large as it gets.
    pub fn compact(&mut self) {
        if self.pos != 0 {
            self.data.copy_within(self.pos..self.end, 0);
            self.end -= self.pos;
            self.pos = 0;
        }
    }
}
