//! Packet buffers and the fixed-capacity pool
//!
//! # Design
//!
//! - Pre-allocated buffer store, constructed once and never resized
//! - Min-heap free list: `alloc` always returns the smallest free index,
//!   which keeps hot buffers hot in cache
//! - Exhaustion is an explicit error; the pool never blocks or spins
//!
//! Every index is in exactly one of two places at any time: on the free heap,
//! or owned by the worker that allocated it. That exclusivity is what makes
//! handing out `&mut Buffer` from a shared pool sound.

use std::cell::UnsafeCell;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::{BUFFER_SIZE, DEFAULT_POOL_SIZE, METADATA_SIZE};

/// A pooled packet buffer: the raw frame region plus the per-packet metadata
/// region addressed in parallel with it.
pub struct Buffer {
    id: u32,
    len: u16,
    data: [u8; BUFFER_SIZE],
    metadata: [u8; METADATA_SIZE],
}

impl Buffer {
    fn new(id: u32) -> Self {
        Self {
            id,
            len: 0,
            data: [0; BUFFER_SIZE],
            metadata: [0; METADATA_SIZE],
        }
    }

    /// Pool index of this buffer
    #[inline(always)]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Length of the stored frame in bytes
    #[inline(always)]
    pub fn len(&self) -> u16 {
        self.len
    }

    /// True when no frame has been stored
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copy a frame into the buffer. The frame must fit in [`BUFFER_SIZE`];
    /// callers validate that before allocating.
    pub fn fill(&mut self, frame: &[u8]) {
        debug_assert!(frame.len() <= BUFFER_SIZE);
        self.data[..frame.len()].copy_from_slice(frame);
        self.len = frame.len() as u16;
    }

    /// The stored frame
    #[inline(always)]
    pub fn frame(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    /// The metadata region
    #[inline(always)]
    pub fn metadata(&self) -> &[u8] {
        &self.metadata
    }

    /// Split into the packet and metadata regions
    pub(crate) fn split_mut(&mut self) -> (&mut [u8], &mut [u8]) {
        (&mut self.data, &mut self.metadata)
    }

    fn reset(&mut self) {
        self.len = 0;
        self.metadata = [0; METADATA_SIZE];
    }
}

/// Fixed-capacity buffer pool with a min-index free list
pub struct Pool {
    slots: Box<[UnsafeCell<Buffer>]>,
    free: Mutex<BinaryHeap<Reverse<u32>>>,
}

// An index is either on the free heap or owned by exactly one worker, so the
// `&mut Buffer` handed out by `alloc` never aliases.
unsafe impl Send for Pool {}
unsafe impl Sync for Pool {}

impl Pool {
    /// Build a pool of `capacity` buffers, all initially free
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        let mut free = BinaryHeap::with_capacity(capacity);
        for i in 0..capacity {
            slots.push(UnsafeCell::new(Buffer::new(i as u32)));
            free.push(Reverse(i as u32));
        }
        Self {
            slots: slots.into_boxed_slice(),
            free: Mutex::new(free),
        }
    }

    /// Pool with the default capacity of [`DEFAULT_POOL_SIZE`] buffers
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_POOL_SIZE)
    }

    /// Take the free buffer with the smallest index.
    ///
    /// The buffer comes back reset: zero length, metadata zeroed. Fails with
    /// [`Error::PoolExhausted`] when the free heap is empty.
    pub fn alloc(&self) -> Result<&mut Buffer> {
        let Reverse(id) = self.free.lock().pop().ok_or(Error::PoolExhausted)?;
        // `id` was just removed from the free heap, so this slot is ours.
        let buf = unsafe { &mut *self.slots[id as usize].get() };
        buf.reset();
        Ok(buf)
    }

    /// Return a buffer index to the free heap.
    ///
    /// Deallocating an index that is already free is a programmer error.
    pub fn dealloc(&self, id: u32) {
        debug_assert!((id as usize) < self.slots.len(), "index {id} out of range");
        let mut free = self.free.lock();
        debug_assert!(
            free.iter().all(|&Reverse(i)| i != id),
            "buffer {id} deallocated twice"
        );
        free.push(Reverse(id));
    }

    /// Direct handle to the buffer at `id`.
    ///
    /// # Safety
    ///
    /// The caller must hold the allocation for `id`, or otherwise guarantee
    /// that no other reference to this slot is live.
    pub unsafe fn get(&self, id: u32) -> &mut Buffer {
        &mut *self.slots[id as usize].get()
    }

    /// Total number of buffers
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of buffers currently on the free heap
    pub fn available(&self) -> usize {
        self.free.lock().len()
    }
}
