//! Single-producer / multi-consumer broadcast ring.
//!
//! A [`Ring`] is a fixed array of `CNT` slots (`CNT` a power of two,
//! checked at compile time). Exactly one [`Writer`] publishes into it and
//! any number of [`Reader`]s observe it, each at its own pace, with no
//! coordination between readers and no back-pressure on the writer.
//!
//! # Publication protocol
//!
//! Each slot carries the sequence number of the value it currently holds.
//! Publishing sequence `s` writes the payload into slot `s % CNT` and then
//! release-stores `s` into the slot's sequence field; a reader that
//! acquire-loads the same sequence is guaranteed to see the fully written
//! payload. Sequence numbers are compared with signed 32-bit arithmetic,
//! so `u32` roll-over never produces a false "data ready".
//!
//! # Overwrite behavior
//!
//! The writer never waits. A reader that falls behind by `CNT` or more is
//! lapped: its next observation jumps forward to whatever the slot holds
//! now, silently skipping the overwritten messages. Reads copy the payload
//! out and then re-validate the slot sequence, so a message overwritten
//! mid-copy is discarded and re-read rather than delivered torn.

use std::cell::{Cell, UnsafeCell};
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crossbeam_utils::CachePadded;

/// One ring cell: publication sequence number plus payload.
///
/// Aligned to 64 bytes so neighbouring slots never share a cache line.
#[repr(C, align(64))]
struct Slot<T> {
    seq: AtomicU32,
    payload: UnsafeCell<T>,
}

/// Fixed-capacity broadcast buffer shared between one [`Writer`] and any
/// number of [`Reader`]s.
///
/// Constructed behind an [`Arc`]; reader and writer handles keep the ring
/// alive from their own threads.
pub struct Ring<T, const CNT: usize> {
    slots: Box<[Slot<T>]>,
    /// The writer's hot counter, padded onto its own cache-line region so
    /// bumping it never invalidates a line shared with slot storage.
    write_idx: CachePadded<AtomicU32>,
    writer_taken: AtomicBool,
}

// Slots hold an `UnsafeCell`, so `Sync` must be promised by hand: the
// publication protocol above is what makes concurrent access sound.
unsafe impl<T: Send, const CNT: usize> Sync for Ring<T, CNT> {}

impl<T: Copy + Default, const CNT: usize> Ring<T, CNT> {
    /// Allocates a ring with every slot holding `T::default()` at
    /// sequence zero (the "never written" state).
    pub fn new() -> Arc<Self> {
        const {
            assert!(CNT.is_power_of_two() && CNT > 1, "ring depth must be a power of two");
        }
        let mut slots = Vec::with_capacity(CNT);
        slots.resize_with(CNT, || Slot {
            seq: AtomicU32::new(0),
            payload: UnsafeCell::new(T::default()),
        });
        Arc::new(Self {
            slots: slots.into_boxed_slice(),
            write_idx: CachePadded::new(AtomicU32::new(0)),
            writer_taken: AtomicBool::new(false),
        })
    }

    #[inline(always)]
    fn slot(&self, seq: u32) -> &Slot<T> {
        // CNT is a power of two, so the modulo lowers to a mask.
        &self.slots[seq as usize & (CNT - 1)]
    }

    /// Sequence number of the most recently published message, or zero if
    /// nothing has been published yet.
    #[inline]
    pub fn last_seq(&self) -> u32 {
        self.write_idx.load(Ordering::Acquire)
    }
}

/// Exclusive publish handle for a [`Ring`].
///
/// Neither `Clone` nor `Sync`: at most one thread at a time can call
/// [`Writer::write`], which is exactly the single-writer invariant the
/// ring's protocol assumes.
pub struct Writer<T, const CNT: usize> {
    ring: Arc<Ring<T, CNT>>,
    _not_sync: PhantomData<Cell<()>>,
}

impl<T: Copy + Default, const CNT: usize> Writer<T, CNT> {
    /// Claims the ring's single publish handle.
    ///
    /// Returns `Some` exactly once per ring; every later call returns
    /// `None`, and the handle is never re-issued. Ownership of the
    /// `Writer` is what proves the single-producer invariant; there is
    /// no runtime detection of concurrent writers beyond this.
    pub fn claim(ring: &Arc<Ring<T, CNT>>) -> Option<Self> {
        ring.writer_taken
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
            .then(|| Self {
                ring: Arc::clone(ring),
                _not_sync: PhantomData,
            })
    }

    /// Publishes `value` and returns its sequence number.
    ///
    /// Never blocks and never fails. When the ring is full the oldest
    /// message is overwritten; it is the readers' job to keep up if loss
    /// is unacceptable.
    #[inline(always)]
    pub fn write(&self, value: T) -> u32 {
        let ring = &*self.ring;
        let new_seq = ring.write_idx.load(Ordering::Relaxed).wrapping_add(1);
        let slot = ring.slot(new_seq);
        unsafe { slot.payload.get().write(value) };
        // Publication fence: a reader that acquire-loads this sequence is
        // guaranteed to see the payload written above.
        slot.seq.store(new_seq, Ordering::Release);
        ring.write_idx.store(new_seq, Ordering::Release);
        new_seq
    }
}

/// Per-consumer cursor over a [`Ring`].
///
/// Each reader advances independently; cloning one yields a second cursor
/// that continues from the same position. A reader is not meant to be
/// shared between threads; give each consumer its own.
pub struct Reader<T, const CNT: usize> {
    ring: Arc<Ring<T, CNT>>,
    next_idx: u32,
}

impl<T, const CNT: usize> Clone for Reader<T, CNT> {
    fn clone(&self) -> Self {
        Self {
            ring: Arc::clone(&self.ring),
            next_idx: self.next_idx,
        }
    }
}

impl<T: Copy + Default, const CNT: usize> Reader<T, CNT> {
    /// Creates an independent cursor positioned just past the newest
    /// published message: the reader observes future messages only.
    pub fn new(ring: &Arc<Ring<T, CNT>>) -> Self {
        Self {
            next_idx: ring.last_seq().wrapping_add(1),
            ring: Arc::clone(ring),
        }
    }

    /// Returns the next unobserved message, or `None` when the ring holds
    /// nothing newer than this cursor.
    ///
    /// The payload is copied out and the slot sequence re-checked before
    /// the copy is accepted; an overwrite that lands mid-copy discards the
    /// copy and the loop retries against the slot's newer content. When
    /// the writer has lapped this reader, the returned sequence jumps
    /// ahead of the cursor and the skipped messages are dropped silently.
    ///
    /// Observed sequences are strictly increasing; no sequence is ever
    /// returned twice.
    #[inline]
    pub fn read(&mut self) -> Option<(u32, T)> {
        loop {
            let wanted = self.next_idx;
            let slot = self.ring.slot(wanted);
            let seq = slot.seq.load(Ordering::Acquire);
            if behind(seq, wanted) {
                return None;
            }
            let value = unsafe { slot.payload.get().read() };
            // Re-validate: if the writer overwrote the slot during the
            // copy, the sequence has moved on and the copy may be torn.
            if slot.seq.load(Ordering::Acquire) == seq {
                self.next_idx = seq.wrapping_add(1);
                return Some((seq, value));
            }
        }
    }

    /// Drains everything pending and returns only the newest observation,
    /// for consumers that care about the latest sample rather than the
    /// full stream.
    pub fn read_last(&mut self) -> Option<(u32, T)> {
        let mut last = None;
        while let Some(cur) = self.read() {
            last = Some(cur);
        }
        last
    }
}

/// `true` when `observed` precedes `wanted` in 32-bit sequence space.
///
/// Signed-difference comparison, so sequence roll-over keeps ordering
/// intact as long as the two values are within `i32::MAX` of each other.
#[inline(always)]
fn behind(observed: u32, wanted: u32) -> bool {
    (observed.wrapping_sub(wanted) as i32) < 0
}
