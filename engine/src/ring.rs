//! Command/result ring pair.
//!
//! Submission and drain each advance *both* rings in lockstep: putting a
//! command descriptor also claims the result slot the engine will complete
//! into, and fetching a result also retires the matching command slot. One
//! writer lock serializes submitters, one reader lock serializes the drain;
//! the two sides never contend with each other - the only cross-cutting
//! state is the atomic free-slot counter.

use core::mem::size_of;
use core::ptr::{self, NonNull};

use dma_ring::{FreeSlots, SlotRing, StatePool};
use spin::Mutex;

use crate::desc::Descriptor;
use crate::error::Result;
use crate::platform::DmaRegion;

pub struct RingPair {
    /// Command descriptor ring.
    pub(crate) cdr: SlotRing,
    /// Result descriptor ring.
    pub(crate) rdr: SlotRing,
    /// Serializes submission-side cursor advances on both rings.
    write_lock: Mutex<()>,
    /// Serializes drain-side cursor advances on both rings.
    read_lock: Mutex<()>,
    /// Flow-control counter shared by both sides.
    free: FreeSlots,
}

impl RingPair {
    /// Build the pair over two freshly allocated coherent regions.
    ///
    /// # Safety
    /// Both regions must be at least `capacity * size_of::<Descriptor>()`
    /// bytes and stay valid for the lifetime of the pair.
    pub unsafe fn new(cdr: &DmaRegion, rdr: &DmaRegion, capacity: usize) -> Self {
        let stride = size_of::<Descriptor>();
        Self {
            cdr: SlotRing::new(cdr.cpu, cdr.bus, stride, capacity),
            rdr: SlotRing::new(rdr.cpu, rdr.bus, stride, capacity),
            write_lock: Mutex::new(()),
            read_lock: Mutex::new(()),
            free: FreeSlots::new(capacity),
        }
    }

    /// Queue one command descriptor.
    ///
    /// Claims the next slot on both rings, zeroes the result slot and copies
    /// the command into its slot. The caller must already hold a free-slot
    /// reservation; the doorbell write is separate so several descriptors
    /// can be queued per signal.
    pub fn put(&self, desc: &Descriptor) -> Result<()> {
        let _guard = self.write_lock.lock();

        let rslot = self.rdr.next_for_write()?;
        let cslot = self.cdr.next_for_write()?;

        // SAFETY: both slots are in-ring and exclusively ours until the
        // engine takes ownership at the doorbell write.
        unsafe {
            ptr::write_bytes(rslot.as_ptr(), 0, size_of::<Descriptor>());
            ptr::write_volatile(cslot.cast::<Descriptor>().as_ptr(), *desc);
        }
        Ok(())
    }

    /// Fetch the next completed result slot.
    ///
    /// Retires (zeroes) the matching command slot and returns the result
    /// descriptor for the drain to consume. Does not touch the free-slot
    /// counter - the drain releases explicitly once the descriptor is fully
    /// consumed.
    pub fn fetch(&self) -> Result<NonNull<Descriptor>> {
        let _guard = self.read_lock.lock();

        let cslot = self.cdr.next_for_read()?;
        // SAFETY: the engine is done with this command slot once its result
        // entry is counted ready.
        unsafe {
            ptr::write_bytes(cslot.as_ptr(), 0, size_of::<Descriptor>());
        }

        let rslot = self.rdr.next_for_read()?;
        Ok(rslot.cast())
    }

    /// Claim one free slot ahead of a `put`.
    pub fn reserve(&self) -> Result<()> {
        Ok(self.free.reserve()?)
    }

    /// Return one free slot after a drained descriptor is consumed.
    pub fn release(&self) {
        self.free.release();
    }

    /// Slots currently available to submission.
    pub fn free_slots(&self) -> usize {
        self.free.available()
    }
}

/// Carve a state pool over its coherent region.
///
/// # Safety
/// The region must be at least `stride * count` bytes and outlive the pool.
pub(crate) unsafe fn state_pool_over(region: &DmaRegion, stride: usize, count: usize) -> StatePool {
    StatePool::new(region.cpu, region.bus, stride, count)
}
