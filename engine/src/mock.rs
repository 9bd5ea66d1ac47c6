//! Scripted fake platform for unit tests.
//!
//! Registers behave like the real interrupt/count plumbing (mask
//! enable/disable, cause clear, result-count acknowledge); everything else
//! is a plain store. DMA-coherent memory is leaked heap memory with
//! fabricated bus addresses. `complete_descriptors` plays the engine's
//! role: it copies queued command descriptors into the matching result
//! slots with the ready bits and a chosen error status.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use spin::Mutex;

use crate::desc::{self, Descriptor};
use crate::device::PacketEngine;
use crate::error::{EngineError, Result};
use crate::platform::{DmaRegion, Platform};
use crate::regs::{
    RD_COUNT_MASK, REG_INT_CLR, REG_INT_MASK_STAT, REG_MASK_DISABLE, REG_MASK_ENABLE,
    REG_RD_COUNT,
};
use crate::request::{CompletionSink, ErrorStatus, RequestKind, SinkRegistry};

pub struct MockPlatform {
    regs: Mutex<BTreeMap<u32, u32>>,
    writes: Mutex<Vec<(u32, u32)>>,
    mask: AtomicU32,
    status: AtomicU32,
    ready: AtomicU32,
    acks: AtomicU32,
    delays: AtomicU32,
    hw_next: AtomicUsize,
    allocs_allowed: AtomicUsize,
    live_allocs: AtomicUsize,
    bus_next: AtomicU32,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self {
            regs: Mutex::new(BTreeMap::new()),
            writes: Mutex::new(Vec::new()),
            mask: AtomicU32::new(0),
            status: AtomicU32::new(0),
            ready: AtomicU32::new(0),
            acks: AtomicU32::new(0),
            delays: AtomicU32::new(0),
            hw_next: AtomicUsize::new(0),
            allocs_allowed: AtomicUsize::new(usize::MAX),
            live_allocs: AtomicUsize::new(0),
            bus_next: AtomicU32::new(0x1000_0000),
        }
    }

    /// Every register write, in program order.
    pub fn writes(&self) -> Vec<(u32, u32)> {
        self.writes.lock().clone()
    }

    /// Currently unmasked causes.
    pub fn irq_mask(&self) -> u32 {
        self.mask.load(Ordering::Acquire)
    }

    /// Raw (unmasked-view) pending causes.
    pub fn irq_status(&self) -> u32 {
        self.status.load(Ordering::Acquire)
    }

    /// Assert cause bits, as the hardware would.
    pub fn raise_irq(&self, bits: u32) {
        self.status.fetch_or(bits, Ordering::AcqRel);
    }

    /// Unmask causes directly (test setup shortcut).
    pub fn unmask_irq(&self, bits: u32) {
        self.mask.fetch_or(bits, Ordering::AcqRel);
    }

    /// Result-count acknowledgements observed.
    pub fn result_acks(&self) -> u32 {
        self.acks.load(Ordering::Acquire)
    }

    /// Settle delays observed.
    pub fn delays(&self) -> u32 {
        self.delays.load(Ordering::Acquire)
    }

    /// Override the result-ready count (consistency-fault scripting).
    pub fn force_ready_count(&self, count: u32) {
        self.ready.store(count, Ordering::Release);
    }

    /// Let `count` more allocations succeed, then fail the rest.
    pub fn fail_allocs_after(&self, count: usize) {
        self.allocs_allowed.store(count, Ordering::Release);
    }

    /// Coherent regions currently outstanding.
    pub fn live_allocs(&self) -> usize {
        self.live_allocs.load(Ordering::Acquire)
    }

    /// Play the engine: complete the next `statuses.len()` queued command
    /// descriptors into their result slots and bump the ready count.
    pub fn complete_descriptors<P: Platform, R>(
        &self,
        engine: &PacketEngine<P, R>,
        count: usize,
        statuses: &[u8],
    ) {
        assert_eq!(count, statuses.len());
        let capacity = engine.rings.cdr.capacity();
        for &status in statuses {
            let idx = self.hw_next.fetch_add(1, Ordering::Relaxed) % capacity;
            // SAFETY: ring slots are live for the engine's lifetime; the
            // drain will not touch this slot until the ready count covers it.
            unsafe {
                let cdesc = core::ptr::read_volatile(
                    engine.rings.cdr.slot_at(idx).cast::<Descriptor>().as_ptr(),
                );
                let mut rdesc = cdesc;
                rdesc.ctrl = desc::ctrl_completed(status);
                rdesc.len = cdesc.len | desc::LEN_ENGINE_READY;
                core::ptr::write_volatile(
                    engine.rings.rdr.slot_at(idx).cast::<Descriptor>().as_ptr(),
                    rdesc,
                );
            }
            self.ready.fetch_add(1, Ordering::AcqRel);
        }
    }
}

impl Platform for MockPlatform {
    fn read32(&self, offset: u32) -> u32 {
        match offset {
            REG_RD_COUNT => self.ready.load(Ordering::Acquire) & RD_COUNT_MASK,
            REG_INT_MASK_STAT => {
                self.status.load(Ordering::Acquire) & self.mask.load(Ordering::Acquire)
            }
            _ => self.regs.lock().get(&offset).copied().unwrap_or(0),
        }
    }

    fn write32(&self, offset: u32, value: u32) {
        self.writes.lock().push((offset, value));
        match offset {
            REG_RD_COUNT => {
                if value == 1 {
                    self.acks.fetch_add(1, Ordering::AcqRel);
                    let _ = self.ready.fetch_update(
                        Ordering::AcqRel,
                        Ordering::Acquire,
                        |n| n.checked_sub(1),
                    );
                }
            }
            REG_MASK_ENABLE => {
                self.mask.fetch_or(value, Ordering::AcqRel);
            }
            REG_MASK_DISABLE => {
                self.mask.fetch_and(!value, Ordering::AcqRel);
            }
            REG_INT_CLR => {
                self.status.fetch_and(!value, Ordering::AcqRel);
            }
            _ => {
                self.regs.lock().insert(offset, value);
            }
        }
    }

    fn alloc_coherent(&self, len: usize) -> Result<DmaRegion> {
        if self
            .allocs_allowed
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_err()
        {
            return Err(EngineError::Allocation);
        }
        let mem = Box::leak(alloc::vec![0u8; len].into_boxed_slice());
        let cpu = NonNull::new(mem.as_mut_ptr()).unwrap();
        let bus = self
            .bus_next
            .fetch_add(((len + 0xFFF) & !0xFFF) as u32, Ordering::AcqRel);
        self.live_allocs.fetch_add(1, Ordering::AcqRel);
        Ok(DmaRegion { cpu, bus, len })
    }

    unsafe fn free_coherent(&self, _region: &DmaRegion) {
        self.live_allocs.fetch_sub(1, Ordering::AcqRel);
    }

    fn delay_us(&self, _micros: u32) {
        self.delays.fetch_add(1, Ordering::AcqRel);
    }
}

/// `(kind, request, status)` triples in dispatch order.
pub type Calls = Arc<Mutex<Vec<(RequestKind, u64, u8)>>>;

struct Recorder {
    kind: RequestKind,
    calls: Calls,
}

impl CompletionSink<u64> for Recorder {
    fn on_complete(&self, request: u64, status: ErrorStatus) {
        self.calls.lock().push((self.kind, request, status.0));
    }
}

/// Registry with recording sinks for both request kinds.
pub fn recording_registry() -> (SinkRegistry<u64>, Calls) {
    let calls: Calls = Arc::new(Mutex::new(Vec::new()));
    let mut registry = SinkRegistry::new();
    registry.register(
        RequestKind::Cipher,
        Box::new(Recorder { kind: RequestKind::Cipher, calls: calls.clone() }),
    );
    registry.register(
        RequestKind::Aead,
        Box::new(Recorder { kind: RequestKind::Aead, calls: calls.clone() }),
    );
    (registry, calls)
}
