//! Platform binding.
//!
//! The core never touches hardware directly: the integrator hands it one
//! [`Platform`] capability that bundles the mapped register window, the
//! DMA-coherent allocator and a settle-delay primitive. Everything the core
//! does goes through this trait, which is also what makes the drain and
//! lifecycle logic testable against a scripted fake.

use alloc::sync::Arc;
use core::ptr::NonNull;

use crate::error::Result;

/// A DMA-coherent memory region: both views of the same bytes.
#[derive(Debug, Clone, Copy)]
pub struct DmaRegion {
    /// CPU address.
    pub cpu: NonNull<u8>,
    /// Device-visible address.
    pub bus: u32,
    /// Length in bytes.
    pub len: usize,
}

// SAFETY: DmaRegion is a plain address pair; the platform that produced it
// guarantees validity for as long as the region is alive.
unsafe impl Send for DmaRegion {}
unsafe impl Sync for DmaRegion {}

/// Opaque capabilities supplied by the platform binding.
///
/// Register offsets are byte offsets from the device's register base; all
/// registers are 32-bit little-endian-in-register words.
pub trait Platform {
    /// Read a device register.
    fn read32(&self, offset: u32) -> u32;

    /// Write a device register.
    fn write32(&self, offset: u32, value: u32);

    /// Allocate zeroed DMA-coherent memory.
    fn alloc_coherent(&self, len: usize) -> Result<DmaRegion>;

    /// Release memory obtained from [`Platform::alloc_coherent`].
    ///
    /// # Safety
    ///
    /// The region must no longer be referenced by the CPU or the device;
    /// the caller quiesces hardware access first.
    unsafe fn free_coherent(&self, region: &DmaRegion);

    /// Busy-wait for at least `micros` microseconds.
    fn delay_us(&self, micros: u32);
}

impl<P: Platform + ?Sized> Platform for &P {
    fn read32(&self, offset: u32) -> u32 {
        (**self).read32(offset)
    }

    fn write32(&self, offset: u32, value: u32) {
        (**self).write32(offset, value)
    }

    fn alloc_coherent(&self, len: usize) -> Result<DmaRegion> {
        (**self).alloc_coherent(len)
    }

    unsafe fn free_coherent(&self, region: &DmaRegion) {
        (**self).free_coherent(region)
    }

    fn delay_us(&self, micros: u32) {
        (**self).delay_us(micros)
    }
}

impl<P: Platform + ?Sized> Platform for Arc<P> {
    fn read32(&self, offset: u32) -> u32 {
        (**self).read32(offset)
    }

    fn write32(&self, offset: u32, value: u32) {
        (**self).write32(offset, value)
    }

    fn alloc_coherent(&self, len: usize) -> Result<DmaRegion> {
        (**self).alloc_coherent(len)
    }

    unsafe fn free_coherent(&self, region: &DmaRegion) {
        (**self).free_coherent(region)
    }

    fn delay_us(&self, micros: u32) {
        (**self).delay_us(micros)
    }
}
