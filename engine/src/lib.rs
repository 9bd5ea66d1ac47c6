//! Security packet engine driver core.
//!
//! The control plane for a DMA-ring-based crypto offload engine: a pair of
//! fixed-capacity descriptor rings (command and result), an interrupt
//! frontend that defers all real work, a single-instance completion drain,
//! and index-token correlation of completed hardware descriptors back to
//! the software requests that produced them.
//!
//! Algorithm-specific descriptor construction and crypto-framework
//! registration live with the integrator; this crate owns the submission
//! flow control, the completion protocol and the device lifecycle. All
//! hardware access goes through the [`platform::Platform`] capability.

#![no_std]

extern crate alloc;

pub mod desc;
pub mod device;
pub mod drain;
pub mod error;
pub mod irq;
pub mod platform;
pub mod regs;
pub mod request;
pub mod ring;

#[cfg(test)]
pub(crate) mod mock;

pub use desc::{DescTag, Descriptor, DESC_SIZE};
pub use device::{EngineConfig, PacketEngine, STATE_BLOCK_LEN};
pub use error::{EngineError, Result};
pub use irq::IrqDisposition;
pub use platform::{DmaRegion, Platform};
pub use regs::IrqCause;
pub use request::{CompletionSink, ErrorStatus, RequestKind, RequestToken, SinkRegistry};

pub use dma_ring::StateHandle;
