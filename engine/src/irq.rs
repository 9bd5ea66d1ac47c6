//! Interrupt frontend.
//!
//! Runs in immediate interrupt context: constant-time, non-blocking, no
//! ring traversal. The only job is to classify the cause, silence it at the
//! source and hand the real work to the deferred drain.

use crate::device::PacketEngine;
use crate::platform::Platform;
use crate::regs::{IrqCause, Regs};

/// What the interrupt handler did, for the surrounding interrupt
/// infrastructure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqDisposition {
    /// The result-threshold cause was claimed; wake the drain worker.
    Handled,
    /// Causes this core does not own were acknowledged and masked.
    Spurious,
}

impl<P: Platform, R> PacketEngine<P, R> {
    /// Immediate interrupt handler.
    ///
    /// On the result-threshold cause: mask it at the source (not merely
    /// acknowledge - the drain re-arms it once the ring is observed empty)
    /// and schedule the drain exactly once. Anything else is acknowledged
    /// and masked defensively, and reported as unclaimed.
    pub fn handle_irq(&self) -> IrqDisposition {
        let regs = Regs::new(&self.platform);
        let status = regs.irq_status();

        if status.contains(IrqCause::RDR_THRESHOLD) {
            regs.irq_disable(IrqCause::RDR_THRESHOLD);
            self.work.schedule();
            return IrqDisposition::Handled;
        }

        regs.irq_clear(status);
        if !status.is_empty() {
            regs.irq_disable(status);
        }
        IrqDisposition::Spurious
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::EngineConfig;
    use crate::mock::{recording_registry, MockPlatform};
    use alloc::sync::Arc;

    fn engine(platform: Arc<MockPlatform>) -> PacketEngine<Arc<MockPlatform>, u64> {
        let (registry, _calls) = recording_registry();
        let config = EngineConfig { ring_capacity: 8, busy_watermark: 2, ..Default::default() };
        PacketEngine::attach(platform, config, registry).unwrap()
    }

    #[test]
    fn result_threshold_is_masked_and_scheduled() {
        let platform = Arc::new(MockPlatform::new());
        let engine = engine(platform.clone());

        platform.raise_irq(IrqCause::RDR_THRESHOLD.bits());
        assert_eq!(engine.handle_irq(), IrqDisposition::Handled);

        // Masked at the source, not merely acknowledged.
        assert_eq!(platform.irq_mask() & IrqCause::RDR_THRESHOLD.bits(), 0);
        assert!(engine.work.is_pending());
    }

    #[test]
    fn unowned_causes_are_acked_and_masked() {
        let platform = Arc::new(MockPlatform::new());
        let engine = engine(platform.clone());
        platform.unmask_irq(IrqCause::PRNG.bits());

        platform.raise_irq(IrqCause::PRNG.bits());
        assert_eq!(engine.handle_irq(), IrqDisposition::Spurious);

        assert_eq!(platform.irq_status(), 0);
        assert_eq!(platform.irq_mask() & IrqCause::PRNG.bits(), 0);
        assert!(!engine.work.is_pending());
    }

    #[test]
    fn quiet_interrupt_is_spurious() {
        let platform = Arc::new(MockPlatform::new());
        let engine = engine(platform.clone());
        assert_eq!(engine.handle_irq(), IrqDisposition::Spurious);
    }
}
