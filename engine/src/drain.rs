//! Deferred completion drain.
//!
//! The interrupt frontend only sets a pending flag; the integrator wakes a
//! worker that calls [`PacketEngine::service_completions`]. Wake signals
//! coalesce: however many times the drain is scheduled while a pass runs,
//! exactly one more pass follows, and at most one pass executes at a time.
//!
//! A pass consumes the result ring until the hardware ready count reads
//! zero, then re-arms the result-threshold cause. No correlation state is
//! carried between descriptors: the terminal descriptor of a request names
//! its own token, kind and status, so an aborted pass can never dispatch
//! from stale locals and a request split across passes completes on the
//! pass that drains its boundary descriptor.

use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::desc::{self, DescTag, Descriptor};
use crate::device::PacketEngine;
use crate::error::{EngineError, Result};
use crate::platform::Platform;
use crate::regs::{IrqCause, Regs};
use crate::request::{ErrorStatus, RequestToken};

/// Deferred-work state: a pending flag plus a single-instance guard.
pub(crate) struct DrainWork {
    pending: AtomicBool,
    running: AtomicBool,
}

impl DrainWork {
    pub(crate) fn new() -> Self {
        Self { pending: AtomicBool::new(false), running: AtomicBool::new(false) }
    }

    /// Mark work pending. Returns `true` on the idle-to-pending edge so the
    /// caller wakes the worker exactly once per batch of signals.
    pub(crate) fn schedule(&self) -> bool {
        !self.pending.swap(true, Ordering::AcqRel)
    }

    /// Claim the pending signal, if any.
    fn take(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }

    /// Drop any pending signal (teardown path).
    pub(crate) fn cancel(&self) {
        self.pending.store(false, Ordering::Release);
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    fn begin_running(&self) -> bool {
        !self.running.swap(true, Ordering::AcqRel)
    }

    fn finish_running(&self) {
        self.running.store(false, Ordering::Release);
    }
}

impl<P: Platform, R> PacketEngine<P, R> {
    /// Drain worker entry point.
    ///
    /// Runs drain passes until no pending signal remains; concurrent calls
    /// collapse to a single runner (the loser returns immediately and the
    /// runner re-checks the flag after standing down, so a signal that
    /// races teardown of the runner is never lost). Returns the number of
    /// descriptors consumed.
    pub fn service_completions(&self) -> Result<u32> {
        if !self.work.begin_running() {
            return Ok(0);
        }

        let mut total = 0;
        loop {
            while self.work.take() {
                match self.drain_pass() {
                    Ok(handled) => total += handled,
                    Err(err) => {
                        self.work.finish_running();
                        return Err(err);
                    }
                }
            }
            self.work.finish_running();
            if !self.work.is_pending() || !self.work.begin_running() {
                return Ok(total);
            }
        }
    }

    /// One drain pass over the result ring.
    fn drain_pass(&self) -> Result<u32> {
        let regs = Regs::new(&self.platform);

        let mut ready = regs.result_ready();
        if ready == 0 {
            self.rearm(&regs);
            return Ok(0);
        }

        let mut handled = 0u32;
        loop {
            let slot = match self.rings.fetch() {
                Ok(slot) => slot,
                Err(_) => {
                    log::error!(
                        "result ring inconsistency: drained {} entries, hardware reports {} more",
                        handled,
                        ready
                    );
                    // Re-arm before reporting so the device is not left
                    // silently masked; undispatched requests stay in the
                    // arena and resolve if their descriptors ever drain.
                    self.rearm(&regs);
                    return Err(EngineError::RingConsistency { handled, remaining: ready });
                }
            };

            let ctrl = self.wait_ready(&regs, slot)?;
            // SAFETY: the descriptor is drain-owned now that both ready
            // bits were observed.
            let (tag, token_raw, state_bus) = unsafe {
                let d = slot.as_ptr();
                (
                    DescTag::from_bits_retain((*d).tag),
                    (*d).token,
                    (*d).state_addr,
                )
            };

            regs.ack_result();
            regs.irq_clear(IrqCause::RDR_THRESHOLD);
            ready -= 1;
            handled += 1;
            self.rings.release();

            if tag.contains(DescTag::SA_STATE) && !self.states.release_bus(state_bus) {
                log::warn!("drained descriptor names a foreign state address {:#x}", state_bus);
            }

            if tag.contains(DescTag::LAST) {
                self.complete(tag, token_raw, ErrorStatus(desc::ctrl_error_status(ctrl)));
            }

            if ready == 0 {
                // The count may have grown while draining; the pass only
                // ends once the hardware agrees the ring is empty.
                ready = regs.result_ready();
                if ready == 0 {
                    self.rearm(&regs);
                    return Ok(handled);
                }
            }
        }
    }

    /// Dispatch a completed request to its sink.
    ///
    /// A token that no longer names a live arena entry, or a tag with no
    /// routable kind, is a correlation fault: logged and skipped, never
    /// dereferenced.
    fn complete(&self, tag: DescTag, token_raw: u32, status: ErrorStatus) {
        let token = RequestToken::from_raw(token_raw);
        let request = match self.arena.remove(token) {
            Some(request) => request,
            None => {
                log::error!("completion for stale request token {:#010x}", token_raw);
                return;
            }
        };
        let kind = match tag.kind() {
            Some(kind) => kind,
            None => {
                log::error!("completion with unroutable tag {:#010x}", tag.bits());
                return;
            }
        };
        if self.sinks.dispatch(kind, request, status).is_err() {
            log::error!("no completion sink registered for {:?}", kind);
        }
    }

    /// Busy-wait until the engine has published both ready bits.
    ///
    /// Bounded: expiry is a fatal hardware fault, reported with the device
    /// re-armed rather than wedged.
    fn wait_ready(&self, regs: &Regs<'_, P>, slot: NonNull<Descriptor>) -> Result<u32> {
        let mut spun = 0;
        loop {
            // SAFETY: `slot` is a live ring slot owned by the drain.
            let ctrl = unsafe { desc::read_ctrl(slot.as_ptr()) };
            let len = unsafe { desc::read_len(slot.as_ptr()) };
            if desc::ctrl_ready(ctrl) && desc::len_ready(len) {
                return Ok(ctrl);
            }
            spun += 1;
            if spun >= self.config.spin_limit {
                log::error!("descriptor ready bits still clear after {} polls", spun);
                self.rearm(regs);
                return Err(EngineError::ReadyTimeout { spun });
            }
            core::hint::spin_loop();
        }
    }

    /// Clear and re-enable the result-threshold cause (back to ARMED).
    /// Idempotent: re-arming an armed cause is a no-op.
    fn rearm(&self, regs: &Regs<'_, P>) {
        regs.irq_clear(IrqCause::RDR_THRESHOLD);
        regs.irq_enable(IrqCause::RDR_THRESHOLD);
    }
}
