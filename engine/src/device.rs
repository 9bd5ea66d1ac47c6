//! Device context and lifecycle.
//!
//! # Initialization Sequence
//! 1. Allocate coherent regions (command ring, result ring, state pool)
//! 2. Reset pulse with settle delay, then ring mode + command auto-fetch
//! 3. Zero byte-order and interrupt-coalescing configuration
//! 4. Clock gates for the compiled-in algorithm classes
//! 5. DMA buffer thresholds
//! 6. Clear, then mask, every interrupt cause
//! 7. Ring fill/drain thresholds and result timeout
//! 8. Register ring base addresses and slot stride
//! 9. Unmask the result-threshold cause -> READY
//!
//! Teardown runs the same steps in reverse and is idempotent; coherent
//! memory is released only on drop, after hardware access is quiesced.

use core::sync::atomic::{AtomicBool, Ordering};

use dma_ring::{StateHandle, StatePool, MAX_STATE_SLOTS};

use crate::desc::{self, DescTag, Descriptor, DESC_SIZE};
use crate::drain::DrainWork;
use crate::error::{EngineError, Result};
use crate::platform::{DmaRegion, Platform};
use crate::regs::{self, IrqCause, Regs};
use crate::request::{RequestArena, RequestToken, SinkRegistry};
use crate::ring::{self, RingPair};

/// Reset settle time between asserting and deasserting the reset bits.
const RESET_SETTLE_US: u32 = 10;

/// Stride of one hardware state block (56-byte record, cache-line rounded).
pub const STATE_BLOCK_LEN: usize = 64;

/// Engineering constants and sizing for one device.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Slots per ring.
    pub ring_capacity: usize,
    /// Command-ring headroom: the fill-threshold interrupt fires once
    /// `ring_capacity - busy_watermark` entries are queued.
    pub busy_watermark: usize,
    /// Result-side completion count that raises the threshold interrupt.
    pub result_threshold: u32,
    /// Result-side timeout ticks bounding completion latency at light load.
    pub result_timeout: u32,
    /// Whether the result timeout fires at all.
    pub result_timeout_enable: bool,
    /// DMA input buffer threshold.
    pub input_threshold: u32,
    /// DMA output buffer threshold.
    pub output_threshold: u32,
    /// Ready-bit poll bound before a drained descriptor is declared dead.
    pub spin_limit: u32,
    /// Opaque interrupt line identifier (handler registration is the
    /// integrator's job).
    pub irq_line: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ring_capacity: 512,
            busy_watermark: 32,
            result_threshold: 0,
            result_timeout: 5,
            result_timeout_enable: true,
            input_threshold: 128,
            output_threshold: 128,
            spin_limit: 100_000,
            irq_line: 0,
        }
    }
}

/// Clock-enable word for the compiled-in algorithm classes.
fn clock_bits() -> u32 {
    let mut bits = regs::CLOCK_ENGINE;
    #[cfg(feature = "des")]
    {
        bits |= regs::CLOCK_DES;
    }
    #[cfg(feature = "aes")]
    {
        bits |= regs::CLOCK_AES;
    }
    #[cfg(feature = "hmac")]
    {
        bits |= regs::CLOCK_HASH;
    }
    bits
}

/// One attached packet engine device.
///
/// Owns the register capability, the ring pair, the state pool, the
/// pending-request arena and the completion-sink registry; everything else
/// in the driver hangs off this context. `R` is the integrator's in-flight
/// request type.
pub struct PacketEngine<P: Platform, R> {
    pub(crate) platform: P,
    pub(crate) config: EngineConfig,
    pub(crate) rings: RingPair,
    pub(crate) states: StatePool,
    pub(crate) arena: RequestArena<R>,
    pub(crate) sinks: SinkRegistry<R>,
    pub(crate) work: DrainWork,
    ready: AtomicBool,
    cdr_region: DmaRegion,
    rdr_region: DmaRegion,
    state_region: DmaRegion,
}

impl<P: Platform, R> PacketEngine<P, R> {
    /// Attach a device: allocate rings, run the hardware initialization
    /// state machine and leave the device READY with the result-threshold
    /// interrupt armed.
    ///
    /// A coherent-allocation failure is fatal; nothing is left registered
    /// with the hardware.
    pub fn attach(platform: P, config: EngineConfig, sinks: SinkRegistry<R>) -> Result<Self> {
        let capacity = config.ring_capacity;
        assert!(capacity >= 2, "ring capacity must be at least two slots");
        assert!(capacity <= MAX_STATE_SLOTS, "ring capacity exceeds state pool maximum");
        assert!(config.busy_watermark < capacity, "busy watermark exceeds ring capacity");

        let cdr_region = platform.alloc_coherent(DESC_SIZE * capacity)?;
        let rdr_region = match platform.alloc_coherent(DESC_SIZE * capacity) {
            Ok(region) => region,
            Err(err) => {
                // SAFETY: the region was never handed to hardware.
                unsafe { platform.free_coherent(&cdr_region) };
                return Err(err);
            }
        };
        let state_region = match platform.alloc_coherent(STATE_BLOCK_LEN * capacity) {
            Ok(region) => region,
            Err(err) => {
                // SAFETY: as above.
                unsafe {
                    platform.free_coherent(&rdr_region);
                    platform.free_coherent(&cdr_region);
                }
                return Err(err);
            }
        };

        // SAFETY: regions sized for `capacity` entries and owned by the
        // engine until drop.
        let rings = unsafe { RingPair::new(&cdr_region, &rdr_region, capacity) };
        let states = unsafe { ring::state_pool_over(&state_region, STATE_BLOCK_LEN, capacity) };

        let engine = Self {
            platform,
            config,
            rings,
            states,
            arena: RequestArena::new(capacity),
            sinks,
            work: DrainWork::new(),
            ready: AtomicBool::new(false),
            cdr_region,
            rdr_region,
            state_region,
        };
        engine.initialize();
        Ok(engine)
    }

    /// Hardware bring-up: RESET -> CONFIGURE -> RING-REGISTER -> READY.
    fn initialize(&self) {
        let regs = Regs::new(&self.platform);
        let cfg = &self.config;

        // RESET: pulse engine + ring reset, settle, come up in ring mode.
        regs.set_config(
            regs::CONFIG_RESET_ENGINE
                | regs::CONFIG_RESET_RING
                | regs::CONFIG_MODE_RING
                | regs::CONFIG_CDR_UPDATE,
        );
        self.platform.delay_us(RESET_SETTLE_US);
        regs.set_config(regs::CONFIG_MODE_RING | regs::CONFIG_CDR_UPDATE);

        // CONFIGURE.
        regs.set_endian_config(0);
        regs.set_int_config(0);
        regs.set_clock_ctrl(clock_bits());
        regs.set_buf_thresh(cfg.input_threshold, cfg.output_threshold);
        regs.irq_clear(IrqCause::from_bits_retain(u32::MAX));
        regs.irq_disable(IrqCause::from_bits_retain(u32::MAX));
        let cdr_thresh = (cfg.ring_capacity - cfg.busy_watermark) as u32;
        regs.set_ring_thresh(regs::ring_thresh(
            cdr_thresh,
            cfg.result_threshold,
            cfg.result_timeout,
            cfg.result_timeout_enable,
        ));

        // RING-REGISTER.
        regs.set_cdr_base(self.rings.cdr.base_dma());
        regs.set_rdr_base(self.rings.rdr.base_dma());
        regs.set_ring_config(regs::ring_config(cfg.ring_capacity, DESC_SIZE));

        // READY.
        regs.irq_enable(IrqCause::RDR_THRESHOLD);
        self.ready.store(true, Ordering::Release);
        log::info!(
            "packet engine ready: {} ring slots, irq line {}",
            cfg.ring_capacity,
            cfg.irq_line
        );
    }

    /// Stop the device: reverse of [`initialize`](Self::initialize),
    /// idempotent. Any descriptors still owned by hardware are abandoned.
    ///
    /// Coherent memory stays mapped until drop so a racing drain pass never
    /// touches freed slots.
    pub fn cleanup(&self) {
        if !self.ready.swap(false, Ordering::AcqRel) {
            return;
        }
        self.work.cancel();

        let regs = Regs::new(&self.platform);
        regs.irq_clear(IrqCause::from_bits_retain(u32::MAX));
        regs.irq_disable(IrqCause::from_bits_retain(u32::MAX));
        regs.set_clock_ctrl(0);
        regs.set_ring_config(0);
        regs.set_cdr_base(0);
        regs.set_rdr_base(0);

        self.sinks.unregister_all();
        log::info!("packet engine stopped");
    }

    /// Whether the device is in the READY lifecycle state.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------
    // Submission surface (consumed by algorithm collaborators)
    // ------------------------------------------------------------------

    /// Claim a hardware state slot for a transform that needs one.
    ///
    /// The submitter records `handle.bus` in its descriptors' state-address
    /// word and sets [`DescTag::SA_STATE`] so the drain returns the slot
    /// when the request completes.
    pub fn alloc_state(&self) -> Result<StateHandle> {
        self.states.alloc().ok_or(EngineError::StateExhausted)
    }

    /// Return a state slot that never made it into a submitted descriptor.
    pub fn release_state(&self, index: usize) {
        self.states.release(index);
    }

    /// Queue one request as a run of consecutive descriptors and ring the
    /// command doorbell.
    ///
    /// Reserves one free slot per descriptor up front (all or nothing, so a
    /// request is never half-queued), stamps every descriptor with the
    /// request token and host-ready bits, and marks the final descriptor as
    /// the request boundary. The last descriptor's tag must carry a request
    /// kind. On error the request object is dropped.
    pub fn submit(&self, request: R, descs: &mut [Descriptor]) -> Result<RequestToken> {
        if !self.is_ready() {
            return Err(EngineError::NotReady);
        }
        let last = match descs.len().checked_sub(1) {
            Some(last) => last,
            None => return Err(EngineError::InvalidRequest),
        };
        if DescTag::from_bits_retain(descs[last].tag).kind().is_none() {
            return Err(EngineError::InvalidRequest);
        }

        let token = self.arena.insert(request)?;

        let mut reserved = 0;
        while reserved < descs.len() {
            if self.rings.reserve().is_err() {
                for _ in 0..reserved {
                    self.rings.release();
                }
                let _ = self.arena.remove(token);
                return Err(EngineError::NoSpace);
            }
            reserved += 1;
        }

        for (i, d) in descs.iter_mut().enumerate() {
            d.token = token.raw();
            let mut tag = DescTag::from_bits_retain(d.tag);
            tag.set(DescTag::LAST, i == last);
            d.tag = tag.bits();
            d.ctrl |= desc::CTRL_HOST_READY;
            d.len |= desc::LEN_HOST_READY;
            self.rings.put(d)?;
        }

        Regs::new(&self.platform).signal_commands(descs.len() as u32);
        Ok(token)
    }

    /// Ring slots currently available to submission.
    pub fn free_slots(&self) -> usize {
        self.rings.free_slots()
    }

    /// Requests submitted but not yet completed.
    pub fn in_flight(&self) -> usize {
        self.arena.in_flight()
    }

    /// The platform capability (for integrator interrupt plumbing).
    pub fn platform(&self) -> &P {
        &self.platform
    }
}

impl<P: Platform, R> Drop for PacketEngine<P, R> {
    fn drop(&mut self) {
        self.cleanup();
        // SAFETY: cleanup unregistered the rings and masked the device, so
        // neither side references these regions anymore. Reverse order of
        // allocation.
        unsafe {
            self.platform.free_coherent(&self.state_region);
            self.platform.free_coherent(&self.rdr_region);
            self.platform.free_coherent(&self.cdr_region);
        }
    }
}
