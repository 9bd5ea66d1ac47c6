//! Driver error types.

use core::fmt;

use dma_ring::RingError;

pub type Result<T> = core::result::Result<T, EngineError>;

/// Errors surfaced by the driver core.
///
/// Only `Allocation`, `RingConsistency` and `ReadyTimeout` are fatal to the
/// device; everything else is backpressure or caller error. Per-request
/// hardware error codes are *not* represented here - they ride the
/// completion callback verbatim as [`crate::request::ErrorStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineError {
    /// DMA-coherent memory could not be provided; fatal to device attach.
    Allocation,
    /// Command/result ring has no writable slot.
    RingFull,
    /// Result ring has no readable slot.
    RingEmpty,
    /// Free-slot counter exhausted; submit less work or wait for drain.
    NoSpace,
    /// No free hardware state slot.
    StateExhausted,
    /// Pending-request table is full.
    ArenaFull,
    /// A request token did not match a live arena entry.
    StaleToken,
    /// Hardware reported more ready entries than the ring could supply.
    RingConsistency {
        /// Entries drained before the mismatch.
        handled: u32,
        /// Entries the hardware still claimed were ready.
        remaining: u32,
    },
    /// A drained descriptor never showed both ready bits.
    ReadyTimeout {
        /// Polls performed before giving up.
        spun: u32,
    },
    /// The device is not in the READY lifecycle state.
    NotReady,
    /// No completion sink registered for the request kind.
    NoSink,
    /// Malformed submission (no descriptors, or no routable kind).
    InvalidRequest,
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allocation => write!(f, "DMA-coherent allocation failed"),
            Self::RingFull => write!(f, "descriptor ring full"),
            Self::RingEmpty => write!(f, "descriptor ring empty"),
            Self::NoSpace => write!(f, "no free ring slots"),
            Self::StateExhausted => write!(f, "state pool exhausted"),
            Self::ArenaFull => write!(f, "pending-request table full"),
            Self::StaleToken => write!(f, "stale request token"),
            Self::RingConsistency { handled, remaining } => write!(
                f,
                "ring consistency failure: drained {} entries, hardware reported {} more",
                handled, remaining
            ),
            Self::ReadyTimeout { spun } => {
                write!(f, "descriptor not ready after {} polls", spun)
            }
            Self::NotReady => write!(f, "device not ready"),
            Self::NoSink => write!(f, "no completion sink for request kind"),
            Self::InvalidRequest => write!(f, "malformed request submission"),
        }
    }
}

impl From<RingError> for EngineError {
    fn from(err: RingError) -> Self {
        match err {
            RingError::Full => Self::RingFull,
            RingError::Empty => Self::RingEmpty,
            RingError::NoSpace => Self::NoSpace,
        }
    }
}
