//! Pending-request correlation and completion dispatch.
//!
//! Completed descriptors carry a 32-bit token, not a pointer: the token
//! names a slot in a bounded arena of in-flight request objects and carries
//! a generation counter so a stale or corrupted token fails the lookup
//! instead of dereferencing garbage.

use alloc::boxed::Box;
use alloc::vec::Vec;

use spin::Mutex;

use crate::error::{EngineError, Result};

/// Request kinds the drain can route completions for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Plain symmetric cipher transform.
    Cipher,
    /// Authenticated encryption transform.
    Aead,
}

/// Raw per-request error code from the terminal descriptor.
///
/// Propagated verbatim to the completion sink; interpretation (and any
/// retry policy) belongs to the request originator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorStatus(pub u8);

impl ErrorStatus {
    pub const OK: Self = Self(0);

    pub fn is_ok(self) -> bool {
        self.0 == 0
    }
}

// ----------------------------------------------------------------------------
// Request tokens and arena
// ----------------------------------------------------------------------------

/// Arena slot name: index in bits 15:0, generation in bits 31:16.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestToken(u32);

impl RequestToken {
    fn new(index: u16, generation: u16) -> Self {
        Self(((generation as u32) << 16) | index as u32)
    }

    /// The word stored in a descriptor's back-reference field.
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Rebuild a token from a drained descriptor word.
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    fn index(self) -> usize {
        (self.0 & 0xFFFF) as usize
    }

    fn generation(self) -> u16 {
        (self.0 >> 16) as u16
    }
}

struct ArenaSlot<R> {
    generation: u16,
    value: Option<R>,
}

/// Bounded table of in-flight request objects.
///
/// Insertion happens on the submission path, removal on the drain path; the
/// interior lock is held only for the table walk, never across callbacks.
pub struct RequestArena<R> {
    slots: Mutex<Vec<ArenaSlot<R>>>,
}

impl<R> RequestArena<R> {
    /// Arena with room for `capacity` in-flight requests.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity <= u16::MAX as usize + 1, "arena capacity exceeds token range");
        let mut slots = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            slots.push(ArenaSlot { generation: 0, value: None });
        }
        Self { slots: Mutex::new(slots) }
    }

    /// Park a request and return its token.
    pub fn insert(&self, value: R) -> Result<RequestToken> {
        let mut slots = self.slots.lock();
        for (index, slot) in slots.iter_mut().enumerate() {
            if slot.value.is_none() {
                slot.value = Some(value);
                return Ok(RequestToken::new(index as u16, slot.generation));
            }
        }
        Err(EngineError::ArenaFull)
    }

    /// Resolve and retire a token.
    ///
    /// Returns `None` for out-of-range indices and generation mismatches -
    /// a stale token can never reach a live request. The slot's generation
    /// is bumped on removal so the retired token dies immediately.
    pub fn remove(&self, token: RequestToken) -> Option<R> {
        let mut slots = self.slots.lock();
        let slot = slots.get_mut(token.index())?;
        if slot.generation != token.generation() {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        Some(value)
    }

    /// Number of requests currently in flight.
    pub fn in_flight(&self) -> usize {
        self.slots.lock().iter().filter(|s| s.value.is_some()).count()
    }
}

// ----------------------------------------------------------------------------
// Completion dispatch
// ----------------------------------------------------------------------------

/// Per-kind completion collaborator.
///
/// Invoked exactly once per request, after all of its descriptors have
/// drained, with the terminal descriptor's error status.
pub trait CompletionSink<R>: Send + Sync {
    fn on_complete(&self, request: R, status: ErrorStatus);
}

/// Explicit completion-sink registry, built once at startup.
///
/// Replaces any static algorithm table: the registry is a plain value owned
/// by the device context, and teardown unregisters in reverse registration
/// order.
pub struct SinkRegistry<R> {
    entries: Mutex<Vec<(RequestKind, Box<dyn CompletionSink<R>>)>>,
}

impl<R> SinkRegistry<R> {
    pub fn new() -> Self {
        Self { entries: Mutex::new(Vec::new()) }
    }

    /// Register the sink for a request kind.
    pub fn register(&mut self, kind: RequestKind, sink: Box<dyn CompletionSink<R>>) {
        self.entries.get_mut().push((kind, sink));
    }

    /// Route a completed request to its sink.
    ///
    /// The registry lock is held across the callback; sinks must not mutate
    /// the registry.
    pub fn dispatch(&self, kind: RequestKind, request: R, status: ErrorStatus) -> Result<()> {
        let entries = self.entries.lock();
        match entries.iter().find(|(k, _)| *k == kind) {
            Some((_, sink)) => {
                sink.on_complete(request, status);
                Ok(())
            }
            None => Err(EngineError::NoSink),
        }
    }

    /// Drop all sinks in reverse registration order. Idempotent.
    pub fn unregister_all(&self) {
        let mut entries = self.entries.lock();
        while entries.pop().is_some() {}
    }

    /// Number of registered sinks.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<R> Default for SinkRegistry<R> {
    fn default() -> Self {
        Self::new()
    }
}
