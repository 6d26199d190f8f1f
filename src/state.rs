//! Published engine state shared between the control and audio contexts.
//!
//! Two words are published: the active function handle and the error latch.
//! The control context is the only writer of the handle and the only one
//! allowed to clear the latch. The audio context reads both and may only set
//! the latch.

// IMPORTANT: Do not call assert_invariant or any logging here; the audio path uses these.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

/// Opaque handle to a cached script function.
///
/// Either [`FunctionRef::INVALID`] or a handle issued by the function cache.
/// Handles are never reused, so a released handle stays dead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionRef(pub(crate) u32);

impl FunctionRef {
    /// The invalid sentinel.
    pub const INVALID: FunctionRef = FunctionRef(0);

    /// Whether this is the invalid sentinel.
    pub fn is_invalid(self) -> bool {
        self == Self::INVALID
    }
}

/// Engine state machine.
///
/// `Ready -> Error` may happen in either context. `Error -> Ready` only
/// happens when a switch or reload commits a new function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Calls reach the interpreter.
    Ready,
    /// Latched: output is silence and the interpreter is not entered.
    Error,
}

#[derive(Debug)]
pub(crate) struct Published {
    current: AtomicU32,
    latch: AtomicBool,
}

impl Published {
    pub(crate) fn new(latched: bool) -> Self {
        Self {
            current: AtomicU32::new(FunctionRef::INVALID.0),
            latch: AtomicBool::new(latched),
        }
    }

    #[inline]
    pub(crate) fn current(&self) -> FunctionRef {
        FunctionRef(self.current.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn is_latched(&self) -> bool {
        self.latch.load(Ordering::Acquire)
    }

    /// `Ready -> Error`. Safe from either context.
    #[inline]
    pub(crate) fn trip(&self) {
        self.latch.store(true, Ordering::Release);
    }

    /// Latches and unpublishes the current handle. Returns the retired handle,
    /// which the caller still owns and must release.
    pub(crate) fn retire(&self) -> FunctionRef {
        self.latch.store(true, Ordering::SeqCst);
        FunctionRef(self.current.swap(FunctionRef::INVALID.0, Ordering::AcqRel))
    }

    /// Publishes a new handle. The latch is left as is.
    pub(crate) fn commit(&self, func: FunctionRef) {
        self.current.store(func.0, Ordering::Release);
    }

    /// `Error -> Ready`. Control context only, after a commit.
    pub(crate) fn reset(&self) {
        self.latch.store(false, Ordering::Release);
    }
}

/// Read-only view of the published state, usable from any thread.
#[derive(Debug, Clone)]
pub struct EngineMonitor {
    shared: Arc<Published>,
}

impl EngineMonitor {
    pub(crate) fn new(shared: Arc<Published>) -> Self {
        Self { shared }
    }

    /// Current state.
    pub fn state(&self) -> EngineState {
        if self.shared.is_latched() {
            EngineState::Error
        } else {
            EngineState::Ready
        }
    }

    /// Whether the error latch is set.
    pub fn is_latched(&self) -> bool {
        self.shared.is_latched()
    }

    /// Currently published function handle.
    pub fn current_function(&self) -> FunctionRef {
        self.shared.current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retire_latches_and_invalidates() {
        let published = Published::new(false);
        published.commit(FunctionRef(7));

        let old = published.retire();
        assert_eq!(old, FunctionRef(7));
        assert!(published.is_latched());
        assert!(published.current().is_invalid());
    }

    #[test]
    fn commit_leaves_latch_alone() {
        let published = Published::new(true);
        published.commit(FunctionRef(3));
        assert!(published.is_latched());
        published.reset();
        assert!(!published.is_latched());
    }

    #[test]
    fn monitor_reports_state() {
        let shared = Arc::new(Published::new(false));
        let monitor = EngineMonitor::new(Arc::clone(&shared));
        assert_eq!(monitor.state(), EngineState::Ready);
        shared.trip();
        assert_eq!(monitor.state(), EngineState::Error);
        assert!(monitor.current_function().is_invalid());
    }
}
