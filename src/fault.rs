//! RT-safe fault signaling from the audio callback.
//!
//! The audio path never logs. It pushes a [`FaultKind`] onto a lock-free SPSC
//! queue and the control context drains and reports them.
//!
//! - Never allocates in the RT path
//! - Signaling takes no lock (the interpreter guard in the shim is the only
//!   lock on the audio path, and only the engine ever holds it)
//! - Never panics in the RT path
//! - A full queue drops the signal rather than blocking
//!
//! Because the error latch fails fast after the first fault, a single block
//! produces at most one fault, so a small queue is enough.

use crate::error::FaultKind;
use rtrb::{Consumer, Producer, RingBuffer};

/// Capacity for the fault queue.
pub const FAULT_QUEUE_CAPACITY: usize = 64;

/// Creates a new fault queue pair.
///
/// Returns (producer for RT, consumer for control).
pub fn new_fault_queue() -> (Producer<FaultKind>, Consumer<FaultKind>) {
    RingBuffer::new(FAULT_QUEUE_CAPACITY)
}

/// Signals a fault from the RT path.
#[inline]
pub fn signal_fault(tx: &mut Producer<FaultKind>, fault: FaultKind) {
    // push() returns Err if full - we drop silently rather than block
    let _ = tx.push(fault);
}

/// Drains all pending faults. Control context only.
pub fn drain_faults(rx: &mut Consumer<FaultKind>) -> Vec<FaultKind> {
    let mut faults = Vec::with_capacity(rx.slots());
    while let Ok(fault) = rx.pop() {
        faults.push(fault);
    }
    faults
}
