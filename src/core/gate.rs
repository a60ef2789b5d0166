//! Admission gate: a counting semaphore bounding in-flight submissions.
//!
//! The gate is independent of the worker pool size. Waiters park on a
//! `parking_lot::Condvar`; releasing a permit wakes one waiter and closing the
//! gate wakes all of them.

use parking_lot::{Condvar, Mutex};

use crate::core::error::SubmissionError;

struct GateState {
    in_flight: usize,
    closed: bool,
}

/// Counting semaphore with a close signal for shutdown.
pub struct AdmissionGate {
    capacity: usize,
    state: Mutex<GateState>,
    released: Condvar,
}

impl AdmissionGate {
    /// Gate admitting at most `capacity` holders at once (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(GateState {
                in_flight: 0,
                closed: false,
            }),
            released: Condvar::new(),
        }
    }

    /// Block until a permit is available.
    ///
    /// # Errors
    ///
    /// `SubmissionError::Shutdown` if the gate is or becomes closed.
    pub fn acquire(&self) -> Result<GatePermit<'_>, SubmissionError> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(SubmissionError::Shutdown);
            }
            if state.in_flight < self.capacity {
                state.in_flight += 1;
                return Ok(GatePermit { gate: self });
            }
            self.released.wait(&mut state);
        }
    }

    /// Refuse new permits and wake every waiter. Held permits stay valid.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.released.notify_all();
    }

    /// Maximum concurrent holders.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits currently held.
    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight
    }

    fn release(&self) {
        {
            let mut state = self.state.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
        }
        self.released.notify_one();
    }
}

/// RAII permit; dropping it frees the slot.
pub struct GatePermit<'a> {
    gate: &'a AdmissionGate,
}

impl Drop for GatePermit<'_> {
    fn drop(&mut self) {
        self.gate.release();
    }
}
