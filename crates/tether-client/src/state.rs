//! Session lifecycle state.
//!
//! A session moves from `Open` to `Closed` exactly once. The state lives in
//! an atomic so that `close` can run from `Drop` and from a concurrent task
//! without taking the connection lock.

use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    /// The session holds its connection and accepts operations.
    Open = 0,
    /// The session has been closed; every operation fails.
    Closed = 1,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Open,
            _ => Self::Closed,
        }
    }
}

/// Atomic holder for a [`SessionState`].
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(SessionState::Open as u8))
    }

    pub(crate) fn get(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.get() == SessionState::Closed
    }

    /// Transition to `Closed`, returning whether this call did it.
    pub(crate) fn close(&self) -> bool {
        self.0.swap(SessionState::Closed as u8, Ordering::SeqCst) == SessionState::Open as u8
    }
}
