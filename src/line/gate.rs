//! Admission gate - the single slot at the front of the line

use serde::Serialize;

/// Whether a new order may enter the gated front section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GateState {
    /// Front section is empty, the next order may start.
    Open,
    /// An order occupies the front section until it reaches the release point.
    Closed,
}

impl std::fmt::Display for GateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateState::Open => write!(f, "OPEN"),
            GateState::Closed => write!(f, "CLOSED"),
        }
    }
}

#[derive(Debug)]
pub struct AdmissionGate {
    state: GateState,
}

impl Default for AdmissionGate {
    fn default() -> Self {
        Self {
            state: GateState::Open,
        }
    }
}

impl AdmissionGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == GateState::Open
    }

    /// OPEN -> CLOSED. Returns `false` (and changes nothing) if already closed.
    pub fn try_close(&mut self) -> bool {
        if self.state == GateState::Closed {
            return false;
        }
        self.state = GateState::Closed;
        true
    }

    /// CLOSED -> OPEN. Returns whether the gate was actually closed before;
    /// opening an open gate is a no-op.
    pub fn open(&mut self) -> bool {
        let was_closed = self.state == GateState::Closed;
        self.state = GateState::Open;
        was_closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_open() {
        assert_eq!(AdmissionGate::new().state(), GateState::Open);
    }

    #[test]
    fn test_single_slot() {
        let mut gate = AdmissionGate::new();
        assert!(gate.try_close());
        assert!(!gate.try_close());
        assert_eq!(gate.state(), GateState::Closed);
        assert!(gate.open());
        assert!(gate.try_close());
    }

    #[test]
    fn test_open_is_idempotent() {
        let mut gate = AdmissionGate::new();
        assert!(!gate.open());
        assert!(!gate.open());
        assert!(gate.is_open());
    }
}
