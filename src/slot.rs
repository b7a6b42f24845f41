//! RX/TX port slots
//!
//! A slot is Closed, Opening (waiting on one asynchronous device open) or
//! Open (owning a device and a port). The handles live inside the state
//! variant, so a port exists exactly when the slot is Open and a pending
//! ticket exists exactly when it is Opening.
//!
//! Allowed transitions: Closed -> Opening -> (Open | Closed), Open -> Closed.

use crate::platform::OpenTicket;
use crate::types::{SlotIndex, SLOT_COUNT};

/// Lifecycle state of a slot, carrying the handles valid in that state
#[derive(Debug)]
pub enum SlotState<D, P> {
    Closed,
    Opening { ticket: OpenTicket },
    Open { device: D, port: P },
}

/// Handle-free view of a slot's state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    Closed,
    Opening,
    Open,
}

/// One RX or TX binding
#[derive(Debug)]
pub struct PortSlot<D, P> {
    index: SlotIndex,
    state: SlotState<D, P>,
}

impl<D, P> PortSlot<D, P> {
    pub fn new(index: SlotIndex) -> Self {
        Self {
            index,
            state: SlotState::Closed,
        }
    }

    pub fn index(&self) -> SlotIndex {
        self.index
    }

    pub fn state(&self) -> &SlotState<D, P> {
        &self.state
    }

    pub fn status(&self) -> SlotStatus {
        match self.state {
            SlotState::Closed => SlotStatus::Closed,
            SlotState::Opening { .. } => SlotStatus::Opening,
            SlotState::Open { .. } => SlotStatus::Open,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, SlotState::Closed)
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, SlotState::Open { .. })
    }

    /// Closed -> Opening. Returns false, leaving the slot untouched, from any
    /// other state.
    pub fn begin_open(&mut self, ticket: OpenTicket) -> bool {
        if !self.is_closed() {
            return false;
        }
        self.state = SlotState::Opening { ticket };
        true
    }

    /// Ticket of the pending open, if any
    pub fn pending_ticket(&self) -> Option<OpenTicket> {
        match self.state {
            SlotState::Opening { ticket } => Some(ticket),
            _ => None,
        }
    }

    /// Opening -> Open. Hands the handles back when the slot is not waiting
    /// on `ticket`, so the caller can release them.
    pub fn finish_open(&mut self, ticket: OpenTicket, device: D, port: P) -> Result<(), (D, P)> {
        if self.pending_ticket() != Some(ticket) {
            return Err((device, port));
        }
        self.state = SlotState::Open { device, port };
        Ok(())
    }

    /// Opening -> Closed after a failed or abandoned open
    pub fn abort_open(&mut self, ticket: OpenTicket) -> bool {
        if self.pending_ticket() != Some(ticket) {
            return false;
        }
        self.state = SlotState::Closed;
        true
    }

    /// Open -> Closed, returning the handles to release
    pub fn take_open(&mut self) -> Option<(D, P)> {
        if !self.is_open() {
            return None;
        }
        match std::mem::replace(&mut self.state, SlotState::Closed) {
            SlotState::Open { device, port } => Some((device, port)),
            _ => None,
        }
    }

    /// Port of an Open slot
    pub fn port_mut(&mut self) -> Option<&mut P> {
        match &mut self.state {
            SlotState::Open { port, .. } => Some(port),
            _ => None,
        }
    }
}

/// Allocate a full array of Closed slots
pub fn slot_array<D, P>() -> Vec<PortSlot<D, P>> {
    let slots: Vec<PortSlot<D, P>> = SlotIndex::all().map(PortSlot::new).collect();
    debug_assert_eq!(slots.len(), SLOT_COUNT);
    slots
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestSlot = PortSlot<&'static str, u32>;

    fn slot() -> TestSlot {
        PortSlot::new(SlotIndex::new(3).unwrap())
    }

    #[test]
    fn test_new_slot_is_closed() {
        let s = slot();
        assert_eq!(s.status(), SlotStatus::Closed);
        assert_eq!(s.index().get(), 3);
        assert!(s.pending_ticket().is_none());
    }

    #[test]
    fn test_full_lifecycle() {
        let mut s = slot();
        assert!(s.begin_open(OpenTicket(1)));
        assert_eq!(s.status(), SlotStatus::Opening);
        assert_eq!(s.pending_ticket(), Some(OpenTicket(1)));

        assert!(s.finish_open(OpenTicket(1), "dev", 7).is_ok());
        assert_eq!(s.status(), SlotStatus::Open);
        assert_eq!(s.port_mut().copied(), Some(7));

        assert_eq!(s.take_open(), Some(("dev", 7)));
        assert_eq!(s.status(), SlotStatus::Closed);
        assert!(s.port_mut().is_none());
    }

    #[test]
    fn test_begin_open_only_from_closed() {
        let mut s = slot();
        assert!(s.begin_open(OpenTicket(1)));
        assert!(!s.begin_open(OpenTicket(2)));
        assert_eq!(s.pending_ticket(), Some(OpenTicket(1)));

        s.finish_open(OpenTicket(1), "dev", 1).unwrap();
        assert!(!s.begin_open(OpenTicket(3)));
        assert!(s.is_open());
    }

    #[test]
    fn test_finish_with_wrong_ticket_returns_handles() {
        let mut s = slot();
        s.begin_open(OpenTicket(5));
        assert_eq!(s.finish_open(OpenTicket(4), "late", 9), Err(("late", 9)));
        assert_eq!(s.status(), SlotStatus::Opening);
    }

    #[test]
    fn test_abort_open() {
        let mut s = slot();
        assert!(!s.abort_open(OpenTicket(1)));
        s.begin_open(OpenTicket(1));
        assert!(!s.abort_open(OpenTicket(2)));
        assert!(s.abort_open(OpenTicket(1)));
        assert!(s.is_closed());
    }

    #[test]
    fn test_take_open_on_closed_is_noop() {
        let mut s = slot();
        assert!(s.take_open().is_none());
        s.begin_open(OpenTicket(1));
        assert!(s.take_open().is_none());
        assert_eq!(s.status(), SlotStatus::Opening);
    }

    #[test]
    fn test_slot_array() {
        let slots: Vec<TestSlot> = slot_array();
        assert_eq!(slots.len(), SLOT_COUNT);
        for (i, s) in slots.iter().enumerate() {
            assert_eq!(s.index().as_usize(), i);
            assert!(s.is_closed());
        }
    }
}
