//! Action word encoding and decoding
//!
//! An action is a 32-bit word. The low byte is the opcode; the remaining
//! bits are operands whose layout depends on the opcode:
//!
//! | Opcode | Operands                                    |
//! |--------|---------------------------------------------|
//! | 0      | refresh RX catalog                          |
//! | 1      | refresh TX catalog                          |
//! | 2      | bits 8-11 TX slot, bits 12-15 byte count    |
//! | 3      | bits 8-11 TX slot, bits 12-31 port ordinal  |
//! | 4      | bits 8-11 RX slot, bits 12-31 port ordinal  |
//! | 5      | bits 8-11 TX slot                           |
//! | 6      | bits 8-11 RX slot                           |
//! | 7      | (re)initialize                              |
//!
//! A send action is followed by a second word holding the payload.

use std::fmt;

use crate::types::{Direction, SlotIndex};

/// Opcode values (low byte of an action word)
pub mod opcode {
    pub const REFRESH_RX: u8 = 0;
    pub const REFRESH_TX: u8 = 1;
    pub const SEND: u8 = 2;
    pub const OPEN_TX: u8 = 3;
    pub const OPEN_RX: u8 = 4;
    pub const CLOSE_TX: u8 = 5;
    pub const CLOSE_RX: u8 = 6;
    pub const INIT: u8 = 7;
}

/// Largest flattened port ordinal an action word can carry
pub const MAX_ORDINAL: u32 = (1 << 20) - 1;

/// A decoded action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Refresh a catalog and report its ports
    Refresh(Direction),
    /// Send the next word's low `len` bytes on a TX slot
    Send { slot: SlotIndex, len: u8 },
    /// Open a slot against a flattened port ordinal
    Open {
        direction: Direction,
        slot: SlotIndex,
        ordinal: u32,
    },
    /// Close a slot
    Close { direction: Direction, slot: SlotIndex },
    /// Acquire the platform and reallocate every slot
    Init,
    /// Anything else; ignored by the dispatcher
    Unknown(u8),
}

impl Action {
    /// Decode an action word
    pub fn decode(word: u32) -> Self {
        let slot = SlotIndex::from_nibble(word >> 8);
        match (word & 0xFF) as u8 {
            opcode::REFRESH_RX => Action::Refresh(Direction::Rx),
            opcode::REFRESH_TX => Action::Refresh(Direction::Tx),
            opcode::SEND => Action::Send {
                slot,
                len: ((word >> 12) & 0x0F) as u8,
            },
            opcode::OPEN_TX => Action::Open {
                direction: Direction::Tx,
                slot,
                ordinal: word >> 12,
            },
            opcode::OPEN_RX => Action::Open {
                direction: Direction::Rx,
                slot,
                ordinal: word >> 12,
            },
            opcode::CLOSE_TX => Action::Close {
                direction: Direction::Tx,
                slot,
            },
            opcode::CLOSE_RX => Action::Close {
                direction: Direction::Rx,
                slot,
            },
            opcode::INIT => Action::Init,
            other => Action::Unknown(other),
        }
    }

    /// Encode back into a word. Operands wider than their field are masked.
    pub fn encode(&self) -> u32 {
        let slot_bits = |slot: &SlotIndex| (slot.get() as u32) << 8;
        match self {
            Action::Refresh(Direction::Rx) => opcode::REFRESH_RX as u32,
            Action::Refresh(Direction::Tx) => opcode::REFRESH_TX as u32,
            Action::Send { slot, len } => {
                opcode::SEND as u32 | slot_bits(slot) | ((*len as u32 & 0x0F) << 12)
            }
            Action::Open {
                direction,
                slot,
                ordinal,
            } => {
                let op = match direction {
                    Direction::Tx => opcode::OPEN_TX,
                    Direction::Rx => opcode::OPEN_RX,
                };
                op as u32 | slot_bits(slot) | ((ordinal & MAX_ORDINAL) << 12)
            }
            Action::Close { direction, slot } => {
                let op = match direction {
                    Direction::Tx => opcode::CLOSE_TX,
                    Direction::Rx => opcode::CLOSE_RX,
                };
                op as u32 | slot_bits(slot)
            }
            Action::Init => opcode::INIT as u32,
            Action::Unknown(op) => *op as u32,
        }
    }

    /// Opcode of this action
    pub fn opcode(&self) -> u8 {
        (self.encode() & 0xFF) as u8
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Refresh(dir) => write!(f, "refresh {}", dir),
            Action::Send { slot, len } => write!(f, "send tx{} len={}", slot, len),
            Action::Open {
                direction,
                slot,
                ordinal,
            } => write!(f, "open {}{} ordinal={}", direction, slot, ordinal),
            Action::Close { direction, slot } => write!(f, "close {}{}", direction, slot),
            Action::Init => write!(f, "init"),
            Action::Unknown(op) => write!(f, "unknown opcode {}", op),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(i: u8) -> SlotIndex {
        SlotIndex::new(i).unwrap()
    }

    #[test]
    fn test_decode_simple_opcodes() {
        assert_eq!(Action::decode(0), Action::Refresh(Direction::Rx));
        assert_eq!(Action::decode(1), Action::Refresh(Direction::Tx));
        assert_eq!(Action::decode(7), Action::Init);
        // Operand bits on operand-less opcodes are ignored
        assert_eq!(Action::decode(0xFFFF_FF07), Action::Init);
    }

    #[test]
    fn test_decode_send() {
        // slot 3, 3 bytes
        assert_eq!(
            Action::decode(0x3302),
            Action::Send {
                slot: slot(3),
                len: 3
            }
        );
    }

    #[test]
    fn test_decode_open_uses_upper_twenty_bits() {
        let word = 0x0001_2A03; // ordinal 0x12, slot 10
        assert_eq!(
            Action::decode(word),
            Action::Open {
                direction: Direction::Tx,
                slot: slot(10),
                ordinal: 0x12
            }
        );

        let word = 0xFFFF_F504;
        assert_eq!(
            Action::decode(word),
            Action::Open {
                direction: Direction::Rx,
                slot: slot(5),
                ordinal: MAX_ORDINAL
            }
        );
    }

    #[test]
    fn test_decode_close() {
        assert_eq!(
            Action::decode(0x0F05),
            Action::Close {
                direction: Direction::Tx,
                slot: slot(15)
            }
        );
        assert_eq!(
            Action::decode(0x0206),
            Action::Close {
                direction: Direction::Rx,
                slot: slot(2)
            }
        );
    }

    #[test]
    fn test_unknown_opcode() {
        assert_eq!(Action::decode(0x08), Action::Unknown(8));
        assert_eq!(Action::decode(0x1234_56FF), Action::Unknown(0xFF));
    }

    #[test]
    fn test_encode_matches_table() {
        let open = Action::Open {
            direction: Direction::Rx,
            slot: slot(1),
            ordinal: 4,
        };
        assert_eq!(open.encode(), 0x4104);
        assert_eq!(open.opcode(), opcode::OPEN_RX);

        let send = Action::Send {
            slot: slot(0),
            len: 2,
        };
        assert_eq!(send.encode(), 0x2002);
    }

    #[test]
    fn test_encode_masks_wide_ordinal() {
        let open = Action::Open {
            direction: Direction::Tx,
            slot: slot(0),
            ordinal: MAX_ORDINAL + 2,
        };
        assert_eq!(Action::decode(open.encode()), Action::Open {
            direction: Direction::Tx,
            slot: slot(0),
            ordinal: 1
        });
    }
}
