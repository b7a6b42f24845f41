//! Small shared types: slot indices and port directions.

use std::fmt;

/// Number of RX slots and number of TX slots.
pub const SLOT_COUNT: usize = 16;

/// Direction of a slot or catalog, seen from this application.
///
/// `Rx` bindings read from a device's output ports, `Tx` bindings write to a
/// device's input ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Rx,
    Tx,
}

impl Direction {
    /// The other direction
    pub fn flip(self) -> Self {
        match self {
            Direction::Rx => Direction::Tx,
            Direction::Tx => Direction::Rx,
        }
    }

    /// Lowercase tag used in logs and the console protocol
    pub fn tag(self) -> &'static str {
        match self {
            Direction::Rx => "rx",
            Direction::Tx => "tx",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Index of a slot within its RX or TX array, always below [`SLOT_COUNT`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotIndex(u8);

impl SlotIndex {
    /// Validate a caller supplied index
    pub fn new(index: u8) -> Option<Self> {
        if (index as usize) < SLOT_COUNT {
            Some(Self(index))
        } else {
            None
        }
    }

    /// Build an index from the low nibble of `bits`; cannot fail.
    pub fn from_nibble(bits: u32) -> Self {
        Self((bits & 0x0F) as u8)
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Iterate over every valid index in ascending order
    pub fn all() -> impl Iterator<Item = SlotIndex> {
        (0..SLOT_COUNT as u8).map(SlotIndex)
    }
}

impl fmt::Display for SlotIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_index_bounds() {
        assert_eq!(SlotIndex::new(0).map(SlotIndex::get), Some(0));
        assert_eq!(SlotIndex::new(15).map(SlotIndex::get), Some(15));
        assert!(SlotIndex::new(16).is_none());
        assert!(SlotIndex::new(255).is_none());
    }

    #[test]
    fn test_from_nibble_masks_high_bits() {
        assert_eq!(SlotIndex::from_nibble(0x1F).get(), 15);
        assert_eq!(SlotIndex::from_nibble(0x30).get(), 0);
    }

    #[test]
    fn test_all_covers_every_slot() {
        let all: Vec<u8> = SlotIndex::all().map(SlotIndex::get).collect();
        assert_eq!(all, (0..16).collect::<Vec<u8>>());
    }

    #[test]
    fn test_direction_flip() {
        assert_eq!(Direction::Rx.flip(), Direction::Tx);
        assert_eq!(Direction::Tx.flip(), Direction::Rx);
        assert_eq!(Direction::Tx.to_string(), "tx");
    }
}
