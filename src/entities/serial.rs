use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Serial(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialKind {
    Mobile,
    Item,
}

pub const MOBILE_SERIAL_FIRST: u32 = 0x0000_0001;
pub const MOBILE_SERIAL_LAST: u32 = 0x3fff_ffff;
pub const ITEM_SERIAL_FIRST: u32 = 0x4000_0000;
pub const ITEM_SERIAL_LAST: u32 = 0x7fff_ffff;

impl Serial {
    pub const ZERO: Serial = Serial(0);

    pub fn kind(self) -> Option<SerialKind> {
        match self.0 {
            MOBILE_SERIAL_FIRST..=MOBILE_SERIAL_LAST => Some(SerialKind::Mobile),
            ITEM_SERIAL_FIRST..=ITEM_SERIAL_LAST => Some(SerialKind::Item),
            _ => None,
        }
    }

    pub fn is_mobile(self) -> bool {
        matches!(self.kind(), Some(SerialKind::Mobile))
    }

    pub fn is_item(self) -> bool {
        matches!(self.kind(), Some(SerialKind::Item))
    }

    pub fn is_assigned(self) -> bool {
        self.0 != 0
    }
}

impl std::fmt::Display for Serial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_follows_range() {
        assert_eq!(Serial(MOBILE_SERIAL_FIRST).kind(), Some(SerialKind::Mobile));
        assert_eq!(Serial(MOBILE_SERIAL_LAST).kind(), Some(SerialKind::Mobile));
        assert_eq!(Serial(ITEM_SERIAL_FIRST).kind(), Some(SerialKind::Item));
        assert_eq!(Serial(ITEM_SERIAL_LAST).kind(), Some(SerialKind::Item));
        assert_eq!(Serial(0).kind(), None);
        assert_eq!(Serial(0x8000_0000).kind(), None);
    }

    #[test]
    fn zero_is_unassigned() {
        assert!(!Serial::ZERO.is_assigned());
        assert!(Serial(1).is_assigned());
    }
}
