//! Ethernet constants and the MAC address type.

use core::fmt;

pub const ETH_ALEN: usize = 6;
pub const ETH_HLEN: usize = 14;
pub const ETH_MTU: usize = 1500;
/// Largest untagged frame without FCS.
pub const ETH_FRAME_MAX: usize = ETH_HLEN + ETH_MTU;

/// 48-bit MAC address.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MacAddress(pub [u8; ETH_ALEN]);

impl MacAddress {
    pub const fn new(bytes: [u8; ETH_ALEN]) -> Self {
        Self(bytes)
    }

    pub const fn octets(&self) -> [u8; ETH_ALEN] {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; ETH_ALEN]
    }
}

impl From<[u8; ETH_ALEN]> for MacAddress {
    fn from(bytes: [u8; ETH_ALEN]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl fmt::Debug for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::format;

    #[test]
    fn test_mac_display() {
        let mac = MacAddress::new([0x52, 0x54, 0x00, 0x12, 0x34, 0x56]);
        assert_eq!(format!("{}", mac), "52:54:00:12:34:56");
        assert!(!mac.is_zero());
        assert!(MacAddress::default().is_zero());
    }
}
