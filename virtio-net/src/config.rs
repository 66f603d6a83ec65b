//! VirtIO-net configuration and feature flags.

use bitflags::bitflags;

use crate::dma::REQUEST_SLOTS;
use crate::error::DriverError;
use crate::hal::PAGE_SIZE;
use crate::types::{VirtioNetHdr, ETH_FRAME_MAX};

/// PCI vendor ID for VirtIO devices.
pub const VIRTIO_VENDOR_ID: u16 = 0x1AF4;

/// VirtIO network device IDs (transitional, modern).
pub const VIRTIO_NET_DEVICE_IDS: &[u16] = &[0x1000, 0x1041];

/// Receive queue index.
pub const RX_QUEUE: u16 = 0;
/// Transmit queue index.
pub const TX_QUEUE: u16 = 1;

/// Feature bit numbers.
pub mod features {
    /// Device has a given MAC address in config space.
    pub const VIRTIO_NET_F_MAC: u32 = 5;
    /// Link status field is valid.
    pub const VIRTIO_NET_F_STATUS: u32 = 16;
}

/// `NetDeviceConfig::status` bit: link is up.
pub const VIRTIO_NET_S_LINK_UP: u16 = 1;

bitflags! {
    /// Driver-offered feature bits (first 32 bits of the feature word).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NetFeatures: u32 {
        const MAC = 1 << features::VIRTIO_NET_F_MAC;
        const STATUS = 1 << features::VIRTIO_NET_F_STATUS;
    }
}

bitflags! {
    /// Device status register bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DeviceStatus: u8 {
        const ACKNOWLEDGE = 1;
        const DRIVER = 2;
        const DRIVER_OK = 4;
        const FEATURES_OK = 8;
        const FAILED = 128;
    }
}

/// Driver configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    /// Diagnostic id, assigned by whoever constructs the driver.
    pub instance_id: u32,
    pub rx_queue: u16,
    pub tx_queue: u16,
    /// Interrupt vector that wakes the receive worker.
    pub rx_vector: u16,
    /// Interrupt vector that wakes the transmit worker.
    pub tx_vector: u16,
    /// Data bytes per receive buffer (at most one page).
    pub rx_buffer_size: u32,
    /// Largest frame accepted by `transmit`.
    pub max_tx_frame: usize,
    /// Refill once `size / refill_divisor` slots are free.
    pub refill_divisor: u16,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            instance_id: 0,
            rx_queue: RX_QUEUE,
            tx_queue: TX_QUEUE,
            rx_vector: 0,
            tx_vector: 1,
            rx_buffer_size: PAGE_SIZE as u32,
            max_tx_frame: ETH_FRAME_MAX,
            refill_divisor: 2,
        }
    }
}

impl DriverConfig {
    pub fn with_instance_id(mut self, id: u32) -> Self {
        self.instance_id = id;
        self
    }

    pub fn validate(&self) -> Result<(), DriverError> {
        if self.rx_queue == self.tx_queue {
            return Err(DriverError::InvalidConfig("rx and tx share a queue"));
        }
        if self.rx_vector == self.tx_vector {
            return Err(DriverError::InvalidConfig("rx and tx share a vector"));
        }
        if self.rx_buffer_size as usize > PAGE_SIZE {
            return Err(DriverError::InvalidConfig("rx buffer larger than a page"));
        }
        if (self.rx_buffer_size as usize) < ETH_FRAME_MAX {
            return Err(DriverError::InvalidConfig("rx buffer cannot hold a full frame"));
        }
        if self.max_tx_frame == 0 || self.max_tx_frame > u32::MAX as usize - VirtioNetHdr::SIZE {
            return Err(DriverError::InvalidConfig("max tx frame out of range"));
        }
        if self.refill_divisor == 0 {
            return Err(DriverError::InvalidConfig("refill divisor is zero"));
        }
        Ok(())
    }

    /// Free-slot count at which a drain triggers a refill.
    pub fn refill_threshold(&self, queue_size: u16) -> u16 {
        (queue_size / self.refill_divisor).max(REQUEST_SLOTS)
    }
}

/// Offered features on top of the transport's `base` bits.
pub fn driver_features(base: u32) -> u32 {
    base | NetFeatures::MAC.bits()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert_eq!(DriverConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_rejects_shared_vector() {
        let cfg = DriverConfig { tx_vector: 0, ..DriverConfig::default() };
        assert!(matches!(cfg.validate(), Err(DriverError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_oversized_buffer() {
        let cfg = DriverConfig { rx_buffer_size: 8192, ..DriverConfig::default() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_refill_threshold_is_half() {
        let cfg = DriverConfig::default();
        assert_eq!(cfg.refill_threshold(256), 128);
        assert_eq!(cfg.refill_threshold(2), 2);
    }

    #[test]
    fn test_driver_features_adds_mac() {
        assert_eq!(driver_features(0), 1 << 5);
        assert_eq!(driver_features(1 << 16), (1 << 16) | (1 << 5));
    }
}
