//! Device/bus interface and driver matching.

use alloc::boxed::Box;

use crate::config::DeviceStatus;
use crate::ring::Virtqueue;
use crate::types::MacAddress;

/// PCI-style vendor/device id pair reported by the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId {
    pub vendor: u16,
    pub device: u16,
}

impl DeviceId {
    pub const fn new(vendor: u16, device: u16) -> Self {
        Self { vendor, device }
    }
}

/// virtio-net device config space, read in one shot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetDeviceConfig {
    pub mac: MacAddress,
    pub status: u16,
}

/// A discovered virtio device, already past feature negotiation.
pub trait VirtioTransport: Send {
    fn device_id(&self) -> DeviceId;

    /// Read the device-specific config space.
    fn read_config(&self) -> NetDeviceConfig;

    /// Whether feature `bit` was negotiated.
    fn has_feature(&self, bit: u32) -> bool;

    /// Hand out virtqueue `index`. Each queue can be taken once.
    fn take_queue(&mut self, index: u16) -> Option<Box<dyn Virtqueue>>;

    /// OR `status` into the device status register.
    fn add_status(&mut self, status: DeviceStatus);

    /// Reset the device. After this it no longer touches driver memory.
    ///
    /// Shutdown frees every page still posted once this returns, so an
    /// implementation must not return while the device can still DMA.
    fn reset(&mut self);
}

/// Driver matching and construction.
pub trait DriverInit: Sized {
    /// Error type for initialization failures.
    type Error: core::fmt::Debug;

    /// Everything besides the device needed to bring the driver up.
    type Context;

    /// PCI vendor IDs this driver supports.
    fn supported_vendors() -> &'static [u16];

    /// PCI device IDs this driver supports.
    fn supported_devices() -> &'static [u16];

    /// Check if driver supports a device.
    fn supports_device(id: DeviceId) -> bool {
        Self::supported_vendors().contains(&id.vendor) && Self::supported_devices().contains(&id.device)
    }

    /// Bring the driver up on `transport`.
    fn create<T: VirtioTransport + 'static>(transport: T, ctx: Self::Context) -> Result<Self, Self::Error>;

    /// `Ok(None)` when the device is not ours; the transport is dropped.
    fn probe<T: VirtioTransport + 'static>(transport: T, ctx: Self::Context) -> Result<Option<Self>, Self::Error> {
        if !Self::supports_device(transport.device_id()) {
            return Ok(None);
        }
        Self::create(transport, ctx).map(Some)
    }
}
