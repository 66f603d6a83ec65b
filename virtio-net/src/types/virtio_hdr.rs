//! VirtIO network header definitions.
//!
//! Legacy layout without `VIRTIO_NET_F_MRG_RXBUF`: 10 bytes, no
//! `num_buffers` field. The driver negotiates no offloads, so every header it
//! hands to the device is all zeroes.

/// No segmentation offload.
pub const VIRTIO_NET_HDR_GSO_NONE: u8 = 0;

/// VirtIO network header preceding every frame on both rings.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VirtioNetHdr {
    pub flags: u8,
    pub gso_type: u8,
    /// Ethernet + IP + L4 header length (offload only).
    pub hdr_len: u16,
    pub gso_size: u16,
    pub csum_start: u16,
    pub csum_offset: u16,
}

impl VirtioNetHdr {
    /// Size of the header on the wire.
    pub const SIZE: usize = core::mem::size_of::<Self>();

    /// The always-zero header this driver posts.
    pub const fn zeroed() -> Self {
        Self {
            flags: 0,
            gso_type: VIRTIO_NET_HDR_GSO_NONE,
            hdr_len: 0,
            gso_size: 0,
            csum_start: 0,
            csum_offset: 0,
        }
    }

    pub fn is_zeroed(&self) -> bool {
        *self == Self::zeroed()
    }
}
