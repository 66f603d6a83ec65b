//! Shared data types.

pub mod ethernet;
pub mod virtio_hdr;

pub use ethernet::{MacAddress, ETH_ALEN, ETH_FRAME_MAX, ETH_HLEN, ETH_MTU};
pub use virtio_hdr::{VirtioNetHdr, VIRTIO_NET_HDR_GSO_NONE};
