//! Received-frame diagnostics.
//!
//! Debug-level summaries only; nothing here affects delivery.

use core::fmt;

use smoltcp::wire::{
    EthernetAddress, EthernetFrame, EthernetProtocol, Icmpv4Packet, IpProtocol, Ipv4Address, Ipv4Packet,
};

/// IPv4 part of a summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Summary {
    pub src: Ipv4Address,
    pub dst: Ipv4Address,
    pub protocol: IpProtocol,
    pub total_len: u16,
    /// ICMP (type, code) when the payload is ICMP.
    pub icmp: Option<(u8, u8)>,
}

/// What the headers of a frame say.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSummary {
    pub src: EthernetAddress,
    pub dst: EthernetAddress,
    pub ethertype: EthernetProtocol,
    pub ipv4: Option<Ipv4Summary>,
}

impl FrameSummary {
    /// Parse the Ethernet header and, when present, IPv4 and ICMP.
    ///
    /// Returns `None` if the frame is shorter than an Ethernet header.
    pub fn parse(frame: &[u8]) -> Option<Self> {
        let eth = EthernetFrame::new_checked(frame).ok()?;
        let ipv4 = match eth.ethertype() {
            EthernetProtocol::Ipv4 => Ipv4Packet::new_checked(eth.payload()).ok().map(|ip| {
                let icmp = match ip.next_header() {
                    IpProtocol::Icmp => Icmpv4Packet::new_checked(ip.payload())
                        .ok()
                        .map(|icmp| (u8::from(icmp.msg_type()), icmp.msg_code())),
                    _ => None,
                };
                Ipv4Summary {
                    src: ip.src_addr(),
                    dst: ip.dst_addr(),
                    protocol: ip.next_header(),
                    total_len: ip.total_len(),
                    icmp,
                }
            }),
            _ => None,
        };
        Some(Self {
            src: eth.src_addr(),
            dst: eth.dst_addr(),
            ethertype: eth.ethertype(),
            ipv4,
        })
    }
}

impl fmt::Display for FrameSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "src {} dst {} type {}", self.src, self.dst, self.ethertype)?;
        if let Some(ip) = &self.ipv4 {
            write!(
                f,
                " | tot_len={} protocol={} saddr={} daddr={}",
                ip.total_len, ip.protocol, ip.src, ip.dst
            )?;
            if let Some((ty, code)) = ip.icmp {
                write!(f, " | icmp type={} code={}", ty, code)?;
            }
        }
        Ok(())
    }
}

/// Log a one-line summary of `frame` at debug level.
pub fn log_frame(instance: u32, frame: &[u8]) {
    if !log::log_enabled!(log::Level::Debug) {
        return;
    }
    match FrameSummary::parse(frame) {
        Some(summary) => log::debug!("virtio-net{}: rx {} bytes: {}", instance, frame.len(), summary),
        None => log::debug!("virtio-net{}: rx runt frame ({} bytes)", instance, frame.len()),
    }
}
