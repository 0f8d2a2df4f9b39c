use std::{fmt, net::Ipv4Addr};

use pnet::{
    packet::{
        arp::{Arp, ArpHardwareTypes, ArpOperation, ArpOperations, ArpPacket, MutableArpPacket},
        ethernet::{EtherTypes, EthernetPacket, MutableEthernetPacket},
        FromPacket, Packet,
    },
    util::MacAddr,
};

use crate::constants::{ARP_PACK_LEN, ETH_PACK_LEN, IP_V4_LEN, MAC_ADDR_LEN};
use crate::error::{Error, Result};

/// A broadcast ARP request for a single target, ready to be written to the wire.
///
/// The frame is an Ethernet II header followed by an RFC 826 request with the
/// target hardware address left zeroed. Once built it is never modified.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct RequestFrame {
    bytes: [u8; ETH_PACK_LEN],
}

impl RequestFrame {
    /// Builds the request asking who owns `target_ip`, sent from `local_mac`/`local_ip`.
    ///
    /// # Example
    /// ```
    /// use arp_conflict::frame::RequestFrame;
    /// use pnet::util::MacAddr;
    /// use std::net::Ipv4Addr;
    ///
    /// let frame = RequestFrame::build(
    ///     Ipv4Addr::new(192, 168, 1, 5),
    ///     MacAddr::new(0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF),
    ///     Ipv4Addr::new(192, 168, 1, 1),
    /// );
    /// assert_eq!(frame.as_bytes().len(), 42);
    /// assert_eq!(&frame.as_bytes()[..6], &[0xff; 6]);
    /// ```
    pub fn build(target_ip: Ipv4Addr, local_mac: MacAddr, local_ip: Ipv4Addr) -> Self {
        Self {
            bytes: build_arp_frame(
                ArpOperations::Request,
                MacAddr::broadcast(),
                local_mac,
                local_ip,
                MacAddr::zero(),
                target_ip,
            ),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl AsRef<[u8]> for RequestFrame {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl fmt::Debug for RequestFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let eth = EthernetPacket::new(&self.bytes);
        let arp = eth.as_ref().and_then(|eth| ArpPacket::new(eth.payload()));
        match arp {
            Some(arp) => f
                .debug_struct("RequestFrame")
                .field("sender_hw_addr", &arp.get_sender_hw_addr())
                .field("sender_proto_addr", &arp.get_sender_proto_addr())
                .field("target_proto_addr", &arp.get_target_proto_addr())
                .finish(),
            None => f.debug_struct("RequestFrame").finish_non_exhaustive(),
        }
    }
}

pub(crate) fn build_arp_frame(
    operation: ArpOperation,
    eth_destination: MacAddr,
    sender_mac: MacAddr,
    sender_ip: Ipv4Addr,
    target_mac: MacAddr,
    target_ip: Ipv4Addr,
) -> [u8; ETH_PACK_LEN] {
    let mut arp_buf = [0; ARP_PACK_LEN];
    let mut arp_packet =
        MutableArpPacket::new(&mut arp_buf).expect("buffer holds a full ARP packet");
    arp_packet.set_hardware_type(ArpHardwareTypes::Ethernet);
    arp_packet.set_protocol_type(EtherTypes::Ipv4);
    arp_packet.set_hw_addr_len(MAC_ADDR_LEN);
    arp_packet.set_proto_addr_len(IP_V4_LEN);
    arp_packet.set_operation(operation);
    arp_packet.set_sender_hw_addr(sender_mac);
    arp_packet.set_sender_proto_addr(sender_ip);
    arp_packet.set_target_hw_addr(target_mac);
    arp_packet.set_target_proto_addr(target_ip);

    let mut eth_buf = [0; ETH_PACK_LEN];
    let mut eth_packet =
        MutableEthernetPacket::new(&mut eth_buf).expect("buffer holds an Ethernet frame");
    eth_packet.set_destination(eth_destination);
    eth_packet.set_source(sender_mac);
    eth_packet.set_ethertype(EtherTypes::Arp);
    eth_packet.set_payload(arp_packet.packet());

    eth_buf
}

/// Decodes an Ethernet frame carrying an IPv4-over-Ethernet ARP packet.
///
/// # Errors
/// Returns [`Error::Parse`] for truncated frames, frames of another ethertype and
/// ARP packets whose address types or lengths are not Ethernet/IPv4.
pub fn parse_arp_frame(bytes: &[u8]) -> Result<Arp> {
    let ethernet_packet =
        EthernetPacket::new(bytes).ok_or(Error::Parse("truncated Ethernet frame"))?;
    if ethernet_packet.get_ethertype() != EtherTypes::Arp {
        return Err(Error::Parse("not an ARP packet"));
    }
    let arp_packet =
        ArpPacket::new(ethernet_packet.payload()).ok_or(Error::Parse("truncated ARP packet"))?;
    if arp_packet.get_hardware_type() != ArpHardwareTypes::Ethernet
        || arp_packet.get_protocol_type() != EtherTypes::Ipv4
        || arp_packet.get_hw_addr_len() != MAC_ADDR_LEN
        || arp_packet.get_proto_addr_len() != IP_V4_LEN
    {
        return Err(Error::Parse("ARP packet is not Ethernet/IPv4"));
    }
    Ok(arp_packet.from_packet())
}
