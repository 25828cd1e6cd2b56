use pnet::packet::icmp::{IcmpPacket, IcmpTypes};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::udp::UdpPacket;
use std::net::{IpAddr, Ipv4Addr};

use crate::state::FlowId;

/// ICMP error header: type, code, checksum plus 4 unused bytes
const ICMP_HEADER_SIZE: usize = 8;
/// Quoted UDP header length (enough for both port fields)
const UDP_HEADER_SIZE: usize = 8;

/// An ICMP error correlated back to the probe flow that triggered it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelatedReply {
    pub responder: IpAddr,
    pub flow: FlowId,
}

/// Parse a raw IPv4 datagram from the ICMP socket and recover the flow of
/// the quoted probe.
///
/// Accepts Time Exceeded (the usual hop response) and Destination
/// Unreachable (the destination itself rejecting the probe port). The
/// quoted packet must be a UDP probe addressed to `destination` (anything
/// else is someone else's traffic); its source port is the flow id.
pub fn correlate_reply(datagram: &[u8], destination: Ipv4Addr) -> Option<CorrelatedReply> {
    let ip_packet = Ipv4Packet::new(datagram)?;
    if ip_packet.get_next_level_protocol() != IpNextHeaderProtocols::Icmp {
        return None;
    }
    let responder = IpAddr::V4(ip_packet.get_source());

    let ip_header_len = (ip_packet.get_header_length() as usize) * 4;
    if datagram.len() < ip_header_len + ICMP_HEADER_SIZE {
        return None;
    }
    let icmp_data = &datagram[ip_header_len..];
    let icmp_packet = IcmpPacket::new(icmp_data)?;

    match icmp_packet.get_icmp_type() {
        IcmpTypes::TimeExceeded | IcmpTypes::DestinationUnreachable => {}
        _ => return None,
    }

    // Quoted datagram: the original IPv4 header plus at least its first 8
    // bytes. Offsets are computed by hand because the quote is routinely
    // truncated and the inner length fields cannot be trusted.
    if icmp_data.len() < ICMP_HEADER_SIZE {
        return None;
    }
    let quoted = &icmp_data[ICMP_HEADER_SIZE..];
    let original_ip = Ipv4Packet::new(quoted)?;
    if original_ip.get_next_level_protocol() != IpNextHeaderProtocols::Udp {
        return None;
    }
    if original_ip.get_destination() != destination {
        return None;
    }

    let orig_ihl = (original_ip.get_header_length() as usize) * 4;
    if quoted.len() < orig_ihl + UDP_HEADER_SIZE {
        return None;
    }
    let udp = UdpPacket::new(&quoted[orig_ihl..])?;

    Some(CorrelatedReply {
        responder,
        flow: udp.get_source(),
    })
}
