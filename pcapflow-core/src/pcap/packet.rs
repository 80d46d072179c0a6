//! Link-layer to TCP decoding for captured frames.

use std::net::IpAddr;

use bytes::Bytes;
use etherparse::{Ethernet2HeaderSlice, Ipv4HeaderSlice, Ipv6HeaderSlice, TcpHeaderSlice};

use crate::stream::{NetFlow, TcpSegment, TransportFlow};

/// Link types understood by [`decode_tcp`].
pub mod linktype {
    /// BSD loopback (4-byte address family, host order)
    pub const NULL: u16 = 0;
    pub const ETHERNET: u16 = 1;
    /// Raw IP, no link header
    pub const RAW: u16 = 101;
    /// Linux cooked capture v1
    pub const LINUX_SLL: u16 = 113;
    pub const IPV4: u16 = 228;
    pub const IPV6: u16 = 229;
}

mod ethertype {
    pub const IPV4: u16 = 0x0800;
    pub const IPV6: u16 = 0x86dd;
    pub const VLAN: u16 = 0x8100;
    pub const QINQ: u16 = 0x88a8;
}

const IP_PROTO_TCP: u8 = 6;
const SLL_HEADER_LEN: usize = 16;
const VLAN_TAG_LEN: usize = 4;

/// Decode one captured frame down to its TCP segment.
///
/// Returns `None` for anything that is not TCP over IPv4 or IPv6 (including
/// truncated frames and IPv4 fragments). Link-layer padding after the IP
/// payload is not part of the returned payload.
pub fn decode_tcp(link_type: u16, frame: &[u8], timestamp_us: i64) -> Option<TcpSegment> {
    let ip = match link_type {
        linktype::ETHERNET => strip_ethernet(frame)?,
        linktype::NULL => frame.get(4..)?,
        linktype::LINUX_SLL => {
            let protocol = u16::from_be_bytes([*frame.get(14)?, *frame.get(15)?]);
            if protocol != ethertype::IPV4 && protocol != ethertype::IPV6 {
                return None;
            }
            frame.get(SLL_HEADER_LEN..)?
        }
        linktype::RAW | linktype::IPV4 | linktype::IPV6 => frame,
        _ => return None,
    };
    decode_ip(ip, timestamp_us)
}

fn strip_ethernet(frame: &[u8]) -> Option<&[u8]> {
    let eth = Ethernet2HeaderSlice::from_slice(frame).ok()?;
    let mut ether_type = eth.ether_type().0;
    let mut rest = &frame[eth.slice().len()..];

    // 802.1Q / 802.1ad tags
    while ether_type == ethertype::VLAN || ether_type == ethertype::QINQ {
        let tag = rest.get(..VLAN_TAG_LEN)?;
        ether_type = u16::from_be_bytes([tag[2], tag[3]]);
        rest = &rest[VLAN_TAG_LEN..];
    }

    match ether_type {
        ethertype::IPV4 | ethertype::IPV6 => Some(rest),
        _ => None,
    }
}

fn decode_ip(data: &[u8], timestamp_us: i64) -> Option<TcpSegment> {
    let version = data.first()? >> 4;
    let (net, tcp) = match version {
        4 => {
            let ipv4 = Ipv4HeaderSlice::from_slice(data).ok()?;
            if ipv4.protocol().0 != IP_PROTO_TCP
                || ipv4.more_fragments()
                || ipv4.fragments_offset().value() != 0
            {
                return None;
            }
            let end = (ipv4.total_len() as usize).min(data.len());
            let start = ipv4.slice().len();
            let net = NetFlow::new(
                IpAddr::V4(ipv4.source_addr()),
                IpAddr::V4(ipv4.destination_addr()),
            );
            (net, data.get(start..end)?)
        }
        6 => {
            let ipv6 = Ipv6HeaderSlice::from_slice(data).ok()?;
            // Extension headers are not followed
            if ipv6.next_header().0 != IP_PROTO_TCP {
                return None;
            }
            let start = ipv6.slice().len();
            let end = (start + ipv6.payload_length() as usize).min(data.len());
            let net = NetFlow::new(
                IpAddr::V6(ipv6.source_addr()),
                IpAddr::V6(ipv6.destination_addr()),
            );
            (net, data.get(start..end)?)
        }
        _ => return None,
    };

    let header = TcpHeaderSlice::from_slice(tcp).ok()?;
    let payload = &tcp[header.slice().len()..];

    Some(TcpSegment {
        net,
        transport: TransportFlow::new(header.source_port(), header.destination_port()),
        seq: header.sequence_number(),
        syn: header.syn(),
        fin: header.fin(),
        rst: header.rst(),
        payload: Bytes::copy_from_slice(payload),
        timestamp_us,
    })
}
