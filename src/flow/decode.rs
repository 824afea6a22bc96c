//! Packet decoding: Ethernet (with 802.1Q), IPv4/IPv6, and the transport
//! headers the flow tracker cares about. ARP and LLDP frames are
//! recognised only far enough to be discarded; anything malformed is
//! dropped with a debug-level log rather than panicking.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use derive_more::Display;
use slog::{debug, Logger};

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_IPV6: u16 = 0x86DD;
pub const ETHERTYPE_ARP: u16 = 0x0806;
pub const ETHERTYPE_VLAN: u16 = 0x8100;
pub const ETHERTYPE_LLDP: u16 = 0x88CC;

pub const PROTO_ICMP: u8 = 1;
pub const PROTO_IGMP: u8 = 2;
pub const PROTO_TCP: u8 = 6;
pub const PROTO_UDP: u8 = 17;
pub const PROTO_ESP: u8 = 50;
pub const PROTO_ICMPV6: u8 = 58;

#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum DecodeError {
    #[display(fmt = "frame too short")]
    Truncated,
    #[display(fmt = "unhandled ethertype {:#06x}", _0)]
    UnhandledEthertype(u16),
    #[display(fmt = "unhandled ip protocol {}", _0)]
    UnhandledProtocol(u8),
    #[display(fmt = "ignored ({})", _0)]
    Ignored(&'static str),
}

/// A decoded packet, as far as the flow tracker needs it.
#[derive(Clone, Debug)]
pub struct DecodedPacket<'a> {
    pub ethertype: u16,
    pub protocol: u8,
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub payload: &'a [u8],
}

/// Peels Ethernet (with an optional single 802.1Q tag), the IP layer, and
/// the transport layer, returning `Err` for frames the tracker does not
/// keep flow state for.
pub fn decode(log: &Logger, frame: &[u8]) -> Result<DecodedPacket<'_>, DecodeError> {
    if frame.len() < 14 {
        return Err(DecodeError::Truncated);
    }
    let mut offset = 12;
    let mut ethertype = u16::from_be_bytes([frame[offset], frame[offset + 1]]);
    offset += 2;
    if ethertype == ETHERTYPE_VLAN {
        if frame.len() < offset + 4 {
            return Err(DecodeError::Truncated);
        }
        ethertype = u16::from_be_bytes([frame[offset + 2], frame[offset + 3]]);
        offset += 4;
    }

    match ethertype {
        ETHERTYPE_IPV4 => decode_ipv4(frame, offset),
        ETHERTYPE_IPV6 => decode_ipv6(frame, offset),
        ETHERTYPE_ARP => Err(DecodeError::Ignored("arp")),
        ETHERTYPE_LLDP => Err(DecodeError::Ignored("lldp")),
        other => {
            debug!(log, "unhandled ethertype"; "ethertype" => format!("{:#06x}", other));
            Err(DecodeError::UnhandledEthertype(other))
        }
    }
}

fn decode_ipv4(frame: &[u8], offset: usize) -> Result<DecodedPacket<'_>, DecodeError> {
    if frame.len() < offset + 20 {
        return Err(DecodeError::Truncated);
    }
    let ihl = (frame[offset] & 0x0f) as usize * 4;
    if frame.len() < offset + ihl {
        return Err(DecodeError::Truncated);
    }
    let protocol = frame[offset + 9];
    let src_ip = IpAddr::V4(Ipv4Addr::new(
        frame[offset + 12],
        frame[offset + 13],
        frame[offset + 14],
        frame[offset + 15],
    ));
    let dst_ip = IpAddr::V4(Ipv4Addr::new(
        frame[offset + 16],
        frame[offset + 17],
        frame[offset + 18],
        frame[offset + 19],
    ));
    decode_transport(frame, offset + ihl, ETHERTYPE_IPV4, protocol, src_ip, dst_ip)
}

fn decode_ipv6(frame: &[u8], offset: usize) -> Result<DecodedPacket<'_>, DecodeError> {
    if frame.len() < offset + 40 {
        return Err(DecodeError::Truncated);
    }
    let protocol = frame[offset + 6];
    let mut src_octets = [0u8; 16];
    let mut dst_octets = [0u8; 16];
    src_octets.copy_from_slice(&frame[offset + 8..offset + 24]);
    dst_octets.copy_from_slice(&frame[offset + 24..offset + 40]);
    let src_ip = IpAddr::V6(Ipv6Addr::from(src_octets));
    let dst_ip = IpAddr::V6(Ipv6Addr::from(dst_octets));
    decode_transport(frame, offset + 40, ETHERTYPE_IPV6, protocol, src_ip, dst_ip)
}

fn decode_transport(
    frame: &[u8],
    offset: usize,
    ethertype: u16,
    protocol: u8,
    src_ip: IpAddr,
    dst_ip: IpAddr,
) -> Result<DecodedPacket<'_>, DecodeError> {
    let (src_port, dst_port) = match protocol {
        PROTO_TCP | PROTO_UDP => {
            if frame.len() < offset + 4 {
                return Err(DecodeError::Truncated);
            }
            (
                u16::from_be_bytes([frame[offset], frame[offset + 1]]),
                u16::from_be_bytes([frame[offset + 2], frame[offset + 3]]),
            )
        }
        PROTO_ICMP | PROTO_ICMPV6 | PROTO_IGMP | PROTO_ESP => (0, 0),
        other => return Err(DecodeError::UnhandledProtocol(other)),
    };
    Ok(DecodedPacket {
        ethertype,
        protocol,
        src_ip,
        dst_ip,
        src_port,
        dst_port,
        payload: &frame[offset..],
    })
}
