//! Canonical bidirectional flow keying.
//!
//! A flow is identified independent of which endpoint happened to be the
//! source of a given packet: the key is built from the two endpoints sorted
//! into a low/high order, so `(a, b)` and `(b, a)` produce the same key.
//! `is_forward` records, for the packet this key was derived from, whether
//! its source endpoint was chosen as the low one.

use std::net::IpAddr;

/// Either side of a flow: an IP address and, for transport protocols that
/// have one, a port.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct Endpoint {
    pub ip: IpAddr,
    pub port: u16,
}

/// The canonical, direction-independent identity of a flow.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct CanonicalFlowKey {
    pub ethertype: u16,
    pub protocol: u8,
    pub ip_lo: IpAddr,
    pub port_lo: u16,
    pub ip_hi: IpAddr,
    pub port_hi: u16,
}

/// Orders `a` and `b` into `(low, high, is_forward)`.
///
/// IPs are compared first; ports break ties only when the IPs are equal.
/// `is_forward` is `true` iff `a` sorted to the low side.
#[must_use]
pub fn canonicalize(
    ethertype: u16,
    protocol: u8,
    a: Endpoint,
    b: Endpoint,
) -> (CanonicalFlowKey, bool) {
    let a_is_low = (a.ip, a.port) <= (b.ip, b.port);
    let (lo, hi, is_forward) = if a_is_low { (a, b, true) } else { (b, a, false) };
    (
        CanonicalFlowKey {
            ethertype,
            protocol,
            ip_lo: lo.ip,
            port_lo: lo.port,
            ip_hi: hi.ip,
            port_hi: hi.port,
        },
        is_forward,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const ETH_IPV4: u16 = 0x0800;
    const PROTO_TCP: u8 = 6;

    fn ep(ip: &str, port: u16) -> Endpoint {
        Endpoint {
            ip: ip.parse().unwrap(),
            port,
        }
    }

    #[test]
    fn scenario_s2_different_ips() {
        let src = ep("10.0.0.2", 80);
        let dst = ep("10.0.0.1", 1234);
        let (key, is_forward) = canonicalize(ETH_IPV4, PROTO_TCP, src, dst);
        assert_eq!(key.ip_lo, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(key.ip_hi, Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(key.port_lo, 1234);
        assert_eq!(key.port_hi, 80);
        assert!(!is_forward);
        assert_eq!(key.ethertype, 0x0800);
    }

    #[test]
    fn scenario_s3_same_ips_breaks_tie_on_port() {
        let src = ep("10.0.0.1", 5000);
        let dst = ep("10.0.0.1", 80);
        let (key, is_forward) = canonicalize(ETH_IPV4, PROTO_TCP, src, dst);
        assert_eq!(key.port_lo, 80);
        assert_eq!(key.port_hi, 5000);
        assert!(!is_forward);
    }

    #[test]
    fn key_is_symmetric_regardless_of_call_order() {
        let a = ep("192.168.1.5", 443);
        let b = ep("192.168.1.9", 51234);
        let (k1, f1) = canonicalize(ETH_IPV4, PROTO_TCP, a, b);
        let (k2, f2) = canonicalize(ETH_IPV4, PROTO_TCP, b, a);
        assert_eq!(k1, k2);
        assert!(f1 ^ f2);
    }

    #[test]
    fn ipv4_and_ipv6_keys_never_collide() {
        let v4 = ep("10.0.0.1", 80);
        let v6 = ep("::1", 80);
        let (k4, _) = canonicalize(0x0800, PROTO_TCP, v4, v4);
        let (k6, _) = canonicalize(0x86DD, PROTO_TCP, v6, v6);
        assert_ne!(k4.ethertype, k6.ethertype);
        assert_ne!(k4, k6);
    }
}
