//! `construct_packet`: builds the probe datagram bytes, or — for stream
//! protocols — opens the connecting socket itself. Generalized to
//! UDP/TCP/SCTP and both address families.
//!
//! Returns a tagged [`ConstructResult`] rather than overloading a bare
//! `-1`/`errno` return with an `ECONNREFUSED`-means-reachable special
//! case.

use std::net::{Ipv4Addr, SocketAddr};

use socket2::{Domain, Protocol, Socket, Type};

use crate::args::ProbeProtocol;
use crate::error::ProbeError;

const IP4_HEADER_LEN: usize = 20;
const ICMP_ECHO_REQUEST: u8 = 8;
const ICMPV6_ECHO_REQUEST: u8 = 128;

pub enum ConstructResult {
    /// Bytes ready to hand to the raw send socket.
    Datagram(Vec<u8>),
    /// A non-blocking connect already in flight on this socket.
    Stream(Socket),
    /// The stream connect was refused immediately and synchronously —
    /// proof the destination host was reached.
    ImmediateRefusal,
    Error(ProbeError),
}

/// Per-probe construction parameters that do not change the send/receive
/// mechanics, only the packet contents.
#[derive(Debug, Clone, Copy)]
pub struct ProbeParams {
    pub protocol: ProbeProtocol,
    pub ttl: u8,
    pub size: usize,
}

pub fn construct_packet(port: u16, dest: &SocketAddr, params: &ProbeParams, ip_length_host_order: bool) -> ConstructResult {
    // TCP/SCTP never build bytes of their own: both families route through
    // the same connecting-stream-socket path, so check this once up front
    // instead of repeating the (family, protocol) match for each.
    if params.protocol.is_stream() {
        let stream_protocol = match params.protocol {
            ProbeProtocol::Tcp => Protocol::TCP,
            ProbeProtocol::Sctp => Protocol::from(libc::IPPROTO_SCTP),
            ProbeProtocol::Icmp | ProbeProtocol::Udp => unreachable!("is_stream() only holds for Tcp/Sctp"),
        };
        return open_stream_probe(dest, Type::STREAM, stream_protocol, params.ttl);
    }

    match (dest, params.protocol) {
        (SocketAddr::V4(v4), ProbeProtocol::Icmp) => {
            let icmp = build_icmp_echo(port, port, params.size);
            ConstructResult::Datagram(wrap_ipv4(*v4.ip(), params.ttl, libc::IPPROTO_ICMP as u8, &icmp, ip_length_host_order))
        }
        (SocketAddr::V4(v4), ProbeProtocol::Udp) => {
            let udp_port = if v4.port() != 0 { v4.port() } else { port };
            let udp = build_udp(port, udp_port, params.size);
            ConstructResult::Datagram(wrap_ipv4(*v4.ip(), params.ttl, libc::IPPROTO_UDP as u8, &udp, ip_length_host_order))
        }
        (SocketAddr::V6(_), ProbeProtocol::Icmp) => {
            ConstructResult::Datagram(build_icmp6_echo(port, port, params.size))
        }
        (SocketAddr::V6(v6), ProbeProtocol::Udp) => {
            let udp_port = if v6.port() != 0 { v6.port() } else { port };
            ConstructResult::Datagram(build_udp(port, udp_port, params.size))
        }
        (_, ProbeProtocol::Tcp) | (_, ProbeProtocol::Sctp) => {
            unreachable!("stream protocols are handled by the is_stream() branch above")
        }
    }
}

/// The one-time startup probe used to discover the IP length byte order
/// quirk: a minimal ICMP echo targeting `127.0.0.1`.
pub fn construct_byte_order_probe(ip_length_host_order: bool) -> Vec<u8> {
    let icmp = build_icmp_echo(0, 0, 0);
    wrap_ipv4(Ipv4Addr::LOCALHOST, 255, libc::IPPROTO_ICMP as u8, &icmp, ip_length_host_order)
}

/// Open a non-blocking connecting stream socket for a TCP/SCTP probe. The
/// kernel supplies the IP header for stream sockets (spec §4.1 only grants
/// `IP_HDRINCL` on the raw IPv4 send socket), so the per-hop TTL travels as
/// a socket option instead of a header byte we write ourselves.
fn open_stream_probe(dest: &SocketAddr, ty: Type, protocol: Protocol, ttl: u8) -> ConstructResult {
    let domain = match dest {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    };
    let socket = match Socket::new(domain, ty, Some(protocol)) {
        Ok(s) => s,
        Err(e) => return ConstructResult::Error(ProbeError::from_io_error(&e)),
    };

    let ttl_result = match dest {
        SocketAddr::V4(_) => socket.set_ttl(ttl.into()),
        SocketAddr::V6(_) => socket.set_unicast_hops_v6(ttl.into()),
    };
    if let Err(e) = ttl_result {
        return ConstructResult::Error(ProbeError::from_io_error(&e));
    }

    if let Err(e) = socket.set_nonblocking(true) {
        return ConstructResult::Error(ProbeError::from_io_error(&e));
    }

    match socket.connect(&(*dest).into()) {
        Ok(()) => ConstructResult::Stream(socket),
        Err(e) => match e.raw_os_error() {
            Some(code) if code == libc::EINPROGRESS || code == libc::EWOULDBLOCK => {
                ConstructResult::Stream(socket)
            }
            Some(code) if code == libc::ECONNREFUSED => ConstructResult::ImmediateRefusal,
            _ => ConstructResult::Error(ProbeError::from_io_error(&e)),
        },
    }
}

fn build_icmp_echo(id: u16, seq: u16, payload_len: usize) -> Vec<u8> {
    let mut packet = vec![0u8; 8 + payload_len];
    packet[0] = ICMP_ECHO_REQUEST;
    packet[1] = 0;
    packet[4..6].copy_from_slice(&id.to_be_bytes());
    packet[6..8].copy_from_slice(&seq.to_be_bytes());
    let checksum = checksum16(&packet);
    packet[2..4].copy_from_slice(&checksum.to_be_bytes());
    packet
}

fn build_icmp6_echo(id: u16, seq: u16, payload_len: usize) -> Vec<u8> {
    let mut packet = vec![0u8; 8 + payload_len];
    packet[0] = ICMPV6_ECHO_REQUEST;
    packet[1] = 0;
    // Checksum left zero: the kernel computes the ICMPv6 checksum over
    // the pseudo-header for us on send.
    packet[4..6].copy_from_slice(&id.to_be_bytes());
    packet[6..8].copy_from_slice(&seq.to_be_bytes());
    packet
}

/// A UDP datagram carrying `port` as the source port, so the receive-side
/// parser can correlate a destination-unreachable's embedded header back
/// to this probe by source port.
fn build_udp(src_port: u16, dst_port: u16, payload_len: usize) -> Vec<u8> {
    let mut packet = vec![0u8; 8 + payload_len];
    let length = packet.len() as u16;
    packet[0..2].copy_from_slice(&src_port.to_be_bytes());
    packet[2..4].copy_from_slice(&dst_port.to_be_bytes());
    packet[4..6].copy_from_slice(&length.to_be_bytes());
    // Checksum left zero (optional for IPv4 UDP); the probe only needs
    // to elicit an ICMP response, not be accepted by an application.
    packet
}

fn wrap_ipv4(dest: Ipv4Addr, ttl: u8, protocol: u8, payload: &[u8], ip_length_host_order: bool) -> Vec<u8> {
    let total_len = (IP4_HEADER_LEN + payload.len()) as u16;
    let mut header = vec![0u8; IP4_HEADER_LEN];

    header[0] = 0x45; // version 4, IHL 5 (20 bytes, no options)
    header[1] = 0; // TOS

    let len_bytes = if ip_length_host_order {
        total_len.to_ne_bytes()
    } else {
        total_len.to_be_bytes()
    };
    header[2..4].copy_from_slice(&len_bytes);

    header[4..6].copy_from_slice(&0u16.to_be_bytes()); // identification
    header[6..8].copy_from_slice(&0u16.to_be_bytes()); // flags/fragment offset
    header[8] = ttl;
    header[9] = protocol;
    header[10..12].copy_from_slice(&0u16.to_be_bytes()); // checksum, filled below
    header[12..16].copy_from_slice(&Ipv4Addr::UNSPECIFIED.octets()); // kernel fills source
    header[16..20].copy_from_slice(&dest.octets());

    let checksum = checksum16(&header);
    header[10..12].copy_from_slice(&checksum.to_be_bytes());

    let mut packet = header;
    packet.extend_from_slice(payload);
    packet
}

/// RFC 1071 one's-complement checksum, shared by the IPv4 header and the
/// ICMP echo body.
fn checksum16(data: &[u8]) -> u16 {
    let mut sum = 0u32;
    for chunk in data.chunks(2) {
        if chunk.len() == 2 {
            sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
        } else {
            sum += (chunk[0] as u32) << 8;
        }
    }
    while (sum >> 16) != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn icmp_echo_has_correct_checksum() {
        let packet = build_icmp_echo(42, 7, 0);
        assert_eq!(packet[0], ICMP_ECHO_REQUEST);
        assert_eq!(u16::from_be_bytes([packet[4], packet[5]]), 42);
        assert_eq!(u16::from_be_bytes([packet[6], packet[7]]), 7);
        // A packet checksums to zero when the checksum field itself is
        // included in the sum (RFC 1071 self-check property).
        assert_eq!(checksum_over(&packet), 0);
    }

    #[test]
    fn ipv4_total_length_honors_byte_order_flag() {
        let payload = build_icmp_echo(1, 1, 0);
        let net_order = wrap_ipv4(Ipv4Addr::LOCALHOST, 1, 1, &payload, false);
        let host_order = wrap_ipv4(Ipv4Addr::LOCALHOST, 1, 1, &payload, true);

        let total = (IP4_HEADER_LEN + payload.len()) as u16;
        assert_eq!(&net_order[2..4], &total.to_be_bytes());
        assert_eq!(&host_order[2..4], &total.to_ne_bytes());
    }

    #[test]
    fn ipv4_header_checksum_self_checks_to_zero() {
        let payload = build_icmp_echo(1, 1, 0);
        let packet = wrap_ipv4(Ipv4Addr::new(192, 0, 2, 1), 64, 1, &payload, false);
        assert_eq!(checksum_over(&packet[..IP4_HEADER_LEN]), 0);
    }

    #[test]
    fn udp_datagram_carries_ports_and_length() {
        let udp = build_udp(33434, 33435, 4);
        assert_eq!(u16::from_be_bytes([udp[0], udp[1]]), 33434);
        assert_eq!(u16::from_be_bytes([udp[2], udp[3]]), 33435);
        assert_eq!(u16::from_be_bytes([udp[4], udp[5]]), 12);
    }

    fn checksum_over(data: &[u8]) -> u16 {
        let mut sum = 0u32;
        for chunk in data.chunks(2) {
            if chunk.len() == 2 {
                sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
            } else {
                sum += (chunk[0] as u32) << 8;
            }
        }
        while (sum >> 16) != 0 {
            sum = (sum & 0xffff) + (sum >> 16);
        }
        !(sum as u16)
    }
}
