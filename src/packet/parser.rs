//! `handle_received_ip4_packet` / `handle_received_ip6_packet`:
//! family-specific parsers that identify whether an inbound packet
//! answers an outstanding probe. The correlation key is the probe's
//! port rather than a local sequence number, and destination-unreachable
//! is distinguished from time-exceeded.

use std::net::{IpAddr, Ipv4Addr};

/// The ICMP-level shape of a response, matched against the probe table
/// by embedded port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HopOutcome {
    Reply,
    TtlExpired,
    Unreachable,
}

pub struct Parsed {
    pub port: u16,
    pub source_addr: IpAddr,
    pub outcome: HopOutcome,
}

const IP4_ICMP_TYPE_ECHO_REPLY: u8 = 0;
const IP4_ICMP_TYPE_UNREACHABLE: u8 = 3;
const IP4_ICMP_TYPE_TIME_EXCEEDED: u8 = 11;

const IP6_ICMP_TYPE_UNREACHABLE: u8 = 1;
const IP6_ICMP_TYPE_TIME_EXCEEDED: u8 = 3;
const IP6_ICMP_TYPE_ECHO_REPLY: u8 = 129;

/// Parse one IPv4 packet read off the raw ICMP receive socket.
/// `source_addr` is the socket-level source (from `recvfrom`); for
/// echo replies that is authoritative, for time-exceeded/unreachable we
/// prefer it too since the raw socket already reports the replying
/// router, not the original target.
pub fn handle_received_ip4_packet(buf: &[u8], source_addr: IpAddr) -> Option<Parsed> {
    // IP header (>=20) + ICMP header (8).
    if buf.len() < 28 {
        return None;
    }
    let ip_header_len = ((buf[0] & 0x0f) as usize) * 4;
    if buf.len() < ip_header_len + 8 {
        return None;
    }
    let icmp = &buf[ip_header_len..];
    let icmp_type = icmp[0];

    let outcome = match icmp_type {
        IP4_ICMP_TYPE_ECHO_REPLY => HopOutcome::Reply,
        IP4_ICMP_TYPE_TIME_EXCEEDED => HopOutcome::TtlExpired,
        IP4_ICMP_TYPE_UNREACHABLE => HopOutcome::Unreachable,
        _ => return None,
    };

    let port = match outcome {
        HopOutcome::Reply => {
            if icmp.len() < 8 {
                return None;
            }
            u16::from_be_bytes([icmp[6], icmp[7]])
        }
        HopOutcome::TtlExpired | HopOutcome::Unreachable => {
            // The original IP header is embedded right after the outer
            // ICMP header, followed by (at least the first 8 bytes of)
            // whatever that original datagram carried — which is only an
            // ICMP echo for ICMP probes. UDP/TCP/SCTP probes embed a
            // UDP/TCP/SCTP header whose correlation port sits at a
            // different offset, so the embedded IP header's protocol
            // byte must be consulted before reading the port.
            let embedded_ip_offset = 8;
            if icmp.len() < embedded_ip_offset + 20 {
                return None;
            }
            let embedded_ip = &icmp[embedded_ip_offset..];
            let embedded_ip_header_len = ((embedded_ip[0] & 0x0f) as usize) * 4;
            let embedded_protocol = embedded_ip[9];
            let embedded_payload_offset = embedded_ip_offset + embedded_ip_header_len;
            if icmp.len() < embedded_payload_offset + 8 {
                return None;
            }
            let embedded_payload = &icmp[embedded_payload_offset..];
            port_from_embedded_payload(embedded_protocol, embedded_payload)
        }
    };

    Some(Parsed {
        port,
        source_addr,
        outcome,
    })
}

/// Read the probe's correlation port out of an embedded original-datagram
/// payload, per the protocol that carried it: an ICMP/ICMPv6 echo keys on
/// its identifier field, while UDP/TCP/SCTP all carry the probe's port as
/// their first 16-bit field (source port).
fn port_from_embedded_payload(protocol: u8, payload: &[u8]) -> u16 {
    if protocol == libc::IPPROTO_ICMP as u8 || protocol == libc::IPPROTO_ICMPV6 as u8 {
        u16::from_be_bytes([payload[4], payload[5]])
    } else {
        u16::from_be_bytes([payload[0], payload[1]])
    }
}

/// Parse one IPv6 packet read off the raw ICMPv6 receive socket. IPv6 raw
/// sockets deliver only the ICMPv6 message, not a leading IPv6 header, so
/// offsets differ from the v4 parser.
pub fn handle_received_ip6_packet(buf: &[u8], source_addr: IpAddr) -> Option<Parsed> {
    if buf.len() < 8 {
        return None;
    }
    let icmp6_type = buf[0];

    let outcome = match icmp6_type {
        IP6_ICMP_TYPE_ECHO_REPLY => HopOutcome::Reply,
        IP6_ICMP_TYPE_TIME_EXCEEDED => HopOutcome::TtlExpired,
        IP6_ICMP_TYPE_UNREACHABLE => HopOutcome::Unreachable,
        _ => return None,
    };

    let port = match outcome {
        HopOutcome::Reply => u16::from_be_bytes([buf[6], buf[7]]),
        HopOutcome::TtlExpired | HopOutcome::Unreachable => {
            // As in the v4 parser, the embedded original packet is only
            // an ICMPv6 echo for ICMP probes; UDP/TCP/SCTP probes embed a
            // transport header whose port lives at a different offset,
            // selected by the embedded IPv6 header's next-header octet.
            let embedded_ip6_offset = 8;
            if buf.len() < embedded_ip6_offset + 40 {
                return None;
            }
            let embedded_ip6 = &buf[embedded_ip6_offset..];
            let embedded_next_header = embedded_ip6[6];
            let embedded_payload_offset = embedded_ip6_offset + 40;
            if buf.len() < embedded_payload_offset + 8 {
                return None;
            }
            let embedded_payload = &buf[embedded_payload_offset..];
            port_from_embedded_payload(embedded_next_header, embedded_payload)
        }
    };

    Some(Parsed {
        port,
        source_addr,
        outcome,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn icmp_echo_reply(id: u16, seq: u16) -> Vec<u8> {
        let mut ip = vec![0u8; 20];
        ip[0] = 0x45;
        ip[12..16].copy_from_slice(&[10, 0, 0, 1]);
        let mut icmp = vec![0u8; 8];
        icmp[0] = IP4_ICMP_TYPE_ECHO_REPLY;
        icmp[4..6].copy_from_slice(&id.to_be_bytes());
        icmp[6..8].copy_from_slice(&seq.to_be_bytes());
        ip.extend_from_slice(&icmp);
        ip
    }

    /// An ICMP time-exceeded whose embedded original packet is itself an
    /// ICMP echo request, keyed by identifier.
    fn icmp_time_exceeded(orig_port: u16) -> Vec<u8> {
        time_exceeded_embedding(libc::IPPROTO_ICMP as u8, |orig_payload| {
            orig_payload[4..6].copy_from_slice(&orig_port.to_be_bytes());
        })
    }

    /// An ICMP time-exceeded whose embedded original packet is a UDP (or,
    /// with the same header shape, TCP/SCTP) datagram keyed by source port.
    fn udp_time_exceeded(orig_port: u16) -> Vec<u8> {
        time_exceeded_embedding(libc::IPPROTO_UDP as u8, |orig_payload| {
            orig_payload[0..2].copy_from_slice(&orig_port.to_be_bytes());
        })
    }

    fn time_exceeded_embedding(embedded_protocol: u8, fill_payload: impl FnOnce(&mut [u8])) -> Vec<u8> {
        let mut outer_ip = vec![0u8; 20];
        outer_ip[0] = 0x45;
        outer_ip[12..16].copy_from_slice(&[10, 0, 0, 1]);
        let mut outer_icmp = vec![0u8; 8];
        outer_icmp[0] = IP4_ICMP_TYPE_TIME_EXCEEDED;

        let mut orig_ip = vec![0u8; 20];
        orig_ip[0] = 0x45;
        orig_ip[9] = embedded_protocol;
        let mut orig_payload = vec![0u8; 8];
        fill_payload(&mut orig_payload);

        outer_icmp.extend_from_slice(&orig_ip);
        outer_icmp.extend_from_slice(&orig_payload);
        outer_ip.extend_from_slice(&outer_icmp);
        outer_ip
    }

    #[test]
    fn parses_echo_reply_port_from_icmp_id_seq() {
        let buf = icmp_echo_reply(0, 33434);
        let parsed = handle_received_ip4_packet(&buf, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))).unwrap();
        assert_eq!(parsed.port, 33434);
        assert_eq!(parsed.outcome, HopOutcome::Reply);
    }

    #[test]
    fn parses_time_exceeded_port_from_embedded_header() {
        let buf = icmp_time_exceeded(33440);
        let parsed = handle_received_ip4_packet(&buf, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))).unwrap();
        assert_eq!(parsed.port, 33440);
        assert_eq!(parsed.outcome, HopOutcome::TtlExpired);
    }

    #[test]
    fn parses_time_exceeded_port_for_udp_probe_from_source_port() {
        let buf = udp_time_exceeded(33441);
        let parsed = handle_received_ip4_packet(&buf, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 3))).unwrap();
        assert_eq!(parsed.port, 33441);
        assert_eq!(parsed.outcome, HopOutcome::TtlExpired);
    }

    #[test]
    fn parses_unreachable_port_for_tcp_probe_from_source_port() {
        let mut buf = time_exceeded_embedding(libc::IPPROTO_TCP as u8, |payload| {
            payload[0..2].copy_from_slice(&33442u16.to_be_bytes());
        });
        buf[20] = IP4_ICMP_TYPE_UNREACHABLE;
        let parsed = handle_received_ip4_packet(&buf, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 4))).unwrap();
        assert_eq!(parsed.port, 33442);
        assert_eq!(parsed.outcome, HopOutcome::Unreachable);
    }

    #[test]
    fn ignores_unrelated_icmp_types() {
        let mut buf = vec![0u8; 28];
        buf[0] = 0x45;
        buf[20] = 99; // not a type we care about
        assert!(handle_received_ip4_packet(&buf, IpAddr::V4(Ipv4Addr::UNSPECIFIED)).is_none());
    }

    #[test]
    fn ignores_truncated_packets() {
        let buf = vec![0u8; 10];
        assert!(handle_received_ip4_packet(&buf, IpAddr::V4(Ipv4Addr::UNSPECIFIED)).is_none());
    }

    #[test]
    fn parses_icmpv6_echo_reply() {
        let mut buf = vec![0u8; 8];
        buf[0] = IP6_ICMP_TYPE_ECHO_REPLY;
        buf[6..8].copy_from_slice(&33450u16.to_be_bytes());
        let parsed =
            handle_received_ip6_packet(&buf, IpAddr::V6(std::net::Ipv6Addr::LOCALHOST)).unwrap();
        assert_eq!(parsed.port, 33450);
        assert_eq!(parsed.outcome, HopOutcome::Reply);
    }

    #[test]
    fn parses_icmpv6_time_exceeded_port_for_udp_probe_from_source_port() {
        let mut buf = vec![0u8; 8];
        buf[0] = IP6_ICMP_TYPE_TIME_EXCEEDED;

        let mut embedded_ip6 = vec![0u8; 40];
        embedded_ip6[6] = libc::IPPROTO_UDP as u8; // next header
        let mut embedded_payload = vec![0u8; 8];
        embedded_payload[0..2].copy_from_slice(&33443u16.to_be_bytes());

        buf.extend_from_slice(&embedded_ip6);
        buf.extend_from_slice(&embedded_payload);

        let parsed =
            handle_received_ip6_packet(&buf, IpAddr::V6(std::net::Ipv6Addr::LOCALHOST)).unwrap();
        assert_eq!(parsed.port, 33443);
        assert_eq!(parsed.outcome, HopOutcome::TtlExpired);
    }
}
