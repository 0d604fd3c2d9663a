//! Platform Socket Set (spec §4.1): owns the raw sending/receiving
//! sockets and runs the one-time feature probes (IP length byte order,
//! SCTP availability) during unprivileged startup.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use anyhow::{bail, Context, Result};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::args::ProbeProtocol;
use crate::packet::constructor;

/// TTL used for the startup byte-order probe packet (spec §6).
const BYTE_ORDER_PROBE_TTL: u8 = 255;

pub struct PlatformSockets {
    pub ip4_send_socket: Socket,
    pub ip4_recv_socket: Socket,
    pub icmp6_send_socket: Socket,
    pub udp6_send_socket: Socket,
    pub ip6_recv_socket: Socket,
    pub ip_length_host_order: bool,
    pub sctp_support: bool,
}

impl PlatformSockets {
    /// Privileged phase: open every raw socket. Must run before dropping
    /// privileges; failure here is tier-3 fatal (spec §7).
    pub fn open() -> Result<Self> {
        let ip4_send_socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))
            .context("failed to open IPv4 raw send socket")?;
        ip4_send_socket
            .set_header_included_v4(true)
            .context("failed to enable IP_HDRINCL on the IPv4 send socket")?;

        let ip4_recv_socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))
            .context("failed to open IPv4 ICMP receive socket")?;

        let icmp6_send_socket = Socket::new(Domain::IPV6, Type::RAW, Some(Protocol::ICMPV6))
            .context("failed to open IPv6 ICMPv6 send socket")?;
        let udp6_send_socket = Socket::new(Domain::IPV6, Type::RAW, Some(Protocol::UDP))
            .context("failed to open IPv6 UDP send socket")?;
        let ip6_recv_socket = Socket::new(Domain::IPV6, Type::RAW, Some(Protocol::ICMPV6))
            .context("failed to open IPv6 ICMPv6 receive socket")?;

        Ok(PlatformSockets {
            ip4_send_socket,
            ip4_recv_socket,
            icmp6_send_socket,
            udp6_send_socket,
            ip6_recv_socket,
            // Discovered below, once privileges are dropped.
            ip_length_host_order: false,
            sctp_support: false,
        })
    }

    /// Unprivileged phase: run the feature probes, then switch the
    /// receive sockets to non-blocking mode (spec §4.1).
    pub fn finish_setup(&mut self) -> Result<()> {
        self.detect_ip_length_byte_order()?;
        self.sctp_support = detect_sctp_support();

        self.ip4_recv_socket
            .set_nonblocking(true)
            .context("failed to set IPv4 receive socket non-blocking")?;
        self.ip6_recv_socket
            .set_nonblocking(true)
            .context("failed to set IPv6 receive socket non-blocking")?;

        Ok(())
    }

    /// Empirically determine whether the kernel wants the IPv4 total
    /// length header field in host or network byte order, by sending a
    /// minimal ICMP echo to `127.0.0.1` and watching which convention the
    /// send call accepts (spec §4.1).
    fn detect_ip_length_byte_order(&mut self) -> Result<()> {
        self.ip_length_host_order = false;
        let loopback = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);

        let first = constructor::construct_byte_order_probe(self.ip_length_host_order);
        if self
            .ip4_send_socket
            .send_to(&first, &SockAddr::from(loopback))
            .is_ok()
        {
            return Ok(());
        }

        self.ip_length_host_order = true;
        let second = constructor::construct_byte_order_probe(self.ip_length_host_order);
        if self
            .ip4_send_socket
            .send_to(&second, &SockAddr::from(loopback))
            .is_ok()
        {
            return Ok(());
        }

        bail!("unable to determine IPv4 total-length byte order accepted by this kernel");
    }

    /// Choose the send socket for `(family, protocol)`, per spec §4.1.
    pub fn send_socket_for(
        &self,
        addr: &SocketAddr,
        protocol: ProbeProtocol,
    ) -> Option<&Socket> {
        match send_socket_choice(addr, protocol)? {
            SendSocketChoice::Ip4 => Some(&self.ip4_send_socket),
            SendSocketChoice::Icmp6 => Some(&self.icmp6_send_socket),
            SendSocketChoice::Udp6 => Some(&self.udp6_send_socket),
        }
    }
}

/// Which raw send socket a `(family, protocol)` pair routes through, or
/// `None` when no raw socket applies (IPv6 stream protocols use a
/// connected socket instead; see spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendSocketChoice {
    Ip4,
    Icmp6,
    Udp6,
}

fn send_socket_choice(addr: &SocketAddr, protocol: ProbeProtocol) -> Option<SendSocketChoice> {
    match (addr, protocol) {
        (SocketAddr::V4(_), _) => Some(SendSocketChoice::Ip4),
        (SocketAddr::V6(_), ProbeProtocol::Icmp) => Some(SendSocketChoice::Icmp6),
        (SocketAddr::V6(_), ProbeProtocol::Udp) => Some(SendSocketChoice::Udp6),
        (SocketAddr::V6(_), ProbeProtocol::Tcp | ProbeProtocol::Sctp) => None,
    }
}

/// Attempt to create an SCTP stream socket; close it immediately on
/// success. Some platforms carry SCTP protocol symbols without kernel
/// support, so this must be a runtime check (spec §4.1).
fn detect_sctp_support() -> bool {
    let sctp = Protocol::from(libc::IPPROTO_SCTP);
    match Socket::new(Domain::IPV4, Type::STREAM, Some(sctp)) {
        Ok(_sock) => true, // dropped immediately, closing the fd
        Err(_) => false,
    }
}
