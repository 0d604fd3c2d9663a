//! Receive Path (spec §4.4): drains each raw ICMP/ICMPv6 socket
//! non-blocking, dispatches to the external Packet Parser, correlates
//! hits against the Probe Table, and separately polls each outstanding
//! stream-probe socket for connect completion.

use std::mem::MaybeUninit;
use std::net::IpAddr;
use std::os::unix::io::{AsRawFd, RawFd};

use anyhow::{bail, Result};
use socket2::{SockAddr, Socket};

use crate::command;
use crate::error::ProbeError;
use crate::net::timing::Timestamp;
use crate::net::NetState;
use crate::packet::parser::{self, HopOutcome, Parsed};

const RECV_BUF_LEN: usize = 1500;

/// Run one full receive dispatch cycle: drain both raw sockets, then
/// poll every outstanding stream probe. Returns the command-stream lines
/// produced by any correlation hit this cycle.
pub fn poll_receive(state: &mut NetState) -> Result<Vec<String>> {
    let mut lines = Vec::new();
    drain_ip4(state, &mut lines)?;
    drain_ip6(state, &mut lines)?;
    poll_streams(state, &mut lines)?;
    Ok(lines)
}

fn drain_ip4(state: &mut NetState, lines: &mut Vec<String>) -> Result<()> {
    let mut buf = [0u8; RECV_BUF_LEN];
    while let Some((len, source)) = recv_nonblocking(&state.sockets.ip4_recv_socket, &mut buf)? {
        let timestamp = Timestamp::now()?;
        if let Some(parsed) = parser::handle_received_ip4_packet(&buf[..len], source) {
            correlate(state, parsed, timestamp, lines);
        }
    }
    Ok(())
}

fn drain_ip6(state: &mut NetState, lines: &mut Vec<String>) -> Result<()> {
    let mut buf = [0u8; RECV_BUF_LEN];
    while let Some((len, source)) = recv_nonblocking(&state.sockets.ip6_recv_socket, &mut buf)? {
        let timestamp = Timestamp::now()?;
        if let Some(parsed) = parser::handle_received_ip6_packet(&buf[..len], source) {
            correlate(state, parsed, timestamp, lines);
        }
    }
    Ok(())
}

/// One non-blocking `recvfrom`. `Ok(None)` is `EAGAIN`/`EWOULDBLOCK` —
/// the socket is drained. `EINTR` retries internally. Anything else is
/// tier-3 fatal (spec §7).
fn recv_nonblocking(socket: &Socket, buf: &mut [u8; RECV_BUF_LEN]) -> Result<Option<(usize, IpAddr)>> {
    loop {
        let mut uninit = [MaybeUninit::<u8>::uninit(); RECV_BUF_LEN];
        match socket.recv_from(&mut uninit) {
            Ok((len, sockaddr)) => {
                for (dst, src) in buf.iter_mut().zip(uninit.iter().take(len)) {
                    *dst = unsafe { src.assume_init() };
                }
                return Ok(Some((len, sockaddr_ip(&sockaddr))));
            }
            Err(e) => match e.kind() {
                std::io::ErrorKind::WouldBlock => return Ok(None),
                std::io::ErrorKind::Interrupted => continue,
                _ => bail!("fatal error draining receive socket: {e}"),
            },
        }
    }
}

fn sockaddr_ip(addr: &SockAddr) -> IpAddr {
    addr.as_socket()
        .map(|s| s.ip())
        .unwrap_or(IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED))
}

fn correlate(state: &mut NetState, parsed: Parsed, timestamp: Timestamp, lines: &mut Vec<String>) {
    let Some(idx) = state.table.find_by_port(parsed.port) else {
        return; // not one of ours: stray/unrelated traffic on the socket
    };
    let slot = state.table.get(idx).expect("find_by_port only returns live slots");
    let token = slot.token;
    let rtt_us = timestamp.delta_micros(&slot.departure_time);
    lines.push(command::format_reply(token, parsed.outcome, parsed.source_addr, rtt_us));
    state.table.free(idx);
}

/// Stream-probe poll (spec §4.4.B): a zero-timeout writable check per
/// outstanding stream socket. Writable implies the non-blocking connect
/// completed; `SO_ERROR` then tells us whether it succeeded, was
/// refused (still proof of reachability), or failed outright.
fn poll_streams(state: &mut NetState, lines: &mut Vec<String>) -> Result<()> {
    let indices: Vec<usize> = state
        .table
        .iter_used()
        .filter(|(_, slot)| slot.stream_socket.is_some())
        .map(|(idx, _)| idx)
        .collect();

    for idx in indices {
        let raw_fd = match state.table.get(idx).and_then(|s| s.stream_socket.as_ref()) {
            Some(sock) => sock.as_raw_fd(),
            None => continue,
        };

        if !poll_writable(raw_fd)? {
            continue; // connect still in flight
        }

        let (token, remote_ip, departure) = {
            let slot = state.table.get(idx).expect("still live");
            (
                slot.token,
                slot.remote_addr.map(|a| a.ip()).unwrap_or(IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED)),
                slot.departure_time,
            )
        };
        let sock_err = state
            .table
            .get(idx)
            .and_then(|s| s.stream_socket.as_ref())
            .expect("still live")
            .take_error()?;

        let now = Timestamp::now()?;
        let rtt_us = now.delta_micros(&departure);

        match sock_err {
            None => lines.push(command::format_reply(token, HopOutcome::Reply, remote_ip, rtt_us)),
            Some(e) if e.raw_os_error() == Some(libc::ECONNREFUSED) => {
                lines.push(command::format_reply(token, HopOutcome::Reply, remote_ip, rtt_us));
            }
            Some(e) => {
                let classified = ProbeError::from_io_error(&e);
                lines.push(command::format_error(token, classified));
            }
        }
        state.table.free(idx);
    }
    Ok(())
}

/// Zero-timeout `POLLOUT` readiness check on a single fd.
fn poll_writable(fd: RawFd) -> Result<bool> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLOUT,
        revents: 0,
    };
    let ret = unsafe { libc::poll(&mut pfd as *mut libc::pollfd, 1, 0) };
    if ret < 0 {
        let err = std::io::Error::last_os_error();
        if err.kind() == std::io::ErrorKind::Interrupted {
            return Ok(false);
        }
        bail!("fatal error polling stream-probe socket: {err}");
    }
    Ok(pfd.revents & libc::POLLOUT != 0)
}
