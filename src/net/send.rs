//! Send Path (spec §4.3): allocate a probe, decode the destination,
//! construct the packet (external collaborator), emit it on the right
//! raw socket (or leave a stream connect in flight), and arm the
//! timeout.

use anyhow::Result;

use crate::command::{self, SendProbe};
use crate::error::ProbeError;
use crate::net::timing::Timestamp;
use crate::net::NetState;
use crate::packet::constructor::{self, ConstructResult, ProbeParams};
use crate::packet::dest;
use crate::packet::parser::HopOutcome;

/// Returns `Ok(Some(line))` when the outcome is known synchronously
/// (exhaustion, decode failure, send failure, or an immediate stream
/// refusal); `Ok(None)` when the probe is now outstanding awaiting a
/// response. `Err` only for tier-3 fatal conditions (spec §7).
pub fn send_probe(state: &mut NetState, req: &SendProbe) -> Result<Option<String>> {
    let token = req.token;

    let idx = match state.table.allocate(token) {
        Some(idx) => idx,
        None => return Ok(Some(command::format_probes_exhausted(token))),
    };

    let addr = match dest::decode_dest_addr(&req.dest, req.port) {
        Ok(addr) => addr,
        Err(_) => {
            state.table.free(idx);
            return Ok(Some(command::format_invalid_argument(token)));
        }
    };

    let departure_time = Timestamp::now()?;
    let port = state.table.get(idx).expect("just allocated").port;

    let params = ProbeParams {
        protocol: req.protocol,
        ttl: req.ttl,
        size: req.size.unwrap_or(0),
    };

    let constructed = constructor::construct_packet(port, &addr, &params, state.sockets.ip_length_host_order);

    match constructed {
        ConstructResult::Error(err) => {
            state.table.free(idx);
            Ok(Some(command::format_error(token, err)))
        }
        ConstructResult::ImmediateRefusal => {
            // Some stacks refuse a stream connect to a non-existent
            // local port before the socket goes non-blocking; that is
            // proof the destination host was reached (spec §4.3 step 5).
            let now = Timestamp::now()?;
            let rtt_us = now.delta_micros(&departure_time);
            let line = command::format_reply(token, HopOutcome::Reply, addr.ip(), rtt_us);
            state.table.free(idx);
            Ok(Some(line))
        }
        ConstructResult::Stream(socket) => {
            let slot = state.table.get_mut(idx).expect("just allocated");
            slot.remote_addr = Some(addr);
            slot.departure_time = departure_time;
            slot.timeout_time = departure_time.plus_secs_f64(req.timeout_secs);
            slot.stream_socket = Some(socket);
            Ok(None)
        }
        ConstructResult::Datagram(bytes) => {
            let socket = match state.sockets.send_socket_for(&addr, req.protocol) {
                Some(s) => s,
                None => {
                    state.table.free(idx);
                    return Ok(Some(command::format_error(token, ProbeError::InvalidArgument)));
                }
            };
            // IPv4 embeds TTL in the hand-built header (IP_HDRINCL); IPv6
            // raw sockets never permit a user-supplied header (spec §4.1),
            // so the IPv6 send sockets are shared and the hop limit must be
            // set as a socket option ahead of every send, same as the
            // teacher's per-send `set_ttl` on its shared ICMP socket.
            if addr.is_ipv6() {
                if let Err(e) = socket.set_unicast_hops_v6(req.ttl.into()) {
                    let classified = ProbeError::from_io_error(&e);
                    state.table.free(idx);
                    return Ok(Some(command::format_error(token, classified)));
                }
            }
            match socket.send_to(&bytes, &addr.into()) {
                Ok(_) => {
                    let slot = state.table.get_mut(idx).expect("just allocated");
                    slot.remote_addr = Some(addr);
                    slot.departure_time = departure_time;
                    slot.timeout_time = departure_time.plus_secs_f64(req.timeout_secs);
                    Ok(None)
                }
                Err(e) => {
                    let classified = ProbeError::from_io_error(&e);
                    state.table.free(idx);
                    Ok(Some(command::format_error(token, classified)))
                }
            }
        }
    }
}
