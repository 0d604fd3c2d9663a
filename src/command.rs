//! The command/response text protocol: tokenizes one input line into a
//! probe request, and renders outcomes back into the literal strings
//! emitted on the command stream. Pure framing, no probe bookkeeping.

use crate::args::ProbeProtocol;
use crate::error::ProbeError;
use crate::packet::parser::HopOutcome;

/// One decoded `send-probe` request.
#[derive(Debug, Clone, PartialEq)]
pub struct SendProbe {
    pub token: u64,
    pub protocol: ProbeProtocol,
    pub dest: String,
    pub ttl: u8,
    pub timeout_secs: f64,
    pub port: Option<u16>,
    pub size: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SendProbe(SendProbe),
}

/// Parse one input line. Malformed lines and unknown command verbs both
/// report `invalid-argument` keyed by whatever token could be recovered;
/// a line too short to contain even a token reports token `0`.
pub fn parse_line(line: &str) -> Result<Command, (u64, ProbeError)> {
    let mut words = line.split_whitespace();

    let token: u64 = match words.next().and_then(|w| w.parse().ok()) {
        Some(t) => t,
        None => return Err((0, ProbeError::InvalidArgument)),
    };

    let verb = words.next().unwrap_or("");
    if verb != "send-probe" {
        return Err((token, ProbeError::InvalidArgument));
    }

    let protocol = words
        .next()
        .and_then(ProbeProtocol::parse)
        .ok_or((token, ProbeError::InvalidArgument))?;

    let dest = words
        .next()
        .map(str::to_owned)
        .ok_or((token, ProbeError::InvalidArgument))?;

    let mut ttl: Option<u8> = None;
    let mut timeout_secs: Option<f64> = None;
    let mut port: Option<u16> = None;
    let mut size: Option<usize> = None;

    loop {
        let key = match words.next() {
            Some(k) => k,
            None => break,
        };
        let value = words.next().ok_or((token, ProbeError::InvalidArgument))?;
        match key {
            "ttl" => ttl = Some(value.parse().map_err(|_| (token, ProbeError::InvalidArgument))?),
            "timeout" => {
                timeout_secs = Some(value.parse().map_err(|_| (token, ProbeError::InvalidArgument))?)
            }
            "port" => port = Some(value.parse().map_err(|_| (token, ProbeError::InvalidArgument))?),
            "size" => size = Some(value.parse().map_err(|_| (token, ProbeError::InvalidArgument))?),
            _ => return Err((token, ProbeError::InvalidArgument)),
        }
    }

    let ttl = ttl.ok_or((token, ProbeError::InvalidArgument))?;
    let timeout_secs = timeout_secs.ok_or((token, ProbeError::InvalidArgument))?;

    Ok(Command::SendProbe(SendProbe {
        token,
        protocol,
        dest,
        ttl,
        timeout_secs,
        port,
        size,
    }))
}

pub fn format_probes_exhausted(token: u64) -> String {
    format!("{token} probes-exhausted")
}

pub fn format_invalid_argument(token: u64) -> String {
    format!("{token} invalid-argument")
}

pub fn format_error(token: u64, err: ProbeError) -> String {
    format!("{token} {}", err.token())
}

pub fn format_no_reply(token: u64) -> String {
    format!("{token} no-reply")
}

/// The final emitter: renders a correlated response line. The probe is
/// freed by the caller once this returns — freeing stays the probe
/// table's responsibility, not this module's.
pub fn format_reply(token: u64, outcome: HopOutcome, remote_addr: std::net::IpAddr, rtt_us: i64) -> String {
    let kind = match outcome {
        HopOutcome::Reply => "reply",
        HopOutcome::TtlExpired => "ttl-expired",
        HopOutcome::Unreachable => "unreachable",
    };
    format!("{token} {kind} {remote_addr} {rtt_us}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_icmp_probe() {
        let cmd = parse_line("1 send-probe icmp 127.0.0.1 ttl 255 timeout 10").unwrap();
        assert_eq!(
            cmd,
            Command::SendProbe(SendProbe {
                token: 1,
                protocol: ProbeProtocol::Icmp,
                dest: "127.0.0.1".to_string(),
                ttl: 255,
                timeout_secs: 10.0,
                port: None,
                size: None,
            })
        );
    }

    #[test]
    fn parses_tcp_probe_with_port() {
        let cmd = parse_line("3 send-probe tcp 127.0.0.1 port 1 ttl 255 timeout 5").unwrap();
        assert_eq!(
            cmd,
            Command::SendProbe(SendProbe {
                token: 3,
                protocol: ProbeProtocol::Tcp,
                dest: "127.0.0.1".to_string(),
                ttl: 255,
                timeout_secs: 5.0,
                port: Some(1),
                size: None,
            })
        );
    }

    #[test]
    fn rejects_unknown_protocol() {
        let err = parse_line("2 send-probe carrier-pigeon 127.0.0.1 ttl 1 timeout 1").unwrap_err();
        assert_eq!(err, (2, ProbeError::InvalidArgument));
    }

    #[test]
    fn rejects_missing_required_field() {
        let err = parse_line("2 send-probe icmp 127.0.0.1 ttl 1").unwrap_err();
        assert_eq!(err, (2, ProbeError::InvalidArgument));
    }

    #[test]
    fn rejects_missing_token() {
        let err = parse_line("send-probe icmp 127.0.0.1 ttl 1 timeout 1").unwrap_err();
        assert_eq!(err, (0, ProbeError::InvalidArgument));
    }

    #[test]
    fn formats_all_outcome_lines() {
        assert_eq!(format_probes_exhausted(1), "1 probes-exhausted");
        assert_eq!(format_invalid_argument(2), "2 invalid-argument");
        assert_eq!(format_error(3, ProbeError::NoRoute), "3 no-route");
        assert_eq!(format_no_reply(4), "4 no-reply");
        assert_eq!(
            format_reply(5, HopOutcome::TtlExpired, "10.0.0.1".parse().unwrap(), 1234),
            "5 ttl-expired 10.0.0.1 1234"
        );
    }
}
