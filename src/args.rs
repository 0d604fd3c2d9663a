use clap::Parser;

/// Probe protocols the engine understands. Per-probe parameters (ttl,
/// destination, timeout, ...) travel over the command stream (spec §6),
/// not argv.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeProtocol {
    Icmp,
    Udp,
    Tcp,
    Sctp,
}

impl ProbeProtocol {
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "icmp" => Some(ProbeProtocol::Icmp),
            "udp" => Some(ProbeProtocol::Udp),
            "tcp" => Some(ProbeProtocol::Tcp),
            "sctp" => Some(ProbeProtocol::Sctp),
            _ => None,
        }
    }

    /// Whether this protocol is carried over a connected stream socket
    /// rather than a one-shot raw datagram (spec §4.3 step 4).
    pub fn is_stream(self) -> bool {
        matches!(self, ProbeProtocol::Tcp | ProbeProtocol::Sctp)
    }
}

/// Process-level knobs. Everything that varies per probe arrives on the
/// command stream instead, keeping this surface as small as the
/// teacher's own `Args`.
#[derive(Parser, Debug, Clone)]
#[command(name = "hopwire")]
#[command(about = "Probe engine for a network diagnostic tool, driven over stdin")]
#[command(version)]
pub struct Args {
    /// Path to the log file. The command stream (stdin/stdout) carries
    /// the wire protocol and must stay free of log noise, so logs never
    /// go to stdout/stderr in normal operation.
    #[arg(long, default_value = "hopwire.log")]
    pub log_file: String,

    /// Tracing env-filter directive, e.g. "hopwire=debug".
    #[arg(long, default_value = "hopwire=info")]
    pub log_level: String,

    /// Skip the startup privilege check. The raw socket opens performed
    /// by `NetState::new` still fail immediately when unprivileged; this
    /// only suppresses the early, friendlier diagnostic.
    #[arg(long)]
    pub no_privilege_check: bool,

    /// Override the probe table's slot count (default: `table::MAX_PROBES`).
    /// Per-probe parameters still travel over the command stream; this is
    /// a process-wide capacity knob, not a per-probe one.
    #[arg(long)]
    pub probe_capacity: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_known_protocol_tokens() {
        assert_eq!(ProbeProtocol::parse("icmp"), Some(ProbeProtocol::Icmp));
        assert_eq!(ProbeProtocol::parse("udp"), Some(ProbeProtocol::Udp));
        assert_eq!(ProbeProtocol::parse("tcp"), Some(ProbeProtocol::Tcp));
        assert_eq!(ProbeProtocol::parse("sctp"), Some(ProbeProtocol::Sctp));
        assert_eq!(ProbeProtocol::parse("sctpx"), None);
    }

    #[test]
    fn stream_protocols_are_tcp_and_sctp_only() {
        assert!(!ProbeProtocol::Icmp.is_stream());
        assert!(!ProbeProtocol::Udp.is_stream());
        assert!(ProbeProtocol::Tcp.is_stream());
        assert!(ProbeProtocol::Sctp.is_stream());
    }

    #[test]
    fn args_default_values() {
        let args = Args::try_parse_from(["hopwire"]).unwrap();
        assert_eq!(args.log_file, "hopwire.log");
        assert_eq!(args.log_level, "hopwire=info");
        assert!(!args.no_privilege_check);
        assert_eq!(args.probe_capacity, None);
    }

    #[test]
    fn args_custom_values() {
        let args = Args::try_parse_from([
            "hopwire",
            "--log-file", "/tmp/x.log",
            "--log-level", "hopwire=debug",
            "--no-privilege-check",
            "--probe-capacity", "128",
        ])
        .unwrap();
        assert_eq!(args.log_file, "/tmp/x.log");
        assert_eq!(args.log_level, "hopwire=debug");
        assert!(args.no_privilege_check);
        assert_eq!(args.probe_capacity, Some(128));
    }
}
