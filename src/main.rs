use clap::Parser;
use hopwire::{driver, privilege, Args, NetState, Result};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // The command stream (stdin/stdout) is the wire protocol and must
    // stay free of log noise, so logs always go to a file, never
    // stdout/stderr.
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&args.log_file)
        .unwrap_or_else(|_| {
            std::fs::File::create("/dev/null").expect("failed to create null device")
        });

    tracing_subscriber::fmt()
        .with_env_filter(args.log_level.clone())
        .with_writer(log_file)
        .init();

    info!("starting hopwire probe engine");

    if !args.no_privilege_check && !privilege::likely_has_raw_socket_privilege() {
        anyhow::bail!(
            "raw sockets require elevated privilege (run as root, or grant CAP_NET_RAW); \
             pass --no-privilege-check to bypass this check in a test fixture"
        );
    }

    let state = match args.probe_capacity {
        Some(capacity) => NetState::with_capacity(capacity)?,
        None => NetState::new()?,
    };
    info!(
        ip_length_host_order = state.sockets.ip_length_host_order,
        sctp_support = state.sockets.sctp_support,
        "platform sockets ready"
    );

    driver::run(state).await
}
