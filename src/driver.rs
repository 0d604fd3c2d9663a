//! The controlling event loop (spec §1, §5: explicitly kept outside THE
//! CORE). Reads command lines from stdin, dispatches each to the Send
//! Path, and drives one receive/timeout dispatch cycle per wakeup. Holds
//! no probe bookkeeping of its own — everything here is routed straight
//! into [`NetState`].

use std::time::Duration;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time;
use tracing::{info, warn};

use crate::command::{self, Command};
use crate::net::NetState;

/// Upper bound on how long the driver waits between dispatch cycles when
/// no probe is outstanding. Spec §4.5 allows the loop to "sleep
/// indefinitely" in that case; this crate instead polls at a bounded
/// interval so a freshly arrived command is picked up without a real
/// epoll-style readiness registration on stdin (see DESIGN.md).
const IDLE_POLL: Duration = Duration::from_millis(200);

pub async fn run(mut state: NetState) -> Result<()> {
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();

    loop {
        let sleep_for = match state.next_deadline_micros()? {
            Some(remaining_us) => Duration::from_micros(remaining_us.max(0) as u64).min(IDLE_POLL),
            None => IDLE_POLL,
        };

        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) => dispatch_line(&mut state, &line)?,
                    None => {
                        info!("command stream closed, shutting down");
                        return Ok(());
                    }
                }
            }
            _ = time::sleep(sleep_for) => {}
        }

        for line in state.poll_receive()? {
            println!("{line}");
        }
        for line in state.check_timeouts()? {
            println!("{line}");
        }
    }
}

fn dispatch_line(state: &mut NetState, line: &str) -> Result<()> {
    if line.trim().is_empty() {
        return Ok(());
    }
    match command::parse_line(line) {
        Ok(Command::SendProbe(req)) => {
            if let Some(output) = state.send_probe(&req)? {
                println!("{output}");
            }
        }
        Err((token, err)) => {
            warn!("malformed command: {line:?}");
            println!("{}", command::format_error(token, err));
        }
    }
    Ok(())
}
