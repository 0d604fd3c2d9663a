//! Net state (spec §3 "Net state"): owns the Probe Table and Platform
//! Socket Set, and exposes the dispatch-cycle operations the driver
//! calls each wakeup.

pub mod recv;
pub mod send;
pub mod sockets;
pub mod table;
pub mod timing;

use anyhow::Result;

use crate::command::{self, SendProbe};
use table::ProbeTable;
use timing::Timestamp;

pub struct NetState {
    pub sockets: sockets::PlatformSockets,
    pub table: ProbeTable,
}

impl NetState {
    /// Two-phase construction per spec §3 lifecycle: open raw sockets
    /// while still privileged, then drop privileges in the caller and
    /// call [`NetState::finish_setup`] to run the unprivileged feature
    /// probes. Kept as one constructor only for callers (tests, mainly)
    /// that do not need to straddle a privilege drop.
    pub fn new() -> Result<Self> {
        Self::with_capacity(table::MAX_PROBES)
    }

    /// As [`NetState::new`], but with an explicit probe-table capacity
    /// (the `--probe-capacity` override in `args.rs`).
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        let mut sockets = sockets::PlatformSockets::open()?;
        sockets.finish_setup()?;
        Ok(NetState {
            sockets,
            table: ProbeTable::with_capacity(capacity),
        })
    }

    pub fn send_probe(&mut self, req: &SendProbe) -> Result<Option<String>> {
        send::send_probe(self, req)
    }

    pub fn poll_receive(&mut self) -> Result<Vec<String>> {
        recv::poll_receive(self)
    }

    /// Scan for expired probes, returning one `no-reply` line per probe
    /// freed this cycle (spec §4.5 `check_timeouts`).
    pub fn check_timeouts(&mut self) -> Result<Vec<String>> {
        let now = Timestamp::now()?;
        let tokens = timing::check_timeouts(&mut self.table, now);
        Ok(tokens.into_iter().map(command::format_no_reply).collect())
    }

    /// Earliest remaining timeout across outstanding probes, in whole
    /// microseconds (spec §4.5 `next_deadline`); `None` when nothing is
    /// outstanding and the driver may wait indefinitely.
    pub fn next_deadline_micros(&self) -> Result<Option<i64>> {
        let now = Timestamp::now()?;
        Ok(timing::next_deadline(&self.table, now))
    }
}
