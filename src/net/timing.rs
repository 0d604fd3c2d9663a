//! Timing & Timeout Scanner (spec §4.5): a normalized `(seconds,
//! microseconds)` wall-clock representation, plus the timeout scan and
//! next-deadline computation the event loop polls each cycle.

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};

use crate::net::table::ProbeTable;

/// A wall-clock instant normalized so `micros` always lies in
/// `[0, 1_000_000)`; `secs` absorbs the sign. Two normalized timestamps
/// compare correctly by simple tuple order (see module tests).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp {
    secs: i64,
    micros: i64,
}

impl Timestamp {
    pub fn new(secs: i64, micros: i64) -> Self {
        let mut t = Timestamp { secs, micros };
        t.normalize();
        t
    }

    fn normalize(&mut self) {
        while self.micros >= 1_000_000 {
            self.micros -= 1_000_000;
            self.secs += 1;
        }
        while self.micros < 0 {
            self.micros += 1_000_000;
            self.secs -= 1;
        }
    }

    /// Microsecond-resolution wall clock "now", the `gettimeofday()`
    /// equivalent. Failure here is tier-3 fatal per spec §7: the clock
    /// going backwards of `UNIX_EPOCH` indicates an unusable environment.
    pub fn now() -> Result<Self> {
        let dur = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .context("system clock is before the unix epoch")?;
        Ok(Timestamp::new(dur.as_secs() as i64, dur.subsec_micros() as i64))
    }

    pub fn plus_secs_f64(&self, secs: f64) -> Self {
        let whole = secs.trunc() as i64;
        let frac_micros = (secs.fract() * 1_000_000.0).round() as i64;
        Timestamp::new(self.secs + whole, self.micros + frac_micros)
    }

    /// Signed delta `self - other` as whole microseconds.
    pub fn delta_micros(&self, other: &Timestamp) -> i64 {
        (self.secs - other.secs) * 1_000_000 + (self.micros - other.micros)
    }
}

/// Scan the probe table for expired probes, emitting `<token> no-reply`
/// for each and freeing it. Returns the tokens reported so the caller can
/// write the command-stream lines (the table itself has no I/O).
pub fn check_timeouts(table: &mut ProbeTable, now: Timestamp) -> Vec<u64> {
    let expired: Vec<usize> = table
        .iter_used()
        .filter(|(_, slot)| slot.timeout_time < now)
        .map(|(idx, _)| idx)
        .collect();

    let mut tokens = Vec::with_capacity(expired.len());
    for idx in expired {
        if let Some(slot) = table.get(idx) {
            tokens.push(slot.token);
        }
        table.free(idx);
    }
    tokens
}

/// Earliest remaining timeout across all outstanding probes, as the event
/// loop's next wait duration. `None` means no probe is outstanding and the
/// loop may wait indefinitely.
pub fn next_deadline(table: &ProbeTable, now: Timestamp) -> Option<i64> {
    table
        .iter_used()
        .map(|(_, slot)| slot.timeout_time.delta_micros(&now))
        .min()
}
