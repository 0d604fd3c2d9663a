//! Probe Table (spec §4.2, data model in spec §3): a fixed-capacity array
//! of probe slots with a monotonically advancing port allocator.

use std::net::SocketAddr;

use socket2::Socket;

use crate::net::timing::Timestamp;

/// Upper bound on outstanding probes. Sized so the port range below is
/// comfortably larger, keeping the wraparound-collision risk the open
/// question in spec §9 calls out statistically negligible.
pub const MAX_PROBES: usize = 64;

/// Dedicated port subrange for probe identifiers (spec §6 "Port range").
pub const MIN_PORT: u16 = 33_434;
pub const MAX_PORT: u16 = 33_529;

/// One outstanding probe. Matches the data model in spec §3 exactly.
pub struct ProbeSlot {
    pub used: bool,
    pub token: u64,
    pub port: u16,
    pub remote_addr: Option<SocketAddr>,
    pub departure_time: Timestamp,
    pub timeout_time: Timestamp,
    /// Present only for stream-based protocols (TCP/SCTP); always
    /// non-blocking when set (data model invariant in spec §3).
    pub stream_socket: Option<Socket>,
}

impl ProbeSlot {
    fn empty() -> Self {
        let epoch = Timestamp::new(0, 0);
        ProbeSlot {
            used: false,
            token: 0,
            port: MIN_PORT,
            remote_addr: None,
            departure_time: epoch,
            timeout_time: epoch,
            stream_socket: None,
        }
    }
}

pub struct ProbeTable {
    slots: Vec<ProbeSlot>,
    next_port: u16,
}

impl ProbeTable {
    pub fn new() -> Self {
        Self::with_capacity(MAX_PROBES)
    }

    /// Build a table with a caller-chosen slot count instead of the
    /// default [`MAX_PROBES`]. The port range is fixed regardless of
    /// capacity, so shrinking capacity only tightens the wraparound
    /// safety margin the open question in spec §9 discusses; growing it
    /// past the port range's span would widen the same risk and is left
    /// to the caller's judgement.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, ProbeSlot::empty);
        ProbeTable {
            slots,
            next_port: MIN_PORT,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Allocate the first free slot for `token`. Returns `None` when every
    /// slot is occupied — the Send Path reports `probes-exhausted` in
    /// that case (spec §4.2).
    pub fn allocate(&mut self, token: u64) -> Option<usize> {
        let idx = self.slots.iter().position(|s| !s.used)?;
        let port = self.alloc_port();
        let slot = &mut self.slots[idx];
        slot.used = true;
        slot.token = token;
        slot.port = port;
        slot.remote_addr = None;
        slot.stream_socket = None;
        Some(idx)
    }

    fn alloc_port(&mut self) -> u16 {
        let port = self.next_port;
        self.next_port = if self.next_port >= MAX_PORT {
            MIN_PORT
        } else {
            self.next_port + 1
        };
        port
    }

    /// Free a slot: closes `stream_socket` if present and clears `used`.
    pub fn free(&mut self, idx: usize) {
        if let Some(slot) = self.slots.get_mut(idx) {
            slot.stream_socket = None; // dropping the Socket closes the fd
            slot.used = false;
        }
    }

    pub fn get(&self, idx: usize) -> Option<&ProbeSlot> {
        self.slots.get(idx).filter(|s| s.used)
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut ProbeSlot> {
        self.slots.get_mut(idx).filter(|s| s.used)
    }

    /// Find the live slot carrying `port`, if any. At most one slot holds
    /// any given port at a time (spec §3 invariant).
    pub fn find_by_port(&self, port: u16) -> Option<usize> {
        self.slots.iter().position(|s| s.used && s.port == port)
    }

    pub fn iter_used(&self) -> impl Iterator<Item = (usize, &ProbeSlot)> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.used)
    }

    pub fn used_count(&self) -> usize {
        self.slots.iter().filter(|s| s.used).count()
    }
}

impl Default for ProbeTable {
    fn default() -> Self {
        Self::new()
    }
}
