//! Packet byte-layout construction/parsing and destination-address
//! decoding, kept separate from the core send/receive/timing engine.

pub mod constructor;
pub mod dest;
pub mod parser;
