pub mod args;
pub mod command;
pub mod driver;
pub mod error;
pub mod net;
pub mod packet;
pub mod privilege;

// Re-export commonly used types
pub use args::Args;
pub use error::ProbeError;
pub use net::NetState;

// Re-export external dependencies commonly used across modules
pub use anyhow::Result;
