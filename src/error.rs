//! The Error Reporter (spec §4.6): maps a platform error code to the
//! closed, textual diagnostic vocabulary emitted on the command stream.

use std::io;

use thiserror::Error;

/// One of the classified, recoverable probe errors. Each variant maps to
/// exactly one token in the table in spec §4.6. The probe that triggered
/// it is always freed by the caller after reporting.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ProbeError {
    #[error("invalid-argument")]
    InvalidArgument,
    #[error("network-down")]
    NetworkDown,
    #[error("no-route")]
    NoRoute,
    #[error("permission-denied")]
    PermissionDenied,
    #[error("address-in-use")]
    AddressInUse,
    #[error("unexpected-error errno {0}")]
    Unexpected(i32),
}

impl ProbeError {
    /// Classify a raw OS error code per the table in spec §4.6. Codes
    /// outside the closed set fall through to `Unexpected`.
    pub fn from_errno(errno: i32) -> Self {
        match errno {
            libc::EINVAL => ProbeError::InvalidArgument,
            libc::ENETDOWN => ProbeError::NetworkDown,
            libc::ENETUNREACH => ProbeError::NoRoute,
            libc::EPERM => ProbeError::PermissionDenied,
            libc::EADDRINUSE => ProbeError::AddressInUse,
            other => ProbeError::Unexpected(other),
        }
    }

    /// Classify an `io::Error`, falling back to `Unexpected(0)` when the
    /// platform did not attach an os error code (should not happen for
    /// socket calls, but `io::Error` does not statically guarantee one).
    pub fn from_io_error(err: &io::Error) -> Self {
        match err.raw_os_error() {
            Some(errno) => Self::from_errno(errno),
            None => ProbeError::Unexpected(0),
        }
    }

    /// The bare token text, without the command token prefix — matches
    /// the literal strings spec §6 lists under "Command-stream output".
    pub fn token(&self) -> String {
        self.to_string()
    }
}

/// Tier-3 errors per spec §7: environmental misconfiguration that no
/// per-probe recovery can paper over. The process prints a diagnostic to
/// the error stream and exits; `anyhow::Error` (via `Context`) carries the
/// human-readable chain for that diagnostic.
pub type FatalError = anyhow::Error;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_errnos() {
        assert_eq!(ProbeError::from_errno(libc::EINVAL), ProbeError::InvalidArgument);
        assert_eq!(ProbeError::from_errno(libc::ENETDOWN), ProbeError::NetworkDown);
        assert_eq!(ProbeError::from_errno(libc::ENETUNREACH), ProbeError::NoRoute);
        assert_eq!(ProbeError::from_errno(libc::EPERM), ProbeError::PermissionDenied);
        assert_eq!(ProbeError::from_errno(libc::EADDRINUSE), ProbeError::AddressInUse);
    }

    #[test]
    fn unknown_errno_is_unexpected() {
        match ProbeError::from_errno(libc::EMSGSIZE) {
            ProbeError::Unexpected(code) => assert_eq!(code, libc::EMSGSIZE),
            other => panic!("expected Unexpected, got {other:?}"),
        }
    }

    #[test]
    fn token_text_matches_wire_vocabulary() {
        assert_eq!(ProbeError::InvalidArgument.token(), "invalid-argument");
        assert_eq!(ProbeError::NetworkDown.token(), "network-down");
        assert_eq!(ProbeError::NoRoute.token(), "no-route");
        assert_eq!(ProbeError::PermissionDenied.token(), "permission-denied");
        assert_eq!(ProbeError::AddressInUse.token(), "address-in-use");
        assert_eq!(ProbeError::Unexpected(42).token(), "unexpected-error errno 42");
    }
}
