//! Crate-wide error type.
//!
//! Mirrors the error taxonomy a command dispatcher needs: every error
//! carries the kind plus the name of the operation that raised it, so a
//! front-end can render `procname: message` without re-deriving context.
//! Modeled after the teacher crate's hand-written error enums
//! (`midir::errors::{InitError, ConnectError}`) rather than a derive-macro
//! based error crate.

use std::fmt;

/// The seven error kinds a command dispatcher must distinguish.
///
/// `Capacity` is unusual: callers never see it as a `Result`. Pool
/// exhaustion is treated as a programming error and panics at the call
/// site (see `pool::Arena::alloc`); the variant exists here only so
/// `ErrorKind` documents the full taxonomy and so tests can assert panics
/// by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Out-of-range number, wrong type, malformed argument list.
    BadArg,
    /// Missing track/channel/filter/bank by name or reference.
    NotFound,
    /// Mutation attempted while the song is in `Play` or `Rec` mode.
    Mode,
    /// Device read/write failure.
    Io,
    /// Bad token or grammar in a command or project file.
    Parse,
    /// Pool exhausted. Never returned as an `Error`; see the type docs.
    Capacity,
    /// Malformed sysex, unknown SMF feature, or similar recoverable
    /// protocol violation.
    Protocol,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            ErrorKind::BadArg => "bad argument",
            ErrorKind::NotFound => "not found",
            ErrorKind::Mode => "wrong mode",
            ErrorKind::Io => "i/o error",
            ErrorKind::Parse => "parse error",
            ErrorKind::Capacity => "capacity exhausted",
            ErrorKind::Protocol => "protocol error",
        };
        f.write_str(s)
    }
}

/// A single engine error: a kind, the operation that raised it, and a
/// human-readable message.
///
/// `Display` renders as `procname: message`, matching the console error
/// format a command dispatcher's front-end expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    procname: &'static str,
    message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, procname: &'static str, message: impl Into<String>) -> Self {
        Error {
            kind,
            procname,
            message: message.into(),
        }
    }

    pub fn bad_arg(procname: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadArg, procname, message)
    }

    pub fn not_found(procname: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, procname, message)
    }

    pub fn mode(procname: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Mode, procname, message)
    }

    pub fn io(procname: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Io, procname, message)
    }

    pub fn parse(procname: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Parse, procname, message)
    }

    pub fn protocol(procname: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Protocol, procname, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn procname(&self) -> &'static str {
        self.procname
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.procname, self.message)
    }
}

impl std::error::Error for Error {}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_procname_colon_message() {
        let e = Error::not_found("tdel", "no such track: lead");
        assert_eq!(e.to_string(), "tdel: no such track: lead");
        assert_eq!(e.kind(), ErrorKind::NotFound);
    }
}
