//! Error surface.
//!
//! `Reason` is produced at the innermost layer that detects it and never
//! translated into a different kind by a higher layer — only ever converted
//! to an [`io::Error`] at the public boundary, with one documented
//! `ErrorKind` mapping per variant.

use std::io;

/// Why an operation on a queue or descriptor failed.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("permission denied")]
    PermissionDenied,

    #[error("would block")]
    WouldBlock,

    #[error("message too large for queue")]
    MessageTooLarge,

    #[error("timed out")]
    TimedOut,

    #[error("interrupted")]
    Interrupted,

    #[error("invalid descriptor")]
    InvalidDescriptor,

    #[error("notifier already registered by another thread")]
    Busy,

    #[error("no memory available to create queue")]
    NoMemory,

    #[error("queue already exists")]
    AlreadyExists,

    #[error("queue not found")]
    NotFound,

    #[error("operation not permitted in this context")]
    NotPermitted,
}

impl From<Reason> for io::Error {
    fn from(reason: Reason) -> io::Error {
        let kind = match reason {
            Reason::InvalidArgument(_) => io::ErrorKind::InvalidInput,
            Reason::PermissionDenied => io::ErrorKind::PermissionDenied,
            Reason::WouldBlock => io::ErrorKind::WouldBlock,
            Reason::MessageTooLarge => io::ErrorKind::InvalidInput,
            Reason::TimedOut => io::ErrorKind::TimedOut,
            Reason::Interrupted => io::ErrorKind::Interrupted,
            Reason::InvalidDescriptor => io::ErrorKind::Other,
            Reason::Busy => io::ErrorKind::Other,
            Reason::NoMemory => io::ErrorKind::OutOfMemory,
            Reason::AlreadyExists => io::ErrorKind::AlreadyExists,
            Reason::NotFound => io::ErrorKind::NotFound,
            Reason::NotPermitted => io::ErrorKind::Other,
        };
        io::Error::new(kind, reason)
    }
}

pub type Result<T> = std::result::Result<T, Reason>;
