//! Errors returned by builtin handlers and their `-errno` codes

use std::io;

use rustix::io::Errno;
use thiserror::Error;

/// Result code returned by `dispatch` when the argument count is wrong.
pub const BAD_SYNTAX: i32 = -(libc::EINVAL);

#[derive(Debug, Error)]
pub enum BuiltinError {
    #[error("unknown command {0:?}")]
    UnknownCommand(String),

    #[error("{action}: expected {expected} arguments, got {got}")]
    BadSyntax {
        action: String,
        expected: String,
        got: usize,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("no mtd partition named {0:?}")]
    UnknownMtd(String),

    #[error("out of loopback devices")]
    OutOfLoopDevices,

    #[error("attaching mtd{mtd} to ubi{ubi} failed: {source}")]
    UbiAttach {
        mtd: u32,
        ubi: u32,
        #[source]
        source: io::Error,
    },

    #[error("mtd{0} has no recorded ubi device")]
    UbiNotAttached(u32),

    #[error("tmpfs fallback at {target} failed: {source}")]
    FallbackMount {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("property {0} has no value")]
    MissingProperty(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("malformed module options for {0}")]
    MalformedOptions(String),

    #[error("{0} is not supported")]
    Unsupported(String),

    #[error("cannot start async job: {0}")]
    CannotStart(#[source] io::Error),

    #[error("{0} lock poisoned")]
    LockPoisoned(&'static str),
}

pub type Result<T> = std::result::Result<T, BuiltinError>;

impl BuiltinError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        BuiltinError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn bad_syntax(action: &str, expected: impl Into<String>, got: usize) -> Self {
        BuiltinError::BadSyntax {
            action: action.to_string(),
            expected: expected.into(),
            got,
        }
    }

    /// Negative errno-style code reported to the script interpreter.
    pub fn code(&self) -> i32 {
        let errno = match self {
            BuiltinError::UnknownCommand(_) | BuiltinError::Unsupported(_) => libc::ENOSYS,
            BuiltinError::BadSyntax { .. } => return BAD_SYNTAX,
            BuiltinError::Io { source, .. }
            | BuiltinError::UbiAttach { source, .. }
            | BuiltinError::FallbackMount { source, .. }
            | BuiltinError::CannotStart(source) => source.raw_os_error().unwrap_or(libc::EIO),
            BuiltinError::UnknownMtd(_) | BuiltinError::UbiNotAttached(_) => libc::ENODEV,
            BuiltinError::OutOfLoopDevices => libc::ENOSPC,
            BuiltinError::MissingProperty(_) => libc::ENOENT,
            BuiltinError::InvalidArgument(_) | BuiltinError::MalformedOptions(_) => libc::EINVAL,
            BuiltinError::LockPoisoned(_) => libc::EDEADLK,
        };
        -errno
    }
}

/// Attach a description to syscall failures, in the manner of `anyhow::Context`.
pub trait IoContext<T> {
    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C;
}

impl<T> IoContext<T> for io::Result<T> {
    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        self.map_err(|e| BuiltinError::io(f(), e))
    }
}

impl<T> IoContext<T> for std::result::Result<T, Errno> {
    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        self.map_err(|e| BuiltinError::io(f(), e.into()))
    }
}
