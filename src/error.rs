//! Crate-wide error taxonomy, layered the way `probe-rs`'s `error.rs` composes
//! probe/architecture errors into one top-level `Error`.

use crate::tap::TapState;

/// Errors surfaced by a [`crate::transport::JtagTransport`] implementation.
#[derive(thiserror::Error, Debug, docsplay::Display)]
pub enum JtagError {
    /// I/O failure talking to the transport (device file or socket).
    Io(#[from] std::io::Error),

    /// No response arrived within the transport's read timeout.
    Timeout,

    /// MCTP endpoint id 0 is reserved and never a valid target.
    InvalidEid,

    /// an IR shift of {bits} bits exceeds the transport's single-frame limit
    IrTooLong { bits: usize },

    /// the requested end state {0} is not a stable state
    UnstableEndState(TapState),

    /// transport does not implement this operation
    Unsupported,

    /// {0}
    Other(#[from] anyhow::Error),
}

/// Errors surfaced while tokenizing or interpreting an SVF file.
#[derive(thiserror::Error, Debug, docsplay::Display)]
pub enum SvfError {
    /// line {line}: {message}
    Parse { line: u32, message: String },

    /// line {line}: end state {state} is not a stable TAP state
    UnstableEndState { line: u32, state: String },

    /// line {line}: {command} is not supported
    NotSupported { line: u32, command: &'static str },

    /// deferred TDO-check queue is full
    CheckQueueFull,

    /// line {line}: TDO verification failed
    Verification { line: u32 },

    /// {0}
    Transport(#[from] JtagError),
}

impl SvfError {
    pub fn line(&self) -> Option<u32> {
        match self {
            SvfError::Parse { line, .. }
            | SvfError::UnstableEndState { line, .. }
            | SvfError::NotSupported { line, .. }
            | SvfError::Verification { line } => Some(*line),
            SvfError::CheckQueueFull | SvfError::Transport(_) => None,
        }
    }
}

/// Top-level error type returned by the crate's public API.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] JtagError),

    #[error(transparent)]
    Svf(#[from] SvfError),

    #[error("failed to access SVF file")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
