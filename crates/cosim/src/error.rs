//! Error taxonomy for the co-simulation controller.
//!
//! Divergence and budget exhaustion are not errors here: both are terminal
//! [`RunStatus`](crate::RunStatus) values. What remains are failures that stop
//! a run from starting or a batch from continuing.

use std::fmt;

use cosim_mem::MemoryError;
use thiserror::Error;

/// Invalid control-plane input.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} path is empty")]
    EmptyPath { field: &'static str },

    #[error("{field} path exceeds {max} bytes: {path}")]
    PathTooLong {
        field: &'static str,
        path: String,
        max: usize,
    },

    #[error("memory size must be non-zero")]
    ZeroMemorySize,

    #[error("comparison is enabled but no oracle library is configured")]
    MissingOracle,
}

/// Failure loading or calling into a DUT or oracle implementation.
#[derive(Debug, Error)]
pub enum TargetError {
    #[error("failed to load library: {0}")]
    Load(#[from] libloading::Error),

    #[error("library not found: {0}")]
    LibraryNotFound(String),

    #[error("failed to find symbol '{0}': {1}")]
    SymbolNotFound(String, libloading::Error),

    #[error("{call} returned status {status}")]
    CallFailed { call: &'static str, status: i32 },

    #[error("{0}")]
    Model(String),
}

/// Lifecycle initialization step, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStep {
    LoadImage,
    RestoreImage,
    Flash,
    Oracle,
    Devices,
}

impl fmt::Display for InitStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoadImage => write!(f, "memory image"),
            Self::RestoreImage => write!(f, "restore image"),
            Self::Flash => write!(f, "flash image"),
            Self::Oracle => write!(f, "oracle"),
            Self::Devices => write!(f, "device models"),
        }
    }
}

/// Initialization failure, tagged with the step that failed.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("init {step} failed: {source}")]
    Memory {
        step: InitStep,
        #[source]
        source: MemoryError,
    },

    #[error("init {step} failed: {source}")]
    Target {
        step: InitStep,
        #[source]
        source: TargetError,
    },
}

impl InitError {
    /// The step that failed.
    #[must_use]
    pub const fn step(&self) -> InitStep {
        match self {
            Self::Memory { step, .. } | Self::Target { step, .. } => *step,
        }
    }
}

/// Why the workload queue could not yield another entry.
#[derive(Debug, Error)]
pub enum QueueOutcome {
    /// Clean end of the batch file. Not a failure.
    #[error("workload list is completed")]
    Exhausted,

    #[error("unknown workload list format at line {line}: {content:?}")]
    Malformed { line: usize, content: String },

    #[error("failed to read workload list {path}: {source}")]
    Unreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl QueueOutcome {
    /// Whether this outcome ends the batch as a failure.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        !matches!(self, Self::Exhausted)
    }
}

/// Misuse of the deferred-result protocol by the host.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("could not retrieve deferred result scope, register it first")]
    MissingScope,
}

/// Top-level controller error.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Init(#[from] InitError),

    #[error(transparent)]
    Batch(#[from] QueueOutcome),

    #[error(transparent)]
    Target(#[from] TargetError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

pub type Result<T> = std::result::Result<T, Error>;
