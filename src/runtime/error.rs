//! Error types for the hotwire runtime
//!
//! Each subsystem owns a `thiserror` enum; `RuntimeError` aggregates them for
//! the host-facing API. Errors that travel inside calls are converted into the
//! structured [`PError`](super::value::PError) value at the control boundary.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Top-level runtime error
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Address parsing/validation errors
    #[error("Address error: {0}")]
    Address(#[from] AddressError),

    /// Call construction/answer errors
    #[error("Call error: {0}")]
    Call(#[from] CallError),

    /// Iteration install errors
    #[error("Install error: {0}")]
    Install(#[from] InstallError),

    /// Container protocol errors
    #[error("Container error: {0}")]
    Container(#[from] ContainerError),

    /// Cross-thread hand-off errors
    #[error("Hand-off error: {0}")]
    HandOff(#[from] HandOffError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Address parsing errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    /// Address text was empty
    #[error("empty address")]
    Empty,

    /// Address text did not start with `/`
    #[error("address '{0}' must start with '/'")]
    MissingLeadingSlash(String),

    /// A path segment or capability id violated the identifier grammar
    #[error("invalid identifier '{0}'")]
    InvalidId(String),

    /// Address text had the wrong shape for the requested address kind
    #[error("malformed address '{0}'")]
    Malformed(String),
}

/// Call construction and answer errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// Attempted to answer a reply or error
    #[error("call {0} is not a request")]
    NotARequest(u64),

    /// Attempted to answer a quiet request
    #[error("call {0} is a quiet request and cannot be answered")]
    QuietRequest(u64),

    /// Request carries no source address to answer to
    #[error("call {0} has no source address")]
    NoSource(u64),

    /// Request was already answered once
    #[error("call {0} has already been answered")]
    AlreadyAnswered(u64),

    /// A continuation is already registered for this match id
    #[error("match id {0} is already registered")]
    DuplicateMatchId(u64),
}

/// Errors raised while building or installing an iteration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InstallError {
    /// Descriptor id violates the identifier grammar
    #[error("invalid descriptor id '{0}'")]
    InvalidId(String),

    /// Two descriptors of one category share an id
    #[error("duplicate descriptor id '{0}'")]
    DuplicateId(String),

    /// Descriptor id collides with a built-in protocol control
    #[error("descriptor id '{0}' is reserved")]
    ReservedId(String),

    /// Behavior declaration failed
    #[error("declaration failed: {0}")]
    Declaration(String),

    /// Compiler rejected the source
    #[error("compile failed: {0}")]
    Compile(String),

    /// No compiler configured for the `code` control
    #[error("no compiler configured")]
    NoCompiler,

    /// Target unit does not exist
    #[error("unit '{0}' not found")]
    UnitNotFound(String),
}

/// Container protocol errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContainerError {
    /// Addressed unit is not a container
    #[error("'{0}' is not a container")]
    NotAContainer(String),

    /// Child id not present in the container
    #[error("unknown child '{0}'")]
    UnknownChild(String),

    /// Child id already present in the container
    #[error("child '{0}' already exists")]
    DuplicateChild(String),

    /// Catalog has no factory for the type
    #[error("unknown component type '{0}'")]
    UnknownType(String),

    /// Port missing or facing the wrong way
    #[error("unknown port '{0}'")]
    UnknownPort(String),

    /// Malformed connection arguments
    #[error("invalid connection: {0}")]
    InvalidConnection(String),

    /// Connection already present
    #[error("connection already exists: {0}")]
    DuplicateConnection(String),

    /// Malformed arguments or snapshot
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Child construction failed
    #[error(transparent)]
    Install(#[from] InstallError),
}

/// Cross-thread hand-off errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandOffError {
    /// Task did not complete within the bounded wait
    #[error("task timed out after {0:?}")]
    Timeout(Duration),

    /// Root driver has shut down
    #[error("root driver is closed")]
    Closed,

    /// Hand-off issued from the root thread while the root is mid-turn
    #[error("re-entrant hand-off on the root thread")]
    Reentrant,

    /// Driver thread could not be started
    #[error("failed to start root driver: {0}")]
    Spawn(String),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Config file is not valid JSON for the schema
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Config values are inconsistent
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Result type using RuntimeError
pub type Result<T> = std::result::Result<T, RuntimeError>;
