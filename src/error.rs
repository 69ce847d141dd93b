//! Error types.
use thiserror::Error;

/// Errors produced by a [`FetchCache`](crate::FetchCache).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The request was superseded by a newer one, or the cache was disposed.
    ///
    /// This is never written into the visible state.
    #[error("request was superseded")]
    Cancelled,

    /// The operation itself failed.
    #[error("{0}")]
    Operation(String),

    /// The dependency list could not be serialized into a key.
    #[error("failed to serialize dependencies: {0}")]
    Dependencies(String),

    /// A refetch was requested before any request was made.
    #[error("no request has been made yet")]
    NoQuery,
}

/// Errors produced by a [`Transport`](crate::Transport).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("failed to send: {0}")]
    Send(String),

    #[error("connection is closed")]
    Closed,
}
