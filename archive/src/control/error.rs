//! Errors surfaced by control operations.

use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;
use crate::control::codec::CodecError;
use crate::control::types::{CorrelationId, Operation, ResponseCode};
use crate::transport::TransportError;

/// A caller-supplied argument violates a precondition.
///
/// Raised before a correlation id is allocated or anything is sent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("recording id must be non-negative, got {0}")]
    NegativeRecordingId(i64),
    #[error("position must be non-negative, got {0}")]
    NegativePosition(i64),
    #[error("length must be non-negative or unbounded (-1), got {0}")]
    NegativeLength(i64),
    #[error("channel must not be empty")]
    EmptyChannel,
    #[error("channel is {len} bytes, limit is {max}")]
    ChannelTooLong { len: usize, max: usize },
    #[error("stream id must be positive, got {0}")]
    InvalidStreamId(i32),
    #[error("replay session id must be non-negative, got {0}")]
    NegativeReplaySessionId(i64),
}

/// Errors from connecting to or operating on an archive.
///
/// `Clone` so that a failed handshake can hand out its cached error on every
/// later poll.
#[derive(Debug, Clone, Error)]
pub enum ArchiveError {
    #[error("invalid argument: {0}")]
    Validation(#[from] ValidationError),

    /// No matching response arrived before the deadline. The correlation id
    /// is abandoned; a late response for it is discarded.
    #[error("{operation} timed out after {timeout:?} (correlation id {correlation_id})")]
    Timeout {
        operation: Operation,
        correlation_id: CorrelationId,
        timeout: Duration,
    },

    /// The archive answered with a rejection.
    #[error("archive rejected {operation} (correlation id {correlation_id}): {code}: {message}")]
    Protocol {
        operation: Operation,
        correlation_id: CorrelationId,
        code: ResponseCode,
        message: String,
    },

    /// The send or receive primitive failed. The session is closed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The context handed to the handshake does not validate.
    #[error("invalid archive context: {0}")]
    Config(#[from] ConfigError),

    /// A request could not be encoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The session was closed earlier; connect again.
    #[error("control session is closed")]
    SessionClosed,
}

impl ArchiveError {
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
