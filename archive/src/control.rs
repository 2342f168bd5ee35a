//! Archive control protocol: handshake, correlated requests and responses.
//!
//! A session is opened with [`AsyncConnect`] (or the blocking [`connect`]),
//! which yields an [`ArchiveClient`]. Each client operation sends one request
//! tagged with a fresh [`CorrelationId`] and polls the response channel
//! through a [`ResponsePoller`] until the matching response arrives or the
//! deadline passes.

pub mod client;
pub mod codec;
pub mod connect;
pub mod correlation;
pub mod error;
pub mod poller;
pub mod types;

pub use client::ArchiveClient;
pub use codec::CodecError;
pub use connect::{AsyncConnect, ConnectPoll, connect, connect_yielding};
pub use correlation::CorrelationIdGenerator;
pub use error::{ArchiveError, ValidationError};
pub use poller::ResponsePoller;
pub use types::{
    ControlRequest, ControlResponse, ControlSessionId, CorrelationId, Operation, PROTOCOL_VERSION,
    ReplayRequest, ReplaySessionId, ResponseCode, SessionState, UNBOUNDED_LENGTH,
};
