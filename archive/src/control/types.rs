//! Protocol types for client-archive control communication.

use std::fmt;
use std::num::NonZeroU64;

use serde::{Deserialize, Serialize};

use crate::control::error::ValidationError;

/// Protocol version sent in the connect request.
pub const PROTOCOL_VERSION: u32 = 1;

/// Replay length meaning "replay everything and keep following the recording".
pub const UNBOUNDED_LENGTH: i64 = -1;

/// Longest channel string accepted in a request.
///
/// Keeps every encoded frame well inside the codec's 16-bit length field.
pub const MAX_CHANNEL_LEN: usize = 4096;

/// Identifier linking one control request to its response.
///
/// Invariant: never zero. Zero is the wire value for "no correlation".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CorrelationId(NonZeroU64);

impl CorrelationId {
    /// Returns `None` for the reserved zero value.
    #[must_use]
    pub const fn new(value: u64) -> Option<Self> {
        match NonZeroU64::new(value) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session identifier assigned by the archive in the connect response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ControlSessionId(u64);

impl ControlSessionId {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ControlSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Identifier of a replay started on the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReplaySessionId(i64);

impl ReplaySessionId {
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for ReplaySessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a control session.
///
/// [`AsyncConnect`](crate::control::AsyncConnect) reports the first two,
/// [`ArchiveClient`](crate::control::ArchiveClient) the last two.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Handshake created, nothing sent yet.
    Disconnected,
    /// Connect request sent, awaiting the archive's response.
    Connecting,
    Connected,
    /// Closed by the caller or by a transport failure.
    Closed,
}

/// Control operation, used to label timeouts and rejections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Connect,
    StartReplay,
    StopReplay,
    CloseSession,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connect => "connect",
            Self::StartReplay => "start replay",
            Self::StopReplay => "stop replay",
            Self::CloseSession => "close session",
        };
        f.write_str(name)
    }
}

/// Arguments for starting a replay of a recording.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayRequest {
    pub recording_id: i64,
    /// Position in the recording to start from.
    pub position: i64,
    /// Bytes to replay, or [`UNBOUNDED_LENGTH`].
    pub length: i64,
    /// Channel the archive publishes the replay on.
    pub replay_channel: String,
    pub replay_stream_id: i32,
}

impl ReplayRequest {
    /// Checks every argument before any correlation id is spent on it.
    ///
    /// # Errors
    ///
    /// Returns the first violated precondition.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.recording_id < 0 {
            return Err(ValidationError::NegativeRecordingId(self.recording_id));
        }
        if self.position < 0 {
            return Err(ValidationError::NegativePosition(self.position));
        }
        if self.length < 0 && self.length != UNBOUNDED_LENGTH {
            return Err(ValidationError::NegativeLength(self.length));
        }
        validate_channel(&self.replay_channel)?;
        validate_stream_id(self.replay_stream_id)
    }
}

/// Rejects empty channels and channels the codec cannot carry.
pub(crate) fn validate_channel(channel: &str) -> Result<(), ValidationError> {
    if channel.trim().is_empty() {
        return Err(ValidationError::EmptyChannel);
    }
    if channel.len() > MAX_CHANNEL_LEN {
        return Err(ValidationError::ChannelTooLong {
            len: channel.len(),
            max: MAX_CHANNEL_LEN,
        });
    }
    Ok(())
}

/// Stream ids are positive.
pub(crate) fn validate_stream_id(stream_id: i32) -> Result<(), ValidationError> {
    if stream_id <= 0 {
        return Err(ValidationError::InvalidStreamId(stream_id));
    }
    Ok(())
}

/// Outcome code carried by every [`ControlResponse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResponseCode {
    Ok = 0x00,
    /// Generic rejection, detail in the error message.
    Error = 0x01,
    RecordingUnknown = 0x02,
    ReplayUnknown = 0x03,
    /// Code this client does not understand.
    Unknown = 0xFF,
}

impl From<u8> for ResponseCode {
    fn from(v: u8) -> Self {
        match v {
            0x00 => Self::Ok,
            0x01 => Self::Error,
            0x02 => Self::RecordingUnknown,
            0x03 => Self::ReplayUnknown,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ok => "OK",
            Self::Error => "ERROR",
            Self::RecordingUnknown => "RECORDING_UNKNOWN",
            Self::ReplayUnknown => "REPLAY_UNKNOWN",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// Messages sent from client to archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlRequest {
    /// Opens a control session; the archive answers on `response_channel`.
    Connect {
        correlation_id: CorrelationId,
        response_stream_id: i32,
        version: u32,
        response_channel: String,
    },
    /// Ends the session. No response is expected.
    CloseSession { control_session_id: ControlSessionId },
    StartReplay {
        control_session_id: ControlSessionId,
        correlation_id: CorrelationId,
        request: ReplayRequest,
    },
    StopReplay {
        control_session_id: ControlSessionId,
        correlation_id: CorrelationId,
        replay_session_id: ReplaySessionId,
    },
}

impl ControlRequest {
    /// Correlation id awaiting a response, if the request expects one.
    #[must_use]
    pub const fn correlation_id(&self) -> Option<CorrelationId> {
        match self {
            Self::Connect { correlation_id, .. }
            | Self::StartReplay { correlation_id, .. }
            | Self::StopReplay { correlation_id, .. } => Some(*correlation_id),
            Self::CloseSession { .. } => None,
        }
    }

    #[must_use]
    pub const fn operation(&self) -> Operation {
        match self {
            Self::Connect { .. } => Operation::Connect,
            Self::CloseSession { .. } => Operation::CloseSession,
            Self::StartReplay { .. } => Operation::StartReplay,
            Self::StopReplay { .. } => Operation::StopReplay,
        }
    }
}

/// Message sent from archive to client in answer to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlResponse {
    pub control_session_id: ControlSessionId,
    pub correlation_id: CorrelationId,
    /// Operation-specific result, e.g. the replay session id.
    pub relevant_id: i64,
    pub code: ResponseCode,
    /// Empty unless `code` is a rejection.
    pub error_message: String,
}

impl ControlResponse {
    /// Successful response carrying `relevant_id`.
    #[must_use]
    pub fn ok(
        control_session_id: ControlSessionId,
        correlation_id: CorrelationId,
        relevant_id: i64,
    ) -> Self {
        Self {
            control_session_id,
            correlation_id,
            relevant_id,
            code: ResponseCode::Ok,
            error_message: String::new(),
        }
    }

    /// Rejection with a message for the caller.
    #[must_use]
    pub fn error(
        control_session_id: ControlSessionId,
        correlation_id: CorrelationId,
        code: ResponseCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            control_session_id,
            correlation_id,
            relevant_id: 0,
            code,
            error_message: message.into(),
        }
    }
}
