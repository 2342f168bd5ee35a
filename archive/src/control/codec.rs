//! Wire format for archive control messages.
//!
//! Every frame starts with a 4-byte header:
//!
//! ```text
//! ┌─────────┬─────────┬──────────────────┐
//! │ Type(1) │ Flags(1)│ Len(2)           │
//! └─────────┴─────────┴──────────────────┘
//! ```
//!
//! `Len` is the length of the whole frame, header included. Integers are
//! little-endian; strings are a `u16` byte count followed by UTF-8 bytes.
//!
//! | Type | Direction | Body |
//! |------|-----------|------|
//! | `CONNECT` | client → archive | correlation(8) response stream(4) version(4) response channel(str) |
//! | `CLOSE_SESSION` | client → archive | control session(8) |
//! | `START_REPLAY` | client → archive | control session(8) correlation(8) recording(8) position(8) length(8) replay stream(4) replay channel(str) |
//! | `STOP_REPLAY` | client → archive | control session(8) correlation(8) replay session(8) |
//! | `CONTROL_RESPONSE` | archive → client | control session(8) correlation(8) relevant id(8) code(1) error message(str) |

use thiserror::Error;

use crate::control::types::{
    ControlRequest, ControlResponse, ControlSessionId, CorrelationId, ReplayRequest,
    ReplaySessionId, ResponseCode,
};

/// Control message type discriminants.
pub mod message_type {
    pub const CONNECT: u8 = 0x20;
    pub const CLOSE_SESSION: u8 = 0x21;
    pub const START_REPLAY: u8 = 0x22;
    pub const STOP_REPLAY: u8 = 0x23;
    pub const CONTROL_RESPONSE: u8 = 0x30;
}

pub const HEADER_SIZE: usize = 4;

/// Largest frame the 16-bit length field can describe.
pub const MAX_FRAME_SIZE: usize = u16::MAX as usize;

/// Errors during control frame encode/decode.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("buffer too small: need {need} bytes, have {have}")]
    BufferTooSmall { need: usize, have: usize },
    #[error("unknown message type: 0x{0:02x}")]
    UnknownMessageType(u8),
    /// Length field disagrees with the bytes received.
    #[error("frame length field says {declared} bytes, frame has {actual}")]
    InvalidLength { declared: usize, actual: usize },
    #[error("frame of {0} bytes exceeds the 16-bit length field")]
    FrameTooLarge(usize),
    #[error("string of {0} bytes exceeds the 16-bit length prefix")]
    StringTooLong(usize),
    #[error("string field is not valid UTF-8")]
    InvalidUtf8,
    /// A correlation id field carried the reserved zero value.
    #[error("correlation id must not be zero")]
    ZeroCorrelationId,
}

struct FrameWriter<'a> {
    buf: &'a mut Vec<u8>,
}

impl<'a> FrameWriter<'a> {
    fn new(buf: &'a mut Vec<u8>) -> Self {
        buf.clear();
        Self { buf }
    }

    fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn put_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn put_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn put_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn put_str(&mut self, s: &str) -> Result<(), CodecError> {
        let len = u16::try_from(s.len()).map_err(|_| CodecError::StringTooLong(s.len()))?;
        self.put_u16(len);
        self.buf.extend_from_slice(s.as_bytes());
        Ok(())
    }

    fn write_header(&mut self, message_type: u8) {
        self.put_u8(message_type);
        self.put_u8(0);
        self.put_u16(0); // patched in finish()
    }

    fn finish(self) -> Result<(), CodecError> {
        let total = self.buf.len();
        let len = u16::try_from(total).map_err(|_| CodecError::FrameTooLarge(total))?;
        self.buf[2..4].copy_from_slice(&len.to_le_bytes());
        Ok(())
    }
}

struct FrameReader<'a> {
    buf: &'a [u8],
    cursor: usize,
}

impl<'a> FrameReader<'a> {
    const fn new(buf: &'a [u8]) -> Self {
        Self { buf, cursor: 0 }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let have = self.buf.len() - self.cursor;
        if have < N {
            return Err(CodecError::BufferTooSmall { need: N, have });
        }
        let mut arr = [0u8; N];
        arr.copy_from_slice(&self.buf[self.cursor..self.cursor + N]);
        self.cursor += N;
        Ok(arr)
    }

    fn take_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take::<1>()?[0])
    }

    fn take_u16(&mut self) -> Result<u16, CodecError> {
        self.take().map(u16::from_le_bytes)
    }

    fn take_u32(&mut self) -> Result<u32, CodecError> {
        self.take().map(u32::from_le_bytes)
    }

    fn take_i32(&mut self) -> Result<i32, CodecError> {
        self.take().map(i32::from_le_bytes)
    }

    fn take_u64(&mut self) -> Result<u64, CodecError> {
        self.take().map(u64::from_le_bytes)
    }

    fn take_i64(&mut self) -> Result<i64, CodecError> {
        self.take().map(i64::from_le_bytes)
    }

    fn take_correlation_id(&mut self) -> Result<CorrelationId, CodecError> {
        CorrelationId::new(self.take_u64()?).ok_or(CodecError::ZeroCorrelationId)
    }

    fn take_session(&mut self) -> Result<ControlSessionId, CodecError> {
        self.take_u64().map(ControlSessionId::new)
    }

    fn take_string(&mut self) -> Result<String, CodecError> {
        let len = usize::from(self.take_u16()?);
        let have = self.buf.len() - self.cursor;
        if have < len {
            return Err(CodecError::BufferTooSmall { need: len, have });
        }
        let bytes = &self.buf[self.cursor..self.cursor + len];
        self.cursor += len;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }

    /// Reads the header, checks the length field, returns the message type.
    fn read_header(&mut self) -> Result<u8, CodecError> {
        let message_type = self.take_u8()?;
        let _flags = self.take_u8()?;
        let declared = usize::from(self.take_u16()?);
        if declared != self.buf.len() {
            return Err(CodecError::InvalidLength {
                declared,
                actual: self.buf.len(),
            });
        }
        Ok(message_type)
    }
}

/// Encode a control request into the buffer.
///
/// The buffer is cleared and reused (preserves capacity).
pub fn encode_request(request: &ControlRequest, buf: &mut Vec<u8>) -> Result<(), CodecError> {
    let mut w = FrameWriter::new(buf);

    match request {
        ControlRequest::Connect {
            correlation_id,
            response_stream_id,
            version,
            response_channel,
        } => {
            w.write_header(message_type::CONNECT);
            w.put_u64(correlation_id.get());
            w.put_i32(*response_stream_id);
            w.put_u32(*version);
            w.put_str(response_channel)?;
        }
        ControlRequest::CloseSession { control_session_id } => {
            w.write_header(message_type::CLOSE_SESSION);
            w.put_u64(control_session_id.get());
        }
        ControlRequest::StartReplay {
            control_session_id,
            correlation_id,
            request,
        } => {
            w.write_header(message_type::START_REPLAY);
            w.put_u64(control_session_id.get());
            w.put_u64(correlation_id.get());
            w.put_i64(request.recording_id);
            w.put_i64(request.position);
            w.put_i64(request.length);
            w.put_i32(request.replay_stream_id);
            w.put_str(&request.replay_channel)?;
        }
        ControlRequest::StopReplay {
            control_session_id,
            correlation_id,
            replay_session_id,
        } => {
            w.write_header(message_type::STOP_REPLAY);
            w.put_u64(control_session_id.get());
            w.put_u64(correlation_id.get());
            w.put_i64(replay_session_id.get());
        }
    }

    w.finish()
}

/// Decode a control request from bytes.
pub fn decode_request(bytes: &[u8]) -> Result<ControlRequest, CodecError> {
    let mut r = FrameReader::new(bytes);

    match r.read_header()? {
        message_type::CONNECT => {
            let correlation_id = r.take_correlation_id()?;
            let response_stream_id = r.take_i32()?;
            let version = r.take_u32()?;
            let response_channel = r.take_string()?;
            Ok(ControlRequest::Connect {
                correlation_id,
                response_stream_id,
                version,
                response_channel,
            })
        }
        message_type::CLOSE_SESSION => Ok(ControlRequest::CloseSession {
            control_session_id: r.take_session()?,
        }),
        message_type::START_REPLAY => {
            let control_session_id = r.take_session()?;
            let correlation_id = r.take_correlation_id()?;
            let recording_id = r.take_i64()?;
            let position = r.take_i64()?;
            let length = r.take_i64()?;
            let replay_stream_id = r.take_i32()?;
            let replay_channel = r.take_string()?;
            Ok(ControlRequest::StartReplay {
                control_session_id,
                correlation_id,
                request: ReplayRequest {
                    recording_id,
                    position,
                    length,
                    replay_channel,
                    replay_stream_id,
                },
            })
        }
        message_type::STOP_REPLAY => {
            let control_session_id = r.take_session()?;
            let correlation_id = r.take_correlation_id()?;
            let replay_session_id = ReplaySessionId::new(r.take_i64()?);
            Ok(ControlRequest::StopReplay {
                control_session_id,
                correlation_id,
                replay_session_id,
            })
        }
        other => Err(CodecError::UnknownMessageType(other)),
    }
}

/// Encode a control response into the buffer.
///
/// The buffer is cleared and reused (preserves capacity).
pub fn encode_response(response: &ControlResponse, buf: &mut Vec<u8>) -> Result<(), CodecError> {
    let mut w = FrameWriter::new(buf);
    w.write_header(message_type::CONTROL_RESPONSE);
    w.put_u64(response.control_session_id.get());
    w.put_u64(response.correlation_id.get());
    w.put_i64(response.relevant_id);
    w.put_u8(response.code as u8);
    w.put_str(&response.error_message)?;
    w.finish()
}

/// Decode a control response from bytes.
pub fn decode_response(bytes: &[u8]) -> Result<ControlResponse, CodecError> {
    let mut r = FrameReader::new(bytes);

    match r.read_header()? {
        message_type::CONTROL_RESPONSE => {
            let control_session_id = r.take_session()?;
            let correlation_id = r.take_correlation_id()?;
            let relevant_id = r.take_i64()?;
            let code = ResponseCode::from(r.take_u8()?);
            let error_message = r.take_string()?;
            Ok(ControlResponse {
                control_session_id,
                correlation_id,
                relevant_id,
                code,
                error_message,
            })
        }
        other => Err(CodecError::UnknownMessageType(other)),
    }
}
