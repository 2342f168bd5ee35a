//! Minimal archive stand-in shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Once;

use titan_archive::control::{
    ControlRequest, ControlResponse, ControlSessionId, ReplaySessionId, ResponseCode,
};

static INIT_TRACING: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_test_tracing() {
    INIT_TRACING.call_once(|| {
        titan_archive::init_tracing();
    });
}

/// Archive state machine: accepts sessions and starts replays of the
/// recordings it knows about.
pub struct FakeArchive {
    pub recordings: HashSet<i64>,
    pub replays: HashSet<i64>,
    pub sessions: HashSet<u64>,
    pub closed: Vec<ControlSessionId>,
    /// Response channel and stream id named by the last connect request.
    pub response_channel: Option<(String, i32)>,
    next_replay: i64,
}

impl FakeArchive {
    pub fn new(recordings: impl IntoIterator<Item = i64>) -> Self {
        Self {
            recordings: recordings.into_iter().collect(),
            replays: HashSet::new(),
            sessions: HashSet::new(),
            closed: Vec::new(),
            response_channel: None,
            next_replay: 1000,
        }
    }

    /// Answers one request; `None` for requests that take no response.
    pub fn handle(&mut self, request: ControlRequest) -> Option<ControlResponse> {
        match request {
            ControlRequest::Connect {
                correlation_id,
                response_stream_id,
                response_channel,
                ..
            } => {
                let session = rand::random_range(1..u64::MAX);
                self.sessions.insert(session);
                self.response_channel = Some((response_channel, response_stream_id));
                Some(ControlResponse::ok(
                    ControlSessionId::new(session),
                    correlation_id,
                    0,
                ))
            }
            ControlRequest::StartReplay {
                control_session_id,
                correlation_id,
                request,
            } => {
                if !self.recordings.contains(&request.recording_id) {
                    return Some(ControlResponse::error(
                        control_session_id,
                        correlation_id,
                        ResponseCode::RecordingUnknown,
                        format!("unknown recording {}", request.recording_id),
                    ));
                }
                self.next_replay += 1;
                self.replays.insert(self.next_replay);
                Some(ControlResponse::ok(
                    control_session_id,
                    correlation_id,
                    self.next_replay,
                ))
            }
            ControlRequest::StopReplay {
                control_session_id,
                correlation_id,
                replay_session_id,
            } => {
                if self.replays.remove(&replay_session_id.get()) {
                    Some(ControlResponse::ok(control_session_id, correlation_id, 0))
                } else {
                    Some(ControlResponse::error(
                        control_session_id,
                        correlation_id,
                        ResponseCode::ReplayUnknown,
                        "no such replay",
                    ))
                }
            }
            ControlRequest::CloseSession { control_session_id } => {
                self.sessions.remove(&control_session_id.get());
                self.closed.push(control_session_id);
                None
            }
        }
    }

    pub fn is_replaying(&self, replay: ReplaySessionId) -> bool {
        self.replays.contains(&replay.get())
    }
}
