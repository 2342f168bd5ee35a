//! Connected control session with an archive.

use minstant::Instant;

use crate::config::ArchiveContext;
use crate::control::codec::encode_request;
use crate::control::correlation::CorrelationIdGenerator;
use crate::control::error::{ArchiveError, ValidationError};
use crate::control::poller::ResponsePoller;
use crate::control::types::{
    ControlRequest, ControlResponse, ControlSessionId, CorrelationId, Operation, ReplayRequest,
    ReplaySessionId, ResponseCode, SessionState,
};
use crate::idle::{BackoffIdleStrategy, IdleStrategy};
use crate::trace::{debug, info, warn};
use crate::transport::{ControlTransport, TransportError};

/// A connected archive control session.
///
/// Created by [`AsyncConnect`](crate::control::AsyncConnect) or
/// [`connect`](crate::control::connect) once the archive has accepted the
/// session. Every operation allocates a correlation id, sends one request and
/// polls for the matching response, idling with `I` between empty polls.
///
/// Operations take `&mut self`: one request is in flight at a time.
pub struct ArchiveClient<T, I = BackoffIdleStrategy> {
    ctx: ArchiveContext,
    transport: T,
    poller: ResponsePoller,
    correlation: CorrelationIdGenerator,
    idle: I,
    control_session_id: ControlSessionId,
    state: SessionState,
    buf: Vec<u8>,
}

/// Turns a rejection into [`ArchiveError::Protocol`].
pub(crate) fn check_response(
    operation: Operation,
    response: ControlResponse,
) -> Result<ControlResponse, ArchiveError> {
    if response.code == ResponseCode::Ok {
        return Ok(response);
    }
    Err(ArchiveError::Protocol {
        operation,
        correlation_id: response.correlation_id,
        code: response.code,
        message: response.error_message,
    })
}

impl<T: ControlTransport, I: IdleStrategy> ArchiveClient<T, I> {
    pub(crate) fn from_parts(
        ctx: ArchiveContext,
        transport: T,
        poller: ResponsePoller,
        correlation: CorrelationIdGenerator,
        idle: I,
        control_session_id: ControlSessionId,
    ) -> Self {
        Self {
            ctx,
            transport,
            poller,
            correlation,
            idle,
            control_session_id,
            state: SessionState::Connected,
            buf: Vec::with_capacity(256),
        }
    }

    /// Session id the archive assigned at connect time.
    #[must_use]
    pub const fn control_session_id(&self) -> ControlSessionId {
        self.control_session_id
    }

    /// `Connected`, or `Closed` after [`close`](Self::close) or a transport failure.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub const fn context(&self) -> &ArchiveContext {
        &self.ctx
    }

    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Starts replaying `recording_id` from `position` onto the given channel.
    ///
    /// `length` may be [`UNBOUNDED_LENGTH`](crate::control::UNBOUNDED_LENGTH)
    /// to keep following a live recording.
    ///
    /// # Errors
    ///
    /// - `Validation` for a bad argument; nothing is sent
    /// - `Timeout` if no response arrives within the message timeout
    /// - `Protocol` if the archive rejects the request
    /// - `Transport` if the channel fails; the session is then closed
    /// - `SessionClosed` if the session was already closed
    pub fn start_replay(
        &mut self,
        recording_id: i64,
        position: i64,
        length: i64,
        replay_channel: &str,
        replay_stream_id: i32,
    ) -> Result<ReplaySessionId, ArchiveError> {
        self.start_replay_with(&ReplayRequest {
            recording_id,
            position,
            length,
            replay_channel: replay_channel.to_owned(),
            replay_stream_id,
        })
    }

    /// Same as [`start_replay`](Self::start_replay) with the arguments bundled.
    ///
    /// # Errors
    ///
    /// See [`start_replay`](Self::start_replay).
    pub fn start_replay_with(
        &mut self,
        request: &ReplayRequest,
    ) -> Result<ReplaySessionId, ArchiveError> {
        self.ensure_open()?;
        request.validate()?;

        let response = self.call(|control_session_id, correlation_id| {
            ControlRequest::StartReplay {
                control_session_id,
                correlation_id,
                request: request.clone(),
            }
        })?;

        let replay_session_id = ReplaySessionId::new(response.relevant_id);
        info!(
            recording_id = request.recording_id,
            replay_session_id = %replay_session_id,
            "replay started"
        );
        Ok(replay_session_id)
    }

    /// Stops a replay started by this or another session.
    ///
    /// # Errors
    ///
    /// As for [`start_replay`](Self::start_replay); `Validation` for a negative
    /// replay session id.
    pub fn stop_replay(&mut self, replay_session_id: ReplaySessionId) -> Result<(), ArchiveError> {
        self.ensure_open()?;
        if replay_session_id.get() < 0 {
            return Err(ValidationError::NegativeReplaySessionId(replay_session_id.get()).into());
        }
        self.call(|control_session_id, correlation_id| ControlRequest::StopReplay {
            control_session_id,
            correlation_id,
            replay_session_id,
        })?;
        info!(replay_session_id = %replay_session_id, "replay stopped");
        Ok(())
    }

    /// Tells the archive the session is over and drops the transport.
    ///
    /// The close request is best-effort: it is not acknowledged, and a send
    /// failure is logged and otherwise ignored.
    pub fn close(mut self) {
        if self.state != SessionState::Connected {
            return;
        }
        self.state = SessionState::Closed;
        let request = ControlRequest::CloseSession {
            control_session_id: self.control_session_id,
        };
        let sent = encode_request(&request, &mut self.buf)
            .map_err(ArchiveError::from)
            .and_then(|()| self.transport.send(&self.buf).map_err(ArchiveError::from));
        if let Err(e) = sent {
            warn!(session = %self.control_session_id, error = %e, "close request not sent");
        }
        debug!(session = %self.control_session_id, "control session closed");
    }

    fn ensure_open(&self) -> Result<(), ArchiveError> {
        match self.state {
            SessionState::Closed => Err(ArchiveError::SessionClosed),
            _ => Ok(()),
        }
    }

    fn fail(&mut self, correlation_id: CorrelationId, error: TransportError) -> ArchiveError {
        self.poller.abandon(correlation_id);
        self.state = SessionState::Closed;
        warn!(session = %self.control_session_id, error = %error, "control transport failed, session closed");
        ArchiveError::Transport(error)
    }

    /// Sends one request and polls until its response arrives or the message
    /// timeout elapses. Requests are never retransmitted.
    fn call(
        &mut self,
        build: impl FnOnce(ControlSessionId, CorrelationId) -> ControlRequest,
    ) -> Result<ControlResponse, ArchiveError> {
        let correlation_id = self.correlation.next_id();
        let request = build(self.control_session_id, correlation_id);
        let operation = request.operation();
        encode_request(&request, &mut self.buf)?;

        self.poller.expect(correlation_id);
        if let Err(e) = self.transport.send(&self.buf) {
            return Err(self.fail(correlation_id, e));
        }
        debug!(
            operation = %operation,
            correlation_id = %correlation_id,
            bytes = self.buf.len(),
            "control request sent"
        );

        let sent_at = Instant::now();
        let timeout = self.ctx.message_timeout;
        self.idle.reset();
        loop {
            let work = match self.poller.poll(&mut self.transport, self.ctx.fragment_limit) {
                Ok(work) => work,
                Err(e) => return Err(self.fail(correlation_id, e)),
            };

            if let Some(response) = self.poller.take_response(correlation_id) {
                return check_response(operation, response);
            }

            if sent_at.elapsed() >= timeout {
                self.poller.abandon(correlation_id);
                warn!(operation = %operation, correlation_id = %correlation_id, "control request timed out");
                return Err(ArchiveError::Timeout {
                    operation,
                    correlation_id,
                    timeout,
                });
            }

            self.idle.idle_work(work);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::time::Duration;

    use super::*;
    use crate::control::codec::{decode_request, encode_response};
    use crate::control::types::UNBOUNDED_LENGTH;
    use crate::idle::{BackoffConfig, SleepingIdleStrategy};

    const SESSION: ControlSessionId = ControlSessionId::new(0xabc);

    #[derive(Clone, Copy, PartialEq)]
    enum Mode {
        /// Answers every request with success.
        Echo,
        /// Never answers.
        Silent,
        /// Rejects every request.
        Reject,
        /// Sends a stray response before each real one.
        Stray,
        /// Receive primitive fails.
        Broken,
    }

    /// Archive stand-in that answers synchronously from `send`.
    struct ScriptedTransport {
        mode: Mode,
        sends: usize,
        polls: usize,
        requests: Vec<ControlRequest>,
        inbox: VecDeque<Vec<u8>>,
    }

    impl ScriptedTransport {
        fn new(mode: Mode) -> Self {
            Self {
                mode,
                sends: 0,
                polls: 0,
                requests: Vec::new(),
                inbox: VecDeque::new(),
            }
        }

        fn respond(&mut self, response: &ControlResponse) {
            let mut buf = Vec::new();
            encode_response(response, &mut buf).unwrap();
            self.inbox.push_back(buf);
        }
    }

    impl ControlTransport for ScriptedTransport {
        fn send(&mut self, fragment: &[u8]) -> Result<(), TransportError> {
            self.sends += 1;
            let request = decode_request(fragment).unwrap();
            if let Some(id) = request.correlation_id() {
                match self.mode {
                    Mode::Echo => self.respond(&ControlResponse::ok(SESSION, id, 77)),
                    Mode::Reject => self.respond(&ControlResponse::error(
                        SESSION,
                        id,
                        ResponseCode::RecordingUnknown,
                        "no such recording",
                    )),
                    Mode::Stray => {
                        let stale = CorrelationId::new(id.get() - 1).unwrap();
                        self.respond(&ControlResponse::ok(SESSION, stale, 1));
                        self.respond(&ControlResponse::ok(SESSION, id, 2));
                    }
                    Mode::Silent | Mode::Broken => {}
                }
            }
            self.requests.push(request);
            Ok(())
        }

        fn poll(
            &mut self,
            handler: &mut dyn FnMut(&[u8]),
            fragment_limit: usize,
        ) -> Result<usize, TransportError> {
            self.polls += 1;
            if self.mode == Mode::Broken {
                return Err(TransportError::Closed);
            }
            let mut count = 0;
            while count < fragment_limit {
                let Some(fragment) = self.inbox.pop_front() else { break };
                handler(&fragment);
                count += 1;
            }
            Ok(count)
        }
    }

    fn client(
        mode: Mode,
        ctx: ArchiveContext,
    ) -> ArchiveClient<ScriptedTransport, SleepingIdleStrategy> {
        let mut poller = ResponsePoller::new();
        poller.bind_session(SESSION);
        ArchiveClient::from_parts(
            ctx,
            ScriptedTransport::new(mode),
            poller,
            CorrelationIdGenerator::starting_at(100),
            SleepingIdleStrategy::new(Duration::from_millis(1)),
            SESSION,
        )
    }

    #[test]
    fn start_replay_sends_once_and_returns_session() {
        let mut client = client(Mode::Echo, ArchiveContext::default());
        let replay = client
            .start_replay(1, 0, 1000, "aeron:udp?endpoint=localhost:20000", 5)
            .unwrap();

        assert_eq!(replay, ReplaySessionId::new(77));
        assert_eq!(client.transport().sends, 1);
        assert!(client.transport().polls >= 1);
        assert_eq!(
            client.transport().requests[0],
            ControlRequest::StartReplay {
                control_session_id: SESSION,
                correlation_id: CorrelationId::new(100).unwrap(),
                request: ReplayRequest {
                    recording_id: 1,
                    position: 0,
                    length: 1000,
                    replay_channel: "aeron:udp?endpoint=localhost:20000".to_owned(),
                    replay_stream_id: 5,
                },
            }
        );
        assert_eq!(client.state(), SessionState::Connected);
    }

    #[test]
    fn each_operation_uses_a_fresh_correlation_id() {
        let mut client = client(Mode::Echo, ArchiveContext::default());
        let replay = client
            .start_replay(1, 0, UNBOUNDED_LENGTH, "aeron:ipc", 5)
            .unwrap();
        client.stop_replay(replay).unwrap();

        let ids: Vec<_> = client
            .transport()
            .requests
            .iter()
            .filter_map(ControlRequest::correlation_id)
            .collect();
        assert_eq!(ids.len(), 2);
        assert!(ids[0] < ids[1]);
    }

    #[test]
    fn invalid_arguments_send_nothing() {
        let mut client = client(Mode::Echo, ArchiveContext::default());

        let err = client.start_replay(1, -1, 1000, "aeron:ipc", 5).unwrap_err();
        assert!(matches!(
            err,
            ArchiveError::Validation(ValidationError::NegativePosition(-1))
        ));
        let err = client.start_replay(1, 0, 1000, "", 5).unwrap_err();
        assert!(matches!(
            err,
            ArchiveError::Validation(ValidationError::EmptyChannel)
        ));
        let err = client.start_replay(1, 0, 1000, "aeron:ipc", 0).unwrap_err();
        assert!(matches!(
            err,
            ArchiveError::Validation(ValidationError::InvalidStreamId(0))
        ));

        let err = client.stop_replay(ReplaySessionId::new(-1)).unwrap_err();
        assert!(matches!(
            err,
            ArchiveError::Validation(ValidationError::NegativeReplaySessionId(-1))
        ));

        assert_eq!(client.transport().sends, 0);
        assert_eq!(client.transport().polls, 0);
        assert_eq!(client.state(), SessionState::Connected);
    }

    #[test]
    fn silent_archive_times_out_after_deadline() {
        let timeout = Duration::from_millis(50);
        let ctx = ArchiveContext::default().with_message_timeout(timeout);
        let mut client = client(Mode::Silent, ctx);

        let start = std::time::Instant::now();
        let err = client.start_replay(1, 0, 1000, "aeron:ipc", 5).unwrap_err();
        assert!(start.elapsed() >= timeout);
        assert!(err.is_timeout());
        assert_eq!(client.transport().sends, 1);
        // A timeout leaves the session usable.
        assert_eq!(client.state(), SessionState::Connected);
    }

    #[test]
    fn timeout_fires_within_one_park_of_the_deadline() {
        let timeout = Duration::from_millis(50);
        let max_park = Duration::from_millis(5);
        let ctx = ArchiveContext::default().with_message_timeout(timeout);
        let mut poller = ResponsePoller::new();
        poller.bind_session(SESSION);
        let mut client = ArchiveClient::from_parts(
            ctx,
            ScriptedTransport::new(Mode::Silent),
            poller,
            CorrelationIdGenerator::starting_at(1),
            BackoffIdleStrategy::new(BackoffConfig {
                max_park,
                ..BackoffConfig::default()
            }),
            SESSION,
        );

        let start = std::time::Instant::now();
        let err = client.start_replay(1, 0, 1000, "aeron:ipc", 5).unwrap_err();
        let elapsed = start.elapsed();
        assert!(err.is_timeout());
        assert!(elapsed >= timeout);
        assert!(
            elapsed < timeout + max_park + Duration::from_millis(40),
            "timed out after {elapsed:?}"
        );
    }

    #[test]
    fn rejection_is_a_protocol_error() {
        let mut client = client(Mode::Reject, ArchiveContext::default());
        let err = client.start_replay(9, 0, 10, "aeron:ipc", 5).unwrap_err();
        match err {
            ArchiveError::Protocol {
                operation,
                code,
                message,
                ..
            } => {
                assert_eq!(operation, Operation::StartReplay);
                assert_eq!(code, ResponseCode::RecordingUnknown);
                assert_eq!(message, "no such recording");
            }
            other => panic!("expected protocol error, got {other:?}"),
        }
    }

    #[test]
    fn stray_response_is_ignored() {
        let mut client = client(Mode::Stray, ArchiveContext::default());
        let replay = client.start_replay(1, 0, 1000, "aeron:ipc", 5).unwrap();
        assert_eq!(replay, ReplaySessionId::new(2));
    }

    #[test]
    fn transport_failure_closes_the_session() {
        let mut client = client(Mode::Broken, ArchiveContext::default());
        let err = client.start_replay(1, 0, 1000, "aeron:ipc", 5).unwrap_err();
        assert!(matches!(err, ArchiveError::Transport(TransportError::Closed)));
        assert_eq!(client.state(), SessionState::Closed);

        let sends = client.transport().sends;
        let err = client.start_replay(1, 0, 1000, "aeron:ipc", 5).unwrap_err();
        assert!(matches!(err, ArchiveError::SessionClosed));
        assert_eq!(client.transport().sends, sends);
    }

    #[test]
    fn close_sends_close_session() {
        let mut transport = ScriptedTransport::new(Mode::Echo);
        let mut poller = ResponsePoller::new();
        poller.bind_session(SESSION);
        let client = ArchiveClient::from_parts(
            ArchiveContext::default(),
            &mut transport,
            poller,
            CorrelationIdGenerator::starting_at(1),
            SleepingIdleStrategy::default(),
            SESSION,
        );
        client.close();

        assert_eq!(transport.sends, 1);
        assert_eq!(
            transport.requests,
            vec![ControlRequest::CloseSession {
                control_session_id: SESSION
            }]
        );
    }

    #[test]
    fn close_survives_a_failed_send() {
        let (transport, archive) = crate::transport::loopback::pair(8);
        drop(archive);
        let client = ArchiveClient::from_parts(
            ArchiveContext::default(),
            transport,
            ResponsePoller::new(),
            CorrelationIdGenerator::starting_at(1),
            SleepingIdleStrategy::default(),
            SESSION,
        );
        client.close();
    }
}
