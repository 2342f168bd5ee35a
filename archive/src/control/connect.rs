//! Connection handshake as a pollable state machine.
//!
//! ```text
//! SendConnectRequest ──send──▶ AwaitConnectResponse ──response OK──▶ Ready
//!         │                            │
//!         └──bad config / send error──▶ Failed ◀──timeout / rejection / transport error
//! ```
//!
//! Each [`AsyncConnect::poll`] makes at most one transition and never blocks.
//! `Ready` and `Failed` are terminal and every later poll repeats their outcome.

use minstant::Instant;

use crate::config::ArchiveContext;
use crate::control::client::{ArchiveClient, check_response};
use crate::control::codec::encode_request;
use crate::control::correlation::CorrelationIdGenerator;
use crate::control::error::ArchiveError;
use crate::control::poller::ResponsePoller;
use crate::control::types::{
    ControlRequest, ControlSessionId, CorrelationId, Operation, PROTOCOL_VERSION, SessionState,
};
use crate::idle::{IdleStrategy, YieldingIdleStrategy};
use crate::trace::{debug, info, warn};
use crate::transport::ControlTransport;

/// Non-terminal or successful outcome of [`AsyncConnect::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectPoll {
    /// Still waiting; poll again.
    Pending,
    /// The archive accepted the session; take it with
    /// [`AsyncConnect::into_client`].
    Connected(ControlSessionId),
}

enum Step {
    SendConnectRequest,
    AwaitConnectResponse {
        correlation_id: CorrelationId,
        sent_at: Instant,
    },
    Ready(ControlSessionId),
    Failed(ArchiveError),
}

/// In-progress handshake with an archive.
///
/// Owns everything the eventual [`ArchiveClient`] needs; construction does no
/// I/O.
pub struct AsyncConnect<T, I> {
    ctx: ArchiveContext,
    transport: T,
    poller: ResponsePoller,
    correlation: CorrelationIdGenerator,
    idle: I,
    step: Step,
    last_work: usize,
}

impl<T: ControlTransport, I: IdleStrategy> AsyncConnect<T, I> {
    /// Prepares a handshake over `transport`. The client idles with `idle`
    /// once connected.
    #[must_use]
    pub fn new(ctx: ArchiveContext, transport: T, idle: I) -> Self {
        Self::with_correlation(ctx, transport, idle, CorrelationIdGenerator::new())
    }

    /// Like [`new`](Self::new) with an explicit correlation id sequence.
    #[must_use]
    pub fn with_correlation(
        ctx: ArchiveContext,
        transport: T,
        idle: I,
        correlation: CorrelationIdGenerator,
    ) -> Self {
        Self {
            ctx,
            transport,
            poller: ResponsePoller::new(),
            correlation,
            idle,
            step: Step::SendConnectRequest,
            last_work: 0,
        }
    }

    /// Where the handshake stands: `Disconnected` before the request is sent,
    /// `Connecting` while awaiting the answer, `Connected` once accepted and
    /// `Closed` after a failure.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        match self.step {
            Step::SendConnectRequest => SessionState::Disconnected,
            Step::AwaitConnectResponse { .. } => SessionState::Connecting,
            Step::Ready(_) => SessionState::Connected,
            Step::Failed(_) => SessionState::Closed,
        }
    }

    /// Advances the handshake by at most one step.
    ///
    /// # Errors
    ///
    /// Once the handshake has failed, every call returns a copy of the same
    /// error: `Config` if the context does not validate, `Timeout`, `Protocol`
    /// on rejection, or `Transport`/`Codec` if the request could not be sent
    /// or the response channel failed.
    pub fn poll(&mut self) -> Result<ConnectPoll, ArchiveError> {
        self.last_work = 0;
        match self.step {
            Step::SendConnectRequest => self.send_connect_request(),
            Step::AwaitConnectResponse {
                correlation_id,
                sent_at,
            } => self.await_connect_response(correlation_id, sent_at),
            Step::Ready(session) => Ok(ConnectPoll::Connected(session)),
            Step::Failed(ref error) => Err(error.clone()),
        }
    }

    fn send_connect_request(&mut self) -> Result<ConnectPoll, ArchiveError> {
        if let Err(e) = self.ctx.validate() {
            return self.fail(e.into());
        }
        let correlation_id = self.correlation.next_id();
        let response_channel = self
            .transport
            .response_channel()
            .unwrap_or_else(|| self.ctx.control_response_channel.clone());
        let request = ControlRequest::Connect {
            correlation_id,
            response_stream_id: self.ctx.control_response_stream_id,
            version: PROTOCOL_VERSION,
            response_channel,
        };

        let mut buf = Vec::with_capacity(128);
        if let Err(e) = encode_request(&request, &mut buf) {
            return self.fail(e.into());
        }
        self.poller.expect(correlation_id);
        if let Err(e) = self.transport.send(&buf) {
            return self.fail(e.into());
        }

        debug!(
            correlation_id = %correlation_id,
            channel = %self.ctx.control_request_channel,
            stream_id = self.ctx.control_request_stream_id,
            "connect request sent"
        );
        self.last_work = 1;
        self.step = Step::AwaitConnectResponse {
            correlation_id,
            sent_at: Instant::now(),
        };
        Ok(ConnectPoll::Pending)
    }

    fn await_connect_response(
        &mut self,
        correlation_id: CorrelationId,
        sent_at: Instant,
    ) -> Result<ConnectPoll, ArchiveError> {
        match self.poller.poll(&mut self.transport, self.ctx.fragment_limit) {
            Ok(work) => self.last_work = work,
            Err(e) => return self.fail(e.into()),
        }

        if let Some(response) = self.poller.take_response(correlation_id) {
            return match check_response(Operation::Connect, response) {
                Ok(response) => {
                    let session = response.control_session_id;
                    self.poller.bind_session(session);
                    self.step = Step::Ready(session);
                    info!(session = %session, "connected to archive");
                    Ok(ConnectPoll::Connected(session))
                }
                Err(e) => self.fail(e),
            };
        }

        let timeout = self.ctx.connect_timeout;
        if sent_at.elapsed() >= timeout {
            self.poller.abandon(correlation_id);
            return self.fail(ArchiveError::Timeout {
                operation: Operation::Connect,
                correlation_id,
                timeout,
            });
        }
        Ok(ConnectPoll::Pending)
    }

    fn fail(&mut self, error: ArchiveError) -> Result<ConnectPoll, ArchiveError> {
        warn!(error = %error, "connect failed");
        self.step = Step::Failed(error.clone());
        Err(error)
    }

    /// Hands over the connected client, or gives the handshake back if it is
    /// not `Ready`.
    ///
    /// # Errors
    ///
    /// Returns `self` unchanged unless the last poll reported `Connected`.
    pub fn into_client(self) -> Result<ArchiveClient<T, I>, Self> {
        let Step::Ready(session) = self.step else {
            return Err(self);
        };
        Ok(ArchiveClient::from_parts(
            self.ctx,
            self.transport,
            self.poller,
            self.correlation,
            self.idle,
            session,
        ))
    }
}

/// Connects and waits for the archive's answer, idling with `idle` between
/// empty polls. The returned client keeps using `idle`.
///
/// # Errors
///
/// Whatever the handshake fails with; see [`AsyncConnect::poll`].
pub fn connect<T: ControlTransport, I: IdleStrategy>(
    ctx: ArchiveContext,
    transport: T,
    idle: I,
) -> Result<ArchiveClient<T, I>, ArchiveError> {
    let mut handshake = AsyncConnect::new(ctx, transport, idle);
    loop {
        if let ConnectPoll::Connected(_) = handshake.poll()? {
            break;
        }
        let work = handshake.last_work;
        handshake.idle.idle_work(work);
    }
    handshake.idle.reset();
    match handshake.into_client() {
        Ok(client) => Ok(client),
        Err(_) => Err(ArchiveError::SessionClosed),
    }
}

/// [`connect`] with a [`YieldingIdleStrategy`].
///
/// # Errors
///
/// See [`connect`].
pub fn connect_yielding<T: ControlTransport>(
    ctx: ArchiveContext,
    transport: T,
) -> Result<ArchiveClient<T, YieldingIdleStrategy>, ArchiveError> {
    connect(ctx, transport, YieldingIdleStrategy)
}
