//! Response demultiplexing for one control session.
//!
//! The poller drains the response channel, decodes each fragment and keeps
//! only responses the session is still waiting for. Everything else (stale
//! ids, other sessions, garbage) is dropped on the floor so that a late
//! answer can never satisfy a newer request.

use std::collections::HashMap;

use crate::control::codec::decode_response;
use crate::control::types::{ControlResponse, ControlSessionId, CorrelationId};
use crate::trace::{debug, trace, warn};
use crate::transport::{ControlTransport, TransportError};

/// Non-blocking collector of control responses keyed by correlation id.
#[derive(Debug, Default)]
pub struct ResponsePoller {
    control_session_id: Option<ControlSessionId>,
    /// Outstanding ids, with the response once it has arrived.
    pending: HashMap<CorrelationId, Option<ControlResponse>>,
}

impl ResponsePoller {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Only accept responses addressed to `control_session_id` from now on.
    pub fn bind_session(&mut self, control_session_id: ControlSessionId) {
        self.control_session_id = Some(control_session_id);
    }

    #[must_use]
    pub const fn control_session_id(&self) -> Option<ControlSessionId> {
        self.control_session_id
    }

    /// Registers `correlation_id` as awaiting a response.
    pub fn expect(&mut self, correlation_id: CorrelationId) {
        self.pending.entry(correlation_id).or_insert(None);
    }

    /// Stops waiting for `correlation_id`; a later response for it is discarded.
    pub fn abandon(&mut self, correlation_id: CorrelationId) {
        self.pending.remove(&correlation_id);
    }

    /// Number of ids still registered, answered or not.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }

    /// Drains up to `fragment_limit` fragments from `transport`.
    ///
    /// Returns the number of fragments read, matched or not, so the caller
    /// can feed it to an idle strategy.
    ///
    /// # Errors
    ///
    /// Propagates failures of the transport's receive primitive.
    pub fn poll<T: ControlTransport + ?Sized>(
        &mut self,
        transport: &mut T,
        fragment_limit: usize,
    ) -> Result<usize, TransportError> {
        let session = self.control_session_id;
        let pending = &mut self.pending;
        transport.poll(
            &mut |fragment| on_fragment(session, pending, fragment),
            fragment_limit,
        )
    }

    #[must_use]
    pub fn has_response(&self, correlation_id: CorrelationId) -> bool {
        matches!(self.pending.get(&correlation_id), Some(Some(_)))
    }

    /// Removes and returns the response for `correlation_id` if it has
    /// arrived. The id stops being outstanding once taken.
    pub fn take_response(&mut self, correlation_id: CorrelationId) -> Option<ControlResponse> {
        if !self.has_response(correlation_id) {
            return None;
        }
        self.pending.remove(&correlation_id).flatten()
    }
}

fn on_fragment(
    session: Option<ControlSessionId>,
    pending: &mut HashMap<CorrelationId, Option<ControlResponse>>,
    fragment: &[u8],
) {
    let response = match decode_response(fragment) {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, len = fragment.len(), "discarding undecodable control fragment");
            return;
        }
    };

    if let Some(expected) = session
        && response.control_session_id != expected
    {
        debug!(
            session = %response.control_session_id,
            correlation_id = %response.correlation_id,
            "discarding response for another control session"
        );
        return;
    }

    let Some(slot) = pending.get_mut(&response.correlation_id) else {
        debug!(
            correlation_id = %response.correlation_id,
            "discarding response with no outstanding request"
        );
        return;
    };

    trace!(correlation_id = %response.correlation_id, code = %response.code, "control response");
    *slot = Some(response);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::codec::encode_response;
    use crate::control::types::ResponseCode;
    use crate::transport::loopback;

    fn cid(v: u64) -> CorrelationId {
        CorrelationId::new(v).unwrap()
    }

    fn send(peer: &mut loopback::LoopbackPeer, response: &ControlResponse) {
        let mut buf = Vec::new();
        encode_response(response, &mut buf).unwrap();
        peer.send(&buf).unwrap();
    }

    #[test]
    fn stores_response_for_outstanding_id() {
        let (mut transport, mut archive) = loopback::pair(8);
        let session = ControlSessionId::new(7);
        let mut poller = ResponsePoller::new();
        poller.bind_session(session);
        poller.expect(cid(42));

        send(&mut archive, &ControlResponse::ok(session, cid(42), 99));
        assert_eq!(poller.poll(&mut transport, 10).unwrap(), 1);

        assert!(poller.has_response(cid(42)));
        let response = poller.take_response(cid(42)).unwrap();
        assert_eq!(response.relevant_id, 99);
        assert!(!poller.has_response(cid(42)));
        assert_eq!(poller.outstanding(), 0);
    }

    #[test]
    fn discards_unknown_and_abandoned_ids() {
        let (mut transport, mut archive) = loopback::pair(8);
        let session = ControlSessionId::new(7);
        let mut poller = ResponsePoller::new();
        poller.bind_session(session);
        poller.expect(cid(1));
        poller.abandon(cid(1));

        send(&mut archive, &ControlResponse::ok(session, cid(1), 5));
        send(&mut archive, &ControlResponse::ok(session, cid(2), 6));
        assert_eq!(poller.poll(&mut transport, 10).unwrap(), 2);

        assert!(!poller.has_response(cid(1)));
        assert!(poller.take_response(cid(2)).is_none());
        assert_eq!(poller.outstanding(), 0);
    }

    #[test]
    fn discards_other_sessions() {
        let (mut transport, mut archive) = loopback::pair(8);
        let mut poller = ResponsePoller::new();
        poller.bind_session(ControlSessionId::new(1));
        poller.expect(cid(3));

        send(&mut archive, &ControlResponse::ok(ControlSessionId::new(2), cid(3), 0));
        poller.poll(&mut transport, 10).unwrap();
        assert!(!poller.has_response(cid(3)));
        assert_eq!(poller.outstanding(), 1);
    }

    #[test]
    fn unbound_poller_accepts_any_session() {
        let (mut transport, mut archive) = loopback::pair(8);
        let mut poller = ResponsePoller::new();
        poller.expect(cid(3));

        send(
            &mut archive,
            &ControlResponse::error(ControlSessionId::new(9), cid(3), ResponseCode::Error, "no"),
        );
        poller.poll(&mut transport, 10).unwrap();
        let response = poller.take_response(cid(3)).unwrap();
        assert_eq!(response.code, ResponseCode::Error);
        assert_eq!(response.error_message, "no");
    }

    #[test]
    fn garbage_is_skipped() {
        let (mut transport, mut archive) = loopback::pair(8);
        let session = ControlSessionId::new(1);
        let mut poller = ResponsePoller::new();
        poller.bind_session(session);
        poller.expect(cid(8));

        archive.send(&[0xde, 0xad]).unwrap();
        send(&mut archive, &ControlResponse::ok(session, cid(8), 1));
        assert_eq!(poller.poll(&mut transport, 10).unwrap(), 2);
        assert!(poller.has_response(cid(8)));
    }

    #[test]
    fn respects_fragment_limit() {
        let (mut transport, mut archive) = loopback::pair(8);
        let session = ControlSessionId::new(1);
        let mut poller = ResponsePoller::new();
        poller.expect(cid(1));
        poller.expect(cid(2));

        send(&mut archive, &ControlResponse::ok(session, cid(1), 0));
        send(&mut archive, &ControlResponse::ok(session, cid(2), 0));
        assert_eq!(poller.poll(&mut transport, 1).unwrap(), 1);
        assert!(poller.has_response(cid(1)));
        assert!(!poller.has_response(cid(2)));
        assert_eq!(poller.poll(&mut transport, 1).unwrap(), 1);
        assert!(poller.has_response(cid(2)));
    }

    #[test]
    fn empty_channel_polls_zero() {
        let (mut transport, _archive) = loopback::pair(8);
        let mut poller = ResponsePoller::new();
        assert_eq!(poller.poll(&mut transport, 10).unwrap(), 0);
    }
}
