//! In-process transport: a pair of SPSC fragment rings.
//!
//! # Example
//!
//! ```
//! use titan_archive::transport::{ControlTransport, loopback};
//!
//! let (mut client, mut archive) = loopback::pair(16);
//!
//! client.send(b"request").unwrap();
//! assert_eq!(archive.recv().as_deref(), Some(&b"request"[..]));
//!
//! archive.send(b"response").unwrap();
//! let mut seen = Vec::new();
//! let n = client.poll(&mut |f| seen.push(f.to_vec()), 10).unwrap();
//! assert_eq!(n, 1);
//! assert_eq!(seen, vec![b"response".to_vec()]);
//! ```

use super::ring::{RingConsumer, RingProducer, ring};
use super::{ControlTransport, TransportError};
use crate::control::codec::MAX_FRAME_SIZE;

/// Default fragments each direction can hold.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Client end of a loopback pair.
pub struct LoopbackTransport {
    requests: RingProducer<Vec<u8>>,
    responses: RingConsumer<Vec<u8>>,
}

/// Archive end of a loopback pair: receives requests, sends responses.
pub struct LoopbackPeer {
    requests: RingConsumer<Vec<u8>>,
    responses: RingProducer<Vec<u8>>,
}

/// Creates a connected client/archive pair, each direction holding up to
/// `capacity` fragments.
///
/// # Panics
///
/// Panics if `capacity == 0`.
#[must_use]
pub fn pair(capacity: usize) -> (LoopbackTransport, LoopbackPeer) {
    let (request_tx, request_rx) = ring(capacity);
    let (response_tx, response_rx) = ring(capacity);
    (
        LoopbackTransport {
            requests: request_tx,
            responses: response_rx,
        },
        LoopbackPeer {
            requests: request_rx,
            responses: response_tx,
        },
    )
}

fn push_fragment(
    ring: &mut RingProducer<Vec<u8>>,
    fragment: &[u8],
) -> Result<(), TransportError> {
    if fragment.len() > MAX_FRAME_SIZE {
        return Err(TransportError::FragmentTooLarge {
            len: fragment.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    if ring.is_closed() {
        return Err(TransportError::Closed);
    }
    ring.push(fragment.to_vec())
        .map_err(|_| TransportError::BackPressured)
}

fn drain(
    ring: &mut RingConsumer<Vec<u8>>,
    handler: &mut dyn FnMut(&[u8]),
    fragment_limit: usize,
) -> Result<usize, TransportError> {
    let mut count = 0;
    while count < fragment_limit {
        let Some(fragment) = ring.pop() else { break };
        handler(&fragment);
        count += 1;
    }
    // Drain what the peer left behind before reporting it gone.
    if count == 0 && ring.is_closed() {
        if let Some(fragment) = ring.pop() {
            handler(&fragment);
            return Ok(1);
        }
        return Err(TransportError::Closed);
    }
    Ok(count)
}

impl ControlTransport for LoopbackTransport {
    fn send(&mut self, fragment: &[u8]) -> Result<(), TransportError> {
        push_fragment(&mut self.requests, fragment)
    }

    fn poll(
        &mut self,
        handler: &mut dyn FnMut(&[u8]),
        fragment_limit: usize,
    ) -> Result<usize, TransportError> {
        drain(&mut self.responses, handler, fragment_limit)
    }
}

impl LoopbackPeer {
    /// Sends one response fragment to the client.
    ///
    /// # Errors
    ///
    /// `BackPressured` if the client is not draining, `Closed` if it is gone.
    pub fn send(&mut self, fragment: &[u8]) -> Result<(), TransportError> {
        push_fragment(&mut self.responses, fragment)
    }

    /// Takes the next request fragment, if any.
    #[must_use]
    pub fn recv(&mut self) -> Option<Vec<u8>> {
        self.requests.pop()
    }

    /// Hands up to `fragment_limit` request fragments to `handler`.
    ///
    /// # Errors
    ///
    /// `Closed` once the client is gone and nothing is left to read.
    pub fn poll(
        &mut self,
        handler: &mut dyn FnMut(&[u8]),
        fragment_limit: usize,
    ) -> Result<usize, TransportError> {
        drain(&mut self.requests, handler, fragment_limit)
    }

    /// True once the client end has been dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.requests.is_closed()
    }
}
