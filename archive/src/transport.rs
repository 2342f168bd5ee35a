//! Message transport seam between the control protocol and the wire.
//!
//! The control protocol needs two primitives from whatever carries its frames:
//! publish one fragment on the request channel, and drain whatever fragments
//! have arrived on the response channel without blocking. [`ControlTransport`]
//! is that seam.
//!
//! - [`loopback`] - in-process SPSC pair, for embedding an archive in the same
//!   process and for tests
//! - [`udp`] - non-blocking UDP sockets addressed by `aeron:udp` channel URIs

pub mod loopback;
mod ring;
pub mod udp;
pub mod uri;

use std::io;
use std::sync::Arc;

use thiserror::Error;

pub use loopback::{LoopbackPeer, LoopbackTransport};
pub use udp::UdpTransport;
pub use uri::ChannelUri;

/// Default fragments drained per poll sweep.
pub const DEFAULT_FRAGMENT_LIMIT: usize = 10;

/// Failures of the underlying send/receive primitives.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The other end has gone away.
    #[error("channel closed")]
    Closed,
    /// The request channel has no room for the fragment.
    #[error("channel back-pressured")]
    BackPressured,
    #[error("fragment of {len} bytes exceeds the {max} byte limit")]
    FragmentTooLarge { len: usize, max: usize },
    #[error("invalid channel '{channel}': {reason}")]
    InvalidChannel { channel: String, reason: String },
    #[error("i/o error: {0}")]
    Io(Arc<io::Error>),
}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        Self::Io(Arc::new(e))
    }
}

/// Publish and drain primitives for one control session.
///
/// Implementations must never block: `send` either hands the fragment over or
/// fails, `poll` returns as soon as nothing more is available.
pub trait ControlTransport {
    /// Publishes one encoded frame on the control request channel.
    ///
    /// # Errors
    ///
    /// Any failure is fatal to the operation that issued the send.
    fn send(&mut self, fragment: &[u8]) -> Result<(), TransportError>;

    /// Hands up to `fragment_limit` received fragments to `handler`.
    ///
    /// Returns how many fragments were handed over, zero if none were waiting.
    ///
    /// # Errors
    ///
    /// Returns an error if the receive side has failed.
    fn poll(
        &mut self,
        handler: &mut dyn FnMut(&[u8]),
        fragment_limit: usize,
    ) -> Result<usize, TransportError>;

    /// Channel the archive should answer on, when the transport resolved it
    /// itself (e.g. after binding an OS-assigned port).
    fn response_channel(&self) -> Option<String> {
        None
    }
}

impl<T: ControlTransport + ?Sized> ControlTransport for &mut T {
    fn send(&mut self, fragment: &[u8]) -> Result<(), TransportError> {
        (**self).send(fragment)
    }

    fn poll(
        &mut self,
        handler: &mut dyn FnMut(&[u8]),
        fragment_limit: usize,
    ) -> Result<usize, TransportError> {
        (**self).poll(handler, fragment_limit)
    }

    fn response_channel(&self) -> Option<String> {
        (**self).response_channel()
    }
}

impl<T: ControlTransport + ?Sized> ControlTransport for Box<T> {
    fn send(&mut self, fragment: &[u8]) -> Result<(), TransportError> {
        (**self).send(fragment)
    }

    fn poll(
        &mut self,
        handler: &mut dyn FnMut(&[u8]),
        fragment_limit: usize,
    ) -> Result<usize, TransportError> {
        (**self).poll(handler, fragment_limit)
    }

    fn response_channel(&self) -> Option<String> {
        (**self).response_channel()
    }
}
