//! Non-blocking UDP transport for `aeron:udp` control channels.
//!
//! Requests leave from an ephemeral socket towards the request channel's
//! endpoint; responses arrive on a socket bound to the response channel's
//! endpoint. Each datagram carries one control frame behind a 4-byte
//! little-endian stream id, and datagrams for other streams are dropped.
//!
//! ```text
//! ┌──────────────┬──────────────────────────────┐
//! │ Stream ID(4) │ Control frame                │
//! └──────────────┴──────────────────────────────┘
//! ```

use std::io::{self, ErrorKind};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::os::fd::AsFd;

use mio::net::UdpSocket;

use super::uri::ChannelUri;
use super::{ControlTransport, TransportError};
use crate::config::ArchiveContext;
use crate::control::codec::MAX_FRAME_SIZE;
use crate::trace::{debug, trace};

const STREAM_ID_SIZE: usize = 4;

/// Largest datagram this transport sends or accepts.
pub const MAX_DATAGRAM_SIZE: usize = STREAM_ID_SIZE + MAX_FRAME_SIZE;

/// Control transport over a pair of non-blocking UDP sockets.
pub struct UdpTransport {
    request_socket: UdpSocket,
    request_endpoint: SocketAddr,
    request_stream_id: i32,
    response_socket: UdpSocket,
    response_stream_id: i32,
    send_buf: Vec<u8>,
    recv_buf: Box<[u8]>,
}

fn unspecified_like(addr: SocketAddr) -> SocketAddr {
    let ip = match addr.ip() {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    SocketAddr::new(ip, 0)
}

impl UdpTransport {
    /// Binds the response socket and an ephemeral request socket.
    ///
    /// A response endpoint with port 0 binds an OS-assigned port; the
    /// resolved address is then reported by
    /// [`response_channel`](ControlTransport::response_channel).
    ///
    /// # Errors
    ///
    /// `InvalidChannel` if either channel is not a resolvable UDP channel,
    /// `Io` if a socket cannot be bound.
    pub fn open(
        request_channel: &ChannelUri,
        request_stream_id: i32,
        response_channel: &ChannelUri,
        response_stream_id: i32,
    ) -> Result<Self, TransportError> {
        let request_endpoint = request_channel.udp_endpoint()?;
        let response_endpoint = response_channel.udp_endpoint()?;

        let request_socket = UdpSocket::bind(unspecified_like(request_endpoint))?;
        let response_socket = UdpSocket::bind(response_endpoint)?;

        debug!(
            request = %request_endpoint,
            response = %response_socket.local_addr()?,
            "udp control transport bound"
        );

        Ok(Self {
            request_socket,
            request_endpoint,
            request_stream_id,
            response_socket,
            response_stream_id,
            send_buf: Vec::with_capacity(256),
            recv_buf: vec![0u8; MAX_DATAGRAM_SIZE].into_boxed_slice(),
        })
    }

    /// Opens the control channels named in `ctx`.
    ///
    /// # Errors
    ///
    /// See [`open`](Self::open).
    pub fn from_context(ctx: &ArchiveContext) -> Result<Self, TransportError> {
        Self::open(
            &ChannelUri::parse(&ctx.control_request_channel)?,
            ctx.control_request_stream_id,
            &ChannelUri::parse(&ctx.control_response_channel)?,
            ctx.control_response_stream_id,
        )
    }

    /// Address the response socket is bound to.
    ///
    /// # Errors
    ///
    /// Returns an error if the local address cannot be retrieved.
    pub fn response_endpoint(&self) -> io::Result<SocketAddr> {
        self.response_socket.local_addr()
    }

    /// Sets the kernel receive buffer of the response socket.
    ///
    /// # Errors
    ///
    /// Returns an error if the option cannot be set.
    pub fn set_recv_buffer_size(&self, size: usize) -> io::Result<()> {
        let fd = self.response_socket.as_fd();
        rustix::net::sockopt::set_socket_recv_buffer_size(fd, size)?;
        Ok(())
    }

    /// Sets the kernel send buffer of the request socket.
    ///
    /// # Errors
    ///
    /// Returns an error if the option cannot be set.
    pub fn set_send_buffer_size(&self, size: usize) -> io::Result<()> {
        let fd = self.request_socket.as_fd();
        rustix::net::sockopt::set_socket_send_buffer_size(fd, size)?;
        Ok(())
    }

    /// Gets the kernel receive buffer size of the response socket.
    ///
    /// # Errors
    ///
    /// Returns an error if the option cannot be retrieved.
    pub fn recv_buffer_size(&self) -> io::Result<usize> {
        let fd = self.response_socket.as_fd();
        Ok(rustix::net::sockopt::socket_recv_buffer_size(fd)?)
    }
}

/// Prefixes `frame` with `stream_id` into `buf`.
pub fn encode_datagram(stream_id: i32, frame: &[u8], buf: &mut Vec<u8>) {
    buf.clear();
    buf.extend_from_slice(&stream_id.to_le_bytes());
    buf.extend_from_slice(frame);
}

/// Splits a datagram into its stream id and frame.
#[must_use]
pub fn decode_datagram(datagram: &[u8]) -> Option<(i32, &[u8])> {
    let (id, frame) = datagram.split_first_chunk::<STREAM_ID_SIZE>()?;
    Some((i32::from_le_bytes(*id), frame))
}

/// How the poll loop treats a failed `recv_from`.
#[derive(Debug, PartialEq, Eq)]
enum RecvFailure {
    /// Nothing left to read this sweep.
    Drained,
    /// A signal interrupted the call; try the next read.
    Interrupted,
    Fatal,
}

fn recv_failure(e: &io::Error) -> RecvFailure {
    match e.kind() {
        ErrorKind::WouldBlock => RecvFailure::Drained,
        ErrorKind::Interrupted => RecvFailure::Interrupted,
        _ => RecvFailure::Fatal,
    }
}

impl ControlTransport for UdpTransport {
    fn send(&mut self, fragment: &[u8]) -> Result<(), TransportError> {
        if fragment.len() > MAX_FRAME_SIZE {
            return Err(TransportError::FragmentTooLarge {
                len: fragment.len(),
                max: MAX_FRAME_SIZE,
            });
        }
        encode_datagram(self.request_stream_id, fragment, &mut self.send_buf);
        match self.request_socket.send_to(&self.send_buf, self.request_endpoint) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Err(TransportError::BackPressured),
            Err(e) => Err(e.into()),
        }
    }

    fn poll(
        &mut self,
        handler: &mut dyn FnMut(&[u8]),
        fragment_limit: usize,
    ) -> Result<usize, TransportError> {
        let mut delivered = 0;
        for _ in 0..fragment_limit {
            let len = match self.response_socket.recv_from(&mut self.recv_buf) {
                Ok((len, _from)) => len,
                Err(e) => match recv_failure(&e) {
                    RecvFailure::Drained => break,
                    RecvFailure::Interrupted => continue,
                    RecvFailure::Fatal => return Err(e.into()),
                },
            };
            match decode_datagram(&self.recv_buf[..len]) {
                Some((stream_id, frame)) if stream_id == self.response_stream_id => {
                    handler(frame);
                    delivered += 1;
                }
                _ => {
                    trace!(len = len, "dropped datagram for another stream");
                }
            }
        }
        Ok(delivered)
    }

    fn response_channel(&self) -> Option<String> {
        let endpoint = self.response_socket.local_addr().ok()?;
        Some(format!("aeron:udp?endpoint={endpoint}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn localhost_channel(port: u16) -> ChannelUri {
        ChannelUri::parse(&format!("aeron:udp?endpoint=127.0.0.1:{port}")).unwrap()
    }

    #[test]
    fn interrupted_recv_is_not_fatal() {
        let failure = |kind: ErrorKind| recv_failure(&io::Error::from(kind));
        assert_eq!(failure(ErrorKind::WouldBlock), RecvFailure::Drained);
        assert_eq!(failure(ErrorKind::Interrupted), RecvFailure::Interrupted);
        assert_eq!(failure(ErrorKind::ConnectionRefused), RecvFailure::Fatal);
    }

    fn recv_within(socket: &std::net::UdpSocket, buf: &mut [u8]) -> usize {
        socket
            .set_read_timeout(Some(std::time::Duration::from_secs(1)))
            .unwrap();
        socket.recv(buf).unwrap()
    }

    #[test]
    fn datagram_carries_stream_id() {
        let mut buf = Vec::new();
        encode_datagram(7, b"frame", &mut buf);
        assert_eq!(decode_datagram(&buf), Some((7, &b"frame"[..])));
        assert_eq!(decode_datagram(&[1, 2]), None);
    }

    #[test]
    fn sends_to_request_endpoint() {
        let archive = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = archive.local_addr().unwrap().port();

        let mut transport = UdpTransport::open(&localhost_channel(port), 10, &localhost_channel(0), 20)
            .unwrap();
        transport.send(b"hello").unwrap();

        let mut buf = [0u8; 64];
        let n = recv_within(&archive, &mut buf);
        assert_eq!(decode_datagram(&buf[..n]), Some((10, &b"hello"[..])));
    }

    #[test]
    fn poll_filters_by_stream_id() {
        let archive = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = archive.local_addr().unwrap().port();
        let mut transport = UdpTransport::open(&localhost_channel(port), 10, &localhost_channel(0), 20)
            .unwrap();
        let response_addr = transport.response_endpoint().unwrap();

        let mut buf = Vec::new();
        encode_datagram(99, b"other", &mut buf);
        archive.send_to(&buf, response_addr).unwrap();
        encode_datagram(20, b"ours", &mut buf);
        archive.send_to(&buf, response_addr).unwrap();

        let mut seen = Vec::new();
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(1);
        while seen.is_empty() && std::time::Instant::now() < deadline {
            transport.poll(&mut |f| seen.push(f.to_vec()), 10).unwrap();
        }
        assert_eq!(seen, vec![b"ours".to_vec()]);
    }

    #[test]
    fn reports_bound_response_channel() {
        let transport =
            UdpTransport::open(&localhost_channel(9), 10, &localhost_channel(0), 20).unwrap();
        let port = transport.response_endpoint().unwrap().port();
        assert_ne!(port, 0);
        assert_eq!(
            transport.response_channel(),
            Some(format!("aeron:udp?endpoint=127.0.0.1:{port}"))
        );
    }

    #[test]
    fn opens_from_context() {
        let ctx = ArchiveContext::default()
            .with_control_request("aeron:udp?endpoint=127.0.0.1:9", 10)
            .with_control_response("aeron:udp?endpoint=127.0.0.1:0", 20);
        let transport = UdpTransport::from_context(&ctx).unwrap();
        assert!(transport.response_endpoint().unwrap().ip().is_loopback());
    }

    #[test]
    fn rejects_non_udp_channel() {
        let ipc = ChannelUri::parse("aeron:ipc").unwrap();
        assert!(UdpTransport::open(&ipc, 10, &localhost_channel(0), 20).is_err());
    }
}
