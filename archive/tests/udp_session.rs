//! Control session over real UDP sockets on localhost.

mod common;

use std::net::UdpSocket;
use std::thread;
use std::time::{Duration, Instant};

use common::{FakeArchive, init_test_tracing};
use titan_archive::ArchiveContext;
use titan_archive::control::codec::{decode_request, encode_response};
use titan_archive::control::{ArchiveError, SessionState, connect};
use titan_archive::idle::{BackoffConfig, BackoffIdleStrategy};
use titan_archive::transport::udp::{decode_datagram, encode_datagram};
use titan_archive::transport::{ChannelUri, UdpTransport};

const REQUEST_STREAM_ID: i32 = 10;

/// Serves control requests on `socket` until the session is closed, answering
/// on the channel named by the connect request.
fn spawn_udp_archive(socket: UdpSocket, mut archive: FakeArchive) -> thread::JoinHandle<FakeArchive> {
    socket
        .set_read_timeout(Some(Duration::from_millis(20)))
        .unwrap();
    thread::Builder::new()
        .name("udp-archive".into())
        .spawn(move || {
            let mut recv_buf = vec![0u8; 65536];
            let mut frame = Vec::new();
            let mut datagram = Vec::new();
            let deadline = Instant::now() + Duration::from_secs(10);
            while Instant::now() < deadline {
                let Ok(len) = socket.recv(&mut recv_buf) else {
                    continue;
                };
                let Some((stream_id, payload)) = decode_datagram(&recv_buf[..len]) else {
                    continue;
                };
                if stream_id != REQUEST_STREAM_ID {
                    continue;
                }
                let request = decode_request(payload).unwrap();
                let Some(response) = archive.handle(request) else {
                    // Close session.
                    break;
                };
                let (channel, response_stream_id) = archive.response_channel.clone().unwrap();
                let endpoint = ChannelUri::parse(&channel)
                    .unwrap()
                    .udp_endpoint()
                    .unwrap();
                encode_response(&response, &mut frame).unwrap();
                encode_datagram(response_stream_id, &frame, &mut datagram);
                socket.send_to(&datagram, endpoint).unwrap();
            }
            archive
        })
        .unwrap()
}

fn context_for(archive: &UdpSocket) -> ArchiveContext {
    let port = archive.local_addr().unwrap().port();
    ArchiveContext::default()
        .with_control_request(format!("aeron:udp?endpoint=127.0.0.1:{port}"), REQUEST_STREAM_ID)
        // Port 0: the OS picks the port and the connect request names it.
        .with_control_response("aeron:udp?endpoint=127.0.0.1:0", 20)
        .with_connect_timeout(Duration::from_secs(2))
        .with_message_timeout(Duration::from_secs(2))
}

#[test]
fn replay_over_udp() {
    init_test_tracing();
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    let ctx = context_for(&socket);
    let server = spawn_udp_archive(socket, FakeArchive::new([1]));

    let transport = UdpTransport::from_context(&ctx).unwrap();
    let response_port = transport.response_endpoint().unwrap().port();
    let mut client = connect(ctx, transport, BackoffIdleStrategy::default()).unwrap();
    assert_eq!(client.state(), SessionState::Connected);

    let replay = client
        .start_replay(1, 0, 1000, "aeron:udp?endpoint=localhost:20000", 5)
        .unwrap();
    let err = client
        .start_replay(2, 0, 1000, "aeron:udp?endpoint=localhost:20000", 5)
        .unwrap_err();
    assert!(matches!(err, ArchiveError::Protocol { .. }));
    client.stop_replay(replay).unwrap();
    let session = client.control_session_id();
    client.close();

    let archive = server.join().unwrap();
    assert_eq!(archive.closed, vec![session]);
    assert_eq!(
        archive.response_channel,
        Some((format!("aeron:udp?endpoint=127.0.0.1:{response_port}"), 20))
    );
}

#[test]
fn unreachable_archive_times_out() {
    init_test_tracing();
    // Bound but never read: requests vanish.
    let silent = UdpSocket::bind("127.0.0.1:0").unwrap();
    let timeout = Duration::from_millis(50);
    let max_park = Duration::from_millis(5);
    let ctx = context_for(&silent).with_connect_timeout(timeout);
    let transport = UdpTransport::from_context(&ctx).unwrap();
    let idle = BackoffIdleStrategy::new(BackoffConfig {
        max_park,
        ..BackoffConfig::default()
    });

    let start = Instant::now();
    let err = connect(ctx, transport, idle).err().unwrap();
    let elapsed = start.elapsed();
    assert!(err.is_timeout());
    assert!(elapsed >= timeout);
    assert!(
        elapsed < timeout + max_park + Duration::from_millis(40),
        "timed out after {elapsed:?}"
    );
}
