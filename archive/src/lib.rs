//! Non-blocking control client for a recording/replay archive.
//!
//! Nothing here spawns a thread or blocks on I/O: progress happens when the
//! caller polls, and an [`IdleStrategy`](idle::IdleStrategy) decides what the
//! thread does between empty polls.
//!
//! ```no_run
//! use titan_archive::config::ArchiveContext;
//! use titan_archive::control::connect;
//! use titan_archive::idle::BackoffIdleStrategy;
//! use titan_archive::transport::UdpTransport;
//!
//! let ctx = ArchiveContext::from_env()?;
//! let transport = UdpTransport::from_context(&ctx)?;
//! let idle = BackoffIdleStrategy::new(ctx.idle);
//! let mut client = connect(ctx, transport, idle)?;
//! let replay = client.start_replay(1, 0, 1000, "aeron:udp?endpoint=localhost:20000", 5)?;
//! println!("replay session {replay}");
//! client.close();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod control;
pub mod idle;
pub mod transport;

mod trace;

pub use trace::init_tracing;

pub use config::ArchiveContext;
pub use control::{ArchiveClient, ArchiveError, AsyncConnect, ConnectPoll, connect};
