//! Starts or stops a replay on an archive.
//!
//! Control channels, timeouts and idle tuning come from `TITAN_ARCHIVE_*`
//! environment variables (see `titan_archive::config`), overridable with flags.
//!
//! # Usage
//!
//! ```sh
//! archive-replay --recording 1 --position 0 --length 1000 \
//!     --channel aeron:udp?endpoint=localhost:20000 --stream 5
//! archive-replay --stop 42
//! ```

use std::time::Duration;

use thiserror::Error;
use titan_archive::config::{ArchiveContext, ConfigError};
use titan_archive::control::{ArchiveError, ReplayRequest, ReplaySessionId, UNBOUNDED_LENGTH, connect};
use titan_archive::idle::BackoffIdleStrategy;
use titan_archive::transport::{TransportError, UdpTransport};

/// Default replay destination.
const DEFAULT_REPLAY_CHANNEL: &str = "aeron:udp?endpoint=localhost:20000";

/// Default replay stream id.
const DEFAULT_REPLAY_STREAM_ID: i32 = 5;

#[derive(Debug, Error)]
enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

enum Command {
    Start(ReplayRequest),
    Stop(ReplaySessionId),
}

fn main() {
    titan_archive::init_tracing();
    if let Err(e) = run() {
        eprintln!("archive-replay: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), CliError> {
    let args: Vec<String> = std::env::args().collect();
    let mut ctx = ArchiveContext::from_env()?;
    let command = parse_args(&args, &mut ctx)?;
    ctx.validate()?;

    let transport = UdpTransport::from_context(&ctx)?;
    eprintln!(
        "archive-replay: connecting to {} (stream {})",
        ctx.control_request_channel, ctx.control_request_stream_id
    );

    let idle = BackoffIdleStrategy::new(ctx.idle);
    let mut client = connect(ctx, transport, idle)?;
    eprintln!(
        "archive-replay: control session {}",
        client.control_session_id()
    );

    let result = match command {
        Command::Start(request) => client.start_replay_with(&request).map(|replay| {
            println!("{replay}");
        }),
        Command::Stop(replay) => client.stop_replay(replay).map(|()| {
            eprintln!("archive-replay: stopped replay {replay}");
        }),
    };
    client.close();
    Ok(result?)
}

fn value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str, CliError> {
    args.get(i)
        .map(String::as_str)
        .ok_or_else(|| CliError::Usage(format!("missing value for {flag}")))
}

fn number<N: std::str::FromStr>(args: &[String], i: usize, flag: &str) -> Result<N, CliError>
where
    N::Err: std::fmt::Display,
{
    let raw = value(args, i, flag)?;
    raw.parse()
        .map_err(|e| CliError::Usage(format!("invalid value '{raw}' for {flag}: {e}")))
}

/// Parses command line arguments, applying channel overrides to `ctx`.
fn parse_args(args: &[String], ctx: &mut ArchiveContext) -> Result<Command, CliError> {
    let mut request = ReplayRequest {
        recording_id: -1,
        position: 0,
        length: UNBOUNDED_LENGTH,
        replay_channel: DEFAULT_REPLAY_CHANNEL.to_owned(),
        replay_stream_id: DEFAULT_REPLAY_STREAM_ID,
    };
    let mut stop = None;

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        i += 1;
        match flag {
            "--recording" | "-r" => request.recording_id = number(args, i, flag)?,
            "--position" | "-p" => request.position = number(args, i, flag)?,
            "--length" | "-l" => request.length = number(args, i, flag)?,
            "--channel" | "-c" => request.replay_channel = value(args, i, flag)?.to_owned(),
            "--stream" | "-s" => request.replay_stream_id = number(args, i, flag)?,
            "--stop" => stop = Some(ReplaySessionId::new(number(args, i, flag)?)),
            "--control-request" => {
                ctx.control_request_channel = value(args, i, flag)?.to_owned();
            }
            "--control-response" => {
                ctx.control_response_channel = value(args, i, flag)?.to_owned();
            }
            "--timeout-ms" => {
                let timeout = Duration::from_millis(number(args, i, flag)?);
                ctx.connect_timeout = timeout;
                ctx.message_timeout = timeout;
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            arg => return Err(CliError::Usage(format!("unknown argument: {arg}"))),
        }
        i += 1;
    }

    if let Some(replay) = stop {
        return Ok(Command::Stop(replay));
    }
    if request.recording_id < 0 {
        return Err(CliError::Usage("--recording or --stop is required".into()));
    }
    Ok(Command::Start(request))
}

fn print_usage() {
    eprintln!(
        "Usage: archive-replay [OPTIONS]

Options:
  -r, --recording <ID>        Recording to replay
  -p, --position <POS>        Start position (default: 0)
  -l, --length <LEN>          Bytes to replay, -1 to follow (default: -1)
  -c, --channel <URI>         Replay channel (default: {DEFAULT_REPLAY_CHANNEL})
  -s, --stream <ID>           Replay stream id (default: {DEFAULT_REPLAY_STREAM_ID})
      --stop <REPLAY_ID>      Stop a running replay instead
      --control-request <URI> Archive control request channel
      --control-response <URI> Control response channel
      --timeout-ms <MS>       Connect and message timeout
  -h, --help                  Print help

Environment:
  TITAN_ARCHIVE_*             See titan_archive::config"
    );
}
