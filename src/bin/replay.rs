//! xr-room-replay binary
//!
//! Replays a recorded room session (JSON lines) through a [`RoomSession`]
//! backed by the in-memory scene, and prints every outbound message as a
//! `{"event", "payload"}` JSON line on stdout.
//!
//! ## Script steps
//!
//! ```text
//! {"step":"inbound","event":"entities_state","payload":{...}}
//! {"step":"room_entered"}
//! {"step":"channel_joined"}
//! {"step":"join_failed","reason":"..."}
//! {"step":"controller_added","hand":"left"}
//! {"step":"model_loaded","hand":"left"}
//! {"step":"controller_removed","hand":"left"}
//! {"step":"input","head":{...},"controllers":[...]}
//! {"step":"xr_session","state":"entered"}
//! {"step":"advance","ms":50}
//! ```
//!
//! ## Configuration (env / TOML via `config` crate)
//!
//! | Key                                | Default | Description                         |
//! |------------------------------------|---------|-------------------------------------|
//! | `XR_ROOM_MOVEMENT_SYNC_MS`         | `50`    | Pose throttle window                |
//! | `XR_ROOM_TRUNCATE_PLACES`          | `2`     | Decimals kept in outbound poses     |
//! | `XR_ROOM_SKIP_INITIAL_HEAD_SAMPLES`| `3`     | Head samples dropped after join     |
//! | `XR_ROOM_DETECTION_RADIUS`         | `0.2`   | Grab detection sphere radius        |
//! | `XR_ROOM_PARENT_WAIT_TIMEOUT_MS`   | `1000`  | Deferred parenting timeout          |

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use serde_json::{json, Value};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;
use xr_room::{
    clock::ManualClock,
    input::InputFrame,
    protocol::XrSessionState,
    scene::MemoryScene,
    session::RoomSession,
    types::{Handedness, RoomConfig},
};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "xr-room-replay", about = "Replay a recorded XR room session", version)]
struct Args {
    /// Script to replay (JSON lines); `-` reads stdin
    #[arg(default_value = "-")]
    script: String,

    /// Room id
    #[arg(long, env = "XR_ROOM_ID", default_value = "lobby")]
    room: String,

    /// Local user id
    #[arg(long, env = "XR_ROOM_USER", default_value = "replay")]
    user: String,

    /// Optional TOML file with room settings
    #[arg(long, env = "XR_ROOM_CONFIG")]
    config: Option<PathBuf>,

    /// Sleep through `advance` steps instead of only moving the clock
    #[arg(long)]
    realtime: bool,
}

// ---------------------------------------------------------------------------
// Script
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
enum Step {
    Inbound { event: String, payload: Value },
    RoomEntered,
    ChannelJoined,
    JoinFailed { reason: String },
    ControllerAdded { hand: Handedness },
    ModelLoaded { hand: Handedness },
    ControllerRemoved { hand: Handedness },
    Input(InputFrame),
    XrSession { state: XrSessionState },
    Advance { ms: u64 },
}

fn load_config(path: Option<&PathBuf>) -> Result<RoomConfig> {
    let mut builder = config::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path.as_path()).required(true));
    }
    let settings = builder
        .add_source(config::Environment::with_prefix("XR_ROOM").try_parsing(true))
        .build()
        .context("reading room configuration")?;
    settings
        .try_deserialize()
        .context("invalid room configuration")
}

fn read_script(source: &str) -> Result<Vec<(usize, Step)>> {
    let text = if source == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("reading script from stdin")?;
        buf
    } else {
        std::fs::read_to_string(source).with_context(|| format!("reading script '{}'", source))?
    };

    let mut steps = Vec::new();
    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let step = serde_json::from_str(line).with_context(|| format!("script line {}", i + 1))?;
        steps.push((i + 1, step));
    }
    Ok(steps)
}

// ---------------------------------------------------------------------------
// Replay
// ---------------------------------------------------------------------------

async fn replay(session: &RoomSession, clock: &ManualClock, steps: Vec<(usize, Step)>, realtime: bool) -> Result<()> {
    for (line, step) in steps {
        match step {
            Step::Inbound { event, payload } => {
                if let Err(e) = session.receive(&event, payload) {
                    log::warn!("line {}: inbound '{}' ignored: {}", line, event, e);
                }
            }
            Step::RoomEntered => session.room_entered(),
            Step::ChannelJoined => session.channel_joined(),
            Step::JoinFailed { reason } => {
                let err = session.channel_join_failed(reason);
                log::error!("line {}: {}", line, err);
                return Ok(());
            }
            Step::ControllerAdded { hand } => session.controller_added(hand),
            Step::ModelLoaded { hand } => session.model_loaded(hand),
            Step::ControllerRemoved { hand } => session.controller_removed(hand),
            Step::Input(frame) => session.ingest_input(&frame),
            Step::XrSession { state } => session.set_xr_session(state),
            Step::Advance { ms } => {
                if realtime {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                }
                clock.advance_ms(ms);
            }
        }
        session.tick();
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialise logging
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("xr_room=debug".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = load_config(args.config.as_ref())?;
    let steps = read_script(&args.script)?;

    log::info!(
        "Starting xr-room-replay (room='{}', user='{}', steps={}, sync={}ms)",
        args.room,
        args.user,
        steps.len(),
        config.movement_sync_ms,
    );

    let clock = Arc::new(ManualClock::new());
    let scene = Arc::new(MemoryScene::new());
    let session = RoomSession::new(&args.room, &args.user, config, clock.clone(), scene);
    session.on_outbound(|msg| {
        let (event, payload) = msg.to_wire();
        println!("{}", json!({ "event": event, "payload": payload }));
    });

    let span = tracing::info_span!("replay", room = %args.room, user = %args.user);
    tokio::select! {
        res = replay(&session, &clock, steps, args.realtime).instrument(span) => res?,
        _ = tokio::signal::ctrl_c() => log::info!("Interrupted; leaving room"),
    }

    log::info!("Replay finished: {:?}", session.stats());
    session.leave();
    Ok(())
}
