//! edgeclock - command-line front end for the calibration engine
//!
//! Parses and resolves wall times, runs one-off jumps against an in-memory
//! stream and simulates the drift loop on a drifting stream.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use edgeclock_common::config::{load_config, TomlConfig};
use edgeclock_common::human_time::{format_offset, format_offset_opt, format_signed_secs};
use edgeclock_common::{EngineConfig, ManualClock, SystemClock, WallClock};
use edgeclock_engine::calibration::{edge_snap, CalibrationState};
use edgeclock_engine::drift::{DriftCorrector, TickOutcome};
use edgeclock_engine::stream::StreamWindowSnapshot;
use edgeclock_engine::time_parser::parse_and_normalize_24h;
use edgeclock_engine::zone::{current_offset_minutes, epoch_candidates, parse_zone, today_in_zone};
use edgeclock_engine::{JumpOptions, MemoryStream, NoAds, Session, TimeRange};

/// Command-line arguments for edgeclock
#[derive(Parser, Debug)]
#[command(name = "edgeclock")]
#[command(about = "Wall-clock calibration for live DVR streams")]
#[command(version)]
struct Args {
    /// Configuration file (overrides EDGECLOCK_CONFIG)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse and normalize a 24-hour time
    Parse { time: String },

    /// Show today/yesterday/tomorrow epoch candidates for a time in a zone
    Resolve {
        time: String,
        zone: String,
        /// Calendar date used as "today" (YYYY-MM-DD)
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Show the current UTC offset of a zone
    Offset { zone: String },

    /// Jump an in-memory live stream to a wall time
    Jump {
        time: String,
        zone: String,
        /// Seekable window start (stream seconds)
        #[arg(long)]
        start: f64,
        /// Seekable window end (stream seconds)
        #[arg(long)]
        end: f64,
        /// Buffered frontier (stream seconds)
        #[arg(long)]
        buffered_end: Option<f64>,
        /// Current playhead (defaults to the window start)
        #[arg(long)]
        position: Option<f64>,
        /// Force the stream-to-epoch offset
        #[arg(long, allow_hyphen_values = true)]
        offset: Option<f64>,
        /// Calendar date used as "today" (YYYY-MM-DD)
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Pretend the current time is this epoch second
        #[arg(long)]
        now: Option<i64>,
    },

    /// Run the drift loop against a simulated drifting stream
    Simulate {
        /// Number of drift ticks
        #[arg(long, default_value = "600")]
        ticks: u32,
        /// Stream clock rate error in parts per million
        #[arg(long, default_value = "500", allow_hyphen_values = true)]
        drift_ppm: f64,
        /// Seekable end over-report in seconds (0 for a well-behaved backend)
        #[arg(long, default_value = "0")]
        lead: f64,
    },
}

fn init_tracing(level: &str) {
    let default_filter = format!("edgeclock_engine={level},edgeclock_common={level}");
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let toml_config: TomlConfig =
        load_config(args.config.as_deref()).context("Failed to load configuration")?;
    init_tracing(&toml_config.logging.level);
    let config = toml_config.engine;

    match args.command {
        Command::Parse { time } => {
            let parsed = parse_and_normalize_24h(&time);
            match parsed {
                Ok(p) => print_json(&json!({
                    "ok": true,
                    "normalized": p.normalized,
                    "overflow": p.overflow,
                    "dayOffset": p.day_offset,
                })),
                Err(e) => print_json(&json!({ "ok": false, "reason": e.code() })),
            }
        }

        Command::Resolve { time, zone, date } => {
            let parsed = parse_and_normalize_24h(&time).context("Invalid time")?;
            let tz = parse_zone(&zone).context("Invalid zone")?;
            let base = date.unwrap_or_else(|| today_in_zone(tz, Utc::now()));
            let candidates = epoch_candidates(tz, &parsed, base)?;
            print_json(&candidates)
        }

        Command::Offset { zone } => {
            let tz = parse_zone(&zone).context("Invalid zone")?;
            let minutes = current_offset_minutes(tz, Utc::now());
            print_json(&json!({
                "zone": tz.name(),
                "offsetMinutes": minutes,
                "offset": format_offset(minutes),
            }))
        }

        Command::Jump {
            time,
            zone,
            start,
            end,
            buffered_end,
            position,
            offset,
            date,
            now,
        } => {
            let clock: Arc<dyn WallClock> = match now {
                Some(secs) => Arc::new(ManualClock::at_epoch_secs(secs)),
                None => Arc::new(SystemClock),
            };
            let mut stream = MemoryStream::live(start, end).with_position(position.unwrap_or(start));
            if let Some(b) = buffered_end {
                stream = stream.with_buffered(vec![TimeRange::new(start, b)]);
            }

            let session = Session::new(config, clock, Arc::new(NoAds))
                .context("Invalid engine configuration")?;
            session.attach(stream);
            let outcome = session.resolve_and_jump(
                &time,
                &zone,
                JumpOptions {
                    date,
                    offset_override: offset,
                },
            );
            session.detach();
            print_json(&outcome)
        }

        Command::Simulate {
            ticks,
            drift_ppm,
            lead,
        } => simulate(&config, ticks, drift_ppm, lead),
    }
}

/// Drive Edge-Snap plus `ticks` drift ticks on a stream whose clock runs
/// `drift_ppm` fast, and report how the offset followed it.
fn simulate(config: &EngineConfig, ticks: u32, drift_ppm: f64, lead: f64) -> Result<()> {
    config.validate().context("Invalid engine configuration")?;

    let clock = ManualClock::new(Utc::now());
    let buffered_end = 7_200.0;
    let stream = MemoryStream::live(0.0, buffered_end + lead)
        .with_buffered(vec![TimeRange::new(0.0, buffered_end)])
        .with_position(buffered_end - 1.0);

    let mut state = CalibrationState::new(&config.lock);
    let window = StreamWindowSnapshot::read(&stream);
    let snap = edge_snap(&mut state, &window, clock.epoch_secs(), config)?;
    info!("Initial offset {}", format_offset_opt(Some(snap.c)));

    let corrector = DriftCorrector::new(config);
    let step_ms = config.pll.interval_ms;
    let step_sec = step_ms as f64 / 1000.0;
    let mut corrections = 0u32;

    for _ in 0..ticks {
        clock.advance_ms(step_ms as i64);
        stream.advance(step_sec * (1.0 + drift_ppm * 1e-6));
        let window = StreamWindowSnapshot::read(&stream);
        let tick = corrector.tick(&mut state, &window, clock.epoch_secs(), clock.epoch_ms());
        if let TickOutcome::Corrected { error, delta, .. } = tick.outcome {
            corrections += 1;
            info!(
                "Correction e={} delta={}",
                format_signed_secs(error),
                format_signed_secs(delta)
            );
        }
    }

    let snapshot = state.snapshot();
    let drift_c = snapshot.c.map(|c| c - snap.c);
    print_json(&json!({
        "ticks": ticks,
        "corrections": corrections,
        "initialC": snap.c,
        "snapshot": snapshot,
        "skewFallback": state.fallback(),
        "offsetChange": format_offset_opt(drift_c),
    }))
}
