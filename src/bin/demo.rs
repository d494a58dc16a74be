// Terminal demo: play a file and draw live stereo meters
// Strictly a consumer of PlaybackState; all engine logic lives in the library

use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use meterdeck::meter::{normalized_magnitude, DISPLAY_FLOOR_DB};
use meterdeck::{PlaybackEngine, PlaybackState};

/// Width of each meter bar in characters.
const BAR_WIDTH: usize = 24;

#[derive(Parser)]
#[command(name = "meterdeck-demo", about = "Play an audio file with live level meters")]
struct Args {
    /// Audio file to play (anything symphonia can decode)
    file: PathBuf,

    /// Output volume, 0.0 - 1.0
    #[arg(long, default_value_t = 1.0)]
    volume: f32,

    /// Start position in seconds
    #[arg(long, default_value_t = 0.0)]
    start: f64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut engine = PlaybackEngine::new().context("failed to open audio output")?;
    engine
        .load(&args.file)
        .with_context(|| format!("failed to load {}", args.file.display()))?;

    engine.set_volume(args.volume);
    if args.start > 0.0 {
        engine.seek(args.start);
    }

    let duration = engine.duration();
    engine.subscribe(move |state| draw_meters(state, duration));
    engine.play().context("failed to start playback")?;

    println!(
        "playing {} ({:.1} s)",
        args.file.display(),
        duration
    );

    // The transport auto-stops at the end of the track
    while engine.is_playing() {
        std::thread::sleep(Duration::from_millis(100));
    }
    engine.pause();
    println!();

    Ok(())
}

fn draw_meters(state: &PlaybackState, duration: f64) {
    let line = format!(
        "\r L {} | R {}  {} / {} ",
        bar(state.left_power),
        bar(state.right_power),
        clock(state.current_time),
        clock(duration),
    );
    let mut stdout = std::io::stdout();
    let _ = stdout.write_all(line.as_bytes());
    let _ = stdout.flush();
}

fn bar(power_db: f32) -> String {
    let filled = (normalized_magnitude(power_db, DISPLAY_FLOOR_DB) * BAR_WIDTH as f32).round()
        as usize;
    let mut out = String::with_capacity(BAR_WIDTH * 3);
    for i in 0..BAR_WIDTH {
        out.push(if i < filled { '█' } else { '░' });
    }
    out
}

fn clock(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!("{}:{:02}", total / 60, total % 60)
}
