use keyboard_spectrum::config::AnalyzerConfig;
use keyboard_spectrum::console_display;
use keyboard_spectrum::engine::AnalysisEngine;
use keyboard_spectrum::monitor::SpectrumMonitor;
use keyboard_spectrum::osc_sender;
use keyboard_spectrum::snapshot::SnapshotClient;
use keyboard_spectrum::types::*;
use keyboard_spectrum::wav_player::WavPlayer;
#[cfg(feature = "audio")]
use keyboard_spectrum::audio_input::AudioCapture;

use clap::Parser;
use crossbeam_channel::bounded;
use log::{error, info};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

#[derive(Parser)]
#[command(name = "keyboard-spectrum")]
#[command(about = "Real-time 88-note piano spectrum analyzer")]
struct Cli {
    /// Analyze a WAV file instead of the live input device
    #[arg(long)]
    wav: Option<PathBuf>,

    /// Stream the WAV file as fast as possible instead of at real-time pace
    #[arg(long)]
    fast: bool,

    /// Load analyzer settings from a JSON file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the effective settings to a JSON file before starting
    #[arg(long)]
    save_config: Option<PathBuf>,

    /// Boost at each key's fundamental (dB)
    #[arg(long)]
    peak_gain_db: Option<f64>,

    /// Power smoothing pole, 0.0 (none) to just under 1.0
    #[arg(long)]
    smoothing: Option<f64>,

    /// Samples per waveform snapshot
    #[arg(long)]
    waveform_len: Option<usize>,

    /// Snapshot refresh rate (Hz)
    #[arg(long)]
    fps: Option<u32>,

    /// Enable console display (on by default unless --osc is given)
    #[arg(long)]
    console: bool,

    /// Console display refresh rate (Hz)
    #[arg(long, default_value_t = 20)]
    display_hz: u32,

    /// Enable OSC output
    #[arg(long)]
    osc: bool,

    /// OSC target address
    #[arg(long, default_value = "127.0.0.1:9000")]
    osc_target: String,
}

fn main() {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info"),
    )
    .format_timestamp_millis()
    .init();

    let cli = Cli::parse();
    let config = effective_config(&cli);
    let clock = SessionClock::new();

    if let Some(path) = &cli.save_config {
        if let Err(e) = config.save(path) {
            error!("Could not save config to {:?}: {}", path, e);
        }
    }

    info!("═══════════════════════════════════════════════");
    info!("  KEYBOARD SPECTRUM v{}", env!("CARGO_PKG_VERSION"));
    info!("  Keys: {} ({}–{})", NOTE_COUNT, note_name(LOWEST_NOTE), note_name(HIGHEST_NOTE));
    info!("  Peak gain: {:.1} dB  Smoothing: {:.3}", config.peak_gain_db, config.smoothing);
    match &cli.wav {
        Some(p) => info!("  Source: WAV {:?}{}", p, if cli.fast { " (unpaced)" } else { "" }),
        None => info!("  Source: live input"),
    }
    info!("═══════════════════════════════════════════════");

    let mut handles: Vec<JoinHandle<()>> = Vec::new();
    let mut frame_txs: Vec<crossbeam_channel::Sender<SpectrumFrame>> = Vec::new();

    // ─── Console display ────────────────────────────────────────────
    if cli.console || !cli.osc {
        let (tx, rx) = bounded::<SpectrumFrame>(8);
        frame_txs.push(tx);
        let hz = cli.display_hz;
        handles.push(thread::Builder::new().name("display".into()).spawn(move || {
            console_display::ConsoleDisplay::new(rx, hz).run();
        }).expect("spawn display thread"));
    }

    // ─── OSC sender ─────────────────────────────────────────────────
    if cli.osc {
        let (tx, rx) = bounded::<SpectrumFrame>(64);
        frame_txs.push(tx);
        let target = cli.osc_target.clone();
        handles.push(thread::Builder::new().name("osc".into()).spawn(move || {
            osc_sender::OscSender::new(rx, target).run();
        }).expect("spawn osc thread"));
    }

    // ─── Audio source + analysis engine ─────────────────────────────
    // `_capture` keeps the live stream open until main returns.
    let (_capture, client) = match &cli.wav {
        Some(path) => (None, start_wav(path, &config, !cli.fast, &clock, &mut handles)),
        None => match start_live(&config) {
            Some((capture, client)) => (Some(capture), Some(client)),
            None => (None, None),
        },
    };
    let Some(client) = client else {
        std::process::exit(1);
    };

    // ─── Monitor on the main thread (returns when the source ends) ──
    SpectrumMonitor::new(client, &config, frame_txs, clock).run();

    for h in handles {
        let _ = h.join();
    }
}

/// Config file (if any), then CLI overrides, then sanity clamps.
fn effective_config(cli: &Cli) -> AnalyzerConfig {
    let mut config = cli
        .config
        .as_deref()
        .and_then(AnalyzerConfig::load)
        .unwrap_or_default();
    if let Some(v) = cli.peak_gain_db {
        config.peak_gain_db = v;
    }
    if let Some(v) = cli.smoothing {
        config.smoothing = v;
    }
    if let Some(v) = cli.waveform_len {
        config.waveform_len = v;
    }
    if let Some(v) = cli.fps {
        config.display_fps = v;
    }
    config.sanitized()
}

/// Spawn the WAV reader and the engine thread it feeds.
fn start_wav(
    path: &Path,
    config: &AnalyzerConfig,
    realtime: bool,
    clock: &SessionClock,
    handles: &mut Vec<JoinHandle<()>>,
) -> Option<SnapshotClient> {
    let player = match WavPlayer::open(path) {
        Ok(p) => p,
        Err(e) => {
            error!("Failed to open WAV file {:?}: {}", path, e);
            return None;
        }
    };

    let (mut engine, client) = AnalysisEngine::new(player.sample_rate(), config);
    let (audio_tx, audio_rx) = bounded::<AudioChunk>(64);

    handles.push(thread::Builder::new().name("engine".into()).spawn(move || {
        engine.run(audio_rx);
    }).expect("spawn engine thread"));

    let block_size = config.block_size;
    let clock = clock.clone();
    handles.push(thread::Builder::new().name("wav".into()).spawn(move || {
        player.run(&audio_tx, block_size, realtime, &clock);
    }).expect("spawn wav thread"));

    Some(client)
}

#[cfg(feature = "audio")]
fn start_live(config: &AnalyzerConfig) -> Option<(AudioCapture, SnapshotClient)> {
    match AudioCapture::start(config) {
        Ok((capture, client)) => {
            info!("Live capture running @ {} Hz", capture.sample_rate());
            Some((capture, client))
        }
        Err(e) => {
            error!("Live capture failed: {}", e);
            None
        }
    }
}

#[cfg(not(feature = "audio"))]
fn start_live(_config: &AnalyzerConfig) -> Option<((), SnapshotClient)> {
    error!("Live capture requires the 'audio' feature. Pass --wav to analyze a file.");
    None
}
