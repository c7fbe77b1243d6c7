//! Command-line interface for the resona playback core.
//!
//! This module handles:
//! * Command line argument parsing
//! * Logging configuration
//! * Dispatch to the SDK surfaces: playback, probing, analysis,
//!   fingerprinting, waveform generation and file processing
//!
//! # Runtime Behavior
//!
//! `play` runs until end of stream or Ctrl-C; every other subcommand
//! performs its work and exits. Errors print to stderr and set a
//! non-zero exit code.

use std::{process, time::Duration};

use clap::{Parser, Subcommand};
use log::{info, warn, LevelFilter};
use tokio_util::sync::CancellationToken;

use resona::{
    analysis::Analyzer,
    config::Config,
    error::Result,
    events::PlayerEvent,
    fingerprint::{db::FingerprintDb, FingerprintEngine},
    lyrics::{parser as lrc, sync::LyricSyncer},
    player::{PlaybackState, Player},
    tools,
    waveform,
};

/// Group name for mutually exclusive logging options.
const ARGS_GROUP_LOGGING: &str = "logging";

#[derive(Parser)]
#[command(name = "resona", version, about = "Streaming audio player and analysis toolbox")]
struct Args {
    /// Quiet; only warnings and errors
    #[arg(short, long, group = ARGS_GROUP_LOGGING)]
    quiet: bool,

    /// Verbose; debug logging (twice for trace)
    #[arg(short, long, action = clap::ArgAction::Count, group = ARGS_GROUP_LOGGING)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Play a URL or file until it ends
    Play {
        /// Stream URL or filesystem path
        url: String,

        /// Audio output device: [<host>][|<device>]
        #[arg(short, long, default_value = "")]
        device: String,

        /// Initial volume in percent
        #[arg(long, default_value_t = 100.0)]
        volume: f32,

        /// Enable loudness normalization
        #[arg(long)]
        normalize: bool,

        /// LRC lyrics file to print in sync with playback
        #[arg(long)]
        lyrics: Option<String>,
    },

    /// Probe a stream and print its parameters
    Probe {
        /// Stream URL or filesystem path
        url: String,
    },

    /// Run the full analysis suite on a file
    Analyze {
        /// Input file
        input: String,
    },

    /// Fingerprint a file and add it to (or match it against) a JSON database
    Fingerprint {
        /// Input file
        input: String,

        /// Database file (JSON)
        #[arg(long, default_value = "fingerprints.json")]
        db: String,

        /// Add to the database under this id instead of matching
        #[arg(long)]
        add: Option<String>,
    },

    /// Generate a waveform overview
    Waveform {
        /// Input file
        input: String,

        /// Number of display bins
        #[arg(long, default_value_t = waveform::DEFAULT_BIN_COUNT)]
        bins: usize,
    },

    /// Transcode a file to WAV
    Transcode {
        /// Input file
        input: String,
        /// Output WAV path
        output: String,

        /// Output sample rate
        #[arg(long)]
        rate: Option<u32>,

        /// Output channel count
        #[arg(long)]
        channels: Option<usize>,
    },

    /// Trim a file to a time range, writing WAV
    Trim {
        /// Input file
        input: String,
        /// Output WAV path
        output: String,

        /// Start time in seconds
        #[arg(long, default_value_t = 0.0)]
        start: f64,

        /// End time in seconds (end of file when omitted)
        #[arg(long)]
        end: Option<f64>,

        /// Fade-in length in seconds
        #[arg(long)]
        fade_in: Option<f64>,

        /// Fade-out length in seconds
        #[arg(long)]
        fade_out: Option<f64>,
    },

    /// Concatenate files back to back, writing WAV
    Concat {
        /// Input files, joined in order
        inputs: Vec<String>,

        /// Output WAV path
        #[arg(short, long)]
        output: String,
    },
}

fn init_logger(args: &Args) {
    let level = if args.quiet {
        LevelFilter::Warn
    } else {
        match args.verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    let mut logger = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(level.as_str()),
    );
    // Third-party crates stay at warn unless explicitly raised.
    logger.filter_module("resona", level).init();
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logger(&args);

    if let Err(e) = dispatch(args).await {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

async fn dispatch(args: Args) -> Result<()> {
    match args.command {
        Command::Play {
            url,
            device,
            volume,
            normalize,
            lyrics,
        } => play(&url, device, volume, normalize, lyrics).await,

        Command::Probe { url } => {
            let config = Config::default();
            let info = tokio::task::spawn_blocking(move || tools::audio_info(&url, &config))
                .await
                .expect("probe task")?;
            println!("{info}");
            if let Some(duration) = info.duration {
                println!("duration: {:.2} s", duration.as_secs_f64());
            } else {
                println!("duration: live");
            }
            if let Some(container) = &info.container {
                println!("container: {container}");
            }
            for (key, value) in &info.tags {
                println!("tag {key}: {value}");
            }
            Ok(())
        }

        Command::Analyze { input } => {
            let analyzer = Analyzer::new(Config::default());
            let report = analyzer.analyze_url(&input, CancellationToken::new()).await?;

            println!("duration: {:.2} s, {} Hz, {} ch", report.duration, report.sample_rate, report.channels);
            println!("peak: {:.1} dBFS", report.peak.peak_dbfs);
            println!(
                "loudness: {:.1} LUFS integrated, LRA {:.1} LU, true peak {:.1} dBFS",
                report.loudness.integrated_lufs, report.loudness.lra, report.loudness.true_peak_db
            );
            println!(
                "tempo: {:.1} BPM (confidence {:.2}, stability {:.2})",
                report.bpm.bpm, report.bpm.confidence, report.bpm.stability
            );
            println!("dynamic range: {:.1} dB", report.dynamic_range.dr_db);
            if let Some(phase) = &report.phase {
                println!(
                    "phase: correlation {:.2} ({:?})",
                    phase.correlation, phase.classification
                );
            }
            if let Some(pitch) = &report.pitch {
                println!(
                    "pitch: {:.1} Hz ({} {:+.0} cents)",
                    pitch.frequency, pitch.note_name, pitch.cents
                );
            }
            if let Some(timbre) = &report.timbre {
                println!("timbre: {}", timbre.descriptor);
            }
            println!("quality: {:.0}/100", report.quality.score);
            for issue in &report.quality.issues {
                println!("  issue: {issue}");
            }
            Ok(())
        }

        Command::Fingerprint { input, db, add } => {
            let mut engine = FingerprintEngine::new();
            engine.prepare();
            let fingerprint = engine
                .fingerprint_url(&input, &Config::default(), CancellationToken::new())
                .await?;

            let database = FingerprintDb::new();
            if let Ok(json) = std::fs::read_to_string(&db) {
                database.import_json(&json)?;
            }

            match add {
                Some(id) => {
                    database.add(&id, &id, "unknown", None, fingerprint);
                    std::fs::write(&db, database.export_json()?)?;
                    println!("added {id} ({} entries total)", database.len());
                }
                None => match database.recognize(&fingerprint) {
                    Some(result) => println!(
                        "match: {} - {} (score {:.2}, confidence {:.2}, offset {:.1} s)",
                        result.artist, result.title, result.score, result.confidence, result.time_offset
                    ),
                    None => println!("no match among {} entries", database.len()),
                },
            }
            Ok(())
        }

        Command::Waveform { input, bins } => {
            let overview = waveform::generate(
                &input,
                bins,
                &Config::default(),
                None,
                CancellationToken::new(),
            )
            .await?;
            for bin in &overview.bins {
                println!("{:.4} {:.4}", bin.max_positive, bin.min_negative);
            }
            Ok(())
        }

        Command::Transcode {
            input,
            output,
            rate,
            channels,
        } => {
            let options = tools::TranscodeOptions {
                sample_rate: rate,
                channels,
                ..tools::TranscodeOptions::default()
            };
            let config = Config::default();
            let summary =
                tokio::task::spawn_blocking(move || tools::transcode(&input, output, &options, &config))
                    .await
                    .expect("transcode task")?;
            println!(
                "wrote {} frames ({:.2} s) at {} Hz, {} ch",
                summary.frames, summary.duration, summary.sample_rate, summary.channels
            );
            Ok(())
        }

        Command::Trim {
            input,
            output,
            start,
            end,
            fade_in,
            fade_out,
        } => {
            let config = Config::default();
            let summary = tokio::task::spawn_blocking(move || {
                tools::trim(&input, output, start, end, fade_in, fade_out, &config)
            })
            .await
            .expect("trim task")?;
            println!("wrote {:.2} s", summary.duration);
            Ok(())
        }

        Command::Concat { inputs, output } => {
            let config = Config::default();
            let summary =
                tokio::task::spawn_blocking(move || tools::concatenate(&inputs, output, &config))
                    .await
                    .expect("concat task")?;
            println!("wrote {:.2} s", summary.duration);
            Ok(())
        }
    }
}

/// Runs a playback session until it ends or Ctrl-C fires.
async fn play(
    url: &str,
    device: String,
    volume: f32,
    normalize: bool,
    lyrics: Option<String>,
) -> Result<()> {
    let config = Config {
        device,
        normalization: normalize,
        initial_volume: (volume / 100.0).clamp(0.0, 1.0),
        ..Config::default()
    };

    let mut player = Player::new(config)?;
    let mut events = player.subscribe();

    if normalize {
        player.effects().set_loudness_normalize(true);
    }

    let mut syncer = match lyrics {
        Some(path) => {
            let content = std::fs::read_to_string(&path)?;
            Some(LyricSyncer::new(lrc::parse(&content)))
        }
        None => None,
    };

    player.play(url)?;

    let mut ticker = tokio::time::interval(Duration::from_millis(100));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!();
                player.stop();
                return Ok(());
            }
            event = events.recv() => {
                match event {
                    Some(PlayerEvent::StateChanged { to, .. }) => {
                        info!("state: {to:?}");
                        match to {
                            PlaybackState::Playing => {
                                if let Some(info) = player.stream_info() {
                                    println!("{info}");
                                }
                            }
                            PlaybackState::Stopped | PlaybackState::Error(_) => {
                                return Ok(());
                            }
                            _ => {}
                        }
                    }
                    Some(PlayerEvent::DurationUpdated { seconds }) => {
                        println!("duration: {seconds:.2} s");
                    }
                    Some(PlayerEvent::TrackEnded) => {
                        println!("track ended");
                    }
                    Some(PlayerEvent::EqGainClamped { band, original, clamped }) => {
                        warn!("eq band {band} gain {original} clamped to {clamped}");
                    }
                    Some(PlayerEvent::Error(kind)) => {
                        eprintln!("playback error: {kind}");
                    }
                    None => return Ok(()),
                }
            }
            _ = ticker.tick() => {
                if let Some(syncer) = syncer.as_mut() {
                    if let Some(event) = syncer.update(player.position()) {
                        println!("♪ {}", event.line.text);
                    }
                }
            }
        }
    }
}
