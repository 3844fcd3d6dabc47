//! Mosaic CLI - run the resynthesis engine and inspect corpora

use clap::{Parser, Subcommand};
use mosaic::audio::{list_devices, AudioOutput};
use mosaic::audio_analysis::SpectralAnalyzer;
use mosaic::audio_input::{open_capture_or_silence, FileFeed, SampleFeed, SilentFeed};
use mosaic::config::MosaicConfig;
use mosaic::control::SharedControl;
use mosaic::corpus::{Corpus, CorpusSet, TrackTable};
use mosaic::engine::{run_control, Engine};
use mosaic::keyboard::KeyboardControl;
use mosaic::osc_control::{OscControlServer, OscNotifier};
use mosaic::sample_loader::SourceBank;
use mosaic::scheduler::VoiceScheduler;
use mosaic::voice_manager::VoiceBank;
use mosaic::MosaicError;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mosaic")]
#[command(about = "Real-time concatenative resynthesis", long_about = None)]
struct Cli {
    /// Number of threads for parallel corpus search (default: 4)
    #[arg(short = 't', long, default_value = "4", global = true)]
    threads: usize,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyse live input and resynthesise it from the configured corpora
    Run {
        /// Config file (default: ./mosaic.toml, then the user config dir)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Analyse a WAV file in real time instead of the input device
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Send state notifications to HOST:PORT (overrides [osc] target)
        #[arg(long)]
        osc: Option<String>,
    },

    /// Load one corpus file and print what it contains
    Inspect {
        /// Corpus feature table
        corpus: PathBuf,

        /// Config file providing tracks and feature layout
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// List audio input and output devices
    Devices,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "mosaic=debug" } else { "mosaic=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    rayon::ThreadPoolBuilder::new()
        .num_threads(cli.threads)
        .build_global()?;

    let result = match cli.command {
        Commands::Run { config, input, osc } => run(config.as_deref(), input.as_deref(), osc).await,
        Commands::Inspect { corpus, config } => inspect(&corpus, config.as_deref()),
        Commands::Devices => devices(),
    };

    match result {
        Err(MosaicError::DeviceOpen(reason)) => {
            eprintln!("Cannot open the control device: {reason}");
            eprintln!("Mosaic needs an interactive terminal for keyboard control.");
            std::process::exit(1);
        }
        other => Ok(other?),
    }
}

async fn run(
    config_path: Option<&Path>,
    input: Option<&Path>,
    osc_target: Option<String>,
) -> mosaic::Result<()> {
    let path = MosaicConfig::resolve_path(config_path)?;
    let mut config = MosaicConfig::load(&path)?;
    if osc_target.is_some() {
        config.osc.target = osc_target;
    }
    info!("Using config {}", path.display());

    let dim = config.analysis.dimension();
    let tracks = TrackTable::new(&config.tracks);
    let corpora = Arc::new(CorpusSet::load(&config.corpora, dim, &tracks));
    if corpora.is_empty() {
        return Err(MosaicError::Config("no corpora configured".into()));
    }

    // The keyboard is the one device the engine cannot run without
    print_key_help(&corpora);
    let keyboard = KeyboardControl::open()?;

    let sources = Arc::new(SourceBank::new(tracks, config.sources.max_preload_secs));
    let preloader = Arc::clone(&sources);
    let cached = tokio::task::spawn_blocking(move || preloader.preload())
        .await
        .unwrap_or(0);
    info!("{} of {} tracks cached", cached, sources.tracks().len());

    let bank = Arc::new(VoiceBank::new(
        config.voices.count,
        config.voices.pan_spread,
        config.voices.gain,
        config.sample_rate,
    ));
    let _output = match AudioOutput::open(Arc::clone(&bank)) {
        Ok(output) => Some(output),
        Err(e) => {
            warn!("{}; continuing without sound", e);
            None
        }
    };

    let (feed, _capture): (Box<dyn SampleFeed>, Option<cpal::Stream>) = match input {
        Some(path) => match FileFeed::open(path) {
            Ok(feed) => (Box::new(feed), None),
            Err(e) => {
                warn!("{}; analysing silence instead", e);
                (Box::new(SilentFeed::new(config.sample_rate)), None)
            }
        },
        None => open_capture_or_silence(config.sample_rate),
    };
    if feed.sample_rate() != config.sample_rate {
        warn!(
            "Input runs at {} Hz, analysis is configured for {} Hz",
            feed.sample_rate(),
            config.sample_rate
        );
    }
    let analyzer = SpectralAnalyzer::new(&config.analysis, feed);

    let control = Arc::new(SharedControl::new(corpora.len()));
    let scheduler = Arc::new(VoiceScheduler::new(Arc::clone(&bank), sources, config.timing()));
    let mut engine = Engine::new(
        &config,
        Box::new(analyzer),
        corpora,
        Arc::clone(&control),
        scheduler,
    )?;
    if let Some(target) = &config.osc.target {
        match OscNotifier::new(target, &config.osc.address) {
            Ok(notifier) => engine.add_listener(Box::new(notifier)),
            Err(e) => warn!("State notifications disabled: {}", e),
        }
    }

    let (commands, command_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let _osc_server = config.osc.control_port.and_then(|port| {
        OscControlServer::spawn(port, commands.clone())
            .map_err(|e| warn!("OSC control disabled: {}", e))
            .ok()
    });

    let running = Arc::new(AtomicBool::new(true));
    let keyboard_running = Arc::clone(&running);
    let keyboard_task = tokio::task::spawn_blocking(move || {
        let result = keyboard.run(commands, keyboard_running);
        drop(keyboard);
        result
    });

    tokio::spawn(run_control(command_rx, control, shutdown_tx));

    let result = engine.run(shutdown_rx).await;
    bank.reset();

    running.store(false, Ordering::Relaxed);
    match keyboard_task.await {
        Ok(Err(e)) => warn!("Keyboard input stopped: {}", e),
        Err(e) => warn!("Keyboard task failed: {}", e),
        Ok(Ok(())) => {}
    }
    result
}

fn print_key_help(corpora: &CorpusSet) {
    println!("Mosaic");
    println!("======");
    for (i, corpus) in corpora.iter().enumerate().take(9) {
        println!("  {}  {} ({} fragments)", i + 1, corpus.name(), corpus.len());
    }
    println!("  r responsive   f freeze   p play");
    println!("  h half rate    n normal   d double");
    println!("  0 reset        q quit");
    println!();
}

fn inspect(corpus_path: &Path, config_path: Option<&Path>) -> mosaic::Result<()> {
    let config = match MosaicConfig::resolve_path(config_path) {
        Ok(path) => MosaicConfig::load(&path)?,
        Err(_) if config_path.is_none() => MosaicConfig::default(),
        Err(e) => return Err(e),
    };
    let dim = config.analysis.dimension();
    let tracks = TrackTable::new(&config.tracks);
    let corpus = Corpus::load(corpus_path, dim, &tracks)?;

    println!("Corpus:     {}", corpus.name());
    println!("Fragments:  {}", corpus.len());
    println!("Dimensions: {}", corpus.dim());

    let mut per_track: BTreeMap<usize, usize> = BTreeMap::new();
    for fragment in corpus.fragments() {
        *per_track.entry(fragment.track).or_default() += 1;
    }
    println!();
    println!("Fragments per track:");
    for (track, count) in per_track {
        println!("  {:<20} {}", tracks.name(track).unwrap_or("?"), count);
    }

    println!();
    println!("Feature ranges:");
    for d in 0..corpus.dim() {
        let (min, max) = corpus
            .features()
            .rows()
            .map(|row| row[d])
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
        println!("  [{d}] {min:>10.4} .. {max:<10.4}");
    }
    Ok(())
}

fn devices() -> mosaic::Result<()> {
    for device in list_devices()? {
        println!(
            "{} {}{}",
            if device.input { "in " } else { "out" },
            device.name,
            if device.is_default { " (default)" } else { "" }
        );
    }
    Ok(())
}
