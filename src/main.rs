use anyhow::{Context, Result};
use beatlane::analyzer::{AnalysisResult, CancelToken};
use beatlane::cache::AnalysisCache;
use beatlane::chart::generator;
use beatlane::config::{AppConfig, SessionConfig};
use beatlane::difficulty::Difficulty;
use beatlane::play::{Autoplay, GameSession, SimulatedTransport};
use beatlane::worker::{AnalysisRequest, AnalysisWorker, WorkerMessage};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "beatlane", version, about = "Four-lane rhythm game charts from any audio file")]
struct Cli {
    /// Directory holding cached analysis records
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pre-analyze audio files so sessions start instantly
    Analyze {
        /// Files or directories (searched recursively)
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Difficulties to prepare (repeatable, default all)
        #[arg(short, long = "difficulty")]
        difficulties: Vec<Difficulty>,

        /// Number of parallel workers (0 = auto-detect from config)
        #[arg(short = 'j', long, default_value = "0")]
        jobs: usize,

        /// Re-analyze even when a cached record exists
        #[arg(long)]
        force: bool,
    },

    /// Generate a chart and print its layout statistics
    Chart {
        file: PathBuf,

        #[arg(short, long)]
        difficulty: Option<Difficulty>,

        /// Pin chord/hold placement
        #[arg(long)]
        seed: Option<u64>,

        /// Chord probability override (0-1)
        #[arg(long)]
        chord_chance: Option<f64>,

        /// Hold probability (0-1)
        #[arg(long)]
        hold_chance: Option<f64>,

        /// Fixed scroll speed override
        #[arg(long)]
        speed: Option<u32>,
    },

    /// Play a full headless session with perfect input and print the results
    Autoplay {
        file: PathBuf,

        #[arg(short, long)]
        difficulty: Option<Difficulty>,

        #[arg(long)]
        seed: Option<u64>,

        /// Simulated frame rate
        #[arg(long, default_value = "60")]
        fps: u32,

        /// Scale scroll speed with the track's energy
        #[arg(long)]
        smart_speed: bool,

        /// Print the results record as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show preview offset and energy statistics for a track
    Preview {
        file: PathBuf,

        #[arg(short, long)]
        difficulty: Option<Difficulty>,
    },

    /// Remove every cached analysis record
    ClearCache,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing)
    let config = AppConfig::load();

    // Resolve cache directory: CLI > config > XDG default
    let cache_dir = cli
        .cache_dir
        .or(config.cache_dir.clone())
        .unwrap_or_else(beatlane::config::default_cache_dir);
    log::info!("Cache: {}", cache_dir.display());
    let cache = AnalysisCache::new(cache_dir);

    match cli.command {
        Commands::Analyze {
            paths,
            difficulties,
            jobs,
            force,
        } => {
            let tracks = collect_audio_files(&paths);
            if tracks.is_empty() {
                anyhow::bail!("No supported audio files found");
            }
            let difficulties = if difficulties.is_empty() {
                Difficulty::ALL.to_vec()
            } else {
                difficulties
            };
            let workers = if jobs > 0 { jobs } else { config.resolve_workers() };
            log::info!(
                "Analyzing {} tracks x {} difficulties with {} workers",
                tracks.len(),
                difficulties.len(),
                workers
            );

            let requests: Vec<AnalysisRequest> = tracks
                .iter()
                .map(|track| AnalysisRequest {
                    track: track.clone(),
                    difficulties: difficulties.clone(),
                    force,
                })
                .collect();

            let pb = ProgressBar::new((tracks.len() * difficulties.len()) as u64);
            pb.set_style(
                ProgressStyle::with_template(
                    "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
                )
                .context("Invalid progress template")?
                .progress_chars("#>-"),
            );

            let handle = AnalysisWorker::spawn(cache, config.analysis.clone(), requests, workers);
            let mut finished = 0u64;
            let mut failed = 0u64;
            handle.wait(|msg| match msg {
                WorkerMessage::Progress { track, message, .. } => {
                    pb.set_message(format!("{}: {}", file_label(track), message));
                }
                WorkerMessage::DifficultyReady { .. } => pb.inc(1),
                WorkerMessage::TrackFinished { .. } => finished += 1,
                WorkerMessage::TrackFailed { track, error } => {
                    log::warn!("{}: {}", track.display(), error);
                    failed += 1;
                }
                WorkerMessage::Cancelled | WorkerMessage::AllFinished => {}
            });
            pb.finish_and_clear();
            println!(
                "Analysis complete: {} tracks ready, {} failed",
                finished, failed
            );
        }

        Commands::Chart {
            file,
            difficulty,
            seed,
            chord_chance,
            hold_chance,
            speed,
        } => {
            let mut session = config.session.clone();
            if let Some(d) = difficulty {
                session.difficulty = d;
            }
            session.seed = seed.or(session.seed);
            session.chord_chance = chord_chance.or(session.chord_chance);
            session.hold_chance = hold_chance.unwrap_or(session.hold_chance);
            session.speed = speed.or(session.speed);

            let analysis = load_analysis(&cache, &file, &session, &config)?;
            let seed = session.seed.unwrap_or_else(generator::time_seed);
            let chart = generator::generate(&analysis.events, &session, &config.playfield, seed);

            println!("{} ({})", file_label(&file), session.difficulty);
            println!("Events:    {}", analysis.events.len());
            println!("Notes:     {}", chart.len());
            println!(
                "Holds:     {} ({:.1}s held)",
                chart.hold_count(),
                chart.hold_time()
            );
            println!("Chords:    {}", chart.chord_count());
            println!("Min gap:   {:.3}s", chart.min_gap());
            println!("Seed:      {}", chart.seed());
            let counts = chart.lane_counts();
            println!(
                "Lanes:     {}",
                counts
                    .iter()
                    .map(|c| c.to_string())
                    .collect::<Vec<_>>()
                    .join(" / ")
            );
            if let Some(last) = chart.last_event_time() {
                println!("Length:    {}", format_duration(last));
            }
        }

        Commands::Autoplay {
            file,
            difficulty,
            seed,
            fps,
            smart_speed,
            json,
        } => {
            let mut session = config.session.clone();
            if let Some(d) = difficulty {
                session.difficulty = d;
            }
            session.seed = seed.or(session.seed);
            session.smart_speed |= smart_speed;

            let analysis = load_analysis(&cache, &file, &session, &config)?;
            let mut game = GameSession::start(
                &file,
                analysis,
                &session,
                config.playfield,
                SimulatedTransport::new(),
            )
            .context("Failed to start session")?;

            let results = Autoplay::new(fps)
                .run(&mut game)
                .context("Session did not complete")?;

            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&results).context("Failed to encode results")?
                );
            } else {
                println!("{} ({})", file_label(&file), session.difficulty);
                println!("Score:     {}", results.score);
                println!("Max combo: {}", results.max_combo);
                println!(
                    "Judgments: {} perfect, {} good, {} miss",
                    results.perfects, results.goods, results.misses
                );
                println!("Accuracy:  {:.2}%", results.accuracy * 100.0);
                println!("Rank:      {}", results.rank);
            }
        }

        Commands::Preview { file, difficulty } => {
            let mut session = config.session.clone();
            if let Some(d) = difficulty {
                session.difficulty = d;
            }
            let analysis = load_analysis(&cache, &file, &session, &config)?;

            println!("{} ({})", file_label(&file), session.difficulty);
            println!("Preview start: {}", format_duration(analysis.preview_start));
            println!("Events:        {}", analysis.events.len());
            if let (Some(first), Some(last)) = (analysis.events.first(), analysis.events.last()) {
                println!(
                    "Event span:    {} - {}",
                    format_duration(*first),
                    format_duration(*last)
                );
            }
            if analysis.energy_profile.is_empty() {
                println!("Energy:        (no profile)");
            } else {
                let energies: Vec<f64> = analysis.energy_profile.iter().map(|&(_, e)| e).collect();
                let mean = energies.iter().sum::<f64>() / energies.len() as f64;
                let (peak_time, peak) = analysis
                    .energy_profile
                    .iter()
                    .copied()
                    .fold((0.0, f64::MIN), |best, s| if s.1 > best.1 { s } else { best });
                println!("Energy mean:   {:.3}", mean);
                println!("Energy peak:   {:.3} at {}", peak, format_duration(peak_time));
            }
        }

        Commands::ClearCache => {
            let removed = cache.clear().context("Failed to clear cache")?;
            println!("Removed {} cached records from {}", removed, cache.dir().display());
        }
    }

    Ok(())
}

/// Files named directly plus supported audio found under directories.
fn collect_audio_files(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in paths {
        for entry in WalkDir::new(path)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let ext = entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("")
                .to_lowercase();
            if beatlane::SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
                files.push(entry.into_path());
            }
        }
    }
    files
}

/// Cached or freshly computed analysis for one track, with a progress bar.
fn load_analysis(
    cache: &AnalysisCache,
    file: &Path,
    session: &SessionConfig,
    config: &AppConfig,
) -> Result<AnalysisResult> {
    if !file.is_file() {
        anyhow::bail!("No such file: {}", file.display());
    }
    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}% {msg}")
            .context("Invalid progress template")?
            .progress_chars("#>-"),
    );
    let mut progress = |percent: u8, message: &str| {
        pb.set_position(u64::from(percent));
        pb.set_message(message.to_string());
    };
    let result = cache
        .get_or_analyze(
            file,
            session.difficulty,
            &config.analysis,
            &CancelToken::new(),
            &mut progress,
        )
        .with_context(|| format!("Failed to analyze {}", file.display()))?;
    pb.finish_and_clear();
    Ok(result)
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn format_duration(secs: f64) -> String {
    let total = secs.max(0.0);
    let mins = (total / 60.0).floor() as u64;
    format!("{}:{:05.2}", mins, total - mins as f64 * 60.0)
}
