use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use lanetrack::synthetic::ShotScript;
use lanetrack::{
    BallDetection, BallProfile, CalibrationProfile, DetectionPool, FrameAnalyzer, Hsv, HsvTarget,
    PipelineConfig, ShotReport, ShotSession,
};

#[derive(Parser)]
#[command(name = "lanetrack", version, about = "Bowling ball tracking and shot metrics")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a synthetic shot and run it through the full pipeline.
    Simulate {
        /// Shot script (TOML); defaults to a straight roll down a small lane
        #[arg(long)]
        script: Option<PathBuf>,

        /// Pipeline config (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Ball profile (TOML or JSON); defaults to the script colors
        #[arg(long)]
        profile: Option<PathBuf>,

        /// Calibration profile (TOML or JSON); defaults to the script lane
        #[arg(long)]
        calibration: Option<PathBuf>,

        /// Submit frames at the script frame rate and let the pool drop
        #[arg(long)]
        realtime: bool,
    },

    /// Feed a JSON-lines detection log through tracking and metrics.
    Replay {
        /// One `BallDetection` per line
        #[arg(short, long)]
        input: PathBuf,

        /// Frame width in pixels
        #[arg(long)]
        width: u32,

        /// Frame height in pixels
        #[arg(long)]
        height: u32,

        /// Pipeline config (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Calibration profile (TOML or JSON)
        #[arg(long)]
        calibration: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    // reports go to stdout
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let reports = match cli.command {
        Commands::Simulate {
            script,
            config,
            profile,
            calibration,
            realtime,
        } => cmd_simulate(script, config, profile, calibration, realtime)?,
        Commands::Replay {
            input,
            width,
            height,
            config,
            calibration,
        } => cmd_replay(&input, (width, height), config, calibration)?,
    };

    if reports.is_empty() {
        warn!("no shot was tracked");
    }

    for report in &reports {
        println!("{}", serde_json::to_string_pretty(report)?);
    }

    Ok(())
}

fn load<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    let value = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?,
        _ => toml::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?,
    };

    Ok(value)
}

fn load_config(path: Option<PathBuf>) -> Result<Option<PipelineConfig>> {
    match path {
        Some(path) => {
            let config = PipelineConfig::load(&path)
                .with_context(|| format!("bad config {}", path.display()))?;
            Ok(Some(config))
        }
        None => Ok(None),
    }
}

fn load_calibration(path: Option<PathBuf>) -> Result<Option<CalibrationProfile>> {
    let path = match path {
        Some(path) => path,
        None => return Ok(None),
    };

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    let profile = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => CalibrationProfile::load_json(&content),
        _ => CalibrationProfile::load_toml(&content),
    }
    .with_context(|| format!("bad calibration {}", path.display()))?;

    Ok(Some(profile))
}

fn script_profile(script: &ShotScript) -> BallProfile {
    let target = |rgb| HsvTarget::new(Hsv::from_rgb(rgb)).with_tolerances(15.0, 0.25, 0.25);

    BallProfile {
        ball: target(script.ball_color),
        marker: script.marker_color.map(target),
    }
}

/// Foul line just behind the release point, pins at the end of the roll.
fn script_calibration(script: &ShotScript) -> CalibrationProfile {
    let foul_line_y = script.from.1 as f64 + script.radius as f64;
    let pixels_per_foot = (foul_line_y - script.to.1 as f64) / 60.0;

    CalibrationProfile::new(foul_line_y, 0.0, script.width as f64, pixels_per_foot)
}

fn cmd_simulate(
    script: Option<PathBuf>,
    config: Option<PathBuf>,
    profile: Option<PathBuf>,
    calibration: Option<PathBuf>,
    realtime: bool,
) -> Result<Vec<ShotReport>> {
    let script: ShotScript = match script {
        Some(path) => load(&path)?,
        None => ShotScript::default(),
    };
    if script.fps <= 0.0 || script.width == 0 || script.height == 0 {
        bail!("script needs a positive frame rate and size");
    }

    let config = match load_config(config)? {
        Some(config) => config,
        None => {
            let mut config = PipelineConfig::default();
            config.detector.ideal_area_fraction = script.ball_area_fraction();
            // offline runs keep every frame
            config.runtime.drop_late_frames = realtime;
            config
        }
    };

    let profile = match profile {
        Some(path) => load(&path)?,
        None => script_profile(&script),
    };

    let calibration = match load_calibration(calibration)? {
        Some(c) => c,
        None => script_calibration(&script),
    };

    let analyzer = Arc::new(FrameAnalyzer::new(&config, profile)?);
    let mut pool = DetectionPool::new(analyzer, &config.runtime);
    let mut session = ShotSession::new(&config, Some(calibration))?;
    let mut reports = Vec::new();

    let capacity = config.runtime.queue_depth.max(1) as u64;
    let period = Duration::from_secs_f64(1.0 / script.fps);
    let started = Instant::now();

    info!(frames = script.frames, fps = script.fps, realtime, "simulating shot");

    for (i, frame) in script.render().enumerate() {
        if realtime {
            let due = started + period * i as u32;
            if let Some(wait) = due.checked_duration_since(Instant::now()) {
                std::thread::sleep(wait);
            }
        } else {
            while pool.in_flight() >= capacity {
                match pool.recv() {
                    Some(outcome) => reports.extend(session.feed(&outcome)?),
                    None => break,
                }
            }
        }

        pool.submit(Arc::new(frame));

        while let Some(outcome) = pool.try_recv() {
            reports.extend(session.feed(&outcome)?);
        }
    }

    let dropped = pool.dropped();
    for outcome in pool.finish() {
        reports.extend(session.feed(&outcome)?);
    }
    reports.extend(session.stop());

    info!(
        shots = reports.len(),
        dropped,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "simulation done"
    );

    Ok(reports)
}

fn cmd_replay(
    input: &Path,
    dims: (u32, u32),
    config: Option<PathBuf>,
    calibration: Option<PathBuf>,
) -> Result<Vec<ShotReport>> {
    let config = load_config(config)?.unwrap_or_default();
    let mut session = ShotSession::new(&config, load_calibration(calibration)?)?;
    let mut reports = Vec::new();

    let file = std::fs::File::open(input)
        .with_context(|| format!("failed to open {}", input.display()))?;

    for (n, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let det: BallDetection = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: bad detection", input.display(), n + 1))?;

        reports.extend(session.feed_detection(&det, dims)?);
    }
    reports.extend(session.stop());

    info!(shots = reports.len(), "replay done");

    Ok(reports)
}
