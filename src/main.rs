//! Command-line interface for scene-based frame extraction
//!
//! `extract` runs a whole job in-process and prints the final snapshot,
//! `worker` executes one queued task payload, `detect` runs scene detection
//! on a local file and `manifest` reads back a published manifest.

use std::io::Read;
use std::path::PathBuf;
use std::process;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{debug, error, info, warn};

use scene_frames::{
    detect_scenes, get_video_info, init_tracing, select_scenes, store, video_backend, ComponentWeights,
    ExtractRequest, JobPipeline, Scene, SceneSegmenter, Settings, WorkerTask,
};

#[derive(Debug, Parser)]
#[command(name = "scene-frames")]
#[command(about = "Extract one representative frame per scene from a video")]
#[command(version)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Download a video, extract frames and publish them
    Extract(ExtractArgs),
    /// Process one task payload from a queue
    Worker(WorkerArgs),
    /// Detect scenes in a local video file
    Detect(DetectArgs),
    /// Print the manifest published for a job
    Manifest(ManifestArgs),
}

#[derive(Debug, Args)]
struct ExtractArgs {
    /// Video page URL
    url: String,

    /// Frame budget; defaults to MAX_FRAMES
    #[arg(long)]
    max_frames: Option<u32>,

    /// Cut threshold; defaults to SCENE_THRESHOLD
    #[arg(long)]
    threshold: Option<f64>,
}

#[derive(Debug, Args)]
struct WorkerArgs {
    /// JSON task file; read from stdin when omitted
    #[arg(long)]
    payload: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct DetectArgs {
    video_path: PathBuf,

    #[arg(long)]
    threshold: Option<f64>,

    /// Minimum frames between cuts
    #[arg(long)]
    min_scene_len: Option<u32>,

    /// Keep only the longest scenes, in time order
    #[arg(long)]
    max_frames: Option<u32>,

    /// Score brightness changes only
    #[arg(long)]
    luma_only: bool,

    /// Fixed downscale factor; picked from the frame width when omitted
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    downscale: Option<u32>,

    /// Show video information only
    #[arg(long)]
    info: bool,

    #[arg(long, value_enum, default_value_t = OutputFormat::Simple)]
    format: OutputFormat,
}

#[derive(Debug, Args)]
struct ManifestArgs {
    job_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Scene start frames on one line
    Simple,
    /// One line per scene with timestamps
    Detailed,
    Json,
}

fn main() {
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start runtime: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(cli)) {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let settings = Settings::from_env().context("invalid configuration")?;

    let log_level = if cli.verbose { "debug" } else { "info" };
    init_tracing(log_level, settings.log_format);
    info!("scene-frames v{}", env!("CARGO_PKG_VERSION"));
    debug!("Settings: {:?}", settings);

    match cli.command {
        Command::Extract(args) => extract(&settings, args).await,
        Command::Worker(args) => worker(&settings, args).await,
        Command::Detect(args) => detect(&settings, args).await,
        Command::Manifest(args) => manifest(&settings, args).await,
    }
}

async fn extract(settings: &Settings, args: ExtractArgs) -> Result<()> {
    let pipeline = JobPipeline::from_settings(settings, video_backend(settings)).await?;

    let request = ExtractRequest::new(args.url)
        .with_max_frames(args.max_frames.unwrap_or(settings.max_frames))
        .with_scene_threshold(args.threshold.unwrap_or(settings.scene_threshold));

    let job = pipeline.submit(request).await.context("request rejected")?;
    info!(job_id = %job.job_id, "Submitted job");

    let job_id = job.job_id.clone();
    let finished = tokio::select! {
        job = pipeline.wait(&job_id) => job?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, cancelling job {}", job_id);
            pipeline.cancel(&job_id).await;
            pipeline.wait(&job_id).await?
        }
    };
    pipeline.shutdown().await;

    println!("{}", serde_json::to_string_pretty(&finished)?);
    if let Some(e) = finished.error {
        anyhow::bail!("job {} failed: {}", finished.job_id, e);
    }
    Ok(())
}

async fn worker(settings: &Settings, args: WorkerArgs) -> Result<()> {
    let payload = match &args.payload {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf).context("failed to read stdin")?;
            buf
        }
    };
    let task: WorkerTask = serde_json::from_str(&payload).context("malformed task payload")?;

    let pipeline = JobPipeline::from_settings(settings, video_backend(settings)).await?;
    let outcome = pipeline.process_task(task).await;
    pipeline.shutdown().await;

    let manifest = outcome?;
    println!("{}", serde_json::to_string_pretty(&manifest)?);
    Ok(())
}

async fn detect(settings: &Settings, args: DetectArgs) -> Result<()> {
    let settings = settings.clone();
    // Decoding is blocking work
    tokio::task::spawn_blocking(move || detect_blocking(&settings, &args)).await?
}

fn detect_blocking(settings: &Settings, args: &DetectArgs) -> Result<()> {
    let video_info = get_video_info(settings, &args.video_path)
        .with_context(|| format!("failed to open {}", args.video_path.display()))?;

    if args.info {
        println!("Video Information:");
        println!("  Path: {}", video_info.path);
        println!("  Dimensions: {}x{}", video_info.width, video_info.height);
        println!("  Frame Rate: {:.2} fps", video_info.fps);
        println!("  Frame Count: {}", video_info.frame_count);
        println!("  Duration: {:.2} seconds", video_info.duration_seconds);
        if !video_info.is_valid() {
            warn!("Video properties appear invalid - detection may fail");
        }
        return Ok(());
    }

    let threshold = args.threshold.unwrap_or(settings.scene_threshold);
    let min_scene_len = args.min_scene_len.unwrap_or(settings.min_scene_len);

    let mut segmenter = SceneSegmenter::new(threshold, min_scene_len)?;
    if args.luma_only {
        segmenter = segmenter.with_weights(ComponentWeights::luma_only())?;
    }
    if let Some(factor) = args.downscale {
        segmenter = segmenter.with_downscale(factor);
    }

    let start = Instant::now();
    let mut scenes =
        detect_scenes(settings, &args.video_path, &segmenter).context("scene detection failed")?;
    let elapsed = start.elapsed();
    if let Some(budget) = args.max_frames {
        scenes = select_scenes(scenes, budget as usize);
    }

    print_scenes(&scenes, video_info.fps, args, threshold, min_scene_len, elapsed)?;
    info!("Detection completed in {}ms, found {} scenes", elapsed.as_millis(), scenes.len());
    Ok(())
}

fn print_scenes(
    scenes: &[Scene],
    fps: f64,
    args: &DetectArgs,
    threshold: f64,
    min_scene_len: u32,
    elapsed: Duration,
) -> Result<()> {
    let start_frames: Vec<u64> = scenes
        .iter()
        .map(|scene| (scene.start_time * fps).round() as u64)
        .collect();

    match args.format {
        OutputFormat::Simple => println!("Scenes start at frames: {:?}", start_frames),
        OutputFormat::Detailed => {
            println!("Scene Detection Results:");
            println!("  Detection time: {}ms", elapsed.as_millis());
            println!("  Scenes found: {}", scenes.len());
            for scene in scenes {
                println!(
                    "    Scene {}: {:.3}s - {:.3}s (midpoint {:.3}s)",
                    scene.index,
                    scene.start_time,
                    scene.end_time,
                    scene.mid_time()
                );
            }
        }
        OutputFormat::Json => {
            let output = serde_json::json!({
                "video_path": args.video_path,
                "detection_time_ms": elapsed.as_millis() as u64,
                "scene_count": scenes.len(),
                "start_frames": start_frames,
                "scenes": scenes,
                "config": {
                    "threshold": threshold,
                    "min_scene_len": min_scene_len,
                    "max_frames": args.max_frames,
                    "luma_only": args.luma_only,
                    "downscale": args.downscale,
                }
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

async fn manifest(settings: &Settings, args: ManifestArgs) -> Result<()> {
    let store = store::from_settings(settings).await?;
    let manifest = store
        .get_manifest(&args.job_id)
        .await
        .with_context(|| format!("no manifest for job {}", args.job_id))?;
    println!("{}", serde_json::to_string_pretty(&manifest)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_extract() {
        let cli = Cli::parse_from(["scene-frames", "extract", "dQw4w9WgXcQ", "--max-frames", "5"]);
        match cli.command {
            Command::Extract(args) => {
                assert_eq!(args.url, "dQw4w9WgXcQ");
                assert_eq!(args.max_frames, Some(5));
                assert_eq!(args.threshold, None);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_detect_defaults() {
        let cli = Cli::parse_from(["scene-frames", "-v", "detect", "clip.mp4"]);
        assert!(cli.verbose);
        match cli.command {
            Command::Detect(args) => {
                assert_eq!(args.video_path, PathBuf::from("clip.mp4"));
                assert_eq!(args.format, OutputFormat::Simple);
                assert!(!args.info);
                assert!(!args.luma_only);
                assert_eq!(args.downscale, None);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_detect_json() {
        let cli = Cli::parse_from([
            "scene-frames",
            "detect",
            "clip.mp4",
            "--format",
            "json",
            "--min-scene-len",
            "10",
        ]);
        match cli.command {
            Command::Detect(args) => {
                assert_eq!(args.format, OutputFormat::Json);
                assert_eq!(args.min_scene_len, Some(10));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_detect_detector_options() {
        let cli = Cli::parse_from(["scene-frames", "detect", "clip.mp4", "--luma-only", "--downscale", "2"]);
        match cli.command {
            Command::Detect(args) => {
                assert!(args.luma_only);
                assert_eq!(args.downscale, Some(2));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_rejects_zero_downscale() {
        assert!(Cli::try_parse_from(["scene-frames", "detect", "clip.mp4", "--downscale", "0"]).is_err());
    }

    #[test]
    fn test_rejects_unknown_format() {
        assert!(Cli::try_parse_from(["scene-frames", "detect", "clip.mp4", "--format", "xml"]).is_err());
    }
}
