//! meltpool-bench: CLI tool for pipeline parameter experimentation and diagnostics.
//!
//! Renders a synthetic melt pool stack with a known laser trajectory, runs
//! the processing pipeline on it and prints per-stage diagnostics. Useful
//! for:
//!
//! - Checking how closely the estimator recovers the true trajectory
//! - Tuning window margins, median kernels and the surface band
//! - Measuring per-stage durations to identify bottlenecks
//! - Timing a recompute from a later stage against a full run
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin meltpool-bench -- [OPTIONS]
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

mod synthetic;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use flexi_logger::Logger;
use meltpool_pipeline::diagnostics::{Clock, PipelineDiagnostics};
use meltpool_pipeline::{
    DenoiseConfig, EdgeFilterKind, EstimatorConfig, PipelineConfig, RadialConfig, ResliceConfig,
    StageKind, SurfaceConfig, SurfaceProfile, TrajectorySource,
};

use crate::synthetic::Scene;

/// Pipeline parameter experimentation and diagnostics for melt pool stacks.
///
/// Runs the pipeline on a generated stack with configurable parameters and
/// prints detailed per-stage timing and shape diagnostics.
#[derive(Parser)]
#[command(name = "meltpool-bench", version)]
struct Cli {
    /// Number of time frames in the generated stack.
    #[arg(long, default_value_t = 100, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    frames: usize,

    /// Frame height in pixels.
    #[arg(long, default_value_t = 200, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    height: usize,

    /// Frame width in pixels.
    #[arg(long, default_value_t = 1024, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    width: usize,

    /// Laser displacement per frame, in pixels.
    #[arg(long, default_value_t = 6.0)]
    speed: f64,

    /// Laser position in the first frame.
    ///
    /// For a forward-moving laser this must stay below `--height`.
    #[arg(long, default_value_t = 120.0)]
    start: f64,

    /// First material row below the background layer.
    #[arg(long, default_value_t = 60)]
    surface_row: usize,

    /// Melt pool radius in pixels.
    #[arg(long, default_value_t = 12.0)]
    pool_radius: f64,

    /// Half-width of the uniform noise added to every pixel.
    #[arg(long, default_value_t = 150)]
    noise: u16,

    /// Seed for the noise generator.
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// How the trajectory is obtained.
    #[arg(long, value_enum, default_value_t = Source::Estimate)]
    trajectory: Source,

    /// Estimator median kernel for the projection image (odd).
    #[arg(long, default_value_t = EstimatorConfig::DEFAULT_KERNEL_SIZE_IMG)]
    kernel_size_img: usize,

    /// Estimator median kernel for the maxima sequence (odd).
    #[arg(long, default_value_t = EstimatorConfig::DEFAULT_KERNEL_SIZE_MAX)]
    kernel_size_max: usize,

    /// Pixels kept behind the laser in each window.
    #[arg(long, default_value_t = ResliceConfig::DEFAULT_WINDOW_OFFSET, allow_hyphen_values = true)]
    window_offset: i64,

    /// Window width in pixels.
    #[arg(long, default_value_t = ResliceConfig::DEFAULT_WINDOW_SIZE)]
    window_size: usize,

    /// Median kernel extent along time.
    #[arg(long, default_value_t = DenoiseConfig::DEFAULT_KERNEL)]
    kernel_t: usize,

    /// Median kernel extent along rows.
    #[arg(long, default_value_t = DenoiseConfig::DEFAULT_KERNEL)]
    kernel_y: usize,

    /// Median kernel extent along columns.
    #[arg(long, default_value_t = DenoiseConfig::DEFAULT_KERNEL)]
    kernel_x: usize,

    /// Skip Otsu clipping and rescaling before the median filter.
    #[arg(long)]
    no_normalize: bool,

    /// Laser column inside the window, used as the radial reference.
    #[arg(long, default_value_t = RadialConfig::DEFAULT_XPOS)]
    xpos: usize,

    /// Directional filter family for the radial gradient.
    #[arg(long, value_enum, default_value_t = Filter::Sobel)]
    filter: Filter,

    /// First band row below the material boundary.
    #[arg(long, default_value_t = SurfaceConfig::DEFAULT_TOP_OFFSET)]
    top_offset: usize,

    /// End of the band below the material boundary.
    #[arg(long, default_value_t = SurfaceConfig::DEFAULT_BOTTOM_OFFSET)]
    bottom_offset: usize,

    /// Full pipeline config as a JSON string.
    ///
    /// When provided, all other pipeline parameter flags are ignored.
    /// The JSON must be a valid `PipelineConfig` serialization.
    #[arg(long)]
    config_json: Option<String>,

    /// After each run, recompute from this stage and report it too.
    #[arg(long, value_enum)]
    recompute_from: Option<Stage>,

    /// Write the window position log as CSV.
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Write the surface profile as a grayscale PNG.
    #[arg(long)]
    png: Option<PathBuf>,

    /// Number of runs for averaging.
    #[arg(long, default_value_t = 1, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    runs: usize,

    /// Output diagnostics as JSON instead of human-readable report.
    #[arg(long)]
    json: bool,

    /// Log filter for pipeline messages (e.g. `warn`, `debug`).
    #[arg(long, default_value = "warn")]
    log_level: String,
}

/// Trajectory source selection.
#[derive(Clone, Copy, ValueEnum)]
enum Source {
    /// Estimate from the stack via the edge-filtered projection.
    Estimate,
    /// Use the trajectory the stack was rendered with.
    Truth,
}

/// Directional filter family selection.
#[derive(Clone, Copy, ValueEnum)]
enum Filter {
    /// 3-tap, `[1, 2, 1]` smoothing.
    Sobel,
    /// 3-tap, box smoothing.
    Prewitt,
    /// 3-tap, `[3, 10, 3]` smoothing.
    Scharr,
    /// 5-tap optimized pair.
    Farid,
}

/// Stage selection for `--recompute-from`.
#[derive(Clone, Copy, ValueEnum)]
enum Stage {
    Trajectory,
    Reslice,
    Denoise,
    RadialGradient,
    Surface,
}

impl From<Stage> for StageKind {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::Trajectory => Self::Trajectory,
            Stage::Reslice => Self::Reslice,
            Stage::Denoise => Self::Denoise,
            Stage::RadialGradient => Self::RadialGradient,
            Stage::Surface => Self::Surface,
        }
    }
}

const fn scene_from_cli(cli: &Cli) -> Scene {
    Scene {
        frames: cli.frames,
        height: cli.height,
        width: cli.width,
        speed: cli.speed,
        start: cli.start,
        surface_row: cli.surface_row,
        pool_radius: cli.pool_radius,
        noise: cli.noise,
        seed: cli.seed,
    }
}

/// Build a [`PipelineConfig`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and all
/// individual parameter flags are ignored.  Otherwise, a config is
/// assembled from the individual flags.
fn config_from_cli(cli: &Cli) -> Result<PipelineConfig, String> {
    if let Some(ref json) = cli.config_json {
        return serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"));
    }

    Ok(PipelineConfig {
        estimator: EstimatorConfig {
            kernel_size_img: cli.kernel_size_img,
            kernel_size_max: cli.kernel_size_max,
            ..EstimatorConfig::default()
        },
        reslice: ResliceConfig {
            window_offset: cli.window_offset,
            window_size: cli.window_size,
        },
        denoise: DenoiseConfig {
            kernel_t: cli.kernel_t,
            kernel_y: cli.kernel_y,
            kernel_x: cli.kernel_x,
            normalize: !cli.no_normalize,
        },
        radial: RadialConfig {
            xpos: cli.xpos,
            filter: match cli.filter {
                Filter::Sobel => EdgeFilterKind::Sobel,
                Filter::Prewitt => EdgeFilterKind::Prewitt,
                Filter::Scharr => EdgeFilterKind::Scharr,
                Filter::Farid => EdgeFilterKind::Farid,
            },
        },
        surface: SurfaceConfig {
            top_offset: cli.top_offset,
            bottom_offset: cli.bottom_offset,
        },
        ..PipelineConfig::default()
    })
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let _logger = match Logger::try_with_str(&cli.log_level).and_then(|l| l.log_to_stderr().start()) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Error starting logger: {e}");
            return ExitCode::FAILURE;
        }
    };

    let config = match config_from_cli(&cli) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    let scene = scene_from_cli(&cli);
    let stack = scene.render();
    let truth = scene.trajectory();
    let source = match cli.trajectory {
        Source::Estimate => TrajectorySource::Estimate,
        Source::Truth => TrajectorySource::Manual(truth),
    };

    eprintln!("Stack: {:?} (u16)", stack.dim());
    eprintln!("True trajectory: {truth:?}");
    eprintln!("Config: {config:#?}");
    eprintln!("Runs: {}", cli.runs);
    eprintln!();

    let mut all_diagnostics = Vec::with_capacity(cli.runs);
    let mut recompute_diagnostics = Vec::new();

    for run in 0..cli.runs {
        if cli.runs > 1 {
            eprintln!("--- Run {}/{} ---", run + 1, cli.runs);
        }

        let (staged, diagnostics) = match meltpool_pipeline::diagnostics::process_staged_with_diagnostics(
            stack.view(),
            source.clone(),
            &config,
            &StdClock,
        ) {
            Ok(result) => result,
            Err(e) => {
                eprintln!("Pipeline error: {e}");
                return ExitCode::FAILURE;
            }
        };

        if let Err(msg) = print_diagnostics(&diagnostics, cli.json) {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
        if matches!(cli.trajectory, Source::Estimate) {
            eprintln!(
                "Trajectory error: coef {:+.4}, intercept {:+.2}",
                staged.trajectory.coef - truth.coef,
                staged.trajectory.intercept - truth.intercept,
            );
        }

        if let Some(stage) = cli.recompute_from {
            match meltpool_pipeline::diagnostics::recompute_with_diagnostics(
                &staged,
                stack.view(),
                &config,
                stage.into(),
                &StdClock,
            ) {
                Ok((_, diagnostics)) => {
                    eprintln!("Recompute from {}:", StageKind::from(stage).name());
                    if let Err(msg) = print_diagnostics(&diagnostics, cli.json) {
                        eprintln!("{msg}");
                        return ExitCode::FAILURE;
                    }
                    recompute_diagnostics.push(diagnostics);
                }
                Err(e) => {
                    eprintln!("Recompute error: {e}");
                    return ExitCode::FAILURE;
                }
            }
        }

        // Write outputs on the first run only.
        if run == 0 {
            if let Some(ref csv_path) = cli.csv {
                let csv = meltpool_export::to_csv(&staged.positions);
                match std::fs::write(csv_path, &csv) {
                    Ok(()) => {
                        eprintln!(
                            "Position log written to {} ({} rows)",
                            csv_path.display(),
                            staged.positions.len(),
                        );
                    }
                    Err(e) => {
                        eprintln!("Error writing CSV to {}: {e}", csv_path.display());
                    }
                }
            }
            if let Some(ref png_path) = cli.png {
                match write_profile_png(&staged.surface_profile, png_path) {
                    Ok(()) => eprintln!("Surface profile written to {}", png_path.display()),
                    Err(e) => eprintln!("Error writing PNG to {}: {e}", png_path.display()),
                }
            }
        }

        all_diagnostics.push(diagnostics);

        if cli.runs > 1 {
            eprintln!();
        }
    }

    // Print summary when multiple runs.
    if cli.runs > 1 {
        print_multi_run_summary("Summary", &all_diagnostics);
        if !recompute_diagnostics.is_empty() {
            print_multi_run_summary("Recompute summary", &recompute_diagnostics);
        }
    }

    ExitCode::SUCCESS
}

fn print_diagnostics(diagnostics: &PipelineDiagnostics, json: bool) -> Result<(), String> {
    if json {
        let json = serde_json::to_string_pretty(diagnostics)
            .map_err(|e| format!("Error serializing diagnostics: {e}"))?;
        println!("{json}");
    } else {
        println!("{}", diagnostics.report());
    }
    Ok(())
}

/// Min-max scale the finite profile values into 8-bit gray.
///
/// Non-finite values map to black.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn write_profile_png(profile: &SurfaceProfile, path: &Path) -> Result<(), String> {
    let (rows, cols) = profile.dim();
    let height = u32::try_from(rows).map_err(|e| e.to_string())?;
    let width = u32::try_from(cols).map_err(|e| e.to_string())?;
    if height == 0 || width == 0 {
        return Err(format!("surface profile is empty ({rows}x{cols})"));
    }

    let finite = || profile.iter().copied().filter(|v| v.is_finite());
    let min = finite().reduce(f64::min).unwrap_or(0.0);
    let max = finite().reduce(f64::max).unwrap_or(0.0);
    let span = max - min;

    let img = image::GrayImage::from_fn(width, height, |x, y| {
        let value = profile[[y as usize, x as usize]];
        let level = if value.is_finite() && span > 0.0 {
            ((value - min) / span * 255.0).round()
        } else {
            0.0
        };
        image::Luma([level as u8])
    });
    img.save(path).map_err(|e| e.to_string())
}

/// [`Clock`] implementation backed by [`std::time::Instant`].
struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn elapsed(&self, since: &Instant) -> Duration {
        since.elapsed()
    }
}

/// Function pointer type for extracting a stage duration from diagnostics.
type StageExtractor = fn(&PipelineDiagnostics) -> Option<Duration>;

/// Print aggregated statistics across multiple runs.
#[allow(clippy::cast_precision_loss)]
fn print_multi_run_summary(title: &str, all_diagnostics: &[PipelineDiagnostics]) {
    println!();
    println!(
        "{title} ({} runs)\n{}",
        all_diagnostics.len(),
        "=".repeat(60),
    );

    if all_diagnostics.is_empty() {
        println!("Warning: no diagnostics to summarize");
        return;
    }

    let durations: Vec<f64> = all_diagnostics
        .iter()
        .map(|d| d.total_duration.as_secs_f64() * 1000.0)
        .collect();

    let min = durations.iter().copied().reduce(f64::min).unwrap_or(0.0);
    let max = durations.iter().copied().reduce(f64::max).unwrap_or(0.0);
    let mean = durations.iter().sum::<f64>() / durations.len() as f64;

    println!("Total duration: min={min:.3}ms  mean={mean:.3}ms  max={max:.3}ms");

    // Per-stage means.
    println!();
    println!("{:<24} {:>12}", "Stage", "Mean (ms)");
    println!("{}", "-".repeat(40));

    let stage_extractors: &[(&str, StageExtractor)] = &[
        ("Trajectory", |d| d.trajectory.as_ref().map(|s| s.duration)),
        ("Reslice", |d| d.reslice.as_ref().map(|s| s.duration)),
        ("Denoise", |d| d.denoise.as_ref().map(|s| s.duration)),
        ("Radial Gradient", |d| d.radial_gradient.as_ref().map(|s| s.duration)),
        ("Surface", |d| d.surface.as_ref().map(|s| s.duration)),
    ];

    for (name, extractor) in stage_extractors {
        let stage_durations: Vec<f64> = all_diagnostics
            .iter()
            .filter_map(extractor)
            .map(|dur| dur.as_secs_f64() * 1000.0)
            .collect();

        if stage_durations.is_empty() {
            continue;
        }

        let stage_mean = stage_durations.iter().sum::<f64>() / stage_durations.len() as f64;
        println!("{name:<24} {stage_mean:>10.3}ms");
    }
}
