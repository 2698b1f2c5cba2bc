//! Command-line interface for sweep fusion.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use crate::config::{FusionConfig, FusionParams, OutputFormat};
use crate::core::dataset::RecordStore;
use crate::core::writers::{CloudSink, DirectorySink};
use crate::processors::chain::walk_chain;
use crate::processors::fusion::SampleFusion;
use crate::processors::session::{
    CancelFlag, SampleReport, SessionRunner, EXIT_OK, EXIT_SAMPLES_FAILED,
};

const EXIT_FATAL: u8 = 1;

#[derive(Parser)]
#[command(name = "sweep-fusion")]
#[command(about = "Fuse lidar and radar sweeps into ego-frame point clouds", version)]
pub struct Cli {
    /// Path to YAML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Dataset root directory (overrides config)
    #[arg(long, global = true)]
    dataroot: Option<PathBuf>,

    /// Dataset table version, e.g. v1.0-mini (overrides config)
    #[arg(long, global = true)]
    dataset_version: Option<String>,

    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Chain endpoints, given directly or through a scene.
#[derive(Args)]
struct ChainArgs {
    /// Scene name, token or index
    #[arg(
        long,
        conflicts_with_all = ["first", "last"],
        required_unless_present_all = ["first", "last"]
    )]
    scene: Option<String>,
    /// First sample token
    #[arg(long, requires = "last")]
    first: Option<String>,
    /// Last sample token
    #[arg(long, requires = "first")]
    last: Option<String>,
}

#[derive(Args)]
struct FusionOverrides {
    /// Channels to fuse (comma separated)
    #[arg(long, value_delimiter = ',')]
    channels: Option<Vec<String>>,
    /// Reference channel
    #[arg(long)]
    ref_channel: Option<String>,
    /// Sweeps aggregated per channel
    #[arg(long)]
    nsweeps: Option<usize>,
    /// Minimum distance from the sensor in meters
    #[arg(long)]
    min_distance: Option<f32>,
}

#[derive(Args)]
struct OutputArgs {
    /// Output directory for fused clouds
    #[arg(short, long)]
    output_dir: Option<PathBuf>,
    /// Output file format
    #[arg(long, value_enum)]
    format: Option<OutputFormat>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the sample tokens of a chain
    Walk {
        #[command(flatten)]
        chain: ChainArgs,
    },

    /// Fuse a single sample and write it
    Fuse {
        /// Sample token
        #[arg(long)]
        sample: String,
        #[command(flatten)]
        fusion: FusionOverrides,
        #[command(flatten)]
        output: OutputArgs,
    },

    /// Fuse every sample of a chain
    Run {
        #[command(flatten)]
        chain: ChainArgs,
        #[command(flatten)]
        fusion: FusionOverrides,
        #[command(flatten)]
        output: OutputArgs,
        /// Number of worker threads
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// List the scenes of the dataset
    Scenes,
}

/// Create a spinner for indeterminate operations
fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Create a progress bar, or a counting spinner when the total is unknown
fn create_progress(total: Option<u64>) -> ProgressBar {
    match total {
        Some(len) => {
            let pb = ProgressBar::new(len);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("=> "),
            );
            pb
        }
        None => {
            let pb = create_spinner("Fusing samples...");
            pb.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.green} [{elapsed_precise}] {pos} samples {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            pb
        }
    }
}

/// Print a summary box
fn print_summary(title: &str, items: &[(&str, String)]) {
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║ {:<62} ║", title);
    println!("╠══════════════════════════════════════════════════════════════╣");
    for (key, value) in items {
        let display_value = if value.chars().count() > 39 {
            format!("{}...", value.chars().take(36).collect::<String>())
        } else {
            value.clone()
        };
        println!("║ {:<20}: {:<39} ║", key, display_value);
    }
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging based on verbosity (must come first)
    env_logger::Builder::new()
        .filter_level(match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .format_timestamp_secs()
        .init();

    match dispatch(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(EXIT_FATAL)
        }
    }
}

fn load_config(cli: &Cli) -> Result<FusionConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let cfg = FusionConfig::from_yaml(path)
                .with_context(|| format!("failed to load config {}", path.display()))?;
            info!("Loaded config from: {}", path.display());
            cfg
        }
        None => FusionConfig::default(),
    };

    if let Some(root) = &cli.dataroot {
        config.dataset.root = root.clone();
    }
    if let Some(version) = &cli.dataset_version {
        config.dataset.version = version.clone();
    }
    Ok(config)
}

fn open_dataset(config: &FusionConfig) -> Result<RecordStore> {
    let spinner = create_spinner("Loading dataset tables...");
    let store = RecordStore::open(&config.dataset.root, &config.dataset.version);
    spinner.finish_and_clear();

    store.with_context(|| {
        format!(
            "failed to load dataset {} from {}",
            config.dataset.version,
            config.dataset.root.display()
        )
    })
}

fn apply_fusion_overrides(params: &mut FusionParams, overrides: FusionOverrides) {
    if let Some(channels) = overrides.channels {
        params.channels = channels;
        // Keep the reference valid when only the channel list changes
        if !params.channels.contains(&params.ref_channel) {
            if let Some(first) = params.channels.first() {
                params.ref_channel = first.clone();
            }
        }
    }
    if let Some(ref_channel) = overrides.ref_channel {
        params.ref_channel = ref_channel;
    }
    if let Some(nsweeps) = overrides.nsweeps {
        params.nsweeps = nsweeps;
    }
    if let Some(min_distance) = overrides.min_distance {
        params.min_distance = min_distance;
    }
}

fn create_sink(config: &FusionConfig, output: OutputArgs) -> Result<DirectorySink> {
    let dir = output.output_dir.unwrap_or_else(|| config.output.dir.clone());
    let format = output.format.unwrap_or(config.output.format);
    let sink = DirectorySink::new(dir, format);
    sink.prepare().context("output directory is not usable")?;
    Ok(sink)
}

/// Resolve chain endpoints, returning the expected sample count when known.
fn resolve_chain(
    store: &RecordStore,
    chain: ChainArgs,
) -> Result<(String, String, Option<usize>)> {
    match (chain.scene, chain.first, chain.last) {
        (Some(key), _, _) => {
            let scene = store
                .scene(&key)
                .with_context(|| format!("cannot resolve scene '{}'", key))?;
            info!("Scene {}: {}", scene.name, scene.description);
            Ok((
                scene.first_sample_token.clone(),
                scene.last_sample_token.clone(),
                Some(scene.nbr_samples).filter(|&n| n > 0),
            ))
        }
        (None, Some(first), Some(last)) => Ok((first, last, None)),
        _ => bail!("either --scene or both --first and --last are required"),
    }
}

fn dispatch(cli: Cli) -> Result<u8> {
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Walk { chain } => cmd_walk(&config, chain),
        Commands::Fuse {
            sample,
            fusion,
            output,
        } => cmd_fuse(config, &sample, fusion, output),
        Commands::Run {
            chain,
            fusion,
            output,
            workers,
        } => cmd_run(config, chain, fusion, output, workers),
        Commands::Scenes => cmd_scenes(&config),
    }
}

fn cmd_walk(config: &FusionConfig, chain: ChainArgs) -> Result<u8> {
    let start = Instant::now();
    let store = open_dataset(config)?;
    let (first, last, _) = resolve_chain(&store, chain)?;

    let mut walk = walk_chain(&store, &first, &last);
    let mut count = 0usize;
    for token in walk.by_ref() {
        println!("{}", token);
        count += 1;
    }

    let status = match walk.interruption() {
        Some(reason) => reason.to_string(),
        None => "complete".to_string(),
    };

    print_summary(
        "Sample Chain",
        &[
            ("First", first),
            ("Last", last),
            ("Samples", count.to_string()),
            ("Status", status),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );

    Ok(EXIT_OK)
}

fn cmd_fuse(
    mut config: FusionConfig,
    sample: &str,
    fusion: FusionOverrides,
    output: OutputArgs,
) -> Result<u8> {
    let start = Instant::now();
    apply_fusion_overrides(&mut config.fusion, fusion);
    let store = open_dataset(&config)?;
    let sink = create_sink(&config, output)?;

    let spinner = create_spinner(&format!("Fusing sample {}...", sample));
    let outcome = SampleFusion::new(&store, &config.fusion)
        .and_then(|fusion| fusion.fuse_sample(sample));
    spinner.finish_and_clear();
    let outcome = outcome.with_context(|| format!("cannot fuse sample {}", sample))?;

    let mut items = vec![("Sample", sample.to_string())];
    for contribution in &outcome.cloud.contributions {
        items.push((
            contribution.channel.as_str(),
            format!(
                "{} points, {} sweeps ({})",
                contribution.points, contribution.sweeps, contribution.modality
            ),
        ));
    }
    items.push(("Total points", outcome.cloud.len().to_string()));
    items.push(("Warnings", outcome.warnings.len().to_string()));

    let code = if outcome.is_empty() {
        warn!("Sample {} produced no points; nothing written", sample);
        EXIT_SAMPLES_FAILED
    } else {
        let path = sink
            .write(sample, &outcome.cloud.cloud)
            .with_context(|| format!("cannot write sample {}", sample))?;
        items.push(("Output file", path.display().to_string()));
        EXIT_OK
    };
    items.push(("Duration", format!("{:.2?}", start.elapsed())));

    print_summary("Sample Fusion Complete", &items);
    for warning in &outcome.warnings {
        println!("  [{}] {}", warning.kind(), warning);
    }
    Ok(code)
}

fn cmd_run(
    mut config: FusionConfig,
    chain: ChainArgs,
    fusion: FusionOverrides,
    output: OutputArgs,
    workers: Option<usize>,
) -> Result<u8> {
    let start = Instant::now();
    apply_fusion_overrides(&mut config.fusion, fusion);
    if workers.is_some() {
        config.runtime.workers = workers;
    }

    let store = open_dataset(&config)?;
    let (first, last, expected) = resolve_chain(&store, chain)?;
    let sink = create_sink(&config, output)?;

    let cancel = CancelFlag::new();
    let handler_flag = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        warn!("Interrupt received; finishing samples already in progress");
        handler_flag.cancel();
    }) {
        warn!("Could not install Ctrl-C handler: {}", e);
    }

    println!("Fusing samples {} -> {}", first, last);
    println!("Channels: {}", config.fusion.channels.join(", "));
    println!("Output directory: {}", sink.dir().display());

    let pb = create_progress(expected.map(|n| n as u64));
    let on_sample = |report: &SampleReport| {
        pb.set_message(report.sample_token.clone());
        pb.inc(1);
    };

    let summary = SessionRunner::new(&store, &config.fusion, &sink)
        .cancel_flag(&cancel)
        .workers(config.runtime.workers)
        .on_sample(&on_sample)
        .run(&first, &last);
    pb.finish_and_clear();
    let summary = summary.context("session could not start")?;

    let chain_status = match &summary.chain_break {
        Some(reason) => reason.to_string(),
        None => "complete".to_string(),
    };

    let mut items = vec![
        ("First sample", first.clone()),
        ("Last sample", last.clone()),
        ("Chain", chain_status),
        ("Samples", summary.samples.len().to_string()),
        ("Written", summary.written().to_string()),
        ("Failed", summary.failed().len().to_string()),
        ("Cancelled", summary.cancelled().to_string()),
        ("Total points", summary.total_points().to_string()),
        ("Format", sink.format().to_string()),
    ];
    let counts = summary.warning_counts();
    for (kind, count) in &counts {
        items.push((*kind, count.to_string()));
    }
    items.push(("Duration", format!("{:.2?}", start.elapsed())));

    print_summary("Session Complete", &items);

    let conditions = summary.condition_lines();
    if !conditions.is_empty() {
        println!("Conditions ({}):", conditions.len());
        for line in &conditions {
            println!("  {}", line);
        }
    }
    let failed = summary.failed();
    if !failed.is_empty() {
        println!("Samples without output: {}", failed.join(", "));
    }

    Ok(summary.exit_code())
}

fn cmd_scenes(config: &FusionConfig) -> Result<u8> {
    let store = open_dataset(config)?;

    if store.scenes().is_empty() {
        println!("No scenes in {}", config.dataset.version);
        return Ok(EXIT_OK);
    }

    println!(
        "{:<4} {:<20} {:>8}  {:<34} {:<34}",
        "#", "Name", "Samples", "First sample", "Last sample"
    );
    for (i, scene) in store.scenes().iter().enumerate() {
        println!(
            "{:<4} {:<20} {:>8}  {:<34} {:<34}",
            i, scene.name, scene.nbr_samples, scene.first_sample_token, scene.last_sample_token
        );
    }

    Ok(EXIT_OK)
}
