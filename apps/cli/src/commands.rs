//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use bridge_rlds_core::pipeline::{
    IngestConfig, IngestResult, ProgressReporter, ingest, spawn_embedder,
};
use bridge_rlds_plot::{PlotOptions, RowSelection, load_counts, render_comparison, write_table};
use bridge_rlds_shards::validate_dataset;
use bridge_rlds_shared::{AppConfig, SkippedEpisode, init_config, load_config, load_config_from};
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// bridge-rlds: Bridge teleoperation episodes to sharded RLDS-style datasets.
#[derive(Parser)]
#[command(
    name = "bridge-rlds",
    version,
    about = "Convert Bridge teleoperation episodes to sharded datasets and plot label counts.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.bridge-rlds/bridge-rlds.toml.
    #[arg(long, global = true, env = "BRIDGE_RLDS_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Convert every episode under SOURCE into a sharded dataset.
    Ingest {
        /// Root directory holding the episode directories.
        source: PathBuf,

        /// Episode layout: flat or raw-tree.
        #[arg(long)]
        layout: Option<String>,

        /// Output root; the dataset lands in <out>/<name>/<version>.
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Dataset name.
        #[arg(short, long)]
        name: Option<String>,

        /// Dataset version directory.
        #[arg(long = "dataset-version")]
        dataset_version: Option<String>,

        /// Split to write.
        #[arg(long)]
        split: Option<String>,

        /// Episodes per shard file.
        #[arg(long)]
        shard_size: Option<usize>,

        /// Resize frames to WIDTHxHEIGHT (e.g. 256x256).
        #[arg(long, value_parser = parse_image_size)]
        image_size: Option<(u32, u32)>,

        /// Embed language instructions through the embedding bridge.
        #[arg(long)]
        embed: bool,

        /// Convert at most N episodes.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Validate a written dataset's shards against its manifest.
    Verify {
        /// Dataset directory (holds dataset_info.json).
        dataset: PathBuf,

        /// Print the manifest as JSON instead of a summary.
        #[arg(long)]
        json: bool,
    },

    /// Compare two label distributions in a layered bar chart.
    Plot {
        /// Counter file of the first source.
        #[arg(long)]
        first: PathBuf,

        /// Counter file of the second source, drawn over the first.
        #[arg(long)]
        second: PathBuf,

        /// Output SVG path.
        #[arg(short, long)]
        out: PathBuf,

        /// Chart title.
        #[arg(long, default_value = "Label distribution")]
        title: String,

        /// Legend names as FIRST,SECOND (defaults to the file stems).
        #[arg(long)]
        labels: Option<String>,

        /// Keep the N most frequent labels (0 keeps all).
        #[arg(long, default_value = "60")]
        top: usize,

        /// Apply --top to each source before joining them.
        #[arg(long)]
        top_per_source: bool,

        /// Label to leave out (repeatable), e.g. "None".
        #[arg(long)]
        exclude: Vec<String>,

        /// Fixed y-axis maximum.
        #[arg(long)]
        y_max: Option<f64>,

        /// Explicit y ticks, comma-separated.
        #[arg(long, value_delimiter = ',')]
        y_ticks: Vec<f64>,

        /// Logarithmic y axis.
        #[arg(long)]
        log: bool,

        /// Break the y axis between LO and HI, e.g. "1500,4000".
        #[arg(long, value_parser = parse_y_break)]
        y_break: Option<(f64, f64)>,

        /// Also write the merged table as JSON.
        #[arg(long)]
        table: Option<PathBuf>,

        /// x-axis title.
        #[arg(long, default_value = "Label")]
        x_desc: String,

        /// y-axis title.
        #[arg(long, default_value = "# of episodes")]
        y_desc: String,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

/// Parse `WIDTHxHEIGHT`.
fn parse_image_size(s: &str) -> std::result::Result<(u32, u32), String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{s}'"))?;
    let parse = |v: &str| {
        v.trim()
            .parse::<u32>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| format!("'{v}' is not a positive integer"))
    };
    Ok((parse(w)?, parse(h)?))
}

fn parse_y_break(s: &str) -> std::result::Result<(f64, f64), String> {
    let (lo, hi) = s
        .split_once(',')
        .ok_or_else(|| format!("expected LO,HI, got '{s}'"))?;
    let parse = |v: &str| {
        v.trim()
            .parse::<f64>()
            .map_err(|_| format!("'{v}' is not a number"))
    };
    let (lo, hi) = (parse(lo)?, parse(hi)?);
    if lo >= hi {
        return Err(format!("break start {lo} must be below its end {hi}"));
    }
    Ok((lo, hi))
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "bridge_rlds=info",
        1 => "bridge_rlds=debug",
        _ => "bridge_rlds=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Ingest {
            source,
            layout,
            out,
            name,
            dataset_version,
            split,
            shard_size,
            image_size,
            embed,
            limit,
        } => {
            let app = resolve_config(config_path)?;
            let mut config = IngestConfig::from_app(&app, source)?;
            if let Some(layout) = layout {
                config.layout = layout.parse()?;
            }
            if let Some(out) = out {
                config.output_root = out;
            }
            if let Some(name) = name {
                config.name = name;
            }
            if let Some(version) = dataset_version {
                config.version = version;
            }
            if let Some(split) = split {
                config.split = split;
            }
            if let Some(shard_size) = shard_size {
                config.max_episodes_per_shard = shard_size;
            }
            if image_size.is_some() {
                config.image_size = image_size;
            }
            config.limit = limit;
            cmd_ingest(&app, &config, embed || app.embedding.enabled)
        }
        Command::Verify { dataset, json } => cmd_verify(&dataset, json),
        Command::Plot {
            first,
            second,
            out,
            title,
            labels,
            top,
            top_per_source,
            exclude,
            y_max,
            y_ticks,
            log,
            y_break,
            table,
            x_desc,
            y_desc,
        } => {
            let labels = match labels {
                Some(pair) => {
                    let (a, b) = pair
                        .split_once(',')
                        .ok_or_else(|| eyre!("--labels expects FIRST,SECOND, got '{pair}'"))?;
                    (a.trim().to_string(), b.trim().to_string())
                }
                None => (file_stem(&first), file_stem(&second)),
            };
            let opts = PlotOptions {
                title,
                labels,
                x_desc,
                y_desc,
                y_max,
                y_ticks,
                log_scale: log,
                y_break,
                ..Default::default()
            };
            let selection = RowSelection {
                top,
                per_source: top_per_source,
                exclude,
            };
            cmd_plot(&first, &second, &out, &opts, &selection, table.as_deref())
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path),
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    Ok(match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    })
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

fn cmd_ingest(app: &AppConfig, config: &IngestConfig, embed: bool) -> Result<()> {
    info!(
        source = %config.source.display(),
        layout = config.layout.as_str(),
        name = %config.name,
        embed,
        "ingesting episodes"
    );

    let embedder = if embed {
        Some(spawn_embedder(&app.embedding)?)
    } else {
        info!("embedding disabled, language embeddings will be zero vectors");
        None
    };

    let reporter = CliProgress::new()?;
    let result = ingest(config, embedder, &reporter)?;
    let manifest = &result.manifest;

    println!();
    println!("  Dataset written successfully!");
    println!("  ID:       {}", manifest.id);
    println!("  Name:     {} {}", manifest.name, manifest.version);
    println!("  Episodes: {} of {}", manifest.episode_count, result.discovered);
    println!("  Steps:    {}", manifest.step_count);
    println!("  Shards:   {}", manifest.shards.len());
    println!("  Skipped:  {}", manifest.skipped.len());
    println!("  Path:     {}", result.dataset_dir.display());
    println!(
        "  Time:     {:.1}s",
        result.elapsed.as_secs_f64()
    );
    println!();

    for skipped in &manifest.skipped {
        println!("  skipped {} ({}): {}", skipped.path.display(), skipped.kind, skipped.detail);
    }

    Ok(())
}

fn cmd_verify(dataset: &Path, json: bool) -> Result<()> {
    info!(dataset = %dataset.display(), "verifying dataset");
    let manifest = validate_dataset(dataset)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&manifest)?);
        return Ok(());
    }

    println!();
    println!("  Dataset is valid.");
    println!("  Name:     {} {} ({})", manifest.name, manifest.version, manifest.split);
    println!("  Episodes: {}", manifest.episode_count);
    println!("  Steps:    {}", manifest.step_count);
    println!("  Shards:   {}", manifest.shards.len());
    println!("  Skipped:  {}", manifest.skipped.len());
    if let Some(embedding) = &manifest.embedding {
        println!("  Embedder: {} ({} dims)", embedding.model, embedding.dimension);
    }
    println!();
    Ok(())
}

fn cmd_plot(
    first: &Path,
    second: &Path,
    out: &Path,
    opts: &PlotOptions,
    selection: &RowSelection,
    table: Option<&Path>,
) -> Result<()> {
    let first_counts = load_counts(first)?;
    let second_counts = load_counts(second)?;

    let rows = selection.apply(&first_counts, &second_counts);
    if rows.is_empty() {
        return Err(eyre!("no labels left to plot after exclusions"));
    }
    info!(rows = rows.len(), out = %out.display(), "rendering distribution chart");

    render_comparison(&rows, opts, out)?;
    if let Some(table) = table {
        write_table(&rows, table)?;
        println!("Table written to: {}", table.display());
    }
    println!("Chart written to: {}", out.display());
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config = resolve_config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter: a spinner between phases, a bar over episodes.
struct CliProgress {
    bar: ProgressBar,
    episode_style: ProgressStyle,
}

impl CliProgress {
    fn new() -> Result<Self> {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")?.tick_strings(&[
                "⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏",
            ]),
        );
        bar.enable_steady_tick(std::time::Duration::from_millis(80));

        let episode_style = ProgressStyle::with_template(
            "{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {wide_msg}",
        )?
        .progress_chars("=> ");

        Ok(Self { bar, episode_style })
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.bar.set_message(name.to_string());
    }

    fn episode_started(&self, path: &Path, current: usize, total: usize) {
        if current == 1 {
            self.bar.set_style(self.episode_style.clone());
            self.bar.set_length(total as u64);
        }
        self.bar.set_position(current.saturating_sub(1) as u64);
        self.bar.set_message(path.display().to_string());
    }

    fn episode_skipped(&self, skipped: &SkippedEpisode) {
        self.bar.println(format!(
            "  skipped {} ({})",
            skipped.path.display(),
            skipped.kind
        ));
    }

    fn done(&self, _result: &IngestResult) {
        self.bar.finish_and_clear();
    }
}
