use anyhow::{anyhow, bail, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};
use distcheck_common::{
    load_config, load_config_from, save_config, AppConfig, CheckReport, DistCheckError,
    LoadedConfig, OutputFormat, S3Settings, TreePath, Vfs,
};
use distcheck_core::{
    BatchRunner, BatchSummary, CheckExecutor, ChecksumEngine, LocalVfs, ReportSink, ReportWriter,
    TreeLister, WorkingDirs,
};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "distcheck")]
#[command(author = "DistCheck Contributors")]
#[command(version)]
#[command(about = "Verify that a copied file tree matches its source", long_about = None)]
struct Cli {
    /// Configuration file (defaults to the per-user distcheck.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check every path of a file listing against the target tree
    Check(CheckArgs),

    /// Write the recursive listing of a tree, one path per line
    List(ListArgs),

    /// Show the effective configuration
    Config {
        /// Write a default configuration file if none exists yet
        #[arg(long)]
        init: bool,
    },
}

#[derive(Args, Debug, Default)]
struct CheckArgs {
    /// Root of the source tree (e.g. hdfs://namenode:8020/data or /data)
    source_dir: String,

    /// File listing, one source path per line (`-` for stdin)
    file_list: String,

    /// Root of the target tree (e.g. cosn://bucket-1250000000/data)
    target_dir: String,

    /// Report output (`-` or absent for stdout)
    output: Option<String>,

    /// Worker threads (default: all cores)
    #[arg(short = 'j', long)]
    threads: Option<usize>,

    /// Read buffer used while computing checksums, in bytes
    #[arg(long)]
    buffer_size: Option<usize>,

    /// Report format
    #[arg(long, value_enum)]
    format: Option<FormatArg>,

    /// Map source paths outside SOURCE_DIR by appending them to TARGET_DIR
    #[arg(long)]
    lenient_root: bool,

    /// S3 region
    #[arg(long)]
    s3_region: Option<String>,

    /// S3-compatible endpoint URL (COS, MinIO, ...)
    #[arg(long)]
    s3_endpoint: Option<String>,

    /// Address buckets by path instead of by virtual host
    #[arg(long)]
    s3_path_style: bool,

    /// Send unsigned requests
    #[arg(long)]
    s3_anonymous: bool,

    /// Response header carrying the object's CRC-64
    #[arg(long, conflicts_with = "no_crc64")]
    crc64_header: Option<String>,

    /// Ignore store CRC-64 values and rely on ETags only
    #[arg(long)]
    no_crc64: bool,

    /// Show a progress spinner on stderr
    #[arg(long)]
    progress: bool,

    /// Print per-result totals on stderr when the batch finishes
    #[arg(long)]
    summary: bool,
}

#[derive(Args, Debug, Default)]
struct ListArgs {
    /// Root of the tree to list
    source_dir: String,

    /// Listing output (`-` or absent for stdout)
    output: Option<String>,

    /// Leave directories out of the listing
    #[arg(long)]
    files_only: bool,

    /// Ignore patterns (can be specified multiple times)
    #[arg(short, long)]
    ignore: Vec<String>,

    /// Follow symbolic links
    #[arg(short = 'L', long)]
    follow_symlinks: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FormatArg {
    Text,
    Json,
}

impl From<FormatArg> for OutputFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Text => OutputFormat::Text,
            FormatArg::Json => OutputFormat::Json,
        }
    }
}

fn main() {
    // Initialize tracing to stderr (so the report stream can go cleanly to stdout)
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            std::process::exit(if e.use_stderr() { 1 } else { 0 });
        }
    };

    if let Err(e) = run(cli) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let loaded = match &cli.config {
        Some(path) => load_config_from(path, false)?,
        None => load_config(false)?,
    };

    match cli.command {
        Commands::Check(args) => run_check(loaded.config, args),
        Commands::List(args) => run_list(loaded.config, args),
        Commands::Config { init } => run_config(loaded, init),
    }
}

fn apply_check_overrides(config: &mut AppConfig, args: &CheckArgs) {
    if args.threads.is_some() {
        config.threads = args.threads;
    }
    if let Some(buffer_size) = args.buffer_size {
        config.buffer_size = buffer_size;
    }
    if let Some(format) = args.format {
        config.output_format = format.into();
    }
    if args.lenient_root {
        config.strict_root = false;
    }
    if let Some(region) = &args.s3_region {
        config.s3.region = region.clone();
    }
    if let Some(endpoint) = &args.s3_endpoint {
        config.s3.endpoint = Some(endpoint.clone());
    }
    if args.s3_path_style {
        config.s3.path_style = true;
    }
    if args.s3_anonymous {
        config.s3.anonymous = true;
    }
    if let Some(header) = &args.crc64_header {
        config.s3.crc64_header = Some(header.to_ascii_lowercase());
    }
    if args.no_crc64 {
        config.s3.crc64_header = None;
    }
}

fn run_check(mut config: AppConfig, args: CheckArgs) -> anyhow::Result<()> {
    apply_check_overrides(&mut config, &args);

    let dirs = WorkingDirs::parse(&args.source_dir, &args.target_dir)?;
    let source_fs = open_tree(&dirs.source, &config.s3)?;
    let target_fs = open_tree(&dirs.target, &config.s3)?;
    dirs.validate(source_fs.as_ref(), target_fs.as_ref())?;

    info!("Source work dir: {}", dirs.source);
    info!("Target work dir: {}", dirs.target);

    let input = open_input(&args.file_list)?;
    let writer = ReportWriter::new(open_output(args.output.as_deref())?, config.output_format);

    let executor = CheckExecutor::new(
        &dirs,
        source_fs.as_ref(),
        target_fs.as_ref(),
        ChecksumEngine::new(config.buffer_size),
    )
    .with_strict_root(config.strict_root);

    let mut sink = ProgressSink::new(writer, args.progress);
    let summary = BatchRunner::new()
        .with_threads(config.threads)
        .run(&executor, input.split(b'\n'), &mut sink)?;
    sink.bar.finish_and_clear();

    if args.summary {
        print_summary(&summary, config.output_format)?;
    }
    Ok(())
}

fn print_summary(summary: &BatchSummary, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Text => eprint!("{}", summary),
        OutputFormat::Json => eprintln!("{}", serde_json::to_string(summary)?),
    }
    Ok(())
}

fn run_list(mut config: AppConfig, args: ListArgs) -> anyhow::Result<()> {
    config.ignore_patterns.extend(args.ignore);
    if args.follow_symlinks {
        config.follow_symlinks = true;
    }

    let root = TreePath::parse(&args.source_dir)?;
    if !root.is_absolute() {
        bail!("the tree root [{}] must be an absolute path", root);
    }
    let vfs = open_tree(&root, &config.s3)?;
    let local_dir = local_dir(&root);

    let listed = TreeLister::new(&config)
        .with_files_only(args.files_only)
        .list(vfs.as_ref(), &root, local_dir.as_deref())
        .with_context(|| format!("Failed to list {}", root))?;

    let mut out = open_output(args.output.as_deref())?;
    for path in &listed {
        writeln!(out, "{}", path).context("Failed to write the listing")?;
    }
    out.flush().context("Failed to write the listing")?;
    Ok(())
}

fn run_config(loaded: LoadedConfig, init: bool) -> anyhow::Result<()> {
    if init && !loaded.exists {
        save_config(&loaded.path, &loaded.config)?;
        info!("Wrote default configuration to {}", loaded.path.display());
    }

    println!("# {}", loaded.path.display());
    print!(
        "{}",
        toml::to_string_pretty(&loaded.config).map_err(|e| DistCheckError::Serialization(e.to_string()))?
    );
    Ok(())
}

/// Bare paths and `file:` URIs are local; object-store schemes need the cloud feature
fn is_local(root: &TreePath) -> bool {
    matches!(root.scheme(), None | Some("file")) && root.authority().is_none()
}

fn local_dir(root: &TreePath) -> Option<PathBuf> {
    is_local(root).then(|| PathBuf::from(root.hierarchical()))
}

fn open_tree(root: &TreePath, settings: &S3Settings) -> anyhow::Result<Box<dyn Vfs>> {
    if is_local(root) {
        return Ok(Box::new(LocalVfs::system()));
    }

    match root.scheme() {
        Some("s3" | "s3a" | "s3n" | "cos" | "cosn") => open_bucket(root, settings),
        Some(scheme) => bail!("unsupported file system scheme [{}] in {}", scheme, root),
        None => bail!("can not determine the file system of {}", root),
    }
}

#[cfg(feature = "cloud")]
fn open_bucket(root: &TreePath, settings: &S3Settings) -> anyhow::Result<Box<dyn Vfs>> {
    use distcheck_core::vfs::{S3Config, S3Vfs};

    let bucket = root
        .authority()
        .ok_or_else(|| anyhow!("no bucket name in {}", root))?;
    let vfs = S3Vfs::new(S3Config::from_settings(bucket, settings))
        .with_context(|| format!("Failed to connect to bucket {}", bucket))?;
    Ok(Box::new(vfs))
}

#[cfg(not(feature = "cloud"))]
fn open_bucket(root: &TreePath, _settings: &S3Settings) -> anyhow::Result<Box<dyn Vfs>> {
    Err(anyhow!(
        "object store support is not compiled in (enable the `cloud` feature) for {}",
        root
    ))
}

fn open_input(file_list: &str) -> anyhow::Result<Box<dyn BufRead + Send>> {
    if file_list == "-" {
        return Ok(Box::new(BufReader::new(io::stdin())));
    }
    let file = File::open(file_list).with_context(|| format!("Failed to open the file list {}", file_list))?;
    Ok(Box::new(BufReader::new(file)))
}

fn open_output(output: Option<&str>) -> anyhow::Result<Box<dyn Write + Send>> {
    match output {
        None | Some("-") => Ok(Box::new(BufWriter::new(io::stdout()))),
        Some(path) => {
            let path = Path::new(path);
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
            Ok(Box::new(BufWriter::new(file)))
        }
    }
}

/// Ticks a spinner for every report passed through to the inner sink
struct ProgressSink<S> {
    inner: S,
    bar: ProgressBar,
}

impl<S: ReportSink> ProgressSink<S> {
    fn new(inner: S, visible: bool) -> Self {
        let bar = if visible {
            let bar = ProgressBar::new_spinner();
            bar.set_draw_target(ProgressDrawTarget::stderr());
            bar.set_style(
                ProgressStyle::with_template("{spinner} {pos} paths checked ({per_sec}) {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            bar.enable_steady_tick(Duration::from_millis(120));
            bar
        } else {
            ProgressBar::hidden()
        };
        Self { inner, bar }
    }
}

impl<S: ReportSink> ReportSink for ProgressSink<S> {
    fn write_report(&mut self, report: &CheckReport) -> Result<(), DistCheckError> {
        self.inner.write_report(report)?;
        self.bar.inc(1);
        Ok(())
    }

    fn finish(&mut self) -> Result<(), DistCheckError> {
        self.inner.finish()
    }
}
