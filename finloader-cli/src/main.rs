//! finloader CLI: incremental forex downloads and storage status.
//!
//! Commands:
//! - `finloader <PROVIDER> (--major | --group NAME | --base CCY --quote CCY) --tf_length N --tf_unit U`
//!   brings every selected series up to date
//! - `finloader status` lists stored series with their ranges and sizes

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::{ArgAction, ArgGroup, Args, CommandFactory, Parser, Subcommand};
use finloader_core::config::Settings;
use finloader_core::data::groups::MAJOR;
use finloader_core::data::{build_provider, Downloader, Groups, LogProgress, ParquetStore, ProviderKind};
use finloader_core::domain::{ForexSymbol, Timeframe, TimeframeUnit};
use std::ffi::OsString;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "finloader",
    version,
    about = "Incremental forex market-data downloader with Parquet storage",
    args_conflicts_with_subcommands = true,
    subcommand_negates_reqs = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    download: DownloadArgs,

    #[command(flatten)]
    global: GlobalArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List stored series: date range, bar count and size on disk.
    Status,
}

#[derive(Args, Debug)]
#[command(group(
    ArgGroup::new("selection")
        .required(true)
        .args(["major", "group", "base"])
))]
struct DownloadArgs {
    /// Data provider: alpha_vantage, massive or twelve_data.
    #[arg(required = true)]
    provider: Option<ProviderKind>,

    /// Download the major pairs.
    #[arg(long)]
    major: bool,

    /// Download a symbol group defined in the config file.
    #[arg(long, value_name = "NAME")]
    group: Option<String>,

    /// Base currency of a single pair (e.g. EUR).
    #[arg(long, value_name = "CCY", requires = "quote")]
    base: Option<String>,

    /// Quote currency of a single pair (e.g. USD).
    #[arg(long, value_name = "CCY", requires = "base")]
    quote: Option<String>,

    /// Timeframe length (e.g. 1, 4, 15).
    #[arg(long = "tf_length", value_name = "INT", required = true)]
    tf_length: Option<u32>,

    /// Timeframe unit: min, hour, day, week or month.
    #[arg(long = "tf_unit", value_name = "UNIT", required = true)]
    tf_unit: Option<TimeframeUnit>,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// Settings file. Defaults to ./finloader.toml when present.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Storage directory. Overrides `data_dir` from the settings file.
    #[arg(long, global = true, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Also append log records to this file.
    #[arg(long, global = true, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// More logging (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
}

/// Parse arguments and reject unsupported timeframes as usage errors (exit code 2).
fn parse_cli<I, T>(args: I) -> Result<Cli, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::try_parse_from(args)?;
    if let (Some(length), Some(unit)) = (cli.download.tf_length, cli.download.tf_unit) {
        if let Err(e) = Timeframe::new(length, unit) {
            return Err(Cli::command().error(ErrorKind::ValueValidation, e));
        }
    }
    Ok(cli)
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = parse_cli(std::env::args_os()).unwrap_or_else(|e| e.exit());
    init_logging(cli.global.verbose, cli.global.log_file.as_deref())?;

    let mut settings = Settings::discover(cli.global.config.as_deref())?;
    if let Some(dir) = cli.global.data_dir.clone() {
        settings.data_dir = dir;
    }

    match cli.command {
        Some(Command::Status) => run_status(&settings.data_dir),
        None => run_download(&cli.download, &settings),
    }
}

fn init_logging(verbose: u8, log_file: Option<&Path>) -> Result<()> {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_writer(Arc::new(file))
                    .with_ansi(false),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()?;
    Ok(())
}

fn resolve_symbols(args: &DownloadArgs, groups: &Groups) -> Result<Vec<ForexSymbol>> {
    if let (Some(base), Some(quote)) = (&args.base, &args.quote) {
        return Ok(vec![ForexSymbol::new(base, quote)?]);
    }
    let name = args.group.as_deref().unwrap_or(MAJOR);
    Ok(groups.resolve(name)?)
}

fn run_download(args: &DownloadArgs, settings: &Settings) -> Result<()> {
    let kind = args.provider.context("missing provider")?;
    let length = args.tf_length.context("missing --tf_length")?;
    let unit = args.tf_unit.context("missing --tf_unit")?;
    let timeframe = Timeframe::new(length, unit)?;

    let groups = Groups::from_settings(settings)?;
    let symbols = resolve_symbols(args, &groups)?;

    let provider = build_provider(kind, settings)?;
    let store = ParquetStore::new(&settings.data_dir);
    let downloader = Downloader::new(provider.as_ref(), &store);

    let summary = downloader.download_many(&symbols, &timeframe, &LogProgress);

    if !summary.all_succeeded() {
        for (sym, err) in &summary.errors {
            eprintln!("Error for {sym} ({timeframe}): {err}");
        }
        std::process::exit(1);
    }

    Ok(())
}

fn run_status(data_dir: &Path) -> Result<()> {
    if !data_dir.exists() {
        println!("Data directory does not exist: {}", data_dir.display());
        return Ok(());
    }

    let store = ParquetStore::new(data_dir);
    let rows = store.status()?;
    if rows.is_empty() {
        println!("No stored series in {}", data_dir.display());
        return Ok(());
    }

    let total_size: u64 = rows.iter().map(|r| r.size_bytes).sum();
    println!("Data: {}", data_dir.display());
    println!("Series: {}", rows.len());
    println!("Total size: {}", format_size(total_size));
    println!();
    println!(
        "{:<14} {:<8} {:<7} {:<25} {:<12} {:>10}",
        "Provider", "Symbol", "TF", "Date Range", "Bars", "Size"
    );
    println!("{}", "-".repeat(81));
    for row in &rows {
        let meta = &row.meta;
        let range = format!(
            "{} to {}",
            meta.first_time.format("%Y-%m-%d"),
            meta.last_time.format("%Y-%m-%d")
        );
        println!(
            "{:<14} {:<8} {:<7} {:<25} {:<12} {:>10}",
            meta.provider.as_str(),
            meta.symbol,
            meta.timeframe,
            range,
            format!("{} bars", meta.bar_count),
            format_size(row.size_bytes)
        );
    }

    Ok(())
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        parse_cli(std::iter::once("finloader").chain(args.iter().copied()))
    }

    #[test]
    fn parses_major_download() {
        let cli = parse(&["massive", "--major", "--tf_length", "1", "--tf_unit", "day"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.download.provider, Some(ProviderKind::Massive));
        assert!(cli.download.major);
        assert_eq!(cli.download.tf_length, Some(1));
        assert_eq!(cli.download.tf_unit, Some(TimeframeUnit::Day));
    }

    #[test]
    fn parses_single_pair() {
        let cli = parse(&[
            "twelve_data", "--base", "EUR", "--quote", "USD", "--tf_length", "15", "--tf_unit", "min",
        ])
        .unwrap();
        assert_eq!(cli.download.base.as_deref(), Some("EUR"));
        assert_eq!(cli.download.quote.as_deref(), Some("USD"));
    }

    #[test]
    fn rejects_unknown_provider() {
        let err = parse(&["yahoo", "--major", "--tf_length", "1", "--tf_unit", "day"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
        assert!(err.to_string().contains("Unsupported provider: yahoo"));
    }

    #[test]
    fn major_conflicts_with_pair() {
        let err = parse(&[
            "massive", "--major", "--base", "EUR", "--quote", "USD", "--tf_length", "1", "--tf_unit",
            "day",
        ])
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArgumentConflict);
    }

    #[test]
    fn base_requires_quote() {
        let err = parse(&["massive", "--base", "EUR", "--tf_length", "1", "--tf_unit", "day"])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn selection_and_timeframe_are_required() {
        let err = parse(&["massive", "--tf_length", "1", "--tf_unit", "day"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);

        let err = parse(&["massive", "--major"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn unsupported_timeframe_is_a_usage_error() {
        let err = parse(&["massive", "--major", "--tf_length", "2", "--tf_unit", "day"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("2day"), "{err}");
    }

    #[test]
    fn status_needs_no_download_args() {
        let cli = parse(&["status", "--data-dir", "store"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Status)));
        assert_eq!(cli.global.data_dir, Some(PathBuf::from("store")));
    }

    #[test]
    fn verbosity_counts() {
        let cli = parse(&["-vv", "massive", "--major", "--tf_length", "1", "--tf_unit", "week"]).unwrap();
        assert_eq!(cli.global.verbose, 2);
    }

    #[test]
    fn sizes_are_human_readable() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
    }
}
