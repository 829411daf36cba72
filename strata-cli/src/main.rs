//! CLI for the strata time-series store.
//!
//! Records readings, queries resampled ranges, prunes and copies stores, and
//! emits chart frames as JSON for an external renderer.

use std::error::Error;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::{Parser, Subcommand, ValueEnum};
use strata::store::StoreSummary;
use strata::{Config, Ingest, Store, ValueKind};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

type CliResult<T> = Result<T, Box<dyn Error>>;

/// strata: embedded multi-resolution time-series store.
#[derive(Parser)]
#[command(name = "strata", version, about)]
struct Cli {
    /// Configuration file (JSON).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Store file, overriding the configuration.
    #[arg(short, long, global = true)]
    data: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Show units, levels and record counts.
    Info {
        /// Print the summary as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Record one reading.
    Put {
        /// Unit id or configured name.
        unit: String,

        /// Reading.
        value: f64,

        /// Treat the reading as a counter and store its rate.
        #[arg(long)]
        counter: bool,

        /// Counter epoch marker; a change resets rate computation.
        #[arg(long, default_value_t = 0)]
        since: u32,

        /// Timestamp in seconds since the epoch (default: now).
        #[arg(long)]
        ts: Option<u32>,
    },

    /// Resample a unit over a time range.
    Query {
        /// Unit id or configured name.
        unit: String,

        /// Range ending now (e.g., "1h", "30m", "7d").
        #[arg(long, default_value = "1h", conflicts_with_all = ["beg", "end"])]
        range: String,

        /// Range start in seconds since the epoch.
        #[arg(long, requires = "end")]
        beg: Option<u32>,

        /// Range end in seconds since the epoch.
        #[arg(long, requires = "beg")]
        end: Option<u32>,

        /// Sample field to read.
        #[arg(long, default_value = "avg")]
        kind: ValueKind,

        /// Number of output buckets.
        #[arg(long, default_value_t = 60)]
        buckets: usize,

        /// Output format.
        #[arg(long, default_value = "csv")]
        format: OutputFormat,
    },

    /// Delete records past their retention.
    Truncate {
        /// Retention as DETAIL[:COMPRESSED] days (default: from configuration).
        #[arg(long, value_parser = parse_days)]
        days: Option<Days>,
    },

    /// Copy every well-formed record into a new store file.
    Copy {
        /// Destination store file.
        dest: PathBuf,
    },

    /// Emit chart frames as JSON.
    Chart {
        /// Chart name (default: all configured charts).
        name: Option<String>,

        /// End of the charted span (default: now).
        #[arg(long)]
        end: Option<u32>,
    },
}

/// Output format for query results.
#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Comma-separated values.
    Csv,
    /// JSON object with bucket array.
    Json,
}

/// Retention days from `--days`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Days {
    detail: u32,
    compressed: Option<u32>,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Installs the log subscriber. `RUST_LOG` overrides `-v`.
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> CliResult<()> {
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let data_path = cli.data.clone().unwrap_or_else(|| config.data_path().to_path_buf());
    debug!(data = %data_path.display(), "using store");

    match cli.command {
        Commands::Info { json } => cmd_info(&data_path, json),
        Commands::Put {
            unit,
            value,
            counter,
            since,
            ts,
        } => cmd_put(&config, &data_path, &unit, value, counter, since, ts),
        Commands::Query {
            unit,
            range,
            beg,
            end,
            kind,
            buckets,
            format,
        } => {
            let (beg, end) = match (beg, end) {
                (Some(beg), Some(end)) => (beg, end),
                _ => {
                    let end = now()?;
                    let span = u32::try_from(parse_duration(&range)?)
                        .map_err(|_| format!("Range '{range}' is too long"))?;
                    (end.saturating_sub(span), end)
                }
            };
            cmd_query(&config, &data_path, &unit, beg, end, kind, buckets, &format)
        }
        Commands::Truncate { days } => cmd_truncate(&config, &data_path, days),
        Commands::Copy { dest } => cmd_copy(&data_path, &dest),
        Commands::Chart { name, end } => cmd_chart(&config, &data_path, name.as_deref(), end),
    }
}

/// Implements `strata info`.
fn cmd_info(data_path: &Path, json: bool) -> CliResult<()> {
    let store = Store::open(data_path)?;
    let summary = store.summary()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(data_path, &summary);
    }
    Ok(())
}

fn print_summary(data_path: &Path, summary: &StoreSummary) {
    let size = std::fs::metadata(data_path).map_or(0, |m| m.len());
    println!("Store: {}", data_path.display());
    println!("Disk usage: {} ({size} bytes)", format_bytes(size));
    println!("Records: {}", summary.records);
    if summary.malformed > 0 {
        println!("Malformed records: {}", summary.malformed);
    }
    println!();

    println!("Units: {}", summary.units.len());
    for unit in &summary.units {
        println!("  Unit {}", unit.unit);
        for level in &unit.levels {
            println!(
                "    Level {}: {} records, ts {}..={}",
                level.level, level.records, level.first_ts, level.last_ts
            );
        }
        if let Some(last) = &unit.last {
            println!(
                "    Last value: {} at ts {} (since {})",
                last.val, last.ts, last.since
            );
        }
    }
}

/// Implements `strata put <unit> <value>`.
fn cmd_put(
    config: &Config,
    data_path: &Path,
    unit: &str,
    value: f64,
    counter: bool,
    since: u32,
    ts: Option<u32>,
) -> CliResult<()> {
    let unit = config
        .resolve_unit(unit)
        .ok_or_else(|| format!("Unit '{unit}' not found"))?;
    let ts = match ts {
        Some(ts) => ts,
        None => now()?,
    };

    let mut store = Store::open(data_path)?;
    let outcome = store.put_value(since, ts, unit.id, value, counter || unit.counter)?;
    store.close()?;

    match outcome {
        Ingest::Stored {
            value,
            levels_written,
        } => info!(unit = unit.id, ts, value, levels_written, "stored"),
        Ingest::Skipped(reason) => info!(unit = unit.id, ts, ?reason, "counter reading not stored"),
    }
    Ok(())
}

/// Implements `strata query <unit>`.
#[allow(clippy::too_many_arguments)]
fn cmd_query(
    config: &Config,
    data_path: &Path,
    unit: &str,
    beg: u32,
    end: u32,
    kind: ValueKind,
    buckets: usize,
    format: &OutputFormat,
) -> CliResult<()> {
    let unit = config
        .resolve_unit(unit)
        .ok_or_else(|| format!("Unit '{unit}' not found"))?;
    let store = Store::open(data_path)?;
    let (values, meta) = store.get_values(unit.id, beg, end, kind, buckets)?;

    match format {
        OutputFormat::Csv => {
            println!(
                "# unit={}, level={}, records={}, buckets={}",
                unit.id,
                meta.level_used,
                meta.records,
                values.len()
            );
            println!("bucket_start,value");
            for (i, value) in values.iter().enumerate() {
                println!("{},{value}", bucket_start(beg, end, values.len(), i));
            }
        }
        OutputFormat::Json => {
            let output = serde_json::json!({
                "unit": unit.id,
                "name": unit.name,
                "kind": kind,
                "beg": beg,
                "end": end,
                "level": meta.level_used,
                "records": meta.records,
                "values": values,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

/// Implements `strata truncate`.
fn cmd_truncate(config: &Config, data_path: &Path, days: Option<Days>) -> CliResult<()> {
    let detail = days.map_or(config.retention.days_detail, |d| d.detail);
    let compressed = days
        .and_then(|d| d.compressed)
        .unwrap_or(config.retention.days_compressed);

    let mut store = Store::open(data_path)?;
    let stats = store.truncate(detail, compressed)?;
    store.close()?;

    println!(
        "Truncated {}: {} of {} records deleted ({} malformed)",
        data_path.display(),
        stats.deleted,
        stats.seen,
        stats.malformed
    );
    Ok(())
}

/// Implements `strata copy <dest>`.
fn cmd_copy(data_path: &Path, dest: &Path) -> CliResult<()> {
    let store = Store::open(data_path)?;
    let stats = store.copy_to(dest)?;
    store.close()?;

    println!(
        "Copied {} records to {} ({} skipped)",
        stats.copied,
        dest.display(),
        stats.skipped
    );
    Ok(())
}

/// Implements `strata chart [name]`.
fn cmd_chart(config: &Config, data_path: &Path, name: Option<&str>, end: Option<u32>) -> CliResult<()> {
    let charts: Vec<_> = match name {
        Some(name) => vec![config.chart(name).ok_or_else(|| format!("Chart '{name}' not found"))?],
        None => config.charts.iter().collect(),
    };
    if charts.is_empty() {
        return Err("No charts configured".into());
    }
    let end = match end {
        Some(end) => end,
        None => now()?,
    };

    let store = Store::open(data_path)?;
    let frames = charts
        .into_iter()
        .map(|chart| strata::chart::build_frame(store.backend(), chart, end))
        .collect::<strata::Result<Vec<_>>>()?;

    println!("{}", serde_json::to_string_pretty(&frames)?);
    Ok(())
}

/// Current time in seconds since the epoch.
fn now() -> CliResult<u32> {
    let secs = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
    Ok(u32::try_from(secs)?)
}

/// Start of bucket `i` of `n` evenly covering `[beg, end)`.
fn bucket_start(beg: u32, end: u32, n: usize, i: usize) -> u64 {
    let span = u128::from(end.saturating_sub(beg));
    let offset = span * i as u128 / n.max(1) as u128;
    u64::from(beg) + u64::try_from(offset).unwrap_or(u64::MAX)
}

/// Parses `--days DETAIL[:COMPRESSED]`.
fn parse_days(s: &str) -> Result<Days, String> {
    let positive = |part: &str| match part.trim().parse::<u32>() {
        Ok(days) if days > 0 => Ok(days),
        _ => Err(format!("invalid day count '{part}': expected a positive integer")),
    };
    match s.split_once(':') {
        Some((detail, compressed)) => Ok(Days {
            detail: positive(detail)?,
            compressed: Some(positive(compressed)?),
        }),
        None => Ok(Days {
            detail: positive(s)?,
            compressed: None,
        }),
    }
}

/// Parses a human-readable duration string (e.g., "1h", "30m", "7d") to seconds.
fn parse_duration(s: &str) -> CliResult<u64> {
    let s = s.trim();
    let Some((split, unit)) = s.char_indices().last() else {
        return Err("Empty duration string".into());
    };
    let num: u64 = s[..split].parse()?;

    let scale: u64 = match unit {
        's' => 1,
        'm' => 60,
        'h' => 3600,
        'd' => 86400,
        'w' => 7 * 86400,
        _ => return Err(format!("Unknown duration unit: '{unit}'. Use s, m, h, d, or w.").into()),
    };
    let secs = num
        .checked_mul(scale)
        .ok_or_else(|| format!("Duration '{s}' is too large"))?;

    Ok(secs)
}

/// Formats a byte count as a human-readable string.
#[allow(clippy::cast_precision_loss)] // Byte counts are display-only
fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_048_576 {
        format!("{:.1} MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("strata").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_parse_days() {
        assert_eq!(parse_days("7"), Ok(Days { detail: 7, compressed: None }));
        assert_eq!(parse_days("1:365"), Ok(Days { detail: 1, compressed: Some(365) }));
        assert!(parse_days("0").is_err());
        assert!(parse_days("3:").is_err());
        assert!(parse_days("x:4").is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("90s").unwrap(), 90);
        assert_eq!(parse_duration("1h").unwrap(), 3600);
        assert_eq!(parse_duration("2w").unwrap(), 14 * 86400);
        assert!(parse_duration("").is_err());
        assert!(parse_duration("5y").is_err());
    }

    #[test]
    fn test_parse_duration_rejects_odd_input_without_panicking() {
        assert!(parse_duration("5é").is_err());
        assert!(parse_duration("é").is_err());
        assert!(parse_duration("h").is_err());
        assert!(parse_duration(&format!("{}w", u64::MAX / 2)).is_err());
    }

    #[test]
    fn test_bucket_start() {
        assert_eq!(bucket_start(100, 1100, 10, 0), 100);
        assert_eq!(bucket_start(100, 1100, 10, 9), 1000);
        assert_eq!(bucket_start(0, 10, 3, 1), 3);
    }

    #[test]
    fn test_range_flags_conflict() {
        assert!(Cli::try_parse_from(["strata", "query", "1", "--range", "1h", "--beg", "1", "--end", "2"]).is_err());
        assert!(Cli::try_parse_from(["strata", "query", "1", "--beg", "1"]).is_err());
        assert!(Cli::try_parse_from(["strata", "truncate", "--days", "0"]).is_err());
    }

    #[test]
    fn test_put_query_truncate_copy() {
        let temp_dir = tempdir().unwrap();
        let data = temp_dir.path().join("data.redb");
        let data = data.to_str().unwrap();

        for i in 0..20u32 {
            let ts = (1_000 + i * 60).to_string();
            let value = i.to_string();
            run(cli(&["--data", data, "put", "3", &value, "--ts", &ts])).unwrap();
        }
        run(cli(&["--data", data, "query", "3", "--beg", "1000", "--end", "2200", "--buckets", "4"])).unwrap();
        run(cli(&["--data", data, "info"])).unwrap();

        let copy = temp_dir.path().join("copy.redb");
        run(cli(&["--data", data, "copy", copy.to_str().unwrap()])).unwrap();
        assert_eq!(
            Store::open(&copy).unwrap().summary().unwrap(),
            Store::open(data).unwrap().summary().unwrap()
        );

        // Everything is decades old relative to the wall clock.
        run(cli(&["--data", data, "truncate", "--days", "1:1"])).unwrap();
        assert_eq!(Store::open(data).unwrap().summary().unwrap().records, 0);
    }

    #[test]
    fn test_named_counter_unit_from_config() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("strata.json");
        let data = temp_dir.path().join("data.redb");
        std::fs::write(
            &config_path,
            format!(
                r#"{{ "data_path": {:?}, "units": [ {{ "id": 5, "name": "eth0", "counter": true }} ] }}"#,
                data.to_str().unwrap()
            ),
        )
        .unwrap();
        let config = config_path.to_str().unwrap();

        run(cli(&["-c", config, "put", "eth0", "100", "--ts", "1000"])).unwrap();
        run(cli(&["-c", config, "put", "eth0", "700", "--ts", "1060"])).unwrap();
        assert!(run(cli(&["-c", config, "put", "wlan0", "1"])).is_err());

        let store = Store::open(&data).unwrap();
        let (values, _) = store.get_values(5, 1000, 1100, ValueKind::Avg, 1).unwrap();
        // One rate of 10/s over [1060, 1100) fills 40% of the bucket.
        assert!((values[0] - 4.0).abs() < 1e-9);
    }
}
