//! Scanner - full-market daily pattern scans from the command line.
//!
//! Loads `~/.scanner/config.json`, runs one scan over a date range and
//! writes the signal rows to CSV or the whole report to JSON.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use scanner_common::config::{config_path, Config, ConfigSource};
use scanner_common::logging::init_from_config;
use scanner_common::Validate;
use scanner_pipeline::pattern::builtin;
use scanner_pipeline::report::{self, OutputFormat};
use scanner_pipeline::{PolygonAdapter, ScanPipeline, ScanProfile, ScanRequest, TradingCalendar};

#[derive(Parser, Debug)]
#[command(name = "scanner")]
#[command(version)]
#[command(about = "Full-market daily bar scanner", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a scan over a date range
    Scan {
        /// First signal date (YYYY-MM-DD)
        #[arg(long)]
        start: NaiveDate,

        /// Last signal date, inclusive (YYYY-MM-DD)
        #[arg(long)]
        end: NaiveDate,

        /// Scan profile (JSON): parameters, stage settings, patterns
        #[arg(long)]
        profile: Option<PathBuf>,

        /// Only run these patterns from the profile (repeatable)
        #[arg(long = "pattern")]
        patterns: Vec<String>,

        /// Output file (defaults to the configured report directory)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output format: csv or json
        #[arg(long)]
        format: Option<String>,

        /// Fetch unadjusted bars
        #[arg(long)]
        unadjusted: bool,
    },

    /// List trading sessions in a date range
    Sessions {
        #[arg(long)]
        start: NaiveDate,

        #[arg(long)]
        end: NaiveDate,

        /// Also list weekday closures with their reason
        #[arg(long)]
        closures: bool,
    },

    /// Write a default config file to ~/.scanner/config.json
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the pattern set of a profile as JSON
    Patterns {
        #[arg(long)]
        profile: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Must work even when the existing file does not parse
    if let Commands::Init { force } = cli.command {
        return init_config(force);
    }

    let config = Config::load_and_validate()?;
    init_from_config(&config.observability);

    tracing::debug!("Scanner v{}", env!("CARGO_PKG_VERSION"));
    match ConfigSource::locate() {
        ConfigSource::File(path) => tracing::debug!(path = %path.display(), "Loaded config"),
        ConfigSource::Defaults => tracing::info!("Config file not found, using defaults"),
    }

    match cli.command {
        Commands::Scan {
            start,
            end,
            profile,
            patterns,
            output,
            format,
            unadjusted,
        } => {
            let args = ScanArgs {
                start,
                end,
                profile,
                patterns,
                output,
                format,
                unadjusted,
            };
            run_scan(&config, args).await
        }
        Commands::Sessions {
            start,
            end,
            closures,
        } => {
            let calendar = TradingCalendar::from_config(&config.calendar);
            let sessions = calendar.sessions(start, end)?;
            if !closures {
                for session in sessions {
                    println!("{}", session);
                }
                return Ok(());
            }
            for day in start.iter_days().take_while(|d| *d <= end) {
                if calendar.is_session(day) {
                    println!("{}", day);
                } else if let Some(reason) = calendar.closure_reason(day) {
                    println!("{}  closed: {}", day, reason);
                }
            }
            Ok(())
        }
        // Handled before the config is loaded
        Commands::Init { .. } => Ok(()),
        Commands::Patterns { profile } => {
            let profile = load_profile(profile.as_ref())?;
            println!("{}", serde_json::to_string_pretty(&profile.pattern_set())?);
            Ok(())
        }
    }
}

fn init_config(force: bool) -> Result<()> {
    let path = config_path();
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    Config::default().save()?;
    println!("Wrote {}", path.display());
    Ok(())
}

struct ScanArgs {
    start: NaiveDate,
    end: NaiveDate,
    profile: Option<PathBuf>,
    patterns: Vec<String>,
    output: Option<PathBuf>,
    format: Option<String>,
    unadjusted: bool,
}

fn load_profile(path: Option<&PathBuf>) -> Result<ScanProfile> {
    let profile = match path {
        Some(path) => ScanProfile::load(path)?,
        None => ScanProfile::default(),
    };
    profile
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid scan profile: {}", e))?;
    Ok(profile)
}

async fn run_scan(config: &Config, args: ScanArgs) -> Result<()> {
    let profile = load_profile(args.profile.as_ref())?;

    let mut patterns = profile.pattern_set();
    if !args.patterns.is_empty() {
        patterns = patterns.select(&args.patterns);
        for name in &args.patterns {
            if !patterns.names().contains(&name.as_str()) {
                match builtin::by_name(name, &profile.params) {
                    Some(pattern) => patterns.push(pattern),
                    None => anyhow::bail!("Unknown pattern '{}'", name),
                }
            }
        }
    }

    let format: OutputFormat = match &args.format {
        Some(format) => format.parse()?,
        None => config.output.format.parse()?,
    };

    let provider = PolygonAdapter::from_config(config)
        .context("No Polygon API key configured (set POLYGON_API_KEY or provider.api_key)")?;
    let pipeline = ScanPipeline::from_config(Arc::new(provider), config, &profile);

    let mut request = ScanRequest::new(args.start, args.end, profile.params.clone(), patterns);
    if args.unadjusted || !config.provider.adjusted {
        request = request.unadjusted();
    }

    let report = pipeline.run(&request).await?;

    println!("{}", report.summary());
    for failed in &report.fetch.failed_sessions {
        println!("  missing {}: {}", failed.session, failed.error);
    }

    let path = match args.output {
        Some(path) => path,
        None => config
            .output
            .resolved_report_dir()
            .join(report::file_name(&report, format)),
    };
    let written = report::write_report(&report, &path, format)?;
    println!("Wrote {} rows to {}", report.signals.len(), written.display());

    Ok(())
}
