use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum, ValueHint};
use col_hunter::{
    ColHunterError, HuntEngine, MatchConfig, NormalizeStats, ProgressCallback, RawRide,
    StravaAuth, StravaCredentials, StravaFetcher, DEFAULT_CORRIDOR_TOLERANCE,
};
use log::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Find the mountain passes your rides went over", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Match rides from a JSON file against the pass catalog
    Match(MatchArgs),
    /// Fetch rides from Strava, then match them
    Fetch(FetchArgs),
    /// Print the Strava authorization link
    AuthorizeUrl,
}

#[derive(Parser, Debug)]
struct CatalogArgs {
    /// Pass catalog CSV
    #[arg(short, long, default_value = "cols.csv", value_hint = ValueHint::FilePath)]
    catalog: PathBuf,

    /// Corridor radius around each ride, in degrees
    #[arg(short, long, default_value_t = DEFAULT_CORRIDOR_TOLERANCE)]
    tolerance: f64,

    /// Keep passes flagged as not reachable by bike
    #[arg(long, action = ArgAction::SetTrue)]
    all_passes: bool,

    /// Match on full-resolution polylines when present
    #[arg(long, action = ArgAction::SetTrue)]
    details: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,
}

#[derive(Parser, Debug)]
struct MatchArgs {
    /// Rides JSON (array of Strava summary activities)
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    rides: PathBuf,

    #[command(flatten)]
    common: CatalogArgs,
}

#[derive(Parser, Debug)]
struct FetchArgs {
    /// Access token (defaults to STRAVA_ACCESS_TOKEN)
    #[arg(long, conflicts_with = "code")]
    token: Option<String>,

    /// Authorization code from the redirect, exchanged for a token
    #[arg(long)]
    code: Option<String>,

    /// Fetch at most this many activities
    #[arg(short, long)]
    limit: Option<usize>,

    /// Save the fetched rides as JSON
    #[arg(long, value_hint = ValueHint::FilePath)]
    save: Option<PathBuf>,

    #[command(flatten)]
    common: CatalogArgs,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    match cli.command {
        Command::Match(args) => run_match(args),
        Command::Fetch(args) => run_fetch(args),
        Command::AuthorizeUrl => run_authorize_url(),
    }
}

fn build_engine(args: &CatalogArgs) -> Result<HuntEngine> {
    let config = MatchConfig {
        corridor_tolerance: args.tolerance,
        restrict_to_eligible: !args.all_passes,
        detailed_paths: args.details,
        ..MatchConfig::default()
    };
    let mut engine = HuntEngine::with_config(config).context("invalid matching options")?;
    let count = engine
        .load_catalog(&args.catalog)
        .with_context(|| format!("loading catalog {}", args.catalog.display()))?;
    info!("{} passes loaded from {}", count, args.catalog.display());
    Ok(engine)
}

fn run_match(args: MatchArgs) -> Result<()> {
    let mut engine = build_engine(&args.common)?;

    let file = File::open(&args.rides)
        .with_context(|| format!("opening rides {}", args.rides.display()))?;
    let raw: Vec<RawRide> = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("parsing rides {}", args.rides.display()))?;

    let stats = engine.ingest_rides(&raw);
    report(&mut engine, &stats, args.common.format)
}

fn run_fetch(args: FetchArgs) -> Result<()> {
    let mut engine = build_engine(&args.common)?;

    let runtime = tokio::runtime::Runtime::new().context("starting async runtime")?;
    let progress: ProgressCallback = Arc::new(|fetched: u32, total: u32| {
        if total > 0 {
            eprint!("\rFetched {}/{} activities", fetched, total);
        } else {
            eprint!("\rFetched {} activities", fetched);
        }
    });

    let fetched = runtime.block_on(fetch(&args, progress));
    eprintln!();

    // A failed fetch degrades to an empty session
    let raw = match fetched {
        Ok(raw) => raw,
        Err(ColHunterError::AuthExpired) => {
            bail!("Strava rejected the token; run `col-hunter authorize-url` to sign in again")
        }
        Err(e) => {
            warn!("Fetching rides failed, continuing with none: {}", e);
            Vec::new()
        }
    };

    if let Some(path) = &args.save {
        let file =
            File::create(path).with_context(|| format!("creating {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &raw)
            .with_context(|| format!("writing rides to {}", path.display()))?;
        info!("Saved {} rides to {}", raw.len(), path.display());
    }

    let stats = engine.ingest_rides(&raw);
    report(&mut engine, &stats, args.common.format)
}

async fn fetch(args: &FetchArgs, progress: ProgressCallback) -> col_hunter::Result<Vec<RawRide>> {
    let fetcher = match (&args.code, &args.token) {
        (Some(code), _) => {
            let auth = StravaAuth::new(StravaCredentials::from_env()?);
            let tokens = auth.exchange_code(code).await?;
            StravaFetcher::with_tokens(tokens, Some(auth))?
        }
        (None, Some(token)) => StravaFetcher::new(token)?,
        (None, None) => {
            let token =
                std::env::var("STRAVA_ACCESS_TOKEN").map_err(|_| ColHunterError::ConfigError {
                    message: "pass --token, --code or set STRAVA_ACCESS_TOKEN".to_string(),
                })?;
            StravaFetcher::new(&token)?
        }
    };

    let mut rides = fetcher.fetch_rides(args.limit, Some(progress.clone())).await?;
    if args.common.details {
        fetcher.fetch_details(&mut rides, Some(progress)).await?;
    }
    Ok(rides)
}

fn run_authorize_url() -> Result<()> {
    let credentials = StravaCredentials::from_env().context("reading Strava credentials")?;
    let url = StravaAuth::new(credentials).authorization_url()?;
    println!("{}", url);
    Ok(())
}

fn report(engine: &mut HuntEngine, stats: &NormalizeStats, format: OutputFormat) -> Result<()> {
    if stats.failed > 0 {
        warn!("{} rides could not be decoded and were skipped", stats.failed);
    }

    let summaries = engine.pass_summaries();
    let years = engine.year_counts();
    let overview = engine.overview();
    let bounds = engine.ride_bounds();

    let stdout = io::stdout();
    let mut out = stdout.lock();

    match format {
        OutputFormat::Json => {
            let body = serde_json::json!({
                "overview": overview,
                "passes": summaries,
                "years": years,
                "rides": stats,
                "bounds": bounds,
            });
            serde_json::to_writer_pretty(&mut out, &body)?;
            writeln!(out)?;
        }
        OutputFormat::Table => {
            writeln!(out, "Rides imported:   {}", overview.ride_count)?;
            writeln!(out, "Passes crossed:   {}", overview.passes_crossed)?;
            writeln!(out, "Total passages:   {}", overview.total_passages)?;
            match overview.highest_altitude {
                Some(alt) => writeln!(out, "Highest pass:     {} m", alt)?,
                None => writeln!(out, "Highest pass:     -")?,
            }
            writeln!(out)?;

            if !summaries.is_empty() {
                writeln!(
                    out,
                    "{:<36} {:>6} {:>8} {:>8}  {}",
                    "Pass", "Region", "Alt (m)", "Passages", "First"
                )?;
                for s in &summaries {
                    let altitude = s.altitude.map(|a| a.to_string()).unwrap_or_default();
                    writeln!(
                        out,
                        "{:<36} {:>6} {:>8} {:>8}  {}",
                        s.name, s.region, altitude, s.passages, s.first_date
                    )?;
                }
                writeln!(out)?;
            }

            for y in &years {
                writeln!(out, "{}: {} passages", y.year, y.passages)?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_match() {
        let cli = Cli::try_parse_from([
            "col-hunter",
            "match",
            "--rides",
            "rides.json",
            "--catalog",
            "cols.csv",
            "--tolerance",
            "0.001",
            "--format",
            "json",
        ])
        .unwrap();
        match cli.command {
            Command::Match(args) => {
                assert_eq!(args.rides, PathBuf::from("rides.json"));
                assert_eq!(args.common.tolerance, 0.001);
                assert_eq!(args.common.format, OutputFormat::Json);
                assert!(!args.common.all_passes);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_token_and_code_conflict() {
        let parsed = Cli::try_parse_from([
            "col-hunter",
            "fetch",
            "--token",
            "abc",
            "--code",
            "xyz",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_default_tolerance() {
        let cli = Cli::try_parse_from(["col-hunter", "fetch", "--limit", "10"]).unwrap();
        match cli.command {
            Command::Fetch(args) => {
                assert_eq!(args.common.tolerance, DEFAULT_CORRIDOR_TOLERANCE);
                assert_eq!(args.limit, Some(10));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
