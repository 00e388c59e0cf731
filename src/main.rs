use anyhow::{bail, Context, Result};
use clap::Parser;
use rayon::prelude::*;
use std::path::PathBuf;
use tracing::{error, info};

use market_structure::cache::FileTimelineStore;
use market_structure::source::CsvBarSource;
use market_structure::{AnalysisReport, AnalysisService, ParamOverrides, Subject};

/// One `SYMBOL@TF=path` argument
#[derive(Debug, Clone)]
struct InputArg {
    subject: Subject,
    path: PathBuf,
}

fn parse_input(raw: &str) -> Result<InputArg, String> {
    let (subject, path) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected SYMBOL@TF=path, got '{}'", raw))?;
    Ok(InputArg {
        subject: subject.parse()?,
        path: PathBuf::from(path),
    })
}

#[derive(Parser, Debug)]
#[command(name = "market-structure")]
#[command(about = "Market structure and participant-behavior analysis from OHLCV bars")]
struct Args {
    /// Subject and bar file as SYMBOL@TF=path.csv (repeatable)
    #[arg(short, long = "input", required = true, value_parser = parse_input)]
    inputs: Vec<InputArg>,

    /// Directory holding per-subject timeline state
    #[arg(long, env = "MARKET_STRUCTURE_STATE_DIR", default_value = ".market-structure")]
    state_dir: PathBuf,

    /// JSON file with parameter overrides
    #[arg(long)]
    params: Option<PathBuf>,

    /// Pretty-print reports
    #[arg(long)]
    pretty: bool,

    /// Debug logging for the engine
    #[arg(short, long)]
    verbose: bool,
}

fn load_overrides(path: Option<&PathBuf>) -> Result<ParamOverrides> {
    let Some(path) = path else {
        return Ok(ParamOverrides::default());
    };
    let raw = std::fs::read_to_string(path).with_context(|| format!("Failed to read params file: {:?}", path))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid params file: {:?}", path))
}

fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("market_structure={}", level).parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let overrides = load_overrides(args.params.as_ref())?;
    let store = FileTimelineStore::open(&args.state_dir)
        .with_context(|| format!("Failed to open state dir: {:?}", args.state_dir))?;
    let service = AnalysisService::new(store);

    let source = args
        .inputs
        .iter()
        .fold(CsvBarSource::new(), |source, input| source.with_file(input.subject.clone(), &input.path));

    info!("Analysing {} subject(s)", args.inputs.len());

    let results: Vec<(Subject, Result<AnalysisReport, _>)> = args
        .inputs
        .par_iter()
        .map(|input| {
            let params = overrides.clone().resolve(input.subject.timeframe);
            let result = service.analyze_from_source(&source, &input.subject, &params);
            (input.subject.clone(), result)
        })
        .collect();

    let mut failures = 0;
    for (subject, result) in results {
        match result {
            Ok(report) => {
                let json = if args.pretty {
                    report.to_json_pretty()?
                } else {
                    report.to_json()?
                };
                println!("{}", json);
            }
            Err(e) => {
                error!("{}: {}", subject, e);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        bail!("{} of {} analyses failed", failures, args.inputs.len());
    }
    Ok(())
}
