use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::PathBuf,
};

use anyhow::{Context, Result};
use clap::Parser;
use clf_summary::{
    logging::init_logging,
    sink::statsd_sink,
    user_agent::{DEFAULT_MAX_DEPTH, MAX_UA_DEPTH},
    Pipeline, ValidationConfig,
};
use tracing::{debug, info, warn};

const MAX_TOP: i64 = 10_000;

#[derive(Debug, Parser)]
#[command(
    name = "clf-summary",
    version,
    about = "Validate Common Log Format access logs and summarise client and path statistics"
)]
struct Args {
    /// Input log file
    #[arg(short, long = "in", value_name = "FILE")]
    input: PathBuf,

    /// Output JSON file
    #[arg(short, long = "out", value_name = "FILE")]
    output: PathBuf,

    /// Entries in top_client_ips
    #[arg(short = 'c', long, default_value_t = 10, value_parser = clap::value_parser!(u16).range(0..=MAX_TOP))]
    max_client_ips: u16,

    /// Entries in top_path_avg_response_size
    #[arg(short = 'p', long, default_value_t = 10, value_parser = clap::value_parser!(u16).range(0..=MAX_TOP))]
    max_paths: u16,

    /// Debug output; overrides THELOGLEVEL
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Deepest user-agent comment nesting accepted
    #[arg(long, default_value_t = DEFAULT_MAX_DEPTH as u16, value_parser = clap::value_parser!(u16).range(1..=MAX_UA_DEPTH as i64))]
    max_ua_depth: u16,

    /// Accept an additional HTTP method (repeatable)
    #[arg(long = "extra-method", value_name = "VERB")]
    extra_methods: Vec<String>,

    /// Worker threads for parsing
    #[arg(short, long, default_value_t = 1)]
    jobs: usize,

    /// statsd endpoint (host:port) for per-line counters
    #[arg(long, env = "STATSD_SERVER", value_name = "HOST:PORT")]
    statsd: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);
    debug!(?args, "arguments");

    let input = File::open(&args.input)
        .with_context(|| format!("cannot open input file {}", args.input.display()))?;
    if args.output.exists() {
        warn!(path = %args.output.display(), "output file exists and will be overwritten");
    }
    let output = File::create(&args.output)
        .with_context(|| format!("cannot open output file {}", args.output.display()))?;

    let config = args
        .extra_methods
        .iter()
        .fold(ValidationConfig::default(), |config, method| config.with_method(method.as_str()))
        .with_max_ua_depth(usize::from(args.max_ua_depth));

    let sink = args.statsd.as_deref().and_then(statsd_sink);
    if let Some(sink) = &sink {
        info!(target = %sink.target(), "sending line counters to statsd");
    }

    info!(input = %args.input.display(), jobs = args.jobs, "processing");
    let mut pipeline = Pipeline::with_sink(config, sink).jobs(args.jobs);
    pipeline
        .process_reader(BufReader::new(input))
        .with_context(|| format!("failed while reading {}", args.input.display()))?;

    let report = pipeline.summary(args.max_client_ips.into(), args.max_paths.into());
    info!(
        processed = report.total_number_of_lines_processed,
        ok = report.total_number_of_lines_ok,
        failed = report.total_number_of_lines_failed,
        "done"
    );
    debug!(report = %serde_json::to_string(&report)?, "summary");

    let mut writer = BufWriter::new(output);
    serde_json::to_writer_pretty(&mut writer, &report)
        .with_context(|| format!("cannot write {}", args.output.display()))?;
    writeln!(writer)?;
    writer.flush()?;

    Ok(())
}
