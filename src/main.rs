use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufRead, BufReader};

use logsieve_filter::{BundleIdentityResolver, MessageEvent, TextMode};

mod config;
mod stream;

use config::{Config, TextRule};
use stream::{OutputFormat, StreamOptions};

/// logsieve - Filter unified-log entry streams
#[derive(Parser, Debug)]
#[command(name = "logsieve")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// NDJSON file of stream entries (reads stdin if omitted)
    #[arg(value_name = "INPUT")]
    input: Option<PathBuf>,

    /// TOML filter configuration; flags below override it
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Match against the message text
    #[arg(long)]
    message: Option<String>,

    /// Match against the process name
    #[arg(long)]
    process: Option<String>,

    /// Match against the subsystem
    #[arg(long)]
    subsystem: Option<String>,

    /// Match against the category
    #[arg(long)]
    category: Option<String>,

    /// How text patterns are compared (contains, not-contains, equals, regex)
    #[arg(long, default_value = "contains")]
    match_mode: String,

    /// Case-insensitive text matching
    #[arg(short = 'i', long)]
    ignore_case: bool,

    /// Only entries from this process ID
    #[arg(long)]
    pid: Option<i32>,

    /// Only entries from the app with this bundle identifier
    #[arg(long)]
    bundle_id: Option<String>,

    /// Accepted message types, comma separated (default: all)
    #[arg(long, value_delimiter = ',')]
    types: Option<Vec<MessageEvent>>,

    /// Worker tasks evaluating the filter
    #[arg(long)]
    workers: Option<usize>,

    /// Print only the last N matches, once input ends
    #[arg(long, value_name = "N")]
    tail: Option<usize>,

    /// Write matches as NDJSON instead of text lines
    #[arg(long)]
    json: bool,

    /// Print per-type counts of all matches to stderr
    #[arg(long)]
    stats: bool,
}

impl Args {
    /// Fold command line flags over the loaded configuration
    fn apply(&self, config: &mut Config) -> Result<()> {
        // Validate the mode up front so a bad flag fails even without patterns
        self.match_mode.parse::<TextMode>()?;

        let rule = |pattern: &String| TextRule {
            pattern: pattern.clone(),
            mode: Some(self.match_mode.clone()),
            ignore_case: self.ignore_case,
        };

        let filter = &mut config.filter;
        if let Some(p) = &self.message {
            filter.message = Some(rule(p));
        }
        if let Some(p) = &self.process {
            filter.process = Some(rule(p));
        }
        if let Some(p) = &self.subsystem {
            filter.subsystem = Some(rule(p));
        }
        if let Some(p) = &self.category {
            filter.category = Some(rule(p));
        }
        if self.pid.is_some() {
            filter.pid = self.pid;
        }
        if self.bundle_id.is_some() {
            filter.bundle_id = self.bundle_id.clone();
        }
        if self.types.is_some() {
            filter.types = self.types.clone();
        }
        if self.workers.is_some() {
            config.stream.workers = self.workers;
        }
        if self.tail.is_some() {
            config.stream.tail = self.tail;
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing for debugging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    // Run the application
    let result = run_app(args).await;

    // Handle any errors
    if let Err(e) = &result {
        eprintln!("Error: {:#}", e);
    }

    result
}

async fn run_app(args: Args) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    args.apply(&mut config)?;

    let resolver = BundleIdentityResolver::shared();
    let filter = Arc::new(
        config
            .filter
            .build(Arc::clone(&resolver))
            .context("invalid filter")?,
    );
    tracing::debug!(?filter, "filter configured");

    let workers = config
        .stream
        .workers
        .unwrap_or_else(|| std::thread::available_parallelism().map_or(1, |n| n.get()));

    let reader: Box<dyn AsyncBufRead + Unpin> = match &args.input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("failed to open {}", path.display()))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };

    let options = StreamOptions {
        workers,
        format: if args.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        },
        tail: config.stream.tail,
    };

    let stdout = std::io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let stats = stream::run(reader, &mut out, filter, options).await?;

    if args.stats {
        eprintln!("{} of {} entries matched", stats.matched.total(), stats.seen);
        for event in MessageEvent::ALL {
            eprintln!("  {:<8} {}", event.as_str(), stats.matched.get(event));
        }
        eprintln!("  bundle lookups: {}", resolver.walk_count());
    }

    Ok(())
}
