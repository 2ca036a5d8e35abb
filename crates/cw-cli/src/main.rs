//! ClassifiedWebRequest CLI
//!
//! CLI tool for inspecting host decomposition, classifying single requests
//! and replaying request logs through the tracker blocker.

use std::fs;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use cw_core::classify::RequestTarget;
use cw_core::psl::{is_third_party, PublicSuffixSet};
use cw_core::source::LocalRequestSource;
use cw_core::types::RawRequest;
use cw_core::url::all_hosts_for_url;
use cw_lists::{load_services, BlockerConfig, BlockerEnv, BlockingMode, TrackerBlocker};

#[derive(Parser)]
#[command(name = "cw-cli")]
#[command(about = "Tracker classification and request filtering tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the registrable-domain candidates of each URL
    Hosts {
        /// Public suffix list file
        #[arg(long)]
        psl: String,

        /// URLs to decompose
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Classify a single request and print the decision as JSON
    Check {
        /// Public suffix list file
        #[arg(long)]
        psl: String,

        /// Tracker services JSON file
        #[arg(long)]
        services: String,

        /// Request URL
        #[arg(long)]
        url: String,

        /// URL of the document that made the request
        #[arg(long)]
        origin: Option<String>,

        /// Request type
        #[arg(long = "type", default_value = "script")]
        request_type: String,

        /// Blocker config JSON file
        #[arg(long)]
        config: Option<String>,
    },

    /// Feed a JSON-lines request log through the tracker blocker
    Replay {
        /// Public suffix list file
        #[arg(long)]
        psl: String,

        /// Tracker services JSON file
        #[arg(long)]
        services: String,

        /// Request log, one JSON request per line ("-" for stdin)
        #[arg(short, long)]
        input: String,

        /// Use the non-classifying request API
        #[arg(long)]
        legacy: bool,

        /// Blocker config JSON file
        #[arg(long)]
        config: Option<String>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Hosts { psl, urls } => cmd_hosts(&psl, &urls),
        Commands::Check {
            psl,
            services,
            url,
            origin,
            request_type,
            config,
        } => cmd_check(&psl, &services, &url, origin.as_deref(), &request_type, config.as_deref()),
        Commands::Replay {
            psl,
            services,
            input,
            legacy,
            config,
        } => cmd_replay(&psl, &services, &input, legacy, config.as_deref()),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

// =============================================================================
// Setup
// =============================================================================

fn load_suffixes(psl: &str) -> Result<Arc<PublicSuffixSet>, String> {
    PublicSuffixSet::load(psl)
        .map(Arc::new)
        .map_err(|e| e.to_string())
}

fn load_config(path: Option<&str>) -> Result<BlockerConfig, String> {
    match path {
        Some(path) => BlockerConfig::load(path).map_err(|e| e.to_string()),
        None => Ok(BlockerConfig::default()),
    }
}

struct Session {
    source: LocalRequestSource,
    blocker: TrackerBlocker,
    suffixes: Arc<PublicSuffixSet>,
}

fn start_session(psl: &str, services: &str, config: &BlockerConfig) -> Result<Session, String> {
    let suffixes = load_suffixes(psl)?;
    let domains = load_services(services, config.ignored_categories.as_slice()).map_err(|e| e.to_string())?;

    let source = LocalRequestSource::new();
    let env = BlockerEnv::unrestricted(Arc::new(source.clone()), Arc::clone(&suffixes))
        .map_err(|e| format!("Failed to set up host permissions: {e}"))?;
    let blocker = TrackerBlocker::install(config, domains, &env);

    Ok(Session {
        source,
        blocker,
        suffixes,
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let line = serde_json::to_string(value).map_err(|e| format!("Failed to encode output: {e}"))?;
    println!("{line}");
    Ok(())
}

// =============================================================================
// Commands
// =============================================================================

fn cmd_hosts(psl: &str, urls: &[String]) -> Result<(), String> {
    let suffixes = load_suffixes(psl)?;

    for url in urls {
        let hosts = all_hosts_for_url(url, &suffixes);
        if hosts.is_empty() {
            println!("{url}: (none)");
        } else {
            println!("{url}: {}", hosts.join(" "));
        }
    }

    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckReport<'a> {
    url: &'a str,
    origin_url: Option<&'a str>,
    hosts: Vec<String>,
    third_party: bool,
    /// `None` in legacy mode, which has no classification.
    classified: Option<bool>,
    cancel: bool,
}

fn cmd_check(
    psl: &str,
    services: &str,
    url: &str,
    origin: Option<&str>,
    request_type: &str,
    config: Option<&str>,
) -> Result<(), String> {
    let config = load_config(config)?;
    let session = start_session(psl, services, &config)?;

    let mut request = RawRequest::new("check", url, request_type);
    if let Some(origin) = origin {
        request = request.with_origin(origin);
    }
    let outcome = session.source.emit(&request);

    let classified = session
        .blocker
        .classifier()
        .map(|classifier| classifier.is_classified_as(RequestTarget::new(url, origin), &config.classification));

    print_json(&CheckReport {
        url,
        origin_url: origin,
        hosts: all_hosts_for_url(url, &session.suffixes),
        third_party: is_third_party(origin, url, &session.suffixes),
        classified,
        cancel: outcome.cancel,
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReplayLine<'a> {
    request_id: &'a str,
    url: &'a str,
    cancel: bool,
    delivered: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReplaySummary {
    mode: &'static str,
    domains: usize,
    requests: usize,
    cancelled: usize,
    elapsed_ms: f64,
}

fn cmd_replay(psl: &str, services: &str, input: &str, legacy: bool, config: Option<&str>) -> Result<(), String> {
    let mut config = load_config(config)?;
    if legacy {
        config.mode = BlockingMode::Legacy;
    }

    let text = if input == "-" {
        io::read_to_string(io::stdin()).map_err(|e| format!("Failed to read stdin: {e}"))?
    } else {
        fs::read_to_string(input).map_err(|e| format!("Failed to read '{}': {}", input, e))?
    };

    let session = start_session(psl, services, &config)?;

    let start = Instant::now();
    let mut requests = 0usize;
    let mut cancelled = 0usize;

    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let request: RawRequest =
            serde_json::from_str(line).map_err(|e| format!("Line {}: invalid request: {}", index + 1, e))?;
        let outcome = session.source.emit(&request);

        requests += 1;
        if outcome.cancel {
            cancelled += 1;
        }

        print_json(&ReplayLine {
            request_id: &request.request_id,
            url: &request.url,
            cancel: outcome.cancel,
            delivered: outcome.delivered,
        })?;
    }

    print_json(&ReplaySummary {
        mode: match session.blocker.mode() {
            BlockingMode::Classified => "classified",
            BlockingMode::Legacy => "legacy",
        },
        domains: session.blocker.domain_count(),
        requests,
        cancelled,
        elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
    })
}
