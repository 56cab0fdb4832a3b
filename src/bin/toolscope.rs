//! Offline tool selection from a config document and a tool catalogue.
//!
//! Usage:
//!
//! ```text
//! toolscope select --config servers.json --catalog tools.json "read the file content"
//! toolscope domains "open a pull request for this branch"
//! ```
//!
//! The catalogue maps server ids to the tool definitions those servers
//! would advertise:
//!
//! ```json
//! {
//!   "fs": [{ "name": "read_file", "description": "Read a file from disk" }],
//!   "gh": [{ "name": "create_issue", "description": "Open a GitHub issue" }]
//! }
//! ```
//!
//! No server is contacted. Logging goes to stderr and is controlled with
//! `RUST_LOG`.

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand, ValueEnum};
use mockable::DefaultClock;
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::Arc;
use thiserror::Error;
use toolscope::config::{ConfigError, OrchestratorConfig, read_document};
use toolscope::selection::{
    ParseServerDomainError, ScoredTool, SelectionContext, ServerDomain, extract_keywords,
    score_domains,
};
use toolscope::server_registry::{
    domain::{ServerId, ToolDefinition},
    services::{ServerRegistry, ServerRegistryError},
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("invalid catalogue: {0}")]
    Catalog(#[source] serde_json::Error),
    #[error(transparent)]
    Registry(#[from] ServerRegistryError),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
    #[error("failed to encode output: {0}")]
    Encode(#[source] serde_json::Error),
}

#[derive(Debug, Parser)]
#[command(name = "toolscope")]
#[command(author, version, about = "Relevance-based tool selection", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Rank catalogue tools against a prompt
    Select(SelectArgs),
    /// Show the domains inferred from a piece of text
    Domains {
        /// Text to analyse
        text: String,
    },
}

#[derive(Debug, clap::Args)]
struct SelectArgs {
    /// Config document with server definitions and selection settings
    #[arg(long, env = "TOOLSCOPE_CONFIG")]
    config: Utf8PathBuf,
    /// Tool catalogue keyed by server id
    #[arg(long)]
    catalog: Utf8PathBuf,
    /// Override the maximum number of tools returned
    #[arg(long)]
    max_tools: Option<usize>,
    /// Override the minimum score
    #[arg(long)]
    min_score: Option<f64>,
    /// Path of the file the user is working on
    #[arg(long)]
    current_file: Option<String>,
    /// Free-text description of the user's intent
    #[arg(long)]
    intent: Option<String>,
    /// Domain to boost (repeatable)
    #[arg(long = "include", value_parser = parse_domain)]
    include: Vec<ServerDomain>,
    /// Domain to exclude (repeatable)
    #[arg(long = "exclude", value_parser = parse_domain)]
    exclude: Vec<ServerDomain>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
    /// Prompt to select tools for
    prompt: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn parse_domain(raw: &str) -> Result<ServerDomain, ParseServerDomainError> {
    ServerDomain::try_from(raw)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("toolscope=info,warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let outcome = match cli.command {
        Command::Select(args) => run_select(&args),
        Command::Domains { text } => run_domains(&text),
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "toolscope failed");
            ExitCode::FAILURE
        }
    }
}

fn run_select(args: &SelectArgs) -> Result<(), CliError> {
    let config = OrchestratorConfig::load(&args.config)?;
    let catalog: BTreeMap<String, Vec<ToolDefinition>> =
        serde_json::from_str(&read_document(&args.catalog)?).map_err(CliError::Catalog)?;

    let registry = ServerRegistry::new(Arc::new(DefaultClock));
    let report = registry.apply_config(&config.servers)?;
    info!(
        servers = report.added.len(),
        rejected = report.rejected.len(),
        "servers registered"
    );
    load_catalog(&registry, catalog)?;

    let selector = config.selection.selector();
    let mut options = *selector.options();
    if let Some(max_tools) = args.max_tools {
        options = options.with_max_tools(max_tools);
    }
    if let Some(min_score) = args.min_score {
        options = options.with_min_score(min_score);
    }

    let context = build_context(args);
    let snapshot = registry.list()?;
    let selected = selector.select_with_options(&snapshot, &context, &options);

    let mut stdout = io::stdout().lock();
    match args.format {
        OutputFormat::Json => {
            let encoded = serde_json::to_string_pretty(&selected).map_err(CliError::Encode)?;
            writeln!(stdout, "{encoded}")?;
        }
        OutputFormat::Text => write_ranking(&mut stdout, &selected)?,
    }
    Ok(())
}

fn load_catalog(
    registry: &ServerRegistry<DefaultClock>,
    catalog: BTreeMap<String, Vec<ToolDefinition>>,
) -> Result<(), CliError> {
    for (raw_id, tools) in catalog {
        let Ok(server_id) = ServerId::new(raw_id.as_str()) else {
            warn!(server_id = %raw_id, "ignoring catalogue entry with invalid id");
            continue;
        };
        match registry.set_tools(&server_id, tools) {
            Ok(()) => {}
            Err(ServerRegistryError::NotFound(_)) => {
                warn!(server_id = %server_id, "ignoring catalogue entry for unknown server");
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn build_context(args: &SelectArgs) -> SelectionContext {
    let mut context = SelectionContext::new(args.prompt.as_str())
        .with_include_domains(args.include.iter().copied())
        .with_exclude_domains(args.exclude.iter().copied());
    if let Some(file) = &args.current_file {
        context = context.with_current_file(file.as_str());
    }
    if let Some(intent) = &args.intent {
        context = context.with_user_intent(intent.as_str());
    }
    context
}

fn write_ranking(out: &mut impl Write, selected: &[ScoredTool]) -> io::Result<()> {
    if selected.is_empty() {
        return writeln!(out, "no tools matched");
    }
    for scored in selected {
        writeln!(
            out,
            "{:.3}  {}/{}  {}",
            scored.score,
            scored.server_id,
            scored.tool.name(),
            scored.reasons.join("; ")
        )?;
    }
    Ok(())
}

fn run_domains(text: &str) -> Result<(), CliError> {
    let keywords = extract_keywords(text);
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "keywords: {}", keywords.join(", "))?;
    for score in score_domains(&keywords) {
        writeln!(stdout, "{:<10} {}", score.domain.as_str(), score.hits)?;
    }
    Ok(())
}

#[cfg(test)]
#[path = "toolscope/tests.rs"]
mod tests;
