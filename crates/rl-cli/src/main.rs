//! Rootline CLI
//!
//! Command-line interface for the Rootline incident investigator.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use colored::Colorize;
use rl_core::knowledge::{Chunker, ChunkingConfig};
use rl_core::{
    FileInvestigationRepository, InvestigationFilter, InvestigationPhase, InvestigationRepository,
    InvestigationState,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

mod commands;
mod config;
mod input;
mod manifest;
mod validator;

use commands::{ConnectorSet, InvestigationRuntime};
use config::AppConfig;
use validator::ConfigValidator;

#[derive(Parser)]
#[command(name = "rootline")]
#[command(author = "Rootline Team")]
#[command(version)]
#[command(about = "Incident investigation with log analysis and knowledge-grounded diagnosis", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "ROOTLINE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(long, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Invalid output format: {}", s)),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Investigate an incident
    Investigate {
        /// Incident JSON file (incident event, CloudWatch alarm, or chat question)
        #[arg(short, long, conflicts_with_all = ["service", "question"])]
        incident: Option<PathBuf>,

        /// Service the question is about
        #[arg(short, long, requires = "question")]
        service: Option<String>,

        /// Free-text question, as asked in chat
        #[arg(short, long, requires = "service")]
        question: Option<String>,

        /// Log group the analysis may query (repeatable)
        #[arg(short, long = "log-group")]
        log_groups: Vec<String>,

        /// Wall-clock budget for the whole investigation
        #[arg(long)]
        deadline_secs: Option<u64>,
    },

    /// Re-run a stored investigation, replacing its record
    Reinvestigate {
        /// Incident ID
        id: Uuid,
    },

    /// Show a stored investigation
    Show {
        /// Incident ID
        id: Uuid,
    },

    /// List stored investigations
    List {
        /// Filter by service
        #[arg(short, long)]
        service: Option<String>,

        /// Filter by phase (complete, failed, ...)
        #[arg(short, long)]
        phase: Option<String>,

        /// Maximum number of investigations to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Preview how a document would be chunked
    Chunk {
        /// Document file
        file: PathBuf,

        /// Override the configured maximum chunk size
        #[arg(long)]
        max_tokens: Option<usize>,

        /// Override the configured overlap
        #[arg(long)]
        overlap_tokens: Option<usize>,
    },

    /// Validate configuration
    Validate,

    /// Show current configuration
    Config {
        /// Show secrets (redacted by default)
        #[arg(long)]
        show_secrets: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let loaded = AppConfig::load(&config_path);
    let mut config = match &loaded {
        Ok(config) => config.clone(),
        Err(_) => AppConfig::default(),
    };
    config.apply_env_overrides();

    rl_observability::init_logging_with_config(config.logging.to_observability(cli.verbose));
    rl_observability::register_metrics();

    if let Err(e) = &loaded {
        if cli.verbose {
            eprintln!("Using default configuration: {:#}", e);
        }
    }

    match cli.command {
        Commands::Investigate {
            incident,
            service,
            question,
            log_groups,
            deadline_secs,
        } => {
            if let Some(secs) = deadline_secs {
                config.orchestrator.budget_ms = secs.saturating_mul(1000);
            }
            let deadline = config.orchestrator.deadline_from(Utc::now());
            let incident = match (incident, service, question) {
                (Some(path), _, _) => input::load_incident(&path)?,
                (None, Some(service), Some(question)) => {
                    rl_core::IncidentEvent::from_chat(service, question)
                }
                _ => bail!("Provide --incident <file> or --service with --question"),
            };
            let incident = input::add_log_groups(incident, &log_groups);
            cmd_investigate(config, incident, deadline, cli.format).await
        }
        Commands::Reinvestigate { id } => {
            let deadline = config.orchestrator.deadline_from(Utc::now());
            cmd_reinvestigate(config, id, deadline, cli.format).await
        }
        Commands::Show { id } => cmd_show(config, id, cli.format).await,
        Commands::List {
            service,
            phase,
            limit,
        } => cmd_list(config, service, phase, limit, cli.format).await,
        Commands::Chunk {
            file,
            max_tokens,
            overlap_tokens,
        } => cmd_chunk(config, &file, max_tokens, overlap_tokens, cli.format),
        Commands::Validate => cmd_validate(&config_path, cli.format),
        Commands::Config { show_secrets } => cmd_config(config, show_secrets, cli.format),
    }
}

fn default_config_path() -> PathBuf {
    if let Some(dirs) = directories::ProjectDirs::from("com", "rootline", "rootline") {
        dirs.config_dir().join("config.yaml")
    } else {
        PathBuf::from("config/rootline.yaml")
    }
}

async fn open_repository(config: &AppConfig) -> Result<Arc<FileInvestigationRepository>> {
    let dir = config.storage.resolve_investigations_dir();
    let repository = FileInvestigationRepository::open(&dir)
        .await
        .with_context(|| format!("Failed to open investigation store: {}", dir.display()))?;
    Ok(Arc::new(repository))
}

/// Validates configuration and builds the runtime, loading knowledge.
async fn prepare_runtime(config: &AppConfig) -> Result<InvestigationRuntime> {
    let validation = ConfigValidator::validate(config);
    if validation.has_errors() {
        validation.print();
        bail!("Configuration is invalid; run `rootline validate` for details");
    }

    let repository = open_repository(config).await?;
    let connectors = ConnectorSet::from_config(config)?;
    let runtime = InvestigationRuntime::build(config, connectors, repository)?;

    if let Some(summary) = runtime.load_knowledge(config).await? {
        for (title, error) in &summary.failed {
            eprintln!(
                "{} knowledge document '{}' not loaded: {}",
                "⚠".yellow(),
                title,
                error
            );
        }
    }
    Ok(runtime)
}

async fn cmd_investigate(
    config: AppConfig,
    incident: rl_core::IncidentEvent,
    deadline: DateTime<Utc>,
    format: OutputFormat,
) -> Result<()> {
    let runtime = prepare_runtime(&config).await?;
    if format == OutputFormat::Text {
        println!(
            "{} {} ({})",
            "Investigating".cyan().bold(),
            incident.service,
            incident.incident_id
        );
    }

    let state = runtime.investigate(incident, deadline).await?;
    print_state(&state, format)?;
    exit_on_failure(&state);
    Ok(())
}

async fn cmd_reinvestigate(
    config: AppConfig,
    id: Uuid,
    deadline: DateTime<Utc>,
    format: OutputFormat,
) -> Result<()> {
    let runtime = prepare_runtime(&config).await?;
    let state = runtime.reinvestigate(id, deadline).await?;
    print_state(&state, format)?;
    exit_on_failure(&state);
    Ok(())
}

async fn cmd_show(config: AppConfig, id: Uuid, format: OutputFormat) -> Result<()> {
    let repository = open_repository(&config).await?;
    match repository.get(id).await? {
        Some(state) => print_state(&state, format),
        None => bail!("Investigation not found: {}", id),
    }
}

async fn cmd_list(
    config: AppConfig,
    service: Option<String>,
    phase: Option<String>,
    limit: usize,
    format: OutputFormat,
) -> Result<()> {
    let phase = match phase.as_deref() {
        Some(raw) => Some(parse_phase(raw)?),
        None => None,
    };
    let filter = InvestigationFilter {
        service,
        phase,
        limit: Some(limit),
    };

    let repository = open_repository(&config).await?;
    let investigations = repository.list(&filter).await?;

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&investigations)?);
        return Ok(());
    }

    println!("{}", "Investigations".bold());
    println!("──────────────");
    if investigations.is_empty() {
        println!("No investigations found");
    }
    for state in &investigations {
        println!(
            "{}  {:<24} {:<12} {}",
            state.incident_id(),
            state.incident.service,
            colored_phase(state.phase),
            state.started_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

fn cmd_chunk(
    config: AppConfig,
    file: &Path,
    max_tokens: Option<usize>,
    overlap_tokens: Option<usize>,
    format: OutputFormat,
) -> Result<()> {
    let mut chunking: ChunkingConfig = config.knowledge.ingestion.chunking;
    if let Some(max) = max_tokens {
        chunking.max_tokens = max;
        chunking.min_tokens = chunking.min_tokens.min(max);
    }
    if let Some(overlap) = overlap_tokens {
        chunking.overlap_tokens = overlap;
    }

    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read document: {}", file.display()))?;
    let chunks = Chunker::new(chunking)?.chunk(&text)?;

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&chunks)?);
        return Ok(());
    }

    println!("{} {} chunks", "Chunking".bold(), chunks.len());
    for chunk in &chunks {
        let preview: String = chunk
            .own_content()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .chars()
            .take(72)
            .collect();
        println!(
            "  #{:<3} {:<32} {:>4} tokens  overlap {:>4}B  {}",
            chunk.chunk_index,
            chunk.section_title.as_deref().unwrap_or("-"),
            chunk.token_count,
            chunk.overlap_len,
            preview.dimmed()
        );
    }
    Ok(())
}

fn cmd_validate(config_path: &Path, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Text {
        println!(
            "Validating configuration: {}",
            config_path.display().to_string().cyan()
        );
    }

    let mut config = match AppConfig::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            println!("{}: {:#}", "Configuration file error".red().bold(), e);
            std::process::exit(1);
        }
    };
    config.apply_env_overrides();

    let result = ConfigValidator::validate(&config);

    if format == OutputFormat::Json {
        let report = serde_json::json!({
            "valid": !result.has_errors(),
            "errors": result.errors,
            "warnings": result.warnings,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        if result.has_errors() {
            std::process::exit(1);
        }
        return Ok(());
    }

    result.print();

    println!();
    println!("{}", "Configuration Summary".bold());
    println!("─────────────────────");
    println!("  Reasoning model: {}", config.llm.model);
    println!(
        "  Embedding model: {} ({} dims)",
        config.embedding.model, config.embedding.dimension
    );
    println!("  Log gateway: {}", config.logs.base_url);
    match &config.issue_tracker {
        Some(tracker) => println!("  Issue tracker: {}/{}", tracker.owner, tracker.repo),
        None => println!("  Issue tracker: not configured"),
    }
    println!(
        "  Budget: {}s, {} retries",
        config.orchestrator.budget_ms / 1000,
        config.orchestrator.max_retries
    );

    println!();
    if result.has_errors() {
        println!(
            "{}",
            "Configuration validation failed. Fix the errors above."
                .red()
                .bold()
        );
        std::process::exit(1);
    } else if result.has_warnings() {
        println!(
            "{}",
            "Configuration is valid with warnings. Review the warnings above."
                .yellow()
                .bold()
        );
    } else {
        println!("{}", "Configuration is valid.".green().bold());
    }

    Ok(())
}

fn cmd_config(config: AppConfig, show_secrets: bool, format: OutputFormat) -> Result<()> {
    let display_config = if show_secrets {
        config
    } else {
        config.redact_secrets()
    };

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&display_config)?);
    } else {
        println!("{}", "Current Configuration".bold());
        println!("─────────────────────────");
        print!("{}", serde_yaml::to_string(&display_config)?);
    }

    Ok(())
}

fn print_state(state: &InvestigationState, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(state)?);
        return Ok(());
    }

    println!();
    println!("{} {}", "Result:".bold(), colored_phase(state.phase));
    print!("{}", state.render_summary());
    if !state.stage_errors.is_empty() {
        println!("{}", "Stage errors:".yellow());
        for record in &state.stage_errors {
            println!(
                "  {} attempt {}: {} error: {}",
                record.stage, record.attempt, record.kind, record.message
            );
        }
    }
    Ok(())
}

fn exit_on_failure(state: &InvestigationState) {
    if state.phase == InvestigationPhase::Failed {
        std::process::exit(1);
    }
}

fn colored_phase(phase: InvestigationPhase) -> colored::ColoredString {
    match phase {
        InvestigationPhase::Complete => phase.as_str().green(),
        InvestigationPhase::Failed => phase.as_str().red(),
        _ => phase.as_str().yellow(),
    }
}

fn parse_phase(raw: &str) -> Result<InvestigationPhase> {
    const PHASES: [InvestigationPhase; 6] = [
        InvestigationPhase::Triage,
        InvestigationPhase::Analysis,
        InvestigationPhase::Diagnosis,
        InvestigationPhase::Remediation,
        InvestigationPhase::Complete,
        InvestigationPhase::Failed,
    ];
    PHASES
        .into_iter()
        .find(|p| p.as_str().eq_ignore_ascii_case(raw.trim()))
        .with_context(|| format!("Unknown phase '{}'", raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_investigate_chat() {
        let cli = Cli::try_parse_from([
            "rootline",
            "investigate",
            "--service",
            "payment-service",
            "--question",
            "why are checkouts failing?",
            "--log-group",
            "/aws/lambda/payment-service",
            "--log-group",
            "/aws/rds/payments",
        ])
        .unwrap();

        match cli.command {
            Commands::Investigate {
                service,
                log_groups,
                incident,
                ..
            } => {
                assert_eq!(service.as_deref(), Some("payment-service"));
                assert_eq!(log_groups.len(), 2);
                assert!(incident.is_none());
            }
            _ => panic!("expected investigate"),
        }
    }

    #[test]
    fn test_incident_file_conflicts_with_question() {
        let result = Cli::try_parse_from([
            "rootline",
            "investigate",
            "--incident",
            "alarm.json",
            "--service",
            "svc",
            "--question",
            "q",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_phase() {
        assert_eq!(parse_phase("failed").unwrap(), InvestigationPhase::Failed);
        assert_eq!(parse_phase("COMPLETE").unwrap(), InvestigationPhase::Complete);
        assert!(parse_phase("paused").is_err());
    }

    #[test]
    fn test_output_format() {
        assert!(matches!("json".parse::<OutputFormat>(), Ok(OutputFormat::Json)));
        assert!("yaml".parse::<OutputFormat>().is_err());
    }
}
