//! booking-flow - replay harness for the booking workflow core
//!
//! Usage:
//!   booking-flow replay demos/booking_script.json
//!   booking-flow replay script.json --legacy --format pretty
//!   booking-flow route --from 5 --category requirements --requirements-hash a1 --room-eval-hash b2
//!
//! Configuration is read from `--config`, else from `BOOKING_FLOW_CONFIG`,
//! else built-in defaults. `.env` is honoured.

mod handlers;

use anyhow::{Context, Result};
use booking_flow_core::config::LEGACY_MAX_VERIFIABLE_PER_TURN;
use booking_flow_core::{
    route, ChangeType, EventRecord, ExtractedFacts, FlowConfig, MemoryRecordStore, Step,
    TurnOutcome, TurnPipeline,
};
use clap::{Parser, Subcommand, ValueEnum};
use handlers::{scripted_registry, Venue};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "booking-flow")]
#[command(about = "Replay scripted conversations through the booking workflow core")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Flow configuration file (YAML)
    #[arg(long, short, global = true, env = "BOOKING_FLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Override the number of verifiable intents executed per turn
    #[arg(long, global = true)]
    max_per_turn: Option<usize>,

    /// Use the older three-intents-per-turn planner limit
    #[arg(long, global = true, conflicts_with = "max_per_turn")]
    legacy: bool,

    /// Output format
    #[arg(long, short = 'o', global = true, default_value = "json", value_enum)]
    format: OutputFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a scripted conversation and print every turn outcome
    Replay {
        /// JSON script: venue description plus one facts object per turn
        script: PathBuf,
    },

    /// Print the routing decision for a single change
    Route {
        /// Step the change arrives at (1-7)
        #[arg(long, value_parser = parse_step)]
        from: Step,

        /// Change category (date, room, requirements, products, ...)
        #[arg(long)]
        category: ChangeType,

        /// Pending caller step, if a detour is in flight
        #[arg(long, value_parser = parse_step)]
        caller: Option<Step>,

        #[arg(long)]
        requirements_hash: Option<String>,

        #[arg(long)]
        room_eval_hash: Option<String>,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// One JSON document per line
    Json,
    /// Indented JSON
    Pretty,
    /// One summary line per turn
    Text,
}

/// A scripted conversation
#[derive(Debug, Deserialize)]
struct Script {
    #[serde(default)]
    event_id: Option<Uuid>,
    #[serde(default)]
    venue: Venue,
    turns: Vec<ScriptTurn>,
}

#[derive(Debug, Deserialize)]
struct ScriptTurn {
    /// Original client text, logged at debug level and never interpreted
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    facts: ExtractedFacts,
}

fn parse_step(raw: &str) -> std::result::Result<Step, String> {
    let n: u8 = raw
        .parse()
        .map_err(|_| format!("step must be a number from 1 to 7, got '{raw}'"))?;
    Step::from_number(n).ok_or_else(|| format!("unknown step {n}"))
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Replay { script } => load_config(&cli).and_then(|config| {
            let outcomes = cmd_replay(script, config)?;
            print_outcomes(&outcomes, cli.format)
        }),
        Commands::Route {
            from,
            category,
            caller,
            requirements_hash,
            room_eval_hash,
        } => cmd_route(
            *from,
            *category,
            *caller,
            requirements_hash.clone(),
            room_eval_hash.clone(),
            cli.format,
        ),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> Result<FlowConfig> {
    let mut config = match &cli.config {
        Some(path) => FlowConfig::from_path(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => FlowConfig::from_env().context("Failed to load config")?,
    };

    if cli.legacy {
        config.planner.max_verifiable_per_turn = LEGACY_MAX_VERIFIABLE_PER_TURN;
    }
    if let Some(max) = cli.max_per_turn {
        config.planner.max_verifiable_per_turn = max;
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn cmd_replay(script_path: &Path, config: FlowConfig) -> Result<Vec<TurnOutcome>> {
    let content = std::fs::read_to_string(script_path)
        .with_context(|| format!("Failed to read script {}", script_path.display()))?;
    let script: Script = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse script {}", script_path.display()))?;

    let event_id = script.event_id.unwrap_or_else(Uuid::new_v4);
    let pipeline = TurnPipeline::new(config, scripted_registry(script.venue));
    let store = MemoryRecordStore::new();

    let mut outcomes = Vec::with_capacity(script.turns.len());
    for (idx, turn) in script.turns.iter().enumerate() {
        if let Some(message) = &turn.message {
            tracing::debug!(turn = idx + 1, message = %message, "Replaying turn");
        }
        let (_, outcome) = pipeline
            .handle_message(&store, event_id, &turn.facts)
            .with_context(|| format!("Turn {} failed", idx + 1))?;
        outcomes.push(outcome);
    }
    Ok(outcomes)
}

fn print_outcomes(outcomes: &[TurnOutcome], format: OutputFormat) -> Result<()> {
    for outcome in outcomes {
        match format {
            OutputFormat::Json => println!("{}", serde_json::to_string(outcome)?),
            OutputFormat::Pretty => println!("{}", serde_json::to_string_pretty(outcome)?),
            OutputFormat::Text => println!("{}", summarize(outcome)),
        }
    }
    Ok(())
}

fn summarize(outcome: &TurnOutcome) -> String {
    let change = outcome
        .change
        .map_or_else(|| "-".to_string(), |c| c.to_string());
    let route = outcome.decision.as_ref().map_or_else(
        || "-".to_string(),
        |d| format!("-> {}", d.next_step.number()),
    );
    let deferred = outcome.plan.as_ref().map_or(0, |p| p.deferred_count);
    format!(
        "turn {:>2}  change {:<12} route {:<5} step {}  callers {:?}  deferred {}  reply {}",
        outcome.turn,
        change,
        route,
        outcome.current_step,
        outcome
            .caller_stack
            .iter()
            .map(|s| s.number())
            .collect::<Vec<_>>(),
        deferred,
        outcome.reply.action,
    )
}

fn cmd_route(
    from: Step,
    category: ChangeType,
    caller: Option<Step>,
    requirements_hash: Option<String>,
    room_eval_hash: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let mut record = EventRecord::new(Uuid::nil());
    record.current_step = from.number();
    record.caller_stack.extend(caller);
    record.requirements_hash = requirements_hash;
    record.room_eval_hash = room_eval_hash;

    let decision = route(&record, category, from);
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string(&decision)?),
        OutputFormat::Pretty => println!("{}", serde_json::to_string_pretty(&decision)?),
        OutputFormat::Text => println!(
            "{} at step {} -> step {} (reevaluate: {}, caller: {:?}, skip: {})",
            category,
            from.number(),
            decision.next_step.number(),
            decision.needs_reevaluation,
            decision.updated_caller_step.map(|s| s.number()),
            decision.skip_reason.map_or("-", |s| s.as_str()),
        ),
    }
    Ok(())
}
