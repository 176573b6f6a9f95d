//! policy-gate - security approval policy evaluation CLI
//!
//! Evaluates a merge request snapshot against its approval policies using
//! in-memory stores seeded from the snapshot.
//!
//! ## Commands
//!
//! - `evaluate`: run an evaluation and print the report
//! - `validate`: check a snapshot without evaluating it
//! - `inspect-comment`: show the report markers of an existing bot comment
//! - `config`: print the effective configuration

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing::{info, Level};

use policy_gate_core::{
    init_tracing, CommentStore, EvaluationInput, EvaluationReport, PolicyEvaluationService,
    PolicyGateConfig, PolicyViolationComment, ViolationRecord, METRICS,
};
use policy_gate_state::fakes::{MemoryCommentStore, MemoryEvaluationLock, MemoryViolationStore};

#[derive(Parser)]
#[command(name = "policy-gate")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Security approval policy evaluation for merge requests", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Configuration file (.toml or .json)
    #[arg(long, global = true, env = "POLICY_GATE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a merge request snapshot
    Evaluate {
        /// Snapshot file (JSON)
        snapshot: PathBuf,

        /// Reports never arrived: mark every policy as not evaluated in time
        #[arg(long)]
        skip: bool,

        /// Write the resulting bot comment body to this file
        #[arg(long)]
        comment_out: Option<PathBuf>,

        /// Exit with an error when any rule requires approval
        #[arg(long)]
        fail_on_violation: bool,
    },

    /// Check a snapshot for missing or inconsistent data
    Validate {
        /// Snapshot file (JSON)
        snapshot: PathBuf,
    },

    /// Show which report types an existing bot comment records
    InspectComment {
        /// File containing the comment body
        file: PathBuf,
    },

    /// Print the effective configuration as TOML
    Config,
}

/// Evaluation input plus the stored state it runs against.
#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    input: EvaluationInput,
    #[serde(default)]
    existing_violations: Vec<ViolationRecord>,
    #[serde(default)]
    existing_comment: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    let config = PolicyGateConfig::load(cli.config.as_deref())
        .context("Failed to load policy-gate configuration")?;

    let result = match cli.command {
        Commands::Evaluate {
            snapshot,
            skip,
            comment_out,
            fail_on_violation,
        } => {
            cmd_evaluate(
                &config,
                &snapshot,
                skip,
                comment_out.as_deref(),
                fail_on_violation,
            )
            .await
        }
        Commands::Validate { snapshot } => cmd_validate(&snapshot),
        Commands::InspectComment { file } => cmd_inspect_comment(&file),
        Commands::Config => cmd_config(&config),
    };

    METRICS.flush();
    result
}

fn load_snapshot(path: &Path) -> Result<Snapshot> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse snapshot {}", path.display()))
}

async fn run_snapshot(
    config: &PolicyGateConfig,
    snapshot: Snapshot,
    skip: bool,
) -> Result<(EvaluationReport, Option<String>)> {
    let merge_request_id = snapshot.input.change.id;
    let comments = match snapshot.existing_comment {
        Some(body) => MemoryCommentStore::with_comment(merge_request_id, body),
        None => MemoryCommentStore::new(),
    };
    let service = PolicyEvaluationService::new(
        MemoryViolationStore::with_records(snapshot.existing_violations),
        comments,
        MemoryEvaluationLock::new(),
        config.clone(),
    );

    let report = if skip {
        service.skip_evaluation(&snapshot.input).await?
    } else {
        service.evaluate(&snapshot.input).await?
    };
    let body = service
        .comment_store()
        .find(merge_request_id)
        .await?
        .map(|c| c.body);
    Ok((report, body))
}

async fn cmd_evaluate(
    config: &PolicyGateConfig,
    path: &Path,
    skip: bool,
    comment_out: Option<&Path>,
    fail_on_violation: bool,
) -> Result<()> {
    let snapshot = load_snapshot(path)?;
    let (report, body) = run_snapshot(config, snapshot, skip).await?;

    info!(
        merge_request_id = report.outcome.merge_request_id,
        violated_rules = report.outcome.violated_rule_ids().len(),
        comment = report.comment_action.as_str(),
        "evaluation finished"
    );
    println!("{}", serde_json::to_string_pretty(&report)?);

    if let (Some(out), Some(body)) = (comment_out, body) {
        std::fs::write(out, body)
            .with_context(|| format!("Failed to write comment to {}", out.display()))?;
    }

    if fail_on_violation && report.outcome.requires_approval() {
        bail!(
            "merge request {} requires approval by {} rule(s)",
            report.outcome.merge_request_id,
            report
                .outcome
                .rule_updates
                .iter()
                .filter(|u| u.approvals_required > 0)
                .count()
        );
    }
    Ok(())
}

fn cmd_validate(path: &Path) -> Result<()> {
    let snapshot = load_snapshot(path)?;
    snapshot.input.validate()?;
    for rule in &snapshot.input.rules {
        snapshot.input.policy_for(rule)?;
    }
    println!(
        "✓ snapshot is valid ({} rules, {} policies)",
        snapshot.input.rules.len(),
        snapshot.input.policies.len()
    );
    Ok(())
}

fn cmd_inspect_comment(path: &Path) -> Result<()> {
    let body = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read comment {}", path.display()))?;
    let comment = PolicyViolationComment::parse(Some(&body));
    let names = |set: &std::collections::BTreeSet<policy_gate_core::ReportType>| {
        set.iter().map(|r| r.as_str()).collect::<Vec<_>>().join(", ")
    };
    println!("Violated reports:   {}", names(comment.reports()));
    println!("Optional approvals: {}", names(comment.optional_approval_reports()));
    println!("Blocking:           {}", comment.is_blocking());
    Ok(())
}

fn cmd_config(config: &PolicyGateConfig) -> Result<()> {
    let rendered = toml::to_string_pretty(config).context("Failed to render configuration")?;
    print!("{rendered}");
    Ok(())
}
