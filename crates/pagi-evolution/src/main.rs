//! pagi-evolve CLI: run one change proposal through a shadow and the validation gate.
//!
//! Usage:
//!   cargo run -p pagi-evolution --bin pagi-evolve -- --store ./data/pagi_state --proposal change.json [--merge] [--level standard]
//!
//! Forks a shadow of the store, logs the proposal's modifications into it,
//! validates, then merges (approved + `--merge`) or discards. Prints the report
//! and the audit trail or insights as JSON on stdout; logs go to stderr.

use std::path::PathBuf;
use std::sync::Arc;

use pagi_evolution::{
    ChangeProposal, EvolutionConfig, ShadowStateForker, SledBackingStore, ValidationCriteria,
    ValidationEngine, ValidationLevel,
};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn print_usage() {
    eprintln!("pagi-evolve: shadow validation for self-evolution proposals");
    eprintln!("  --store DIR         Sled store holding live agent state (default ./data/pagi_state)");
    eprintln!("  --proposal FILE     ChangeProposal as JSON");
    eprintln!("  --level LEVEL       basic | standard | comprehensive | critical (default standard)");
    eprintln!("  --merge             Merge into the store when approved (otherwise always discard)");
    eprintln!();
    eprintln!("Shadow settings: PAGI_SHADOW_CONFIG file or PAGI_SHADOW__* environment variables.");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let mut store_path = PathBuf::from("./data/pagi_state");
    let mut proposal_path: Option<PathBuf> = None;
    let mut level = ValidationLevel::Standard;
    let mut merge = false;

    while let Some(a) = args.next() {
        match a.as_str() {
            "--store" => {
                if let Some(p) = args.next() {
                    store_path = PathBuf::from(p);
                }
            }
            "--proposal" => proposal_path = args.next().map(PathBuf::from),
            "--level" => {
                if let Some(l) = args.next() {
                    level = l.parse()?;
                }
            }
            "--merge" => merge = true,
            "--help" | "-h" => {
                print_usage();
                return Ok(());
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                print_usage();
                return Ok(());
            }
        }
    }

    let Some(proposal_path) = proposal_path else {
        print_usage();
        return Ok(());
    };

    let proposal: ChangeProposal = serde_json::from_str(&std::fs::read_to_string(&proposal_path)?)?;
    let config = EvolutionConfig::load()?;
    let criteria = ValidationCriteria::from_config(&config).at_level(level);

    let store = Arc::new(SledBackingStore::open_path(&store_path)?);
    let forker = Arc::new(ShadowStateForker::with_store(store.clone(), config));
    let engine = ValidationEngine::new(Arc::clone(&forker));

    let shadow_id = forker
        .create_isolated_environment(forker.default_shadow_config())
        .await?;
    info!(
        shadow_id = %shadow_id,
        proposal_id = %proposal.id,
        category = %proposal.category,
        "Shadow forked for proposal"
    );
    for (key, value) in &proposal.proposed_modifications {
        forker
            .log_shadow_change(
                shadow_id,
                proposal.category.as_str(),
                json!({ "key": key, "value": value }),
            )
            .await?;
    }

    let report = match engine.validate_shadow(shadow_id, &proposal, &criteria).await {
        Ok(report) => report,
        Err(e) => {
            forker.discard_shadow_state(shadow_id).await?;
            return Err(e.into());
        }
    };

    let output = if merge && report.is_approved() {
        let merged = forker.merge_approved_changes(shadow_id, &report).await?;
        store.flush()?;
        json!({ "report": report, "merge": merged })
    } else {
        let insights = forker.discard_shadow_state(shadow_id).await?;
        json!({ "report": report, "insights": insights })
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
