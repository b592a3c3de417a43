//! Explanation remediation utility
//!
//! Scans every question once and reconciles explanations with canonical
//! answers. Dry-run unless `--apply` is given.
//!
//! **Usage:**
//! ```bash
//! dq-fix-explanations [--apply] [--mode direct|audit] [--page-size N] [--root-folder P]
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use dq_common::config::{
    default_config_path, load_toml_config, prepare_database_path, resolve_root_folder,
    TomlConfig, ROOT_FOLDER_ENV,
};
use tracing::{error, info};
use uuid::Uuid;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dq_qp::db::SqliteQuestionStore;
use dq_qp::remediation::{run_audit_with_id, run_direct_apply, RunMode, RunSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Write auto-fixable corrections directly
    Direct,
    /// Enqueue every inconsistency for review
    Audit,
}

/// Explanation/answer remediation
#[derive(Parser, Debug)]
#[command(name = "dq-fix-explanations")]
#[command(about = "Find and fix explanations that contradict the canonical answer")]
#[command(version)]
struct Args {
    /// Perform writes (default is a dry run)
    #[arg(long)]
    apply: bool,

    /// Remediation pipeline
    #[arg(long, value_enum, default_value = "direct")]
    mode: Mode,

    /// Questions per page (defaults to [scanner].page_size)
    #[arg(long)]
    page_size: Option<u32>,

    /// Root folder holding the database
    #[arg(short, long, env = "DQ_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// TOML config file (defaults to ~/.config/drivequiz/dq-qp.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the final summary as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dq_qp=info,dq_fix_explanations=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let toml_config = match args.config.clone().or_else(|| default_config_path("dq-qp")) {
        Some(path) => load_toml_config(&path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => TomlConfig::default(),
    };

    let root_folder = resolve_root_folder(args.root_folder.as_deref(), ROOT_FOLDER_ENV, Some(&toml_config));
    let db_path = prepare_database_path(&root_folder)?;
    let pool = dq_common::db::init_database(&db_path)
        .await
        .context("Failed to open database")?;

    let mode = RunMode::from_apply_flag(args.apply);
    let page_size = args.page_size.unwrap_or(toml_config.scanner.page_size).max(1);
    let audit_run_id = (args.mode == Mode::Audit).then(Uuid::new_v4);
    info!(
        database = %db_path.display(),
        mode = mode.as_str(),
        pipeline = ?args.mode,
        audit_run_id = ?audit_run_id,
        page_size,
        "Explanation remediation starting"
    );
    if let Some(run_id) = audit_run_id {
        if !args.json {
            println!("Audit run id: {}", run_id);
        }
    }

    let store = SqliteQuestionStore::new(pool.clone());
    let result = match audit_run_id {
        None => run_direct_apply(&store, page_size, mode).await,
        Some(run_id) => run_audit_with_id(&store, &pool, page_size, mode, run_id).await,
    };

    let summary = match result {
        Ok(summary) => summary,
        Err(e) => {
            error!(error = %e, "Explanation remediation aborted");
            return Err(e.into());
        }
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("=== Explanation remediation ({}) ===", summary.mode.as_str());
    if let Some(run_id) = summary.audit_run_id {
        println!("Audit run id:          {}", run_id);
    }
    println!("Questions scanned:     {}", summary.stats.scanned_questions);
    println!("Locales checked:       {}", summary.stats.locales_checked);
    println!("Inconsistent:          {}", summary.stats.inconsistent_detected);
    println!("Auto-fixable:          {}", summary.stats.auto_fixable);
    println!("Needs manual review:   {}", summary.stats.needs_manual);
    println!("Queued for review:     {}", summary.queued_for_review);
    println!("Writes applied:        {}", summary.writes_applied);
    if summary.mode == RunMode::DryRun {
        println!();
        println!("Dry run: nothing was written. Re-run with --apply to commit.");
    }
}
