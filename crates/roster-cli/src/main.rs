//! `roster`: runs demographic reconciliation against a SQLite store.
//!
//! Reads `roster.toml` (or the path given with `--config`) and `ROSTER__*`
//! environment variables, e.g. `ROSTER__SYNC__QUERY_CHUNK_SIZE=200`.
//!
//! ```
//! roster sync --kind delta
//! roster run
//! roster history --external-id 100001
//! roster merge --source-id 42 --target-id 7
//! ```

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use anyhow::{Context as _, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use roster_core::{
  demographic::{DemographicId, ExternalId},
  store::RecordStore,
};
use roster_store_sqlite::SqliteStore;
use roster_sync::{
  JsonFileSource, ReconciliationEngine, Scheduler, Settings, SyncKind, engine::audit_cutoff,
};
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Workforce demographic reconciliation")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "roster.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Run one cycle and print its report.
  Sync {
    #[arg(long, default_value = "full")]
    kind: SyncKind,
  },
  /// Run the scheduler until interrupted.
  Run,
  /// Delete audit rows older than the retention window.
  PurgeAudit,
  /// Print the history entries of one demographic.
  History {
    #[arg(long)]
    external_id: i64,
  },
  /// Retire a duplicate demographic and move its profit details to another.
  Merge {
    /// The duplicate to retire.
    #[arg(long)]
    source_id: i64,
    #[arg(long)]
    target_id: i64,
  },
}

type Engine = ReconciliationEngine<SqliteStore, JsonFileSource>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let settings: Settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(config::Environment::with_prefix("ROSTER").separator("__").try_parsing(true))
    .build()
    .context("failed to read config file")?
    .try_deserialize()
    .context("failed to deserialise Settings")?;

  let store_path = expand_tilde(&settings.store_path);
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;
  let source = JsonFileSource::new(
    expand_tilde(&settings.source_path),
    settings.sync.delta_window_hours,
  );
  let engine = Arc::new(ReconciliationEngine::new(store, source, settings.sync.clone()));

  match cli.command {
    Command::Sync { kind } => sync_once(&engine, kind).await,
    Command::Run => {
      let cancel = shutdown_token();
      Scheduler::new(engine, settings.schedule).run(&cancel).await;
      Ok(())
    }
    Command::PurgeAudit => {
      let cutoff = audit_cutoff(engine.config(), Utc::now());
      let removed = engine
        .store()
        .purge_audit_before(cutoff)
        .await
        .context("failed to purge sync audit")?;
      tracing::info!(removed, %cutoff, "purged sync audit");
      Ok(())
    }
    Command::History { external_id } => print_history(engine.store(), ExternalId(external_id)).await,
    Command::Merge { source_id, target_id } => {
      let report = engine
        .merge(DemographicId(source_id), DemographicId(target_id))
        .await
        .context("failed to merge demographics")?;
      println!("{}", serde_json::to_string_pretty(&report)?);
      Ok(())
    }
  }
}

async fn sync_once(engine: &Engine, kind: SyncKind) -> anyhow::Result<()> {
  let cancel = shutdown_token();
  match engine.run_cycle(kind, &cancel).await {
    Ok(report) => {
      println!("{}", serde_json::to_string_pretty(&report)?);
      Ok(())
    }
    Err(aborted) => {
      println!("{}", serde_json::to_string_pretty(&aborted.report)?);
      Err(aborted.into())
    }
  }
}

async fn print_history(store: &SqliteStore, external_id: ExternalId) -> anyhow::Result<()> {
  let found = store
    .find_by_external_ids(vec![external_id])
    .await
    .context("failed to look up demographic")?;
  let Some(demographic) = found.into_iter().next() else {
    bail!("no demographic with external id {external_id}");
  };
  let history = store
    .history_for(demographic.id)
    .await
    .context("failed to read history")?;
  println!("{}", serde_json::to_string_pretty(&history)?);
  Ok(())
}

/// A token cancelled by Ctrl-C.
fn shutdown_token() -> CancellationToken {
  let cancel = CancellationToken::new();
  let trigger = cancel.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      tracing::warn!("interrupt received; stopping before the next commit");
      trigger.cancel();
    }
  });
  cancel
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
