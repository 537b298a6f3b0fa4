use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use league_watchbot::compose::{render_table, MAX_MESSAGE_LEN};
use league_watchbot::sync::{CycleOutcome, Synchronizer};
use league_watchbot::{config, db, setup};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Run one sync cycle for every enabled league and exit"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Only sync the league with this id
    #[arg(long)]
    league: Option<i64>,

    /// Exit with an error if any league cycle failed
    #[arg(long)]
    strict: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&setup::database_url(&cfg)).await?;
    db::run_migrations(&pool).await?;

    let registry = Arc::new(setup::build_registry(&cfg)?);
    setup::seed(&pool, &cfg, &registry).await?;

    let mut leagues = db::list_enabled_leagues(&pool).await?;
    if let Some(id) = args.league {
        leagues.retain(|l| l.id == id);
    }
    if leagues.is_empty() {
        info!("No enabled leagues to sync, exiting");
        return Ok(());
    }

    let sync = Synchronizer::new(pool.clone(), registry, cfg.app.fetch_timeout());
    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted; abandoning in-flight cycles");
            ctrl_c.cancel();
        }
    });

    info!(leagues = leagues.len(), "Starting one-shot sync");
    let results = sync
        .sync_all(&leagues, cfg.app.max_concurrent_leagues, &cancel)
        .await;

    let mut failed = 0;
    let mut rows = Vec::new();
    for (league_id, result) in results {
        let name = leagues
            .iter()
            .find(|l| l.id == league_id)
            .map(|l| l.name.clone())
            .unwrap_or_default();
        let row = match result {
            Ok(CycleOutcome::Completed(r)) => vec![
                name,
                "ok".to_string(),
                r.games_inserted.to_string(),
                r.games_updated.to_string(),
                r.games_skipped.to_string(),
                r.feed_items.to_string(),
                r.messages.to_string(),
            ],
            Ok(CycleOutcome::Skipped) => vec![name, "busy".to_string()],
            Err(err) => {
                failed += 1;
                error!(league_id, %err, "league sync failed");
                vec![name, "failed".to_string()]
            }
        };
        rows.push(row);
    }

    let pending = db::pending_messages(&pool, i64::MAX).await?.len();
    for chunk in render_table(
        &["League", "Status", "New", "Updated", "Skipped", "Feed", "Msgs"],
        &rows,
        MAX_MESSAGE_LEN,
    ) {
        println!("{chunk}");
    }
    info!(pending_messages = pending, failed, "One-shot sync completed");

    if args.strict && failed > 0 {
        anyhow::bail!("{failed} league(s) failed to sync");
    }
    Ok(())
}
