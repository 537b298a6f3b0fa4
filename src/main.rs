use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use league_watchbot::cache::ListingCache;
use league_watchbot::outbox::{Delivery, LogDelivery};
use league_watchbot::sync::Synchronizer;
use league_watchbot::{config, db, scheduler, setup};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
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

    let sync = Arc::new(Synchronizer::new(
        pool.clone(),
        registry,
        cfg.app.fetch_timeout(),
    ));
    let cache = ListingCache::new(cfg.app.cache_ttl());
    let cancel = CancellationToken::new();

    let delivery: Arc<dyn Delivery> = Arc::new(LogDelivery);
    let tasks = vec![
        tokio::spawn(scheduler::run_poll_loop(
            sync,
            cache,
            pool.clone(),
            cfg.app.poll_interval(),
            cfg.app.max_concurrent_leagues,
            cancel.clone(),
        )),
        tokio::spawn(scheduler::run_delivery_loop(
            pool.clone(),
            delivery,
            cfg.app.delivery_interval(),
            cancel.clone(),
        )),
        tokio::spawn(scheduler::run_prune_loop(
            pool.clone(),
            cfg.app.watcher_retention(),
            cfg.app.feed_item_retention(),
            cancel.clone(),
        )),
    ];

    info!("league watcher running; ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    cancel.cancel();
    for task in tasks {
        task.await?;
    }
    pool.close().await;
    Ok(())
}
