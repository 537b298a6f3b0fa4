use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cache::ListingCache;
use crate::db::{self, Pool};
use crate::outbox::{self, Delivery};
use crate::sync::{CycleOutcome, Synchronizer};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub messages: usize,
}

/// Run one pass over every enabled league.
pub async fn run_tick(
    sync: &Synchronizer,
    cache: &ListingCache,
    pool: &Pool,
    max_concurrent: usize,
    cancel: &CancellationToken,
) -> anyhow::Result<TickSummary> {
    let leagues = cache.enabled_leagues(pool).await?;
    let mut summary = TickSummary::default();
    for (league_id, result) in sync.sync_all(&leagues, max_concurrent, cancel).await {
        match result {
            Ok(CycleOutcome::Completed(report)) => {
                summary.completed += 1;
                summary.messages += report.messages;
            }
            Ok(CycleOutcome::Skipped) => summary.skipped += 1,
            Err(err) => {
                summary.failed += 1;
                warn!(league_id, %err, "league will be retried next tick");
            }
        }
    }
    Ok(summary)
}

/// Poll every `interval` until `cancel` fires.
pub async fn run_poll_loop(
    sync: Arc<Synchronizer>,
    cache: ListingCache,
    pool: Pool,
    interval: Duration,
    max_concurrent: usize,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        match run_tick(&sync, &cache, &pool, max_concurrent, &cancel).await {
            Ok(summary) => info!(
                completed = summary.completed,
                skipped = summary.skipped,
                failed = summary.failed,
                messages = summary.messages,
                "poll tick finished"
            ),
            Err(err) => error!(?err, "poll tick failed"),
        }
    }
    info!("poll loop stopped");
}

/// Drain the outbox into `delivery` every `interval` until `cancel` fires.
pub async fn run_delivery_loop(
    pool: Pool,
    delivery: Arc<dyn Delivery>,
    interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        match outbox::deliver_pending(&pool, delivery.as_ref(), 50).await {
            Ok(n) if n > 0 && !cancel.is_cancelled() => continue,
            Ok(_) => {}
            Err(err) => error!(?err, "outbox delivery pass failed"),
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
    info!("delivery loop stopped");
}

/// Hourly housekeeping: hard-delete archived watchers and forget old feed
/// items, each past its retention window.
pub async fn run_prune_loop(
    pool: Pool,
    watcher_retention: chrono::Duration,
    feed_item_retention: chrono::Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(3600));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let now = chrono::Utc::now();
        match db::prune_archived_watchers(&pool, now - watcher_retention).await {
            Ok(0) => {}
            Ok(n) => info!(pruned = n, "pruned archived watchers"),
            Err(err) => error!(?err, "watcher prune failed"),
        }
        match db::prune_feed_items(&pool, now - feed_item_retention).await {
            Ok(0) => {}
            Ok(n) => info!(pruned = n, "pruned feed items"),
            Err(err) => error!(?err, "feed item prune failed"),
        }
    }
    info!("prune loop stopped");
}
