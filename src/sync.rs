//! Per-league fetch, reconcile, diff and persist cycle.
//!
//! All fetches happen first, outside any transaction, each under its own
//! timeout. Reconciliation, game diffing, digest bookkeeping and fan-out then
//! run in one SQLite transaction that is committed at the `Persist` stage, so a
//! failed or cancelled cycle leaves neither digests nor messages behind.
//!
//! SQLite admits one writer, so cycles fetch concurrently but take turns on
//! the write transaction.

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use sqlx::SqliteConnection;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::compose::{self, GameChangeKind, GameEvent};
use crate::db::{self, Pool};
use crate::detect;
use crate::error::{Error, Result};
use crate::matcher;
use crate::model::{Category, FeedRecord, Game, GameRecord, League, LeagueInfo, TeamRecord};
use crate::outbox;
use crate::reconcile;
use crate::source::SourceRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    FetchInfo,
    FetchTeams,
    ReconcileTeams,
    FetchGames,
    DiffGames,
    Persist,
    Done,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub league_id: i64,
    pub info_updated: bool,
    pub teams_created: usize,
    pub teams_skipped: usize,
    pub games_inserted: usize,
    pub games_updated: usize,
    pub games_skipped: usize,
    pub game_events: usize,
    pub feed_items: usize,
    pub messages: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed(CycleReport),
    /// Another cycle for the same league was still running.
    Skipped,
}

/// Everything fetched from the adapters for one cycle.
#[derive(Debug, Default)]
struct Fetched {
    info: Option<LeagueInfo>,
    teams: Option<Vec<TeamRecord>>,
    games: Option<Vec<GameRecord>>,
    feeds: Vec<(Category, Vec<FeedRecord>)>,
}

/// Result of comparing one source game with the stored row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameDiff {
    Inserted(Game),
    Updated { before: Game, after: Game },
    Unchanged,
}

impl GameDiff {
    /// Whether this diff deserves an announcement.
    pub fn change_kind(&self, initial_import: bool) -> Option<GameChangeKind> {
        match self {
            GameDiff::Inserted(game) if game.is_scored() && !initial_import => {
                Some(GameChangeKind::Final)
            }
            GameDiff::Updated { before, after } if after.is_scored() => {
                if !before.is_scored() {
                    Some(GameChangeKind::Final)
                } else if before.visitor_score != after.visitor_score
                    || before.home_score != after.home_score
                {
                    Some(GameChangeKind::Corrected {
                        visitor: before.visitor_score.unwrap_or_default(),
                        home: before.home_score.unwrap_or_default(),
                    })
                } else {
                    None
                }
            }
            _ => None,
        }
    }
}

pub struct Synchronizer {
    pool: Pool,
    registry: Arc<SourceRegistry>,
    fetch_timeout: Duration,
    in_flight: Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>,
    write_lock: AsyncMutex<()>,
}

impl Synchronizer {
    pub fn new(pool: Pool, registry: Arc<SourceRegistry>, fetch_timeout: Duration) -> Self {
        Self {
            pool,
            registry,
            fetch_timeout,
            in_flight: Mutex::new(HashMap::new()),
            write_lock: AsyncMutex::new(()),
        }
    }

    fn league_lock(&self, league_id: i64) -> Arc<AsyncMutex<()>> {
        let mut map = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        map.entry(league_id).or_default().clone()
    }

    /// Run one cycle for `league`. At most one cycle per league is in flight;
    /// a second caller gets [`CycleOutcome::Skipped`].
    pub async fn sync_league(
        &self,
        league: &League,
        cancel: &CancellationToken,
    ) -> Result<CycleOutcome> {
        let Ok(_guard) = self.league_lock(league.id).try_lock_owned() else {
            debug!(league_id = league.id, "cycle already in flight; skipping");
            return Ok(CycleOutcome::Skipped);
        };

        let span = info_span!(
            "cycle",
            cycle_id = %Uuid::new_v4(),
            league_id = league.id,
            site = %league.site_id,
        );
        async {
            let mut stage = Stage::FetchInfo;
            match self.run_cycle(league, cancel, &mut stage).await {
                Ok(report) => {
                    info!(
                        games_inserted = report.games_inserted,
                        games_updated = report.games_updated,
                        games_skipped = report.games_skipped,
                        feed_items = report.feed_items,
                        messages = report.messages,
                        "league cycle done"
                    );
                    Ok(CycleOutcome::Completed(report))
                }
                Err(err) => {
                    warn!(failed_at = ?stage, %err, "league cycle failed");
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Run every league, at most `max_concurrent` at a time. One league's
    /// failure never affects the others.
    pub async fn sync_all(
        &self,
        leagues: &[League],
        max_concurrent: usize,
        cancel: &CancellationToken,
    ) -> Vec<(i64, Result<CycleOutcome>)> {
        let cycles: Vec<BoxFuture<'_, (i64, Result<CycleOutcome>)>> = leagues
            .iter()
            .map(|league| {
                async move { (league.id, self.sync_league(league, cancel).await) }.boxed()
            })
            .collect();
        stream::iter(cycles)
            .buffer_unordered(max_concurrent.max(1))
            .collect()
            .await
    }

    async fn fetch<T, F>(&self, league: &League, what: &str, fut: F) -> Result<Option<T>>
    where
        F: Future<Output = anyhow::Result<Option<T>>>,
    {
        let unavailable = |source: anyhow::Error| Error::SourceUnavailable {
            site: league.site_id.clone(),
            league: league.name.clone(),
            source,
        };
        match tokio::time::timeout(self.fetch_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(unavailable(err.context(format!("fetching {what}")))),
            Err(_) => Err(unavailable(anyhow::anyhow!(
                "fetching {what} timed out after {:?}",
                self.fetch_timeout
            ))),
        }
    }

    async fn fetch_all(
        &self,
        league: &League,
        cancel: &CancellationToken,
        stage: &mut Stage,
    ) -> Result<Fetched> {
        let site = &league.site_id;
        let mut fetched = Fetched::default();

        *stage = Stage::FetchInfo;
        if let Some(source) = self.registry.league_info(site) {
            fetched.info = self.fetch(league, "league info", source.fetch_league_info(league)).await?;
        }
        checkpoint(cancel)?;

        *stage = Stage::FetchTeams;
        if let Some(source) = self.registry.teams(site) {
            fetched.teams = self.fetch(league, "teams", source.fetch_teams(league)).await?;
        }
        checkpoint(cancel)?;

        *stage = Stage::FetchGames;
        if let Some(source) = self.registry.games(site) {
            fetched.games = self.fetch(league, "games", source.fetch_games(league)).await?;
        }
        // Feeds are optional extras: a broken category is skipped with its
        // digest untouched, and never holds back the rest of the league.
        for category in Category::FEEDS {
            checkpoint(cancel)?;
            let Some(source) = self.registry.feed(site, category) else {
                continue;
            };
            match self
                .fetch(league, category.as_str(), source.fetch_feed(league, category))
                .await
            {
                Ok(Some(records)) => fetched.feeds.push((category, records)),
                Ok(None) => {}
                Err(err) => warn!(%category, %err, "feed unavailable; skipping it this cycle"),
            }
        }
        checkpoint(cancel)?;
        Ok(fetched)
    }

    async fn run_cycle(
        &self,
        league: &League,
        cancel: &CancellationToken,
        stage: &mut Stage,
    ) -> Result<CycleReport> {
        let fetched = self.fetch_all(league, cancel, stage).await?;
        let mut report = CycleReport {
            league_id: league.id,
            ..Default::default()
        };

        let _write = self.write_lock.lock().await;
        checkpoint(cancel)?;
        let mut tx = self.pool.begin().await?;
        // Write first so the transaction holds SQLite's write lock from the
        // start instead of upgrading from a read snapshot.
        db::ensure_league_state(&mut tx, league.id).await?;

        if let Some(info) = &fetched.info {
            report.info_updated = db::update_league_info(&mut tx, league.id, info).await?;
        }

        *stage = Stage::ReconcileTeams;
        if let Some(teams) = &fetched.teams {
            let stats = reconcile::reconcile_teams(&mut tx, league.id, teams).await?;
            report.teams_created = stats.created;
            report.teams_skipped = stats.skipped;
        }
        let team_map = db::league_team_map(&mut tx, league.id).await?;
        checkpoint(cancel)?;

        *stage = Stage::DiffGames;
        if let Some(games) = &fetched.games {
            // No games payload recorded yet: this is the league's first import.
            let initial_import = db::get_state_hash(&mut tx, league.id, Category::Games)
                .await?
                .is_none();
            let digest = detect::digest(games)?;
            if !detect::has_changed(&mut tx, league.id, Category::Games, &digest).await? {
                debug!("games payload unchanged");
            }

            let mut events = Vec::new();
            for record in games {
                let (visitor, home) = match resolve_teams(league.id, &team_map, record) {
                    Ok(ids) => ids,
                    Err(err) => {
                        warn!(game_id = %record.game_id, %err, "skipping game");
                        report.games_skipped += 1;
                        continue;
                    }
                };
                let diff = diff_game(&mut tx, league.id, record, visitor, home).await?;
                match &diff {
                    GameDiff::Inserted(_) => report.games_inserted += 1,
                    GameDiff::Updated { .. } => report.games_updated += 1,
                    GameDiff::Unchanged => {}
                }
                if let Some(kind) = diff.change_kind(initial_import) {
                    if let GameDiff::Inserted(game) | GameDiff::Updated { after: game, .. } = diff {
                        events.push((game, kind));
                    }
                }
            }
            if initial_import && report.games_inserted > 0 {
                info!(games = report.games_inserted, "initial game import; not announcing");
            }
            report.game_events = events.len();
            for (game, kind) in events {
                report.messages += fan_out_game(&mut tx, league, game, kind).await?;
            }
        }
        checkpoint(cancel)?;

        for (category, records) in &fetched.feeds {
            let (announced, messages) =
                fan_out_feed(&mut tx, league, &team_map, *category, records).await?;
            report.feed_items += announced;
            report.messages += messages;
        }

        checkpoint(cancel)?;
        *stage = Stage::Persist;
        tx.commit().await?;
        *stage = Stage::Done;
        Ok(report)
    }
}

fn checkpoint(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    Ok(())
}

fn resolve_teams(
    league_id: i64,
    team_map: &HashMap<String, i64>,
    record: &GameRecord,
) -> Result<(i64, i64)> {
    let lookup = |external_id: &str| {
        team_map
            .get(external_id)
            .copied()
            .ok_or_else(|| Error::UnknownExternalId {
                league_id,
                external_id: external_id.to_string(),
            })
    };
    Ok((
        lookup(&record.visitor_external_id)?,
        lookup(&record.home_external_id)?,
    ))
}

/// Insert the game, update it when a tracked field moved, or leave it alone.
pub async fn diff_game(
    conn: &mut SqliteConnection,
    league_id: i64,
    record: &GameRecord,
    visitor_team_id: i64,
    home_team_id: i64,
) -> anyhow::Result<GameDiff> {
    let Some(before) = db::find_game(conn, league_id, &record.game_id).await? else {
        let game = db::insert_game(conn, league_id, record, visitor_team_id, home_team_id).await?;
        return Ok(GameDiff::Inserted(game));
    };

    let after = Game {
        played_at: record.played_at,
        visitor_team_id,
        home_team_id,
        visitor_score: record.visitor_score,
        home_score: record.home_score,
        overtime: record.overtime,
        shootout: record.shootout,
        ..before.clone()
    };
    if after == before {
        return Ok(GameDiff::Unchanged);
    }
    db::update_game(conn, &after).await?;
    Ok(GameDiff::Updated { before, after })
}

async fn fan_out_game(
    conn: &mut SqliteConnection,
    league: &League,
    game: Game,
    kind: GameChangeKind,
) -> anyhow::Result<usize> {
    let teams = [game.home_team_id, game.visitor_team_id];
    let groups = matcher::match_watchers(conn, league.id, Category::Games, &teams).await?;
    if groups.is_empty() {
        return Ok(0);
    }
    let names = db::teams_by_id(conn, &teams).await?;
    let name_of = |id: i64| {
        names
            .get(&id)
            .map(|t| t.name.clone())
            .unwrap_or_else(|| format!("team #{id}"))
    };
    let event = GameEvent {
        visitor_name: name_of(game.visitor_team_id),
        home_name: name_of(game.home_team_id),
        game,
        kind,
    };
    for group in &groups {
        let message = compose::compose_game(group, &league.name, &event);
        outbox::enqueue(conn, &message).await?;
    }
    Ok(groups.len())
}

/// Digest the category; when it moved, announce the records not seen before.
/// Returns `(records announced, messages enqueued)`.
async fn fan_out_feed(
    conn: &mut SqliteConnection,
    league: &League,
    team_map: &HashMap<String, i64>,
    category: Category,
    records: &[FeedRecord],
) -> anyhow::Result<(usize, usize)> {
    let digest = detect::digest(records)?;
    let baseline = db::get_state_hash(conn, league.id, category).await?.is_none();
    if !detect::has_changed(conn, league.id, category, &digest).await? {
        return Ok((0, 0));
    }

    let mut fresh = Vec::new();
    for record in records {
        let item_hash = detect::item_digest(record)?;
        if db::insert_feed_item(conn, league.id, category, &item_hash).await? {
            fresh.push(record);
        }
    }
    if baseline {
        debug!(%category, items = fresh.len(), "first sight of feed; recorded without announcing");
        return Ok((0, 0));
    }
    if fresh.is_empty() {
        return Ok((0, 0));
    }

    let team_ids_of = |record: &FeedRecord| -> Vec<i64> {
        record
            .team_external_ids
            .iter()
            .filter_map(|ext| team_map.get(ext).copied())
            .collect()
    };
    let all_teams: Vec<i64> = fresh
        .iter()
        .flat_map(|r| team_ids_of(*r))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let groups = matcher::match_watchers(conn, league.id, category, &all_teams).await?;
    let mut messages = 0;
    for group in &groups {
        let relevant: Vec<FeedRecord> = if group.is_league_wide() {
            fresh.iter().map(|r| (*r).clone()).collect()
        } else {
            fresh
                .iter()
                .filter(|r| group.teams_in(&team_ids_of(**r)).next().is_some())
                .map(|r| (*r).clone())
                .collect()
        };
        if relevant.is_empty() {
            continue;
        }
        for message in compose::compose_feed(group, &league.name, category, &relevant) {
            outbox::enqueue(conn, &message).await?;
            messages += 1;
        }
    }
    Ok((fresh.len(), messages))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn game(visitor: Option<i32>, home: Option<i32>) -> Game {
        Game {
            id: 1,
            league_id: 1,
            game_id: "g".into(),
            played_at: Utc.with_ymd_and_hms(2024, 1, 1, 19, 0, 0).unwrap(),
            visitor_team_id: 1,
            home_team_id: 2,
            visitor_score: visitor,
            home_score: home,
            overtime: false,
            shootout: false,
        }
    }

    #[test]
    fn scoring_an_unscored_game_is_final() {
        let diff = GameDiff::Updated {
            before: game(None, None),
            after: game(Some(2), Some(1)),
        };
        assert_eq!(diff.change_kind(false), Some(GameChangeKind::Final));
    }

    #[test]
    fn changed_score_is_a_correction() {
        let diff = GameDiff::Updated {
            before: game(Some(2), Some(1)),
            after: game(Some(3), Some(1)),
        };
        assert_eq!(
            diff.change_kind(false),
            Some(GameChangeKind::Corrected { visitor: 2, home: 1 })
        );
    }

    #[test]
    fn reschedule_without_score_change_is_silent() {
        let mut after = game(Some(2), Some(1));
        after.played_at = Utc.with_ymd_and_hms(2024, 1, 2, 19, 0, 0).unwrap();
        let diff = GameDiff::Updated {
            before: game(Some(2), Some(1)),
            after,
        };
        assert_eq!(diff.change_kind(false), None);
        assert_eq!(GameDiff::Unchanged.change_kind(false), None);
    }

    #[test]
    fn initial_import_suppresses_inserted_finals() {
        let diff = GameDiff::Inserted(game(Some(1), Some(0)));
        assert_eq!(diff.change_kind(true), None);
        assert_eq!(diff.change_kind(false), Some(GameChangeKind::Final));
        assert_eq!(GameDiff::Inserted(game(None, None)).change_kind(false), None);
    }
}
