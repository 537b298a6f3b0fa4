use super::model::{
    game_from_row, join_tags, league_from_row, message_from_row, team_from_row, watcher_from_row,
};
use crate::model::{
    Category, Game, GameRecord, League, LeagueInfo, NewMessage, OutboundMessage, Team, Watcher,
};
use crate::source::registry::SiteDescriptor;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::HashMap;
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    // Create the file on first run.
    let mut rebuilt = format!("sqlite://{}", expanded_path);
    match query_part {
        Some(q) => {
            rebuilt.push('?');
            rebuilt.push_str(q);
        }
        None => rebuilt.push_str("?mode=rwc"),
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

// ---- sites & leagues -------------------------------------------------------

/// Insert sites declared by registered adapters; existing rows pick up the
/// adapter's display name and tags. The enabled flag is left to the caller.
#[instrument(skip_all)]
pub async fn seed_sites(pool: &Pool, sites: &[SiteDescriptor]) -> Result<()> {
    let mut tx = pool.begin().await?;
    for site in sites {
        sqlx::query(
            "INSERT INTO sites (id, name, tags) VALUES (?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, tags = excluded.tags",
        )
        .bind(site.id.as_str())
        .bind(&site.name)
        .bind(join_tags(&site.tags))
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn set_site_enabled(pool: &Pool, site_id: &str, enabled: bool) -> Result<()> {
    sqlx::query("UPDATE sites SET enabled = ? WHERE id = ?")
        .bind(enabled)
        .bind(site_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Find-or-create keyed on `(site_id, name)`.
#[instrument(skip_all)]
pub async fn get_or_create_league(
    pool: &Pool,
    site_id: &str,
    name: &str,
    tags: &[String],
) -> Result<i64> {
    if let Some(id) =
        sqlx::query_scalar::<_, i64>("SELECT id FROM leagues WHERE site_id = ? AND name = ?")
            .bind(site_id)
            .bind(name)
            .fetch_optional(pool)
            .await?
    {
        return Ok(id);
    }

    let rec = sqlx::query("INSERT INTO leagues (site_id, name, tags) VALUES (?, ?, ?) RETURNING id")
        .bind(site_id)
        .bind(name)
        .bind(join_tags(tags))
        .fetch_one(pool)
        .await
        .with_context(|| format!("failed to create league {site_id}/{name}"))?;
    Ok(rec.get::<i64, _>("id"))
}

pub async fn get_league(pool: &Pool, league_id: i64) -> Result<Option<League>> {
    let row = sqlx::query("SELECT * FROM leagues WHERE id = ?")
        .bind(league_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(league_from_row).transpose()
}

pub async fn list_site_ids(pool: &Pool) -> Result<Vec<String>> {
    let ids = sqlx::query_scalar("SELECT id FROM sites ORDER BY id")
        .fetch_all(pool)
        .await?;
    Ok(ids)
}

pub async fn list_site_leagues(pool: &Pool, site_id: &str) -> Result<Vec<League>> {
    let rows = sqlx::query("SELECT * FROM leagues WHERE site_id = ? ORDER BY id")
        .bind(site_id)
        .fetch_all(pool)
        .await?;
    rows.iter().map(league_from_row).collect()
}

/// Enabled leagues on enabled sites.
#[instrument(skip_all)]
pub async fn list_enabled_leagues(pool: &Pool) -> Result<Vec<League>> {
    let rows = sqlx::query(
        "SELECT l.* FROM leagues l JOIN sites s ON s.id = l.site_id \
         WHERE l.enabled = 1 AND s.enabled = 1 ORDER BY l.id",
    )
    .fetch_all(pool)
    .await?;
    rows.iter().map(league_from_row).collect()
}

#[instrument(skip_all)]
pub async fn set_league_enabled(pool: &Pool, league_id: i64, enabled: bool) -> Result<()> {
    sqlx::query("UPDATE leagues SET enabled = ? WHERE id = ?")
        .bind(enabled)
        .bind(league_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Returns true when the stored payload was different.
pub async fn update_league_info(
    conn: &mut SqliteConnection,
    league_id: i64,
    info: &LeagueInfo,
) -> Result<bool> {
    let (tag, payload) = info.to_parts()?;
    let res = sqlx::query(
        "UPDATE leagues SET info_type = ?, info_json = ? WHERE id = ? \
         AND (info_type IS NOT ? OR info_json IS NOT ?)",
    )
    .bind(tag)
    .bind(&payload)
    .bind(league_id)
    .bind(tag)
    .bind(&payload)
    .execute(&mut *conn)
    .await?;
    Ok(res.rows_affected() > 0)
}

// ---- teams -----------------------------------------------------------------

pub async fn find_team_by_key(conn: &mut SqliteConnection, name_key: &str) -> Result<Option<i64>> {
    let id = sqlx::query_scalar::<_, i64>("SELECT id FROM teams WHERE name_key = ?")
        .bind(name_key)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(id)
}

pub async fn insert_team(
    conn: &mut SqliteConnection,
    name: &str,
    short_name: Option<&str>,
    name_key: &str,
) -> Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO teams (name, short_name, name_key) VALUES (?, ?, ?) RETURNING id",
    )
    .bind(name)
    .bind(short_name)
    .bind(name_key)
    .fetch_one(&mut *conn)
    .await?;
    Ok(rec.get("id"))
}

pub async fn get_team(pool: &Pool, team_id: i64) -> Result<Option<Team>> {
    let row = sqlx::query("SELECT * FROM teams WHERE id = ?")
        .bind(team_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(team_from_row).transpose()
}

/// Teams by id, for rendering names.
pub async fn teams_by_id(conn: &mut SqliteConnection, ids: &[i64]) -> Result<HashMap<i64, Team>> {
    let mut out = HashMap::with_capacity(ids.len());
    for id in ids {
        if out.contains_key(id) {
            continue;
        }
        let row = sqlx::query("SELECT * FROM teams WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        if let Some(row) = row {
            out.insert(*id, team_from_row(&row)?);
        }
    }
    Ok(out)
}

pub async fn upsert_league_team(
    conn: &mut SqliteConnection,
    league_id: i64,
    external_id: &str,
    team_id: i64,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO league_teams (league_id, external_id, team_id) VALUES (?, ?, ?) \
         ON CONFLICT(league_id, external_id) DO UPDATE SET team_id = excluded.team_id",
    )
    .bind(league_id)
    .bind(external_id)
    .bind(team_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// external id -> canonical team id for one league.
pub async fn league_team_map(
    conn: &mut SqliteConnection,
    league_id: i64,
) -> Result<HashMap<String, i64>> {
    let rows = sqlx::query("SELECT external_id, team_id FROM league_teams WHERE league_id = ?")
        .bind(league_id)
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows
        .into_iter()
        .map(|row| (row.get::<String, _>("external_id"), row.get::<i64, _>("team_id")))
        .collect())
}

// ---- games -----------------------------------------------------------------

pub async fn find_game(
    conn: &mut SqliteConnection,
    league_id: i64,
    game_id: &str,
) -> Result<Option<Game>> {
    let row = sqlx::query("SELECT * FROM games WHERE league_id = ? AND game_id = ?")
        .bind(league_id)
        .bind(game_id)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(game_from_row).transpose()
}

pub async fn list_games(pool: &Pool, league_id: i64) -> Result<Vec<Game>> {
    let rows = sqlx::query("SELECT * FROM games WHERE league_id = ? ORDER BY played_at, id")
        .bind(league_id)
        .fetch_all(pool)
        .await?;
    rows.iter().map(game_from_row).collect()
}

pub async fn insert_game(
    conn: &mut SqliteConnection,
    league_id: i64,
    record: &GameRecord,
    visitor_team_id: i64,
    home_team_id: i64,
) -> Result<Game> {
    let row = sqlx::query(
        "INSERT INTO games (league_id, game_id, played_at, visitor_team_id, home_team_id, \
         visitor_score, home_score, overtime, shootout) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING *",
    )
    .bind(league_id)
    .bind(&record.game_id)
    .bind(record.played_at)
    .bind(visitor_team_id)
    .bind(home_team_id)
    .bind(record.visitor_score)
    .bind(record.home_score)
    .bind(record.overtime)
    .bind(record.shootout)
    .fetch_one(&mut *conn)
    .await?;
    game_from_row(&row)
}

pub async fn update_game(conn: &mut SqliteConnection, game: &Game) -> Result<()> {
    sqlx::query(
        "UPDATE games SET played_at = ?, visitor_team_id = ?, home_team_id = ?, visitor_score = ?, \
         home_score = ?, overtime = ?, shootout = ? WHERE id = ?",
    )
    .bind(game.played_at)
    .bind(game.visitor_team_id)
    .bind(game.home_team_id)
    .bind(game.visitor_score)
    .bind(game.home_score)
    .bind(game.overtime)
    .bind(game.shootout)
    .bind(game.id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

// ---- league state ----------------------------------------------------------

/// Make sure the league has a state row. Cycles issue this first, so their
/// transaction takes the write lock before reading anything.
pub async fn ensure_league_state(conn: &mut SqliteConnection, league_id: i64) -> Result<()> {
    sqlx::query("INSERT INTO league_states (league_id) VALUES (?) ON CONFLICT(league_id) DO NOTHING")
        .bind(league_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn get_state_hash(
    conn: &mut SqliteConnection,
    league_id: i64,
    category: Category,
) -> Result<Option<String>> {
    let sql = format!(
        "SELECT {}_hash FROM league_states WHERE league_id = ?",
        category.state_column()
    );
    let hash: Option<Option<String>> = sqlx::query_scalar(&sql)
        .bind(league_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(hash.flatten())
}

pub async fn set_state_hash(
    conn: &mut SqliteConnection,
    league_id: i64,
    category: Category,
    hash: &str,
    at: DateTime<Utc>,
) -> Result<()> {
    let column = category.state_column();
    let sql = format!(
        "INSERT INTO league_states (league_id, {column}_hash, {column}_at) VALUES (?, ?, ?) \
         ON CONFLICT(league_id) DO UPDATE SET {column}_hash = excluded.{column}_hash, \
         {column}_at = excluded.{column}_at"
    );
    sqlx::query(&sql)
        .bind(league_id)
        .bind(hash)
        .bind(at)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Records a per-item digest; returns true if it was not seen before.
pub async fn insert_feed_item(
    conn: &mut SqliteConnection,
    league_id: i64,
    category: Category,
    item_hash: &str,
) -> Result<bool> {
    let res = sqlx::query(
        "INSERT OR IGNORE INTO feed_items (league_id, category, item_hash, seen_at) \
         VALUES (?, ?, ?, ?)",
    )
    .bind(league_id)
    .bind(category.as_str())
    .bind(item_hash)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;
    Ok(res.rows_affected() > 0)
}

/// Forget feed items first seen before `cutoff`. The retention has to outlive
/// how long a site keeps an item on its feed, or the item is announced again.
#[instrument(skip_all)]
pub async fn prune_feed_items(pool: &Pool, cutoff: DateTime<Utc>) -> Result<u64> {
    let res = sqlx::query("DELETE FROM feed_items WHERE seen_at < ?")
        .bind(cutoff)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

// ---- watchers --------------------------------------------------------------

/// Adds a watcher, or returns the id of the identical active one.
#[instrument(skip_all)]
pub async fn add_watcher(
    pool: &Pool,
    guild_id: i64,
    channel_id: Option<i64>,
    league_id: i64,
    team_id: Option<i64>,
    category: Category,
) -> Result<i64> {
    let mut tx = pool.begin().await?;
    let existing = sqlx::query_scalar::<_, i64>(
        "SELECT id FROM watchers WHERE guild_id = ? AND channel_id IS ? AND league_id = ? \
         AND team_id IS ? AND category = ? AND archived_at IS NULL",
    )
    .bind(guild_id)
    .bind(channel_id)
    .bind(league_id)
    .bind(team_id)
    .bind(category.as_str())
    .fetch_optional(&mut *tx)
    .await?;
    if let Some(id) = existing {
        return Ok(id);
    }
    let rec = sqlx::query(
        "INSERT INTO watchers (guild_id, channel_id, league_id, team_id, category, created_at) \
         VALUES (?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(guild_id)
    .bind(channel_id)
    .bind(league_id)
    .bind(team_id)
    .bind(category.as_str())
    .bind(Utc::now())
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(rec.get("id"))
}

/// Soft-deletes a watcher. Returns false if it was already archived or missing.
#[instrument(skip_all)]
pub async fn archive_watcher(pool: &Pool, watcher_id: i64) -> Result<bool> {
    let res = sqlx::query("UPDATE watchers SET archived_at = ? WHERE id = ? AND archived_at IS NULL")
        .bind(Utc::now())
        .bind(watcher_id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}

pub async fn list_watchers(pool: &Pool, guild_id: i64) -> Result<Vec<Watcher>> {
    let rows = sqlx::query(
        "SELECT * FROM watchers WHERE guild_id = ? AND archived_at IS NULL ORDER BY id",
    )
    .bind(guild_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(watcher_from_row).collect()
}

/// Active watchers on `(league, category)`, any team filter.
pub async fn active_watchers(
    conn: &mut SqliteConnection,
    league_id: i64,
    category: Category,
) -> Result<Vec<Watcher>> {
    let rows = sqlx::query(
        "SELECT * FROM watchers WHERE league_id = ? AND category = ? AND archived_at IS NULL \
         ORDER BY guild_id, channel_id, id",
    )
    .bind(league_id)
    .bind(category.as_str())
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(watcher_from_row).collect()
}

/// Hard-deletes watchers archived before `cutoff`.
#[instrument(skip_all)]
pub async fn prune_archived_watchers(pool: &Pool, cutoff: DateTime<Utc>) -> Result<u64> {
    let res = sqlx::query("DELETE FROM watchers WHERE archived_at IS NOT NULL AND archived_at < ?")
        .bind(cutoff)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

// ---- outbound messages -----------------------------------------------------

pub async fn insert_message(
    conn: &mut SqliteConnection,
    message: &NewMessage,
    created_at: DateTime<Utc>,
) -> Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO outbound_messages (guild_id, channel_id, title, content, created_at) \
         VALUES (?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(message.guild_id)
    .bind(message.channel_id)
    .bind(&message.title)
    .bind(&message.content)
    .bind(created_at)
    .fetch_one(&mut *conn)
    .await?;
    Ok(rec.get("id"))
}

pub async fn pending_messages(pool: &Pool, limit: i64) -> Result<Vec<OutboundMessage>> {
    let rows = sqlx::query(
        "SELECT * FROM outbound_messages WHERE sent_at IS NULL \
         ORDER BY created_at ASC, guild_id ASC, id ASC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.iter().map(message_from_row).collect()
}

/// Returns false when the message was already marked or does not exist.
pub async fn mark_message_sent(pool: &Pool, id: i64, at: DateTime<Utc>) -> Result<bool> {
    let res = sqlx::query("UPDATE outbound_messages SET sent_at = ? WHERE id = ? AND sent_at IS NULL")
        .bind(at)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}

pub async fn count_messages(pool: &Pool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM outbound_messages")
        .fetch_one(pool)
        .await?;
    Ok(count)
}
