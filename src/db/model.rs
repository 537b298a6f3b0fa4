//! Row mapping between SQLite and the domain entities.
//!
//! Keep these helpers focused on column decoding. Business logic lives in
//! higher layers.

use anyhow::{anyhow, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::warn;

use crate::model::{Category, Game, League, LeagueInfo, OutboundMessage, SiteId, Team, Watcher};

pub fn join_tags(tags: &[String]) -> String {
    tags.iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(",")
}

pub fn split_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn league_from_row(row: &SqliteRow) -> Result<League> {
    let id: i64 = row.try_get("id")?;
    let info_type: Option<String> = row.try_get("info_type")?;
    let info_json: Option<String> = row.try_get("info_json")?;
    // A payload this binary cannot read is dropped rather than failing the listing.
    let info = match (info_type, info_json) {
        (Some(tag), Some(payload)) => match LeagueInfo::from_parts(&tag, &payload) {
            Ok(info) => Some(info),
            Err(err) => {
                warn!(league_id = id, %err, "ignoring unreadable league info");
                None
            }
        },
        _ => None,
    };
    Ok(League {
        id,
        site_id: SiteId::new(row.try_get::<String, _>("site_id")?),
        name: row.try_get("name")?,
        info,
        tags: split_tags(&row.try_get::<String, _>("tags")?),
        enabled: row.try_get("enabled")?,
    })
}

pub fn team_from_row(row: &SqliteRow) -> Result<Team> {
    Ok(Team {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        short_name: row.try_get("short_name")?,
        tags: split_tags(&row.try_get::<String, _>("tags")?),
    })
}

pub fn game_from_row(row: &SqliteRow) -> Result<Game> {
    Ok(Game {
        id: row.try_get("id")?,
        league_id: row.try_get("league_id")?,
        game_id: row.try_get("game_id")?,
        played_at: row.try_get("played_at")?,
        visitor_team_id: row.try_get("visitor_team_id")?,
        home_team_id: row.try_get("home_team_id")?,
        visitor_score: row.try_get("visitor_score")?,
        home_score: row.try_get("home_score")?,
        overtime: row.try_get("overtime")?,
        shootout: row.try_get("shootout")?,
    })
}

pub fn watcher_from_row(row: &SqliteRow) -> Result<Watcher> {
    let category: String = row.try_get("category")?;
    Ok(Watcher {
        id: row.try_get("id")?,
        guild_id: row.try_get("guild_id")?,
        channel_id: row.try_get("channel_id")?,
        league_id: row.try_get("league_id")?,
        team_id: row.try_get("team_id")?,
        category: Category::parse(&category)
            .ok_or_else(|| anyhow!("watcher has unknown category {category}"))?,
        created_at: row.try_get("created_at")?,
        archived_at: row.try_get("archived_at")?,
    })
}

pub fn message_from_row(row: &SqliteRow) -> Result<OutboundMessage> {
    Ok(OutboundMessage {
        id: row.try_get("id")?,
        guild_id: row.try_get("guild_id")?,
        channel_id: row.try_get("channel_id")?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        created_at: row.try_get("created_at")?,
        sent_at: row.try_get("sent_at")?,
    })
}
