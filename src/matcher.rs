//! Subscription matching and per-destination grouping.
use anyhow::Result;
use sqlx::SqliteConnection;
use std::collections::BTreeMap;

use crate::db;
use crate::model::{Category, Watcher};

/// All watchers that resolved to one `(guild, channel)` destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchGroup {
    pub guild_id: i64,
    pub channel_id: Option<i64>,
    /// Team filters of the matched watchers; `None` is a league-wide watcher.
    pub team_filters: Vec<Option<i64>>,
    pub watcher_ids: Vec<i64>,
}

impl WatchGroup {
    pub fn is_league_wide(&self) -> bool {
        self.team_filters.iter().any(Option::is_none)
    }

    /// Team filters of this group that are among `team_ids`, in `team_ids` order.
    pub fn teams_in<'a>(&'a self, team_ids: &'a [i64]) -> impl Iterator<Item = i64> + 'a {
        team_ids
            .iter()
            .copied()
            .filter(move |t| self.team_filters.contains(&Some(*t)))
    }
}

/// A watcher matches when it has no team filter or its team is in `team_ids`.
pub fn watcher_matches(watcher: &Watcher, team_ids: &[i64]) -> bool {
    match watcher.team_id {
        None => true,
        Some(team) => team_ids.contains(&team),
    }
}

/// Filter and group already-loaded watchers. Groups come out ordered by
/// `(guild, channel)`.
pub fn group_matches(watchers: &[Watcher], category: Category, team_ids: &[i64]) -> Vec<WatchGroup> {
    let mut groups: BTreeMap<(i64, Option<i64>), WatchGroup> = BTreeMap::new();
    for watcher in watchers
        .iter()
        .filter(|w| w.archived_at.is_none() && w.category == category)
        .filter(|w| watcher_matches(w, team_ids))
    {
        let group = groups
            .entry((watcher.guild_id, watcher.channel_id))
            .or_insert_with(|| WatchGroup {
                guild_id: watcher.guild_id,
                channel_id: watcher.channel_id,
                team_filters: Vec::new(),
                watcher_ids: Vec::new(),
            });
        if !group.team_filters.contains(&watcher.team_id) {
            group.team_filters.push(watcher.team_id);
        }
        group.watcher_ids.push(watcher.id);
    }
    groups.into_values().collect()
}

/// Load active watchers for `(league, category)` and group those matching `team_ids`.
pub async fn match_watchers(
    conn: &mut SqliteConnection,
    league_id: i64,
    category: Category,
    team_ids: &[i64],
) -> Result<Vec<WatchGroup>> {
    let watchers = db::active_watchers(conn, league_id, category).await?;
    Ok(group_matches(&watchers, category, team_ids))
}
