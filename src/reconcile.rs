//! Maps source-native team identifiers onto canonical teams.
//!
//! Matching is an exact comparison of normalized names across the whole team
//! catalog, so the same club seen in two leagues converges on one canonical
//! id. A renamed team is *not* recognised: it mints a new canonical identity
//! and the league's external id is re-pointed at it.

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::SqliteConnection;
use tracing::{debug, instrument, warn};

use crate::db;
use crate::model::TeamRecord;

static NON_ALNUM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\p{Alphabetic}\p{Nd}]+").expect("valid regex"));

/// Strip everything but Unicode letters and digits, then uppercase.
pub fn normalize_key(name: &str) -> String {
    NON_ALNUM.replace_all(name, "").to_uppercase()
}

/// Outcome of reconciling one league's team list.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileStats {
    pub created: usize,
    pub skipped: usize,
}

#[instrument(skip_all, fields(league_id = league_id))]
pub async fn reconcile_teams(
    conn: &mut SqliteConnection,
    league_id: i64,
    records: &[TeamRecord],
) -> Result<ReconcileStats> {
    let mut stats = ReconcileStats::default();
    for record in records {
        let key = normalize_key(&record.name);
        if key.is_empty() || record.external_id.trim().is_empty() {
            warn!(league_id, external_id = %record.external_id, name = %record.name, "skipping team record without usable name or id");
            stats.skipped += 1;
            continue;
        }

        let team_id = match db::find_team_by_key(conn, &key).await? {
            Some(id) => id,
            None => {
                let id = db::insert_team(conn, record.name.trim(), record.short_name.as_deref(), &key).await?;
                debug!(league_id, team_id = id, name = %record.name, "minted canonical team");
                stats.created += 1;
                id
            }
        };
        db::upsert_league_team(conn, league_id, &record.external_id, team_id).await?;
    }
    Ok(stats)
}
