use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Error;

/// Identifier an adapter uses to name the external site it talks to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SiteId(pub String);

impl SiteId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kinds of change a watcher can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Games,
    Bids,
    Contracts,
    Trades,
    Waivers,
    DraftPicks,
    DailyStars,
    RosterTransactions,
    News,
}

impl Category {
    pub const ALL: [Category; 9] = [
        Category::Games,
        Category::Bids,
        Category::Contracts,
        Category::Trades,
        Category::Waivers,
        Category::DraftPicks,
        Category::DailyStars,
        Category::RosterTransactions,
        Category::News,
    ];

    /// Every category except games, which are diffed row by row.
    pub const FEEDS: [Category; 8] = [
        Category::Bids,
        Category::Contracts,
        Category::Trades,
        Category::Waivers,
        Category::DraftPicks,
        Category::DailyStars,
        Category::RosterTransactions,
        Category::News,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Games => "games",
            Category::Bids => "bids",
            Category::Contracts => "contracts",
            Category::Trades => "trades",
            Category::Waivers => "waivers",
            Category::DraftPicks => "draft_picks",
            Category::DailyStars => "daily_stars",
            Category::RosterTransactions => "roster_transactions",
            Category::News => "news",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Category::ALL.into_iter().find(|c| c.as_str() == s)
    }

    pub fn is_feed(&self) -> bool {
        !matches!(self, Category::Games)
    }

    /// Column prefix in `league_states` (`<prefix>_hash`, `<prefix>_at`).
    pub fn state_column(&self) -> &'static str {
        match self {
            Category::Games => "game",
            Category::Bids => "bid",
            Category::Contracts => "contract",
            Category::Trades => "trade",
            Category::Waivers => "waiver",
            Category::DraftPicks => "draft_pick",
            Category::DailyStars => "daily_star",
            Category::RosterTransactions => "roster_transaction",
            Category::News => "news",
        }
    }

    /// Human label for one / many items, used in notification headers.
    pub fn noun(&self, count: usize) -> &'static str {
        let (one, many) = match self {
            Category::Games => ("game", "games"),
            Category::Bids => ("bid", "bids"),
            Category::Contracts => ("contract", "contracts"),
            Category::Trades => ("trade", "trades"),
            Category::Waivers => ("waiver", "waivers"),
            Category::DraftPicks => ("draft pick", "draft picks"),
            Category::DailyStars => ("daily star", "daily stars"),
            Category::RosterTransactions => ("roster move", "roster moves"),
            Category::News => ("news item", "news items"),
        };
        if count == 1 {
            one
        } else {
            many
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Adapter-specific league metadata. Persisted as `(tag, json)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum LeagueInfo {
    Season(SeasonInfo),
    Affiliate(AffiliateInfo),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeasonInfo {
    pub season: String,
    #[serde(default)]
    pub current_day: Option<u32>,
    #[serde(default)]
    pub playoffs: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffiliateInfo {
    pub season: String,
    /// Name of the parent league on the same site, if any.
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub affiliates: Vec<String>,
}

impl LeagueInfo {
    pub fn tag(&self) -> &'static str {
        match self {
            LeagueInfo::Season(_) => "season",
            LeagueInfo::Affiliate(_) => "affiliate",
        }
    }

    /// Split into the persisted `(tag, payload)` pair.
    pub fn to_parts(&self) -> serde_json::Result<(&'static str, String)> {
        let payload = match self {
            LeagueInfo::Season(info) => serde_json::to_string(info)?,
            LeagueInfo::Affiliate(info) => serde_json::to_string(info)?,
        };
        Ok((self.tag(), payload))
    }

    /// Rebuild from a persisted pair; unknown tags are rejected.
    pub fn from_parts(tag: &str, payload: &str) -> Result<Self, Error> {
        let info = match tag {
            "season" => LeagueInfo::Season(serde_json::from_str(payload)?),
            "affiliate" => LeagueInfo::Affiliate(serde_json::from_str(payload)?),
            other => return Err(Error::UnknownInfoTag(other.to_string())),
        };
        Ok(info)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct League {
    pub id: i64,
    pub site_id: SiteId,
    pub name: String,
    pub info: Option<LeagueInfo>,
    pub tags: Vec<String>,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: i64,
    pub name: String,
    pub short_name: Option<String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Game {
    pub id: i64,
    pub league_id: i64,
    pub game_id: String,
    pub played_at: DateTime<Utc>,
    pub visitor_team_id: i64,
    pub home_team_id: i64,
    pub visitor_score: Option<i32>,
    pub home_score: Option<i32>,
    pub overtime: bool,
    pub shootout: bool,
}

impl Game {
    pub fn is_scored(&self) -> bool {
        self.visitor_score.is_some() && self.home_score.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watcher {
    pub id: i64,
    pub guild_id: i64,
    pub channel_id: Option<i64>,
    pub league_id: i64,
    pub team_id: Option<i64>,
    pub category: Category,
    pub created_at: DateTime<Utc>,
    pub archived_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub id: i64,
    pub guild_id: i64,
    /// `None` routes to the guild's default channel.
    pub channel_id: Option<i64>,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

/// Message body produced by the composer, before it gets an outbox id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub guild_id: i64,
    pub channel_id: Option<i64>,
    pub title: String,
    pub content: String,
}

// ---- source-native records ------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamRecord {
    pub external_id: String,
    pub name: String,
    #[serde(default)]
    pub short_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameRecord {
    pub game_id: String,
    pub played_at: DateTime<Utc>,
    pub visitor_external_id: String,
    pub home_external_id: String,
    #[serde(default)]
    pub visitor_score: Option<i32>,
    #[serde(default)]
    pub home_score: Option<i32>,
    #[serde(default)]
    pub overtime: bool,
    #[serde(default)]
    pub shootout: bool,
}

/// One entry of a transaction-like feed (bids, trades, news, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedRecord {
    /// Adapter row id, often regenerated per page render; not part of the digest.
    #[serde(default, skip_serializing)]
    pub source_ref: Option<String>,
    /// Serialized sorted, so team order never moves a digest.
    #[serde(default, serialize_with = "serialize_sorted")]
    pub team_external_ids: Vec<String>,
    pub summary: String,
    #[serde(default)]
    pub occurred_at: Option<DateTime<Utc>>,
}

fn serialize_sorted<S: serde::Serializer>(ids: &[String], serializer: S) -> Result<S::Ok, S::Error> {
    let mut sorted: Vec<&String> = ids.iter().collect();
    sorted.sort();
    serializer.collect_seq(sorted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_round_trips_through_str() {
        for c in Category::ALL {
            assert_eq!(Category::parse(c.as_str()), Some(c));
        }
        assert_eq!(Category::parse("nope"), None);
    }

    #[test]
    fn category_nouns_pluralise() {
        assert_eq!(Category::Trades.noun(1), "trade");
        assert_eq!(Category::Trades.noun(3), "trades");
        assert_eq!(Category::DraftPicks.noun(0), "draft picks");
    }

    #[test]
    fn league_info_parts_round_trip() {
        let info = LeagueInfo::Season(SeasonInfo {
            season: "2024".into(),
            current_day: Some(12),
            playoffs: false,
        });
        let (tag, payload) = info.to_parts().unwrap();
        assert_eq!(tag, "season");
        assert_eq!(LeagueInfo::from_parts(tag, &payload).unwrap(), info);
    }

    #[test]
    fn league_info_rejects_unknown_tag() {
        let err = LeagueInfo::from_parts("mystery", "{}").unwrap_err();
        assert!(matches!(err, Error::UnknownInfoTag(t) if t == "mystery"));
    }

    #[test]
    fn feed_record_source_ref_is_not_serialized() {
        let rec = FeedRecord {
            source_ref: Some("row-17".into()),
            team_external_ids: vec!["7".into()],
            summary: "Signed".into(),
            occurred_at: None,
        };
        let json = serde_json::to_string(&rec).unwrap();
        assert!(!json.contains("row-17"));
    }
}
