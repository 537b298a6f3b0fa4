//! Source adapter contract.
//!
//! An adapter talks to one external league website and implements any subset
//! of the small capability traits below. It advertises which ones through
//! [`SourceAdapter::capabilities`], and the [`SourceRegistry`] binds each of
//! them per site.
//!
//! Every fetch distinguishes `Ok(None)` ("not supported for this league")
//! from `Ok(Some(vec![]))` ("supported, nothing found").

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::model::{Category, FeedRecord, GameRecord, League, LeagueInfo, SiteId, TeamRecord};

pub mod json_feed;
pub mod registry;

pub use registry::SourceRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    LeagueInfo,
    Teams,
    Games,
    Feed(Category),
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::LeagueInfo => f.write_str("league-info"),
            Capability::Teams => f.write_str("teams"),
            Capability::Games => f.write_str("games"),
            Capability::Feed(c) => write!(f, "feed:{}", c),
        }
    }
}

#[async_trait]
pub trait LeagueInfoSource: Send + Sync {
    async fn fetch_league_info(&self, league: &League) -> Result<Option<LeagueInfo>>;
}

#[async_trait]
pub trait TeamSource: Send + Sync {
    async fn fetch_teams(&self, league: &League) -> Result<Option<Vec<TeamRecord>>>;
}

#[async_trait]
pub trait GameSource: Send + Sync {
    async fn fetch_games(&self, league: &League) -> Result<Option<Vec<GameRecord>>>;
}

#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Feed categories this source can serve.
    fn categories(&self) -> Vec<Category>;

    async fn fetch_feed(&self, league: &League, category: Category)
        -> Result<Option<Vec<FeedRecord>>>;
}

/// The capability traits an adapter instance implements.
#[derive(Clone, Default)]
pub struct Capabilities {
    pub league_info: Option<Arc<dyn LeagueInfoSource>>,
    pub teams: Option<Arc<dyn TeamSource>>,
    pub games: Option<Arc<dyn GameSource>>,
    pub feeds: Option<Arc<dyn FeedSource>>,
}

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_league_info(mut self, source: Arc<dyn LeagueInfoSource>) -> Self {
        self.league_info = Some(source);
        self
    }

    pub fn with_teams(mut self, source: Arc<dyn TeamSource>) -> Self {
        self.teams = Some(source);
        self
    }

    pub fn with_games(mut self, source: Arc<dyn GameSource>) -> Self {
        self.games = Some(source);
        self
    }

    pub fn with_feeds(mut self, source: Arc<dyn FeedSource>) -> Self {
        self.feeds = Some(source);
        self
    }

    /// Flat list of the capabilities present.
    pub fn list(&self) -> Vec<Capability> {
        let mut out = Vec::new();
        if self.league_info.is_some() {
            out.push(Capability::LeagueInfo);
        }
        if self.teams.is_some() {
            out.push(Capability::Teams);
        }
        if self.games.is_some() {
            out.push(Capability::Games);
        }
        if let Some(feeds) = &self.feeds {
            let mut cats: Vec<Category> =
                feeds.categories().into_iter().filter(Category::is_feed).collect();
            cats.sort();
            cats.dedup();
            out.extend(cats.into_iter().map(Capability::Feed));
        }
        out
    }
}

pub trait SourceAdapter: Send + Sync + 'static {
    /// Short name used in logs and conflict errors.
    fn name(&self) -> &str;

    fn supports(&self) -> Vec<SiteId>;

    fn site_name(&self, site: &SiteId) -> String {
        site.to_string()
    }

    fn site_tags(&self, _site: &SiteId) -> Vec<String> {
        Vec::new()
    }

    fn capabilities(self: Arc<Self>) -> Capabilities;
}
