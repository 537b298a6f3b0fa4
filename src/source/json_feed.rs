//! Generic adapter for league sites that publish their data as JSON.
//!
//! Layout: `GET {base_url}/leagues/{league}/{info|teams|games|<feed>}`.
//! A 404 means the site does not offer that resource for the league.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{
    Capabilities, FeedSource, GameSource, LeagueInfoSource, SourceAdapter, TeamSource,
};
use crate::config::SourceConfig;
use crate::model::{Category, FeedRecord, GameRecord, League, LeagueInfo, SiteId, TeamRecord};

#[derive(Clone)]
pub struct JsonFeedAdapter {
    http: Client,
    base_url: Url,
    site_id: SiteId,
    site_name: String,
    tags: Vec<String>,
    feeds: Vec<Category>,
}

impl fmt::Debug for JsonFeedAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonFeedAdapter")
            .field("site_id", &self.site_id)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl JsonFeedAdapter {
    pub fn from_config(cfg: &SourceConfig, timeout: Duration) -> Result<Self> {
        let mut base_url = Url::parse(&cfg.base_url)
            .with_context(|| format!("invalid base_url for source {}", cfg.site_id))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let http = Client::builder()
            .user_agent("league-watchbot/0.1")
            .timeout(timeout)
            .build()
            .context("failed to build http client")?;
        let feeds = if cfg.feeds.is_empty() {
            Category::FEEDS.to_vec()
        } else {
            cfg.feeds
                .iter()
                .map(|f| Category::parse(f).ok_or_else(|| anyhow!("unknown feed category {f}")))
                .collect::<Result<Vec<_>>>()?
        };
        Ok(Self {
            http,
            base_url,
            site_id: SiteId::new(cfg.site_id.clone()),
            site_name: cfg.name.clone(),
            tags: cfg.tags.clone(),
            feeds,
        })
    }

    pub fn endpoint(&self, league: &League, resource: &str) -> Result<Url> {
        let mut url = self.base_url.join("leagues/").context("invalid base url")?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("base url cannot be a base"))?
            .pop_if_empty()
            .push(&league.name)
            .push(resource);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, league: &League, resource: &str) -> Result<Option<T>> {
        let url = self.endpoint(league, resource)?;
        debug!(url = %url, "fetching source resource");
        let res = self
            .http
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("failed to reach {url}"))?;
        if res.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("source error {status} from {url}: {body}"));
        }
        let payload = res
            .json::<T>()
            .await
            .with_context(|| format!("invalid JSON from {url}"))?;
        Ok(Some(payload))
    }
}

#[async_trait]
impl LeagueInfoSource for JsonFeedAdapter {
    async fn fetch_league_info(&self, league: &League) -> Result<Option<LeagueInfo>> {
        self.get_json(league, "info").await
    }
}

#[async_trait]
impl TeamSource for JsonFeedAdapter {
    async fn fetch_teams(&self, league: &League) -> Result<Option<Vec<TeamRecord>>> {
        self.get_json(league, "teams").await
    }
}

#[async_trait]
impl GameSource for JsonFeedAdapter {
    async fn fetch_games(&self, league: &League) -> Result<Option<Vec<GameRecord>>> {
        self.get_json(league, "games").await
    }
}

#[async_trait]
impl FeedSource for JsonFeedAdapter {
    fn categories(&self) -> Vec<Category> {
        self.feeds.clone()
    }

    async fn fetch_feed(&self, league: &League, category: Category) -> Result<Option<Vec<FeedRecord>>> {
        self.get_json(league, category.as_str()).await
    }
}

impl SourceAdapter for JsonFeedAdapter {
    fn name(&self) -> &str {
        "json-feed"
    }

    fn supports(&self) -> Vec<SiteId> {
        vec![self.site_id.clone()]
    }

    fn site_name(&self, _site: &SiteId) -> String {
        self.site_name.clone()
    }

    fn site_tags(&self, _site: &SiteId) -> Vec<String> {
        self.tags.clone()
    }

    fn capabilities(self: Arc<Self>) -> Capabilities {
        Capabilities::new()
            .with_league_info(self.clone())
            .with_teams(self.clone())
            .with_games(self.clone())
            .with_feeds(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source_cfg(base_url: &str) -> SourceConfig {
        SourceConfig {
            site_id: "demo".into(),
            name: "Demo".into(),
            base_url: base_url.into(),
            tags: vec!["hockey".into()],
            feeds: vec![],
            leagues: vec!["Premier League".into()],
        }
    }

    fn league(name: &str) -> League {
        League {
            id: 1,
            site_id: SiteId::new("demo"),
            name: name.into(),
            info: None,
            tags: vec![],
            enabled: true,
        }
    }

    #[test]
    fn endpoint_escapes_league_name() {
        let adapter =
            JsonFeedAdapter::from_config(&source_cfg("https://example.com/api"), Duration::from_secs(5))
                .unwrap();
        let url = adapter.endpoint(&league("Premier League"), "games").unwrap();
        assert_eq!(url.as_str(), "https://example.com/api/leagues/Premier%20League/games");
    }

    #[test]
    fn defaults_to_every_feed_category() {
        let adapter =
            JsonFeedAdapter::from_config(&source_cfg("https://example.com/"), Duration::from_secs(5))
                .unwrap();
        assert_eq!(adapter.categories(), Category::FEEDS.to_vec());
    }

    #[test]
    fn rejects_unknown_feed_category() {
        let mut cfg = source_cfg("https://example.com/");
        cfg.feeds = vec!["gossip".into()];
        assert!(JsonFeedAdapter::from_config(&cfg, Duration::from_secs(5)).is_err());
    }
}
