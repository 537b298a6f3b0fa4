//! Short-lived read-through cache for league listings.
//!
//! Bounds database load when many cycles ask for the same listing. Not
//! authoritative: mutations always go straight to the database.

use anyhow::Result;
use moka::sync::Cache;
use std::sync::Arc;
use std::time::Duration;

use crate::db::{self, Pool};
use crate::model::League;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ListingKey {
    EnabledLeagues,
}

#[derive(Clone)]
pub struct ListingCache {
    leagues: Cache<ListingKey, Arc<Vec<League>>>,
}

impl ListingCache {
    pub fn new(ttl: Duration) -> Self {
        let leagues = Cache::builder()
            .time_to_live(ttl.max(Duration::from_secs(1)))
            .max_capacity(16)
            .build();
        Self { leagues }
    }

    pub async fn enabled_leagues(&self, pool: &Pool) -> Result<Arc<Vec<League>>> {
        if let Some(hit) = self.leagues.get(&ListingKey::EnabledLeagues) {
            return Ok(hit);
        }
        let fresh = Arc::new(db::list_enabled_leagues(pool).await?);
        self.leagues.insert(ListingKey::EnabledLeagues, fresh.clone());
        Ok(fresh)
    }

    pub fn invalidate(&self) {
        self.leagues.invalidate_all();
    }
}
