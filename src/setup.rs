//! Startup wiring shared by the binaries.
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::db::{self, Pool};
use crate::source::json_feed::JsonFeedAdapter;
use crate::source::SourceRegistry;

/// Build the registry from configured sources. Registration conflicts abort startup.
pub fn build_registry(cfg: &Config) -> Result<SourceRegistry> {
    let mut registry = SourceRegistry::new();
    for source in &cfg.sources {
        let adapter = JsonFeedAdapter::from_config(source, cfg.app.fetch_timeout())?;
        registry
            .register(Arc::new(adapter))
            .with_context(|| format!("failed to register source {}", source.site_id))?;
    }
    Ok(registry)
}

/// Seed sites from the registry and leagues from configuration. Configuration
/// is what gets polled: sites and leagues that dropped out of it are disabled,
/// listed ones are (re-)enabled.
pub async fn seed(pool: &Pool, cfg: &Config, registry: &SourceRegistry) -> Result<()> {
    let sites = registry.sites();
    db::seed_sites(pool, &sites).await?;
    for site_id in db::list_site_ids(pool).await? {
        let registered = sites.iter().any(|s| s.id.as_str() == site_id);
        if !registered {
            info!(site = %site_id, "site has no registered source; disabling");
        }
        db::set_site_enabled(pool, &site_id, registered).await?;
    }

    let mut leagues = 0;
    for source in &cfg.sources {
        let mut listed = Vec::new();
        for name in &source.leagues {
            let id = db::get_or_create_league(pool, &source.site_id, name.trim(), &source.tags).await?;
            db::set_league_enabled(pool, id, true).await?;
            listed.push(id);
            leagues += 1;
        }
        for league in db::list_site_leagues(pool, &source.site_id).await? {
            if league.enabled && !listed.contains(&league.id) {
                info!(league_id = league.id, name = %league.name, "league no longer configured; disabling");
                db::set_league_enabled(pool, league.id, false).await?;
            }
        }
    }
    info!(sites = sites.len(), leagues, "seeded sites and leagues");
    Ok(())
}

pub fn database_url(cfg: &Config) -> String {
    std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}/leaguewatch.db", cfg.app.resolved_data_dir()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;

    #[tokio::test]
    async fn seeding_follows_configuration() {
        let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
        db::run_migrations(&pool).await.unwrap();
        let mut cfg: Config = serde_yaml::from_str(config::example()).unwrap();
        let registry = build_registry(&cfg).unwrap();

        seed(&pool, &cfg, &registry).await.unwrap();
        let names: Vec<String> = db::list_enabled_leagues(&pool)
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.name)
            .collect();
        assert_eq!(names, vec!["Premier", "Minor"]);

        cfg.sources[0].leagues.retain(|l| l == "Premier");
        seed(&pool, &cfg, &registry).await.unwrap();
        assert_eq!(db::list_enabled_leagues(&pool).await.unwrap().len(), 1);

        cfg.sources[0].leagues.push("Minor".into());
        seed(&pool, &cfg, &registry).await.unwrap();
        assert_eq!(db::list_enabled_leagues(&pool).await.unwrap().len(), 2);

        // A site whose source was removed stops being polled.
        seed(&pool, &cfg, &SourceRegistry::new()).await.unwrap();
        assert!(db::list_enabled_leagues(&pool).await.unwrap().is_empty());
    }
}
