use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

use super::{
    Capabilities, Capability, FeedSource, GameSource, LeagueInfoSource, SourceAdapter, TeamSource,
};
use crate::error::{Error, Result};
use crate::model::{Category, SiteId};

/// Identity of a registered adapter instance (address of its allocation).
type InstanceKey = usize;

#[derive(Clone)]
struct Binding {
    instance: InstanceKey,
    adapter_name: String,
    capabilities: Capabilities,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteDescriptor {
    pub id: SiteId,
    pub name: String,
    pub tags: Vec<String>,
}

/// Maps `(site, capability)` to the adapter instance that serves it.
#[derive(Default)]
pub struct SourceRegistry {
    bindings: HashMap<(SiteId, Capability), Binding>,
    sites: BTreeMap<SiteId, SiteDescriptor>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind every capability of `adapter` for every site it supports.
    ///
    /// Registering the same instance twice is a no-op. A different instance on
    /// an already bound pair is rejected and nothing from this call is applied.
    pub fn register<A: SourceAdapter>(&mut self, adapter: Arc<A>) -> Result<()> {
        let instance = Arc::as_ptr(&adapter) as *const () as InstanceKey;
        let adapter_name = adapter.name().to_string();
        let sites = adapter.supports();
        let descriptors: Vec<SiteDescriptor> = sites
            .iter()
            .map(|site| SiteDescriptor {
                id: site.clone(),
                name: adapter.site_name(site),
                tags: adapter.site_tags(site),
            })
            .collect();
        let capabilities = adapter.capabilities();
        let caps = capabilities.list();

        for site in &sites {
            for cap in &caps {
                if let Some(existing) = self.bindings.get(&(site.clone(), *cap)) {
                    if existing.instance != instance {
                        return Err(Error::ReconciliationConflict {
                            site: site.clone(),
                            capability: *cap,
                            existing: existing.adapter_name.clone(),
                            incoming: adapter_name,
                        });
                    }
                }
            }
        }

        for site in &sites {
            for cap in &caps {
                self.bindings.insert(
                    (site.clone(), *cap),
                    Binding {
                        instance,
                        adapter_name: adapter_name.clone(),
                        capabilities: capabilities.clone(),
                    },
                );
            }
            debug!(site = %site, adapter = %adapter_name, capabilities = caps.len(), "bound source");
        }
        for descriptor in descriptors {
            self.sites.entry(descriptor.id.clone()).or_insert(descriptor);
        }
        info!(adapter = %adapter_name, sites = sites.len(), "registered source adapter");
        Ok(())
    }

    fn binding(&self, site: &SiteId, capability: Capability) -> Option<&Binding> {
        self.bindings.get(&(site.clone(), capability))
    }

    /// Whether `site` has an adapter for `capability`.
    pub fn resolve(&self, site: &SiteId, capability: Capability) -> Option<&str> {
        self.binding(site, capability)
            .map(|b| b.adapter_name.as_str())
    }

    pub fn league_info(&self, site: &SiteId) -> Option<Arc<dyn LeagueInfoSource>> {
        self.binding(site, Capability::LeagueInfo)
            .and_then(|b| b.capabilities.league_info.clone())
    }

    pub fn teams(&self, site: &SiteId) -> Option<Arc<dyn TeamSource>> {
        self.binding(site, Capability::Teams)
            .and_then(|b| b.capabilities.teams.clone())
    }

    pub fn games(&self, site: &SiteId) -> Option<Arc<dyn GameSource>> {
        self.binding(site, Capability::Games)
            .and_then(|b| b.capabilities.games.clone())
    }

    pub fn feed(&self, site: &SiteId, category: Category) -> Option<Arc<dyn FeedSource>> {
        self.binding(site, Capability::Feed(category))
            .and_then(|b| b.capabilities.feeds.clone())
    }

    /// Sites declared by registered adapters, ordered by id.
    pub fn sites(&self) -> Vec<SiteDescriptor> {
        self.sites.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FeedRecord, GameRecord, League, TeamRecord};
    use async_trait::async_trait;

    struct FakeAdapter {
        name: &'static str,
        sites: Vec<&'static str>,
        with_games: bool,
    }

    #[async_trait]
    impl TeamSource for FakeAdapter {
        async fn fetch_teams(&self, _league: &League) -> anyhow::Result<Option<Vec<TeamRecord>>> {
            Ok(Some(vec![]))
        }
    }

    #[async_trait]
    impl GameSource for FakeAdapter {
        async fn fetch_games(&self, _league: &League) -> anyhow::Result<Option<Vec<GameRecord>>> {
            Ok(Some(vec![]))
        }
    }

    #[async_trait]
    impl FeedSource for FakeAdapter {
        fn categories(&self) -> Vec<Category> {
            vec![Category::Trades, Category::Games]
        }

        async fn fetch_feed(
            &self,
            _league: &League,
            _category: Category,
        ) -> anyhow::Result<Option<Vec<FeedRecord>>> {
            Ok(None)
        }
    }

    impl SourceAdapter for FakeAdapter {
        fn name(&self) -> &str {
            self.name
        }

        fn supports(&self) -> Vec<SiteId> {
            self.sites.iter().map(|s| SiteId::new(*s)).collect()
        }

        fn capabilities(self: Arc<Self>) -> Capabilities {
            let caps = Capabilities::new().with_teams(self.clone());
            let caps = if self.with_games {
                caps.with_games(self.clone())
            } else {
                caps
            };
            caps.with_feeds(self)
        }
    }

    fn fake(name: &'static str, sites: Vec<&'static str>, with_games: bool) -> Arc<FakeAdapter> {
        Arc::new(FakeAdapter {
            name,
            sites,
            with_games,
        })
    }

    #[test]
    fn resolves_registered_capabilities_only() {
        let mut registry = SourceRegistry::new();
        registry.register(fake("a", vec!["site-a"], false)).unwrap();
        let site = SiteId::new("site-a");

        assert!(registry.teams(&site).is_some());
        assert!(registry.games(&site).is_none());
        assert!(registry.league_info(&site).is_none());
        assert!(registry.feed(&site, Category::Trades).is_some());
        assert!(registry.feed(&site, Category::News).is_none());
        // Games are never served as a feed.
        assert!(registry.resolve(&site, Capability::Feed(Category::Games)).is_none());
        assert!(registry.teams(&SiteId::new("other")).is_none());
    }

    #[test]
    fn same_instance_registration_is_idempotent() {
        let mut registry = SourceRegistry::new();
        let adapter = fake("a", vec!["site-a"], true);
        registry.register(adapter.clone()).unwrap();
        registry.register(adapter).unwrap();
        assert_eq!(registry.sites().len(), 1);
    }

    #[test]
    fn different_instance_on_same_pair_conflicts() {
        let mut registry = SourceRegistry::new();
        registry.register(fake("first", vec!["site-a"], false)).unwrap();
        let err = registry
            .register(fake("second", vec!["site-b", "site-a"], true))
            .unwrap_err();
        match err {
            Error::ReconciliationConflict {
                site,
                capability,
                existing,
                incoming,
            } => {
                assert_eq!(site, SiteId::new("site-a"));
                assert_eq!(capability, Capability::Teams);
                assert_eq!(existing, "first");
                assert_eq!(incoming, "second");
            }
            other => panic!("unexpected error {other:?}"),
        }
        // Rejected registration leaves nothing behind.
        assert!(registry.teams(&SiteId::new("site-b")).is_none());
        assert!(registry.games(&SiteId::new("site-a")).is_none());
    }

    #[test]
    fn disjoint_sites_do_not_conflict() {
        let mut registry = SourceRegistry::new();
        registry.register(fake("a", vec!["site-a"], true)).unwrap();
        registry.register(fake("b", vec!["site-b"], true)).unwrap();
        assert_eq!(
            registry.resolve(&SiteId::new("site-b"), Capability::Games),
            Some("b")
        );
        let ids: Vec<String> = registry.sites().into_iter().map(|s| s.id.0).collect();
        assert_eq!(ids, vec!["site-a", "site-b"]);
    }
}
