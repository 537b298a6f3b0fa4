//! Error taxonomy for the ingest and notification pipeline.
use thiserror::Error;

use crate::model::SiteId;
use crate::source::Capability;

#[derive(Debug, Error)]
pub enum Error {
    /// Network, timeout or parse failure from an adapter. The league is retried next tick.
    #[error("source {site} unavailable for league {league}: {source}")]
    SourceUnavailable {
        site: SiteId,
        league: String,
        #[source]
        source: anyhow::Error,
    },
    /// Two adapter instances claim the same capability for one site.
    #[error("{capability} for site {site} is already bound to {existing}; refusing {incoming}")]
    ReconciliationConflict {
        site: SiteId,
        capability: Capability,
        existing: String,
        incoming: String,
    },
    #[error("league {league_id} has no team with external id {external_id}")]
    UnknownExternalId { league_id: i64, external_id: String },
    #[error("persistence failure: {0:#}")]
    Persistence(#[from] anyhow::Error),
    #[error("unknown league info tag {0}")]
    UnknownInfoTag(String),
    #[error("malformed league info payload: {0}")]
    InfoPayload(#[from] serde_json::Error),
    #[error("cycle cancelled")]
    Cancelled,
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Persistence(err.into())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
