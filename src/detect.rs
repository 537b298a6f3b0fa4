//! Content digests per change category.
//!
//! A category's digest only moves when its content moves: records are
//! serialized (volatile fields are `skip_serializing`), the serialized forms
//! are sorted so feed ordering is irrelevant, and the result is hashed.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::SqliteConnection;
use tracing::debug;

use crate::db;
use crate::model::Category;

/// SHA-256 of one record's semantic fields, hex encoded.
pub fn item_digest<T: Serialize>(record: &T) -> Result<String> {
    let canonical = serde_json::to_string(record).context("record is not serializable")?;
    Ok(hex_sha256(canonical.as_bytes()))
}

/// Order-insensitive digest of a whole category payload.
pub fn digest<T: Serialize>(records: &[T]) -> Result<String> {
    let mut parts = records
        .iter()
        .map(|r| serde_json::to_string(r).context("record is not serializable"))
        .collect::<Result<Vec<_>>>()?;
    parts.sort_unstable();

    let mut hasher = Sha256::new();
    for part in &parts {
        hasher.update(part.as_bytes());
        hasher.update(b"\n");
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn hex_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Compare against the stored digest for `(league, category)`.
///
/// When different, the new digest and timestamp are written through `conn`
/// and `true` is returned. Callers pass an open transaction so the write is
/// only visible once the whole cycle commits.
pub async fn has_changed(
    conn: &mut SqliteConnection,
    league_id: i64,
    category: Category,
    digest: &str,
) -> Result<bool> {
    let stored = db::get_state_hash(conn, league_id, category).await?;
    if stored.as_deref() == Some(digest) {
        debug!(league_id, %category, "digest unchanged");
        return Ok(false);
    }
    db::set_state_hash(conn, league_id, category, digest, Utc::now()).await?;
    debug!(league_id, %category, previous = ?stored, "digest changed");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FeedRecord;

    fn rec(summary: &str, source_ref: &str) -> FeedRecord {
        FeedRecord {
            source_ref: Some(source_ref.into()),
            team_external_ids: vec!["1".into()],
            summary: summary.into(),
            occurred_at: None,
        }
    }

    #[test]
    fn digest_ignores_ordering() {
        let a = vec![rec("Trade one", "r1"), rec("Trade two", "r2")];
        let b = vec![rec("Trade two", "r2"), rec("Trade one", "r1")];
        assert_eq!(digest(&a).unwrap(), digest(&b).unwrap());
    }

    #[test]
    fn digest_ignores_volatile_fields() {
        let a = vec![rec("Trade one", "r1")];
        let b = vec![rec("Trade one", "regenerated-99")];
        assert_eq!(digest(&a).unwrap(), digest(&b).unwrap());
        assert_eq!(item_digest(&a[0]).unwrap(), item_digest(&b[0]).unwrap());
    }

    #[test]
    fn digest_ignores_team_order_within_a_record() {
        let mut a = rec("Three-way trade", "r1");
        a.team_external_ids = vec!["9".into(), "2".into(), "5".into()];
        let mut b = a.clone();
        b.team_external_ids = vec!["5".into(), "9".into(), "2".into()];
        assert_eq!(item_digest(&a).unwrap(), item_digest(&b).unwrap());
        assert_eq!(digest(&[a]).unwrap(), digest(&[b]).unwrap());
    }

    #[test]
    fn digest_tracks_content() {
        let a = vec![rec("Trade one", "r1")];
        let b = vec![rec("Trade one (amended)", "r1")];
        assert_ne!(digest(&a).unwrap(), digest(&b).unwrap());
    }

    #[test]
    fn digest_of_empty_payload_is_stable() {
        let empty: Vec<FeedRecord> = vec![];
        let hash = digest(&empty).unwrap();
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash, digest(&empty).unwrap());
    }

    #[test]
    fn duplicate_records_change_the_digest() {
        let one = vec![rec("Waived", "r1")];
        let two = vec![rec("Waived", "r1"), rec("Waived", "r2")];
        assert_ne!(digest(&one).unwrap(), digest(&two).unwrap());
    }
}
