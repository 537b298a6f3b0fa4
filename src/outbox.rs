//! Durable queue of composed messages awaiting delivery.
//!
//! The outbox never retries on its own: a message stays pending until the
//! delivery side reports success through [`mark_sent`].

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqliteConnection;
use tracing::{info, instrument, warn};

use crate::db::{self, Pool};
use crate::model::{NewMessage, OutboundMessage};

/// Store a message with `sent_at = NULL`. Takes a connection so it can join
/// the synchronizer's unit of work.
pub async fn enqueue(conn: &mut SqliteConnection, message: &NewMessage) -> Result<i64> {
    db::insert_message(conn, message, Utc::now()).await
}

/// Unsent messages ordered by creation time, then guild id.
pub async fn pending(pool: &Pool, limit: i64) -> Result<Vec<OutboundMessage>> {
    db::pending_messages(pool, limit).await
}

pub async fn mark_sent(pool: &Pool, id: i64) -> Result<bool> {
    db::mark_message_sent(pool, id, Utc::now()).await
}

/// Platform-facing sender. Implementations own retry and backoff.
#[async_trait]
pub trait Delivery: Send + Sync {
    async fn deliver(&self, message: &OutboundMessage) -> Result<()>;
}

/// Hand each pending message to `delivery`, marking successes as sent.
/// Failures stay pending for the next pass. Returns the number delivered.
#[instrument(skip_all)]
pub async fn deliver_pending(pool: &Pool, delivery: &dyn Delivery, limit: i64) -> Result<usize> {
    let mut delivered = 0;
    for message in pending(pool, limit).await? {
        match delivery.deliver(&message).await {
            Ok(()) => {
                mark_sent(pool, message.id).await?;
                delivered += 1;
                info!(id = message.id, guild_id = message.guild_id, "outbound message delivered");
            }
            Err(err) => {
                warn!(?err, id = message.id, guild_id = message.guild_id, "delivery failed; left pending");
            }
        }
    }
    Ok(delivered)
}

/// Delivery that only writes messages to the log.
#[derive(Debug, Default, Clone)]
pub struct LogDelivery;

#[async_trait]
impl Delivery for LogDelivery {
    async fn deliver(&self, message: &OutboundMessage) -> Result<()> {
        info!(
            guild_id = message.guild_id,
            channel_id = ?message.channel_id,
            title = %message.title,
            "{}",
            message.content
        );
        Ok(())
    }
}
