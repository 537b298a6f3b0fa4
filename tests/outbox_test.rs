use anyhow::{bail, Result};
use chrono::{TimeZone, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;

use league_watchbot::db;
use league_watchbot::model::{NewMessage, OutboundMessage};
use league_watchbot::outbox::{self, Delivery};

async fn setup_pool() -> sqlx::SqlitePool {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

fn message(guild_id: i64, title: &str) -> NewMessage {
    NewMessage {
        guild_id,
        channel_id: None,
        title: title.into(),
        content: format!("body of {title}"),
    }
}

#[derive(Clone, Default)]
struct RecordingDelivery {
    failing_guilds: Vec<i64>,
    delivered: Arc<Mutex<Vec<(i64, String)>>>,
}

impl RecordingDelivery {
    async fn delivered(&self) -> Vec<(i64, String)> {
        self.delivered.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl Delivery for RecordingDelivery {
    async fn deliver(&self, message: &OutboundMessage) -> Result<()> {
        if self.failing_guilds.contains(&message.guild_id) {
            bail!("guild {} is unreachable", message.guild_id);
        }
        self.delivered
            .lock()
            .await
            .push((message.guild_id, message.title.clone()));
        Ok(())
    }
}

#[tokio::test]
async fn pending_orders_by_creation_then_guild() {
    let pool = setup_pool().await;
    let early = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let late = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 5).unwrap();
    {
        let mut conn = pool.acquire().await.unwrap();
        db::insert_message(&mut conn, &message(9, "late"), late).await.unwrap();
        db::insert_message(&mut conn, &message(3, "early-b"), early).await.unwrap();
        db::insert_message(&mut conn, &message(1, "early-a"), early).await.unwrap();
    }

    let titles: Vec<String> = outbox::pending(&pool, 10)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.title)
        .collect();
    assert_eq!(titles, vec!["early-a", "early-b", "late"]);

    let limited = outbox::pending(&pool, 1).await.unwrap();
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0].guild_id, 1);
}

#[tokio::test]
async fn mark_sent_is_one_shot() {
    let pool = setup_pool().await;
    let id = {
        let mut conn = pool.acquire().await.unwrap();
        outbox::enqueue(&mut conn, &message(1, "hello")).await.unwrap()
    };

    assert!(outbox::mark_sent(&pool, id).await.unwrap());
    assert!(!outbox::mark_sent(&pool, id).await.unwrap());
    assert!(!outbox::mark_sent(&pool, id + 100).await.unwrap());
    assert!(outbox::pending(&pool, 10).await.unwrap().is_empty());
    assert_eq!(db::count_messages(&pool).await.unwrap(), 1);
}

#[tokio::test]
async fn failed_deliveries_stay_pending() {
    let pool = setup_pool().await;
    {
        let mut conn = pool.acquire().await.unwrap();
        for (guild, title) in [(1, "one"), (2, "two"), (3, "three")] {
            outbox::enqueue(&mut conn, &message(guild, title)).await.unwrap();
        }
    }

    let delivery = RecordingDelivery {
        failing_guilds: vec![2],
        ..Default::default()
    };
    let delivered = outbox::deliver_pending(&pool, &delivery, 10).await.unwrap();
    assert_eq!(delivered, 2);
    assert_eq!(
        delivery.delivered().await,
        vec![(1, "one".to_string()), (3, "three".to_string())]
    );

    let left = outbox::pending(&pool, 10).await.unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].guild_id, 2);
    assert!(left[0].sent_at.is_none());

    let retry = RecordingDelivery::default();
    assert_eq!(outbox::deliver_pending(&pool, &retry, 10).await.unwrap(), 1);
    assert!(outbox::pending(&pool, 10).await.unwrap().is_empty());
}
