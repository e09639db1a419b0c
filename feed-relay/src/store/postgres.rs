use crate::types::{
    ChannelSelector, DeliveryLogEntry, FeedId, FeedSubscription, KeywordSubscription, Result, StoreError,
    SubscriptionStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

const UNIQUE_VIOLATION: &str = "23505";

/// PostgreSQL-backed subscription and dedup store.
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub async fn new(database_url: &str) -> Result<Self> {
        let db = PgPoolOptions::new().max_connections(5).connect(database_url).await?;
        Ok(Self { db })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.db).await?;
        info!("Database schema is up to date");
        Ok(())
    }
}

fn store_error(error: sqlx::Error) -> StoreError {
    match &error {
        sqlx::Error::Database(db_error) if db_error.code().as_deref() == Some(UNIQUE_VIOLATION) => {
            StoreError::AlreadyExists
        }
        sqlx::Error::RowNotFound => StoreError::NotFound,
        _ => StoreError::Backend(error.to_string()),
    }
}

fn feed_from_row(row: &PgRow) -> std::result::Result<FeedSubscription, sqlx::Error> {
    Ok(FeedSubscription {
        id: row.try_get("id")?,
        url: row.try_get("url")?,
        channel_id: row.try_get("channel_id")?,
        guild_id: row.try_get("guild_id")?,
        check_interval_minutes: row.try_get::<i32, _>("check_interval")?.max(1) as u32,
        last_checked: row.try_get::<Option<DateTime<Utc>>, _>("last_check")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

fn keyword_from_row(row: &PgRow) -> std::result::Result<KeywordSubscription, sqlx::Error> {
    Ok(KeywordSubscription {
        id: row.try_get("id")?,
        keyword: row.try_get("keyword")?,
        channel_id: row.try_get("channel_id")?,
        guild_id: row.try_get("guild_id")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

#[async_trait]
impl SubscriptionStore for PgStore {
    async fn add_keyword_subscription(
        &self,
        keyword: &str,
        channel_id: &str,
        guild_id: &str,
    ) -> std::result::Result<KeywordSubscription, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO keywords (id, keyword, channel_id, guild_id, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (keyword, channel_id, guild_id) DO NOTHING
            RETURNING id, keyword, channel_id, guild_id, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(keyword.to_lowercase())
        .bind(channel_id)
        .bind(guild_id)
        .bind(Utc::now())
        .fetch_optional(&self.db)
        .await
        .map_err(store_error)?;

        match row {
            Some(row) => keyword_from_row(&row).map_err(store_error),
            None => Err(StoreError::AlreadyExists),
        }
    }

    async fn remove_keyword_subscription(
        &self,
        keyword: &str,
        channel_id: &str,
        guild_id: &str,
    ) -> std::result::Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM keywords WHERE keyword = $1 AND channel_id = $2 AND guild_id = $3")
            .bind(keyword.to_lowercase())
            .bind(channel_id)
            .bind(guild_id)
            .execute(&self.db)
            .await
            .map_err(store_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn list_keyword_subscriptions(&self, guild_id: &str) -> std::result::Result<Vec<KeywordSubscription>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, keyword, channel_id, guild_id, created_at FROM keywords WHERE guild_id = $1 ORDER BY created_at, keyword",
        )
        .bind(guild_id)
        .fetch_all(&self.db)
        .await
        .map_err(store_error)?;

        rows.iter().map(keyword_from_row).collect::<std::result::Result<_, _>>().map_err(store_error)
    }

    async fn add_feed_subscription(
        &self,
        url: &str,
        channel_id: &str,
        guild_id: &str,
        check_interval_minutes: u32,
    ) -> std::result::Result<FeedSubscription, StoreError> {
        let check_interval = i32::try_from(check_interval_minutes)
            .map_err(|_| StoreError::Backend(format!("Check interval {} is out of range", check_interval_minutes)))?;

        let row = sqlx::query(
            r#"
            INSERT INTO rss_feeds (id, url, channel_id, guild_id, check_interval, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (url, channel_id, guild_id) DO NOTHING
            RETURNING id, url, channel_id, guild_id, check_interval, last_check, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(url)
        .bind(channel_id)
        .bind(guild_id)
        .bind(check_interval)
        .bind(Utc::now())
        .fetch_optional(&self.db)
        .await
        .map_err(store_error)?;

        match row {
            Some(row) => {
                let feed = feed_from_row(&row).map_err(store_error)?;
                info!("Added feed subscription {} -> {} (ID: {})", url, channel_id, feed.id);
                Ok(feed)
            }
            None => Err(StoreError::AlreadyExists),
        }
    }

    async fn remove_feed_subscription(
        &self,
        url: &str,
        channel: &ChannelSelector,
        guild_id: &str,
    ) -> std::result::Result<u64, StoreError> {
        let result = match channel {
            ChannelSelector::Exact(channel_id) => {
                sqlx::query("DELETE FROM rss_feeds WHERE url = $1 AND channel_id = $2 AND guild_id = $3")
                    .bind(url)
                    .bind(channel_id)
                    .bind(guild_id)
                    .execute(&self.db)
                    .await
            }
            ChannelSelector::Any => {
                sqlx::query("DELETE FROM rss_feeds WHERE url = $1 AND guild_id = $2")
                    .bind(url)
                    .bind(guild_id)
                    .execute(&self.db)
                    .await
            }
        }
        .map_err(store_error)?;

        match result.rows_affected() {
            0 => Err(StoreError::NotFound),
            removed => Ok(removed),
        }
    }

    async fn list_feed_subscriptions(&self, guild_id: Option<&str>) -> std::result::Result<Vec<FeedSubscription>, StoreError> {
        let rows = if let Some(guild_id) = guild_id {
            sqlx::query(
                "SELECT id, url, channel_id, guild_id, check_interval, last_check, created_at FROM rss_feeds WHERE guild_id = $1 ORDER BY created_at",
            )
            .bind(guild_id)
            .fetch_all(&self.db)
            .await
        } else {
            sqlx::query(
                "SELECT id, url, channel_id, guild_id, check_interval, last_check, created_at FROM rss_feeds ORDER BY created_at",
            )
            .fetch_all(&self.db)
            .await
        }
        .map_err(store_error)?;

        rows.iter().map(feed_from_row).collect::<std::result::Result<_, _>>().map_err(store_error)
    }

    async fn update_last_checked(&self, feed_id: FeedId, checked_at: DateTime<Utc>) -> std::result::Result<(), StoreError> {
        sqlx::query("UPDATE rss_feeds SET last_check = $1 WHERE id = $2")
            .bind(checked_at)
            .bind(feed_id)
            .execute(&self.db)
            .await
            .map_err(store_error)?;

        debug!("Updated last check time for feed {}", feed_id);
        Ok(())
    }

    async fn is_item_processed(&self, feed_id: FeedId, item_id: &str) -> std::result::Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 AS found FROM rss_items WHERE feed_id = $1 AND item_id = $2")
            .bind(feed_id)
            .bind(item_id)
            .fetch_optional(&self.db)
            .await
            .map_err(store_error)?;

        Ok(row.is_some())
    }

    async fn mark_item_processed(
        &self,
        feed_id: FeedId,
        item_id: &str,
        published_at: Option<DateTime<Utc>>,
    ) -> std::result::Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO rss_items (feed_id, item_id, published_at, processed_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (feed_id, item_id) DO NOTHING
            "#,
        )
        .bind(feed_id)
        .bind(item_id)
        .bind(published_at)
        .bind(Utc::now())
        .execute(&self.db)
        .await
        .map_err(store_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn log_delivery(&self, entry: &DeliveryLogEntry) -> std::result::Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO forwarded_messages (original_message_id, original_channel_id, forwarded_channel_id, keyword, guild_id)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&entry.source_message_id)
        .bind(&entry.source_channel_id)
        .bind(&entry.destination_channel_id)
        .bind(&entry.keyword)
        .bind(&entry.guild_id)
        .execute(&self.db)
        .await
        .map_err(store_error)?;

        Ok(())
    }
}
