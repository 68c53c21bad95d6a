use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::{debug, info, instrument};

use super::{RecordFilter, RecordStore};
use crate::error::{Error, Result};
use crate::models::{Item, RecordKey};

/// Primary store backed by a SQLite `records` table.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database file and its schema.
    pub async fn open(database_path: &str) -> Result<Self> {
        let database_url = format!("sqlite://{}?mode=rwc", database_path);
        info!("Connecting to {}", database_url);
        let pool = SqlitePool::connect(&database_url).await?;

        let store = Self { pool };
        store.create_tables().await?;
        Ok(store)
    }

    /// In-memory database. A single connection keeps the data alive for the pool's lifetime.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let store = Self { pool };
        store.create_tables().await?;
        Ok(store)
    }

    async fn create_tables(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                media_id INTEGER NOT NULL,
                media_type TEXT NOT NULL,
                is_rewatch INTEGER NOT NULL,
                rewatch_count INTEGER NOT NULL,
                title TEXT NOT NULL,
                cover_image TEXT NOT NULL,
                genres TEXT,
                summary TEXT,
                total_units INTEGER,
                status TEXT NOT NULL,
                progress INTEGER NOT NULL DEFAULT 0,
                rank INTEGER NOT NULL DEFAULT 0,
                score INTEGER NOT NULL DEFAULT 0,
                start_date TEXT,
                end_date TEXT,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (media_id, media_type, is_rewatch, rewatch_count)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_records_bucket
            ON records (media_type, status, is_rewatch)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn row_to_item(row: &SqliteRow) -> Result<Item> {
        let media_type: String = row.try_get("media_type")?;
        let status: String = row.try_get("status")?;
        let genres: Option<String> = row.try_get("genres")?;

        Ok(Item {
            media_id: row.try_get("media_id")?,
            media_type: media_type.parse()?,
            title: row.try_get("title")?,
            cover_image: row.try_get("cover_image")?,
            genres: genres.map(|g| serde_json::from_str(&g)).transpose()?,
            summary: row.try_get("summary")?,
            total_units: row
                .try_get::<Option<i64>, _>("total_units")?
                .map(|u| u as u32),
            status: status.parse()?,
            progress: row.try_get::<i64, _>("progress")? as u32,
            rank: row.try_get::<i64, _>("rank")? as u32,
            score: row.try_get::<i64, _>("score")? as u32,
            start_date: parse_date(row.try_get("start_date")?)?,
            end_date: parse_date(row.try_get("end_date")?)?,
            is_rewatch: row.try_get("is_rewatch")?,
            rewatch_count: row.try_get::<i64, _>("rewatch_count")? as u32,
        })
    }
}

fn parse_date(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value
        .map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|d| d.with_timezone(&Utc))
                .map_err(|e| Error::InvalidInput(format!("bad stored date '{}': {}", s, e)))
        })
        .transpose()
}

#[async_trait]
impl RecordStore for SqliteStore {
    fn name(&self) -> &'static str {
        "primary"
    }

    #[instrument(skip(self, item), fields(key = %item.record_key()))]
    async fn upsert(&self, item: &Item) -> Result<()> {
        let genres = item.genres.as_ref().map(serde_json::to_string).transpose()?;

        sqlx::query(
            r#"
            INSERT INTO records (
                media_id, media_type, is_rewatch, rewatch_count, title,
                cover_image, genres, summary, total_units, status, progress,
                rank, score, start_date, end_date, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (media_id, media_type, is_rewatch, rewatch_count) DO UPDATE SET
                title = excluded.title,
                cover_image = excluded.cover_image,
                genres = excluded.genres,
                summary = excluded.summary,
                total_units = excluded.total_units,
                status = excluded.status,
                progress = excluded.progress,
                rank = excluded.rank,
                score = excluded.score,
                start_date = excluded.start_date,
                end_date = excluded.end_date,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(item.media_id)
        .bind(item.media_type.as_str())
        .bind(item.is_rewatch)
        .bind(item.rewatch_count as i64)
        .bind(&item.title)
        .bind(&item.cover_image)
        .bind(genres)
        .bind(&item.summary)
        .bind(item.total_units.map(|u| u as i64))
        .bind(item.status.as_str())
        .bind(item.progress as i64)
        .bind(item.rank as i64)
        .bind(item.score as i64)
        .bind(item.start_date.map(|d| d.to_rfc3339()))
        .bind(item.end_date.map(|d| d.to_rfc3339()))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        debug!("Upserted record");
        Ok(())
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn delete(&self, key: &RecordKey) -> Result<()> {
        sqlx::query(
            r#"
            DELETE FROM records
            WHERE media_id = ? AND media_type = ? AND is_rewatch = ? AND rewatch_count = ?
            "#,
        )
        .bind(key.media_id)
        .bind(key.media_type.as_str())
        .bind(key.is_rewatch)
        .bind(key.rewatch_count as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self), fields(filter = %filter))]
    async fn query(&self, filter: RecordFilter) -> Result<Vec<Item>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM records
            WHERE media_type = ? AND status = ? AND is_rewatch = ?
            ORDER BY media_id, rewatch_count
            "#,
        )
        .bind(filter.media_type.as_str())
        .bind(filter.status.as_str())
        .bind(filter.is_rewatch)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_item).collect()
    }
}
