use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{sqlite::SqlitePoolOptions, FromRow, SqlitePool};

use crate::preferences::{Preference, ValidPreferences};

/// Timestamps are stored as second-precision RFC 3339 UTC text so that
/// string comparison in SQL matches chronological order.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_timestamp(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}

#[derive(Debug, Clone, FromRow)]
struct PreferenceRow {
    user_id: String,
    email: String,
    categories: String,
    frequency: String,
    is_active: bool,
    next_send_at: Option<String>,
}

impl TryFrom<PreferenceRow> for Preference {
    type Error = anyhow::Error;

    fn try_from(row: PreferenceRow) -> anyhow::Result<Self> {
        Ok(Preference {
            user_id: row.user_id,
            email: row.email,
            categories: serde_json::from_str(&row.categories)?,
            frequency: row.frequency.parse()?,
            is_active: row.is_active,
            next_send_at: row.next_send_at.as_deref().map(parse_timestamp).transpose()?,
        })
    }
}

/// A rendered digest waiting in the outbox for the mail transport.
#[derive(Debug, Clone, FromRow)]
pub struct DigestRecord {
    pub id: i64,
    pub user_id: String,
    pub email: String,
    pub subject: String,
    pub body: String,
    pub article_count: i64,
    pub created_at: String,
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        // Every connection to `:memory:` opens its own empty database
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn initialize(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS preferences (
                user_id TEXT PRIMARY KEY,
                email TEXT NOT NULL,
                categories TEXT NOT NULL,
                frequency TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                next_send_at TEXT,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_preferences_due
            ON preferences(is_active, next_send_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS digests (
                id INTEGER PRIMARY KEY,
                user_id TEXT NOT NULL,
                email TEXT NOT NULL,
                subject TEXT NOT NULL,
                body TEXT NOT NULL,
                article_count INTEGER NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert or replace a user's subscription. Saving always reactivates it.
    pub async fn upsert_preference(
        &self,
        user_id: &str,
        prefs: &ValidPreferences,
        next_send_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let categories = serde_json::to_string(&prefs.categories)?;
        let now = format_timestamp(Utc::now());

        sqlx::query(
            r#"
            INSERT INTO preferences (user_id, email, categories, frequency, is_active, next_send_at, updated_at)
            VALUES (?, ?, ?, ?, 1, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                email = excluded.email,
                categories = excluded.categories,
                frequency = excluded.frequency,
                is_active = 1,
                next_send_at = excluded.next_send_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(&prefs.email)
        .bind(categories)
        .bind(prefs.frequency.as_str())
        .bind(format_timestamp(next_send_at))
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_preference(&self, user_id: &str) -> anyhow::Result<Option<Preference>> {
        let row = sqlx::query_as::<_, PreferenceRow>(
            r#"
            SELECT user_id, email, categories, frequency, is_active, next_send_at
            FROM preferences WHERE user_id = ?
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Preference::try_from).transpose()
    }

    /// Returns false when the user has no stored preference.
    pub async fn deactivate_preference(&self, user_id: &str) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "UPDATE preferences SET is_active = 0, next_send_at = NULL, updated_at = ? WHERE user_id = ?",
        )
        .bind(format_timestamp(Utc::now()))
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn due_preferences(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<Preference>> {
        let rows = sqlx::query_as::<_, PreferenceRow>(
            r#"
            SELECT user_id, email, categories, frequency, is_active, next_send_at
            FROM preferences
            WHERE is_active = 1 AND next_send_at IS NOT NULL AND next_send_at <= ?
            ORDER BY next_send_at, user_id
            "#,
        )
        .bind(format_timestamp(now))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Preference::try_from).collect()
    }

    pub async fn reschedule(
        &self,
        user_id: &str,
        next_send_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        sqlx::query("UPDATE preferences SET next_send_at = ? WHERE user_id = ?")
            .bind(format_timestamp(next_send_at))
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn record_digest(
        &self,
        user_id: &str,
        email: &str,
        subject: &str,
        body: &str,
        article_count: usize,
    ) -> anyhow::Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO digests (user_id, email, subject, body, article_count, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(user_id)
        .bind(email)
        .bind(subject)
        .bind(body)
        .bind(article_count as i64)
        .bind(format_timestamp(Utc::now()))
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn get_digests_for_user(&self, user_id: &str) -> anyhow::Result<Vec<DigestRecord>> {
        let digests = sqlx::query_as::<_, DigestRecord>(
            "SELECT * FROM digests WHERE user_id = ? ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(digests)
    }

    pub async fn count_digests(&self) -> anyhow::Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM digests")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }
}
