//! SQLite persistence for users and their prediction history.

use crate::config::DatabaseConfig;
use serde::Serialize;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use thiserror::Error;

const TOP_LABELS_LIMIT: i64 = 5;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Username {0:?} is already taken")]
    DuplicateUsername(String),
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("Migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Prediction {
    pub id: i64,
    pub result: String,
    pub confidence: f64,
    pub image_name: String,
    pub original_name: String,
    pub timestamp: String,
    pub user_id: i64,
}

#[derive(Debug, Clone)]
pub struct NewPrediction {
    pub result: String,
    pub confidence: f64,
    pub image_name: String,
    pub original_name: String,
    pub timestamp: String,
    pub user_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct LabelCount {
    pub label: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct DailyCount {
    pub day: String,
    pub count: i64,
}

#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (creating if needed) the database and applies pending migrations.
    pub async fn connect(db_config: &DatabaseConfig) -> Result<Self, DbError> {
        let options = SqliteConnectOptions::from_str(&db_config.url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(db_config.max_connections)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        tracing::info!("Connected to database {}", db_config.url);
        Ok(db)
    }

    /// Single-connection in-memory database; every pooled connection would
    /// otherwise see its own empty schema.
    pub async fn in_memory() -> Result<Self, DbError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<(), DbError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub async fn create_user(&self, username: &str, password_hash: &str) -> Result<User, DbError> {
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (username, password_hash)
            VALUES (?, ?)
            RETURNING id, username, password_hash
            "#,
        )
        .bind(username)
        .bind(password_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                DbError::DuplicateUsername(username.to_string())
            }
            other => DbError::Sqlx(other),
        })
    }

    pub async fn find_user_by_name(&self, username: &str) -> Result<Option<User>, DbError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, username, password_hash FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    pub async fn find_user_by_id(&self, id: i64) -> Result<Option<User>, DbError> {
        let user =
            sqlx::query_as::<_, User>("SELECT id, username, password_hash FROM users WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(user)
    }

    pub async fn count_users(&self) -> Result<i64, DbError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn insert_prediction(&self, new: &NewPrediction) -> Result<Prediction, DbError> {
        let prediction = sqlx::query_as::<_, Prediction>(
            r#"
            INSERT INTO predictions (result, confidence, image_name, original_name, timestamp, user_id)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING id, result, confidence, image_name, original_name, timestamp, user_id
            "#,
        )
        .bind(&new.result)
        .bind(new.confidence)
        .bind(&new.image_name)
        .bind(&new.original_name)
        .bind(&new.timestamp)
        .bind(new.user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(prediction)
    }

    /// Newest first.
    pub async fn list_predictions_for_user(
        &self,
        user_id: i64,
        limit: i64,
    ) -> Result<Vec<Prediction>, DbError> {
        let predictions = sqlx::query_as::<_, Prediction>(
            r#"
            SELECT id, result, confidence, image_name, original_name, timestamp, user_id
            FROM predictions
            WHERE user_id = ?
            ORDER BY timestamp DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(predictions)
    }

    /// Whether `image_name` belongs to one of `user_id`'s predictions.
    pub async fn user_owns_image(&self, user_id: i64, image_name: &str) -> Result<bool, DbError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM predictions WHERE user_id = ? AND image_name = ?",
        )
        .bind(user_id)
        .bind(image_name)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    pub async fn count_predictions_for_user(&self, user_id: i64) -> Result<i64, DbError> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM predictions WHERE user_id = ?")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    pub async fn count_predictions(&self) -> Result<i64, DbError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM predictions")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Five most frequent labels, most frequent first; equal counts sort by label.
    pub async fn top_labels_for_user(&self, user_id: i64) -> Result<Vec<LabelCount>, DbError> {
        let rows = sqlx::query_as::<_, LabelCount>(
            r#"
            SELECT result AS label, COUNT(*) AS count
            FROM predictions
            WHERE user_id = ?
            GROUP BY result
            ORDER BY count DESC, label ASC
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(TOP_LABELS_LIMIT)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Counts per `YYYY-MM-DD` prefix of the stored timestamp, oldest day first.
    pub async fn daily_counts_for_user(&self, user_id: i64) -> Result<Vec<DailyCount>, DbError> {
        let rows = sqlx::query_as::<_, DailyCount>(
            r#"
            SELECT substr(timestamp, 1, 10) AS day, COUNT(*) AS count
            FROM predictions
            WHERE user_id = ?
            GROUP BY day
            ORDER BY day ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
