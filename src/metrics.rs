//! Interaction metrics: one row per chat exchange, with feedback attached
//! after the fact by request id.

use std::path::PathBuf;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};

use crate::core::errors::ApiError;
use crate::rag::SourceRef;

#[derive(Debug, Clone)]
pub struct InteractionRow {
    pub id: String,
    pub timestamp: String,
    pub query: String,
    pub response: String,
    pub sources: String,
    pub latency_ms: f64,
    pub ttft_ms: f64,
    pub feedback_score: Option<i64>,
}

#[derive(Clone)]
pub struct MetricsStore {
    pool: SqlitePool,
}

impl MetricsStore {
    pub async fn new(db_path: PathBuf) -> Result<Self, ApiError> {
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(ApiError::internal)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), ApiError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chat_logs (
                id TEXT PRIMARY KEY,
                timestamp DATETIME,
                query TEXT,
                response TEXT,
                sources TEXT,
                latency_ms REAL,
                ttft_ms REAL,
                feedback_score INTEGER
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(())
    }

    /// Records one interaction and returns its freshly minted request id.
    pub async fn log_interaction(
        &self,
        query: &str,
        response: &str,
        sources: &[SourceRef],
        latency_ms: f64,
        ttft_ms: f64,
    ) -> Result<String, ApiError> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let timestamp = chrono::Utc::now().to_rfc3339();
        let sources_json = serde_json::to_string(sources).map_err(ApiError::internal)?;

        sqlx::query(
            "INSERT INTO chat_logs (id, timestamp, query, response, sources, latency_ms, ttft_ms, feedback_score)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL)",
        )
        .bind(&request_id)
        .bind(&timestamp)
        .bind(query)
        .bind(response)
        .bind(&sources_json)
        .bind(latency_ms)
        .bind(ttft_ms)
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(request_id)
    }

    /// Attaches a feedback score to an earlier interaction. An unknown id is
    /// the caller's error, not a silent no-op.
    pub async fn update_feedback(&self, request_id: &str, score: i64) -> Result<(), ApiError> {
        let result = sqlx::query("UPDATE chat_logs SET feedback_score = ?1 WHERE id = ?2")
            .bind(score)
            .bind(request_id)
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        if result.rows_affected() == 0 {
            return Err(ApiError::NotFound(format!(
                "unknown request id {}",
                request_id
            )));
        }

        Ok(())
    }

    pub async fn get_interaction(
        &self,
        request_id: &str,
    ) -> Result<Option<InteractionRow>, ApiError> {
        let row = sqlx::query(
            "SELECT id, timestamp, query, response, sources, latency_ms, ttft_ms, feedback_score
             FROM chat_logs WHERE id = ?1",
        )
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(row.map(|row| InteractionRow {
            id: row.get("id"),
            timestamp: row.get("timestamp"),
            query: row.get("query"),
            response: row.get("response"),
            sources: row.get("sources"),
            latency_ms: row.get("latency_ms"),
            ttft_ms: row.get("ttft_ms"),
            feedback_score: row.get("feedback_score"),
        }))
    }
}
