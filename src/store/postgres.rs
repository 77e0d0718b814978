/// Postgresに永続化するフィンガープリントストア。
///
/// 主キー制約と `ON CONFLICT DO NOTHING` で check-then-insert をアトミックにする。
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::debug;

use super::FingerprintStore;
use crate::util::error::StoreError;

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS briefing_article_fingerprints (
    fingerprint TEXT PRIMARY KEY,
    first_seen_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE TABLE IF NOT EXISTS briefing_deliveries (
    recipient TEXT NOT NULL,
    delivery_id TEXT NOT NULL,
    delivered_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (recipient, delivery_id)
);
";

#[derive(Debug, Clone)]
pub struct PgFingerprintStore {
    pool: PgPool,
}

impl PgFingerprintStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// テーブルが存在しなければ作成する。
    ///
    /// # Errors
    /// DDLの実行に失敗した場合はエラーを返す。
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        debug!("fingerprint store schema ensured");
        Ok(())
    }

    /// 接続確認（readinessプローブ用）。
    ///
    /// # Errors
    /// データベースに到達できない場合はエラーを返す。
    pub async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl FingerprintStore for PgFingerprintStore {
    async fn contains_fingerprint(&self, fingerprint: &str) -> Result<bool, StoreError> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM briefing_article_fingerprints WHERE fingerprint = $1) AS found",
        )
        .bind(fingerprint)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<bool, _>("found")?)
    }

    async fn insert_fingerprint(&self, fingerprint: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT INTO briefing_article_fingerprints (fingerprint) VALUES ($1) ON CONFLICT DO NOTHING",
        )
        .bind(fingerprint)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn contains_delivery(
        &self,
        recipient: &str,
        delivery_id: &str,
    ) -> Result<bool, StoreError> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM briefing_deliveries WHERE recipient = $1 AND delivery_id = $2) AS found",
        )
        .bind(recipient)
        .bind(delivery_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<bool, _>("found")?)
    }

    async fn insert_delivery(
        &self,
        recipient: &str,
        delivery_id: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT INTO briefing_deliveries (recipient, delivery_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(recipient)
        .bind(delivery_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
