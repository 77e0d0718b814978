//! 既読コンテンツのフィンガープリントと受信者ごとの配信履歴を保持するストア。
//!
//! 2つの名前空間（グローバルなフィンガープリント集合と受信者ごとの配信ID集合）は独立しており、
//! それぞれの `insert_*` は「未登録なら登録して true を返す」をアトミックに行う。
//! どちらの集合も単調増加で、削除・期限切れの仕組みは持たない。

pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::util::error::StoreError;

pub use memory::InMemoryFingerprintStore;
pub use postgres::PgFingerprintStore;

#[async_trait]
pub trait FingerprintStore: Send + Sync {
    async fn contains_fingerprint(&self, fingerprint: &str) -> Result<bool, StoreError>;

    /// フィンガープリントを登録する。新規登録だった場合は true。
    async fn insert_fingerprint(&self, fingerprint: &str) -> Result<bool, StoreError>;

    async fn contains_delivery(&self, recipient: &str, delivery_id: &str)
    -> Result<bool, StoreError>;

    /// 配信IDを受信者の履歴に登録する。新規登録だった場合は true。
    async fn insert_delivery(&self, recipient: &str, delivery_id: &str)
    -> Result<bool, StoreError>;
}
