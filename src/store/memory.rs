use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use super::FingerprintStore;
use crate::util::error::StoreError;
use crate::util::text::truncate_chars;

/// ミューテックスで保護したインメモリ実装。
///
/// 同一フィンガープリントへの並行な check-then-insert は片方だけが成功する。
#[derive(Debug, Default)]
pub struct InMemoryFingerprintStore {
    fingerprints: Mutex<HashMap<String, DateTime<Utc>>>,
    deliveries: Mutex<HashMap<String, HashSet<String>>>,
}

impl InMemoryFingerprintStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// 登録済みフィンガープリント数。
    ///
    /// # Errors
    /// ロックがポイズンされている場合はエラーを返す。
    pub fn fingerprint_count(&self) -> Result<usize, StoreError> {
        Ok(self
            .fingerprints
            .lock()
            .map_err(|_| StoreError::Poisoned)?
            .len())
    }

    /// 受信者ごとの配信済み件数。
    ///
    /// # Errors
    /// ロックがポイズンされている場合はエラーを返す。
    pub fn delivery_count(&self, recipient: &str) -> Result<usize, StoreError> {
        Ok(self
            .deliveries
            .lock()
            .map_err(|_| StoreError::Poisoned)?
            .get(recipient)
            .map_or(0, HashSet::len))
    }

    /// フィンガープリントを最初に観測した時刻。
    ///
    /// # Errors
    /// ロックがポイズンされている場合はエラーを返す。
    pub fn first_seen(&self, fingerprint: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self
            .fingerprints
            .lock()
            .map_err(|_| StoreError::Poisoned)?
            .get(fingerprint)
            .copied())
    }
}

#[async_trait]
impl FingerprintStore for InMemoryFingerprintStore {
    async fn contains_fingerprint(&self, fingerprint: &str) -> Result<bool, StoreError> {
        let guard = self.fingerprints.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(guard.contains_key(fingerprint))
    }

    async fn insert_fingerprint(&self, fingerprint: &str) -> Result<bool, StoreError> {
        let mut guard = self.fingerprints.lock().map_err(|_| StoreError::Poisoned)?;
        if guard.contains_key(fingerprint) {
            return Ok(false);
        }
        guard.insert(fingerprint.to_string(), Utc::now());
        debug!(fingerprint = %truncate_chars(fingerprint, 16), "stored fingerprint");
        Ok(true)
    }

    async fn contains_delivery(
        &self,
        recipient: &str,
        delivery_id: &str,
    ) -> Result<bool, StoreError> {
        let guard = self.deliveries.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(guard
            .get(recipient)
            .is_some_and(|delivered| delivered.contains(delivery_id)))
    }

    async fn insert_delivery(
        &self,
        recipient: &str,
        delivery_id: &str,
    ) -> Result<bool, StoreError> {
        let mut guard = self.deliveries.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(guard
            .entry(recipient.to_string())
            .or_default()
            .insert(delivery_id.to_string()))
    }
}
