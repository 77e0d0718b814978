use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::NaiveDate;

/// 受信者ごとに最後に配信した現地日付を覚えておく台帳。
///
/// 許容範囲内に複数回ティックが入っても、同じ現地日付には一度しか送らない。
/// プロセス内のみで保持する。
#[derive(Debug, Default)]
pub struct SendLedger {
    last_sent: Mutex<HashMap<String, NaiveDate>>,
}

impl SendLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn already_sent(&self, recipient: &str, local_date: NaiveDate) -> bool {
        self.last_sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(recipient)
            .is_some_and(|date| *date == local_date)
    }

    pub fn record(&self, recipient: &str, local_date: NaiveDate) {
        self.last_sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(recipient.to_string(), local_date);
    }
}
