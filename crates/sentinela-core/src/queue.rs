// Reliable delivery queue item
//
// One generic shape shared by the email and SMS workers. The item lives in
// the broker's pending list, is moved atomically to an in-flight list for the
// duration of an attempt, and is destroyed on success or permanent failure.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Base delay for exponential retry backoff
pub const BASE_BACKOFF_SECS: i64 = 1;

/// An item awaiting delivery on a reliable channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: Uuid,
    pub occurrence_id: Uuid,
    /// Email address, E.164 phone number, etc. depending on the channel
    pub recipient: String,
    /// Channel-specific rendering context
    pub payload: serde_json::Value,
    pub retries: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_attempt_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_retry_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl QueueItem {
    /// Create a fresh item with no attempts recorded
    pub fn new(
        occurrence_id: Uuid,
        recipient: impl Into<String>,
        payload: serde_json::Value,
        max_retries: u32,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            occurrence_id,
            recipient: recipient.into(),
            payload,
            retries: 0,
            max_retries,
            created_at: Utc::now(),
            last_attempt_at: None,
            next_retry_at: None,
            last_error: None,
        }
    }

    /// True when the item is parked until a future retry time
    pub fn is_deferred(&self, now: DateTime<Utc>) -> bool {
        self.next_retry_at.is_some_and(|at| now < at)
    }

    /// True when no retry budget remains
    pub fn retries_exhausted(&self) -> bool {
        self.retries >= self.max_retries
    }
}

/// Backoff delay before a given retry attempt (1-based): base * 2^(attempt-1)
///
/// With a 1s base: 1s, 2s, 4s, 8s, 16s, ...
pub fn backoff_delay(attempt: u32) -> Duration {
    let attempt = attempt.max(1);
    Duration::seconds(BASE_BACKOFF_SECS << (attempt - 1).min(30))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_per_attempt() {
        assert_eq!(backoff_delay(1), Duration::seconds(1));
        assert_eq!(backoff_delay(2), Duration::seconds(2));
        assert_eq!(backoff_delay(3), Duration::seconds(4));
        assert_eq!(backoff_delay(4), Duration::seconds(8));
        assert_eq!(backoff_delay(5), Duration::seconds(16));

        for n in 1..10 {
            assert_eq!(backoff_delay(n + 1), backoff_delay(n) * 2);
        }
    }

    #[test]
    fn test_backoff_zero_attempt_treated_as_first() {
        assert_eq!(backoff_delay(0), Duration::seconds(1));
    }

    #[test]
    fn test_deferred_until_retry_time() {
        let mut item = QueueItem::new(Uuid::now_v7(), "+5511999999999", serde_json::json!({}), 5);
        let now = Utc::now();
        assert!(!item.is_deferred(now));

        item.next_retry_at = Some(now + Duration::seconds(30));
        assert!(item.is_deferred(now));
        assert!(!item.is_deferred(now + Duration::seconds(31)));
    }

    #[test]
    fn test_retries_exhausted() {
        let mut item = QueueItem::new(Uuid::now_v7(), "a@b.c", serde_json::json!({}), 3);
        assert!(!item.retries_exhausted());
        item.retries = 3;
        assert!(item.retries_exhausted());
    }
}
