// Ports for pluggable backends
//
// These traits keep the pipeline independent of Redis and Postgres:
// - Redis-backed implementations for production (stream, queues, pub/sub)
// - Postgres-backed implementations for the stores
// - In-memory implementations for examples and testing

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{PublishError, QueueError, StoreError, StreamError};
use crate::notification::NewNotificationRecord;
use crate::obito::ObitoRecord;
use crate::occurrence::{CreateOccurrenceInput, Occurrence};
use crate::queue::QueueItem;
use crate::rule::EligibilityRule;

// ============================================================================
// EventStream - append-only log consumed through a competing-consumers group
// ============================================================================

/// A raw entry read from the event stream
#[derive(Debug, Clone)]
pub struct StreamEntry {
    /// Broker-assigned entry id, used for acknowledgement
    pub id: String,
    /// Serialized DeathEvent
    pub payload: String,
}

/// Append-only death-event stream with consumer-group semantics
///
/// Delivery is at least once: an entry that is read but never acknowledged is
/// redelivered after the consumer crashes or times out.
#[async_trait]
pub trait EventStream: Send + Sync {
    /// Create the consumer group if it does not exist (idempotent)
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), StreamError>;

    /// Read up to `count` undelivered entries, blocking up to `block`
    ///
    /// Returns an empty batch on timeout so the caller can observe shutdown.
    async fn read_next(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>, StreamError>;

    /// Acknowledge an entry as handled
    async fn ack(&self, stream: &str, group: &str, entry_id: &str) -> Result<(), StreamError>;

    /// Append a payload to the stream (producer side; used by upstream
    /// detectors and tests)
    async fn append(&self, stream: &str, payload: &str) -> Result<String, StreamError>;
}

// ============================================================================
// Stores
// ============================================================================

/// Source of configurable eligibility rules, ordered by prioridade
#[async_trait]
pub trait RuleSource: Send + Sync {
    async fn list_active_rules(&self) -> Result<Vec<EligibilityRule>, StoreError>;
}

/// Read access to the obito store
#[async_trait]
pub trait ObitoStore: Send + Sync {
    /// Ok(None) means the record does not exist (poison reference);
    /// Err means the store itself failed (transient).
    async fn get_by_id(&self, id: Uuid) -> Result<Option<ObitoRecord>, StoreError>;
}

/// Occurrence persistence: existence check plus idempotent creation
#[async_trait]
pub trait OccurrenceStore: Send + Sync {
    async fn exists_by_obito_id(&self, obito_id: Uuid) -> Result<bool, StoreError>;

    async fn create(&self, input: CreateOccurrenceInput) -> Result<Occurrence, StoreError>;
}

/// Hospital display-name lookup for notifications
#[async_trait]
pub trait HospitalDirectory: Send + Sync {
    async fn name_by_id(&self, id: Uuid) -> Result<Option<String>, StoreError>;
}

/// Audit log of delivery outcomes, one record per attempt outcome per channel
#[async_trait]
pub trait NotificationLog: Send + Sync {
    async fn record(&self, record: NewNotificationRecord) -> Result<(), StoreError>;
}

/// Notification targets for an eligible occurrence
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    async fn email_recipients(&self) -> Result<Vec<String>, StoreError>;

    async fn sms_recipients(&self) -> Result<Vec<String>, StoreError>;

    async fn push_tokens(&self) -> Result<Vec<String>, StoreError>;
}

// ============================================================================
// DeliveryQueue - durable work queue with visible in-flight state
// ============================================================================

/// Reliable delivery queue backed by a pending list and an in-flight list
///
/// `pull_to_inflight` moves one item atomically so a crash mid-send leaves it
/// recoverable rather than lost. The backend serializes the move; no
/// additional in-process locking is required.
///
/// Items travel as raw serialized payloads because removal from the in-flight
/// list matches on the exact bytes that were moved there.
#[async_trait]
pub trait DeliveryQueue: Send + Sync {
    /// Append an item to the pending list
    async fn enqueue(&self, item: &QueueItem) -> Result<(), QueueError>;

    /// Atomically move one item from pending to in-flight; None when empty
    async fn pull_to_inflight(&self) -> Result<Option<String>, QueueError>;

    /// Remove the in-flight copy and append the (possibly updated) item back
    /// to pending
    async fn requeue(&self, raw: &str, item: &QueueItem) -> Result<(), QueueError>;

    /// Remove an item from the in-flight list (success or dead-letter)
    async fn remove_inflight(&self, raw: &str) -> Result<(), QueueError>;

    /// Move items stranded in in-flight (by a crash) back to pending;
    /// returns how many were recovered
    async fn recover_inflight(&self) -> Result<usize, QueueError>;

    async fn pending_len(&self) -> Result<usize, QueueError>;

    async fn inflight_len(&self) -> Result<usize, QueueError>;
}

// ============================================================================
// Publisher / Subscriber - best-effort pub/sub for the SSE hub
// ============================================================================

/// Fire-and-forget publish to a named channel
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), PublishError>;
}

/// Subscription to a named channel
///
/// Returns a receiver of raw payloads; dropping it ends the subscription.
#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<String>, PublishError>;
}

// ============================================================================
// OccurrenceSink - the motor's only knowledge of downstream delivery
// ============================================================================

/// Extension point invoked once per newly created eligible occurrence
///
/// The motor fires this asynchronously and never waits on delivery
/// completion; implementations isolate their own channel failures.
#[async_trait]
pub trait OccurrenceSink: Send + Sync {
    async fn on_eligible_occurrence(&self, occurrence: Occurrence, hospital_nome: String);
}
