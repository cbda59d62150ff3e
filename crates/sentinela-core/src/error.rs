// Error taxonomy for the triage and notification pipeline
//
// The variants encode the handling policy, not just the cause:
// - StreamError / QueueError / PublishError are transient infra failures the
//   surrounding loop retries
// - StoreError::NotFound is poison input (ack and drop); other StoreError
//   variants leave the stream entry unacknowledged for redelivery
// - DeliveryError::Transient goes back to the queue with backoff;
//   DeliveryError::Permanent dead-letters immediately

use thiserror::Error;
use uuid::Uuid;

/// Errors from the event stream backend
#[derive(Debug, Error)]
pub enum StreamError {
    /// Failed to connect to the broker
    #[error("stream connection error: {0}")]
    Connection(String),

    /// Failed to read from the stream
    #[error("stream read error: {0}")]
    Read(String),

    /// Failed to acknowledge an entry
    #[error("stream ack error: {0}")]
    Ack(String),

    /// Failed to append an entry
    #[error("stream append error: {0}")]
    Append(String),
}

/// Errors from persistent stores (obitos, occurrences, rules, hospitals)
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested record does not exist
    #[error("record not found: {0}")]
    NotFound(Uuid),

    /// Underlying database failure
    #[error("database error: {0}")]
    Database(String),
}

impl StoreError {
    /// Create a database error
    pub fn database(msg: impl Into<String>) -> Self {
        StoreError::Database(msg.into())
    }

    /// True when the error is a missing record rather than an infra failure
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// Errors from the reliable delivery queue backend
#[derive(Debug, Error)]
pub enum QueueError {
    /// Failed to enqueue an item
    #[error("queue enqueue error: {0}")]
    Enqueue(String),

    /// Failed to move or remove an item
    #[error("queue operation error: {0}")]
    Operation(String),
}

/// Errors from the pub/sub transport
#[derive(Debug, Error)]
pub enum PublishError {
    /// Failed to publish a payload
    #[error("publish error: {0}")]
    Publish(String),

    /// Failed to subscribe to a channel
    #[error("subscribe error: {0}")]
    Subscribe(String),
}

/// Outcome classification for a single delivery attempt
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Worth retrying with backoff (provider hiccup, network, rate limit)
    #[error("transient delivery failure: {0}")]
    Transient(String),

    /// Retrying cannot succeed (invalid recipient, unrenderable message)
    #[error("permanent delivery failure: {0}")]
    Permanent(String),
}

impl DeliveryError {
    /// Create a transient failure
    pub fn transient(msg: impl Into<String>) -> Self {
        DeliveryError::Transient(msg.into())
    }

    /// Create a permanent failure
    pub fn permanent(msg: impl Into<String>) -> Self {
        DeliveryError::Permanent(msg.into())
    }

    /// True when the attempt should be retried
    pub fn is_transient(&self) -> bool {
        matches!(self, DeliveryError::Transient(_))
    }
}

/// Errors surfacing from the triage motor loop
///
/// The loop logs and counts these and keeps going; none are fatal.
#[derive(Debug, Error)]
pub enum TriageError {
    /// Stream backend failure
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// Store failure during fetch/exists/create
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Entry payload did not parse
    #[error("malformed stream entry {entry_id}: {reason}")]
    MalformedEntry { entry_id: String, reason: String },
}
