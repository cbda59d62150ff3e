// Sentinela core domain
//
// This crate provides the DB-agnostic heart of the donation-triage pipeline:
//
// - Domain entities (ObitoRecord, Occurrence, NotificationRecord, QueueItem)
// - The closed set of eligibility rule kinds and their decoding
// - Ports (async traits) that storage and broker backends implement
// - The error taxonomy that drives ack-vs-redeliver and retry-vs-dead-letter
//
// Key design decisions:
// - At-least-once consumption with idempotent occurrence creation (obito_id is
//   the idempotency key); exactly-once is explicitly not a goal
// - Malformed input is acknowledged and dropped, never retried, so a poison
//   message can never stall the stream
// - Patient data is LGPD-masked before it is logged or persisted outside the
//   dados_completos snapshot

pub mod config;
pub mod error;
pub mod lgpd;
pub mod notification;
pub mod obito;
pub mod occurrence;
pub mod queue;
pub mod rule;
pub mod sse;
pub mod traits;

pub use config::Settings;
pub use error::{DeliveryError, PublishError, QueueError, StoreError, StreamError, TriageError};
pub use notification::{
    NewNotificationRecord, NotificationChannel, NotificationRecord, NotificationStatus,
};
pub use obito::{DeathEvent, ObitoRecord};
pub use occurrence::{format_time_remaining, CreateOccurrenceInput, Occurrence, OccurrenceStatus};
pub use queue::QueueItem;
pub use rule::{default_rules, sector_score, EligibilityResult, EligibilityRule, RuleKind};
pub use sse::SseEvent;
pub use traits::{
    DeliveryQueue, EventStream, HospitalDirectory, NotificationLog, ObitoStore, OccurrenceSink,
    OccurrenceStore, Publisher, RecipientDirectory, RuleSource, StreamEntry, Subscriber,
};
