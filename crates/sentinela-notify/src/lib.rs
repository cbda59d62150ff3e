// Notification channels for eligible occurrences
//
// The fan-out sink receives each newly created occurrence from the triage
// motor and pushes it out over four isolated channels:
//
// - dashboard: SSE hub over broker pub/sub (real-time, best effort)
// - email: reliable queue + SMTP worker (3 retries)
// - sms: reliable queue + Twilio worker (5 retries)
// - push: direct FCM gateway calls

pub mod email;
pub mod fanout;
pub mod push;
pub mod sms;
pub mod sse;
pub mod worker;

pub use email::EmailSender;
pub use fanout::{NotificationFanout, OccurrenceAlert};
pub use push::PushGateway;
pub use sms::SmsSender;
pub use sse::{HubStats, SseHub};
pub use worker::{QueueDelivery, QueueWorker, WorkerStats, WorkerStatsSnapshot};
