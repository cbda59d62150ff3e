// Triage: rule evaluation and stream consumption
//
// The motor consumes death events from the stream through a consumer group,
// evaluates the configured rules, creates an occurrence for each eligible
// obito (idempotent per obito_id) and hands it to the notification sink.

pub mod cache;
pub mod engine;
pub mod motor;
pub mod stats;

pub use cache::RuleCache;
pub use engine::{evaluate, priority_score};
pub use motor::TriageMotor;
pub use stats::{TriageStats, TriageStatsSnapshot};
