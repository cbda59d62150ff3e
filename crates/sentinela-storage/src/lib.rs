// Storage backends for the Sentinela pipeline
//
// - `repositories`: Postgres implementations of the store ports
// - `broker`: Redis implementations of the stream, queue and pub/sub ports
// - `memory`: in-memory implementations for tests and local runs

pub mod broker;
pub mod memory;
pub mod models;
pub mod repositories;

pub use broker::{RedisBroker, RedisQueue};
pub use repositories::Database;
