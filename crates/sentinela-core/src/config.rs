// Pipeline configuration
//
// Settings are read from the environment in the binary; each section also
// has Default + with_* builders so tests and examples can configure the
// pipeline directly.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Triage motor tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageConfig {
    /// Stream carrying detected death events
    pub stream: String,
    /// Consumer group shared by motor instances
    pub group: String,
    /// Consumer name, unique per instance
    pub consumer: String,
    /// Block time for a stream read; bounds how often shutdown is observed
    pub block: Duration,
    /// Max entries per read
    pub batch_size: usize,
    /// Rule cache TTL
    pub rules_cache_ttl: Duration,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            stream: "obitos:detectados".to_string(),
            group: "triagem-motor".to_string(),
            consumer: "triagem-consumer-1".to_string(),
            block: Duration::from_secs(5),
            batch_size: 10,
            rules_cache_ttl: Duration::from_secs(300),
        }
    }
}

impl TriageConfig {
    pub fn with_consumer(mut self, consumer: impl Into<String>) -> Self {
        self.consumer = consumer.into();
        self
    }

    pub fn with_block(mut self, block: Duration) -> Self {
        self.block = block;
        self
    }

    pub fn with_rules_cache_ttl(mut self, ttl: Duration) -> Self {
        self.rules_cache_ttl = ttl;
        self
    }
}

/// Queue worker tunables, shared by the email and SMS workers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Fixed poll interval between cycles
    pub poll_interval: Duration,
    /// Max items processed per cycle
    pub batch_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 10,
        }
    }
}

impl WorkerConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }
}

/// SMTP transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
    /// STARTTLS when true, plain connection otherwise (local relay)
    pub starttls: bool,
}

/// Twilio SMS provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
    /// Override for tests; defaults to the Twilio REST endpoint
    pub base_url: String,
}

impl TwilioConfig {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.twilio.com";
}

/// FCM push gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FcmConfig {
    pub server_key: String,
    /// Override for tests; defaults to the FCM legacy send endpoint
    pub url: String,
}

impl FcmConfig {
    pub const DEFAULT_URL: &'static str = "https://fcm.googleapis.com/fcm/send";
}

/// Static notification targets, used until role-based routing lands
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecipientsConfig {
    pub emails: Vec<String>,
    pub phones: Vec<String>,
    pub push_tokens: Vec<String>,
}

/// Top-level settings for the pipeline service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub database_url: Option<String>,
    pub redis_url: String,
    pub http_addr: String,
    pub dashboard_url: String,
    pub triage: TriageConfig,
    pub worker: WorkerConfig,
    /// None disables the email channel
    pub smtp: Option<SmtpConfig>,
    /// None disables the SMS channel
    pub twilio: Option<TwilioConfig>,
    /// None disables the push channel
    pub fcm: Option<FcmConfig>,
    pub recipients: RecipientsConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: None,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            http_addr: "0.0.0.0:8080".to_string(),
            dashboard_url: "http://localhost:3000/dashboard/status".to_string(),
            triage: TriageConfig::default(),
            worker: WorkerConfig::default(),
            smtp: None,
            twilio: None,
            fcm: None,
            recipients: RecipientsConfig::default(),
        }
    }
}

impl Settings {
    /// Load settings from environment variables
    ///
    /// Missing optional channel credentials disable that channel; nothing
    /// here panics.
    pub fn from_env() -> Self {
        let mut settings = Settings {
            database_url: std::env::var("DATABASE_URL").ok(),
            ..Settings::default()
        };

        if let Ok(url) = std::env::var("REDIS_URL") {
            settings.redis_url = url;
        }
        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            settings.http_addr = addr;
        }
        if let Ok(url) = std::env::var("DASHBOARD_URL") {
            settings.dashboard_url = url;
        }
        if let Ok(consumer) = std::env::var("TRIAGE_CONSUMER_NAME") {
            settings.triage.consumer = consumer;
        }
        if let Some(secs) = env_u64("TRIAGE_BLOCK_SECS") {
            settings.triage.block = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("RULES_CACHE_TTL_SECS") {
            settings.triage.rules_cache_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("WORKER_POLL_INTERVAL_SECS") {
            settings.worker.poll_interval = Duration::from_secs(secs);
        }
        if let Some(size) = env_u64("WORKER_BATCH_SIZE") {
            settings.worker.batch_size = (size as usize).max(1);
        }

        settings.smtp = match (
            std::env::var("SMTP_HOST"),
            std::env::var("SMTP_FROM"),
        ) {
            (Ok(host), Ok(from)) => Some(SmtpConfig {
                host,
                port: env_u64("SMTP_PORT").unwrap_or(587) as u16,
                username: std::env::var("SMTP_USERNAME").unwrap_or_default(),
                password: std::env::var("SMTP_PASSWORD").unwrap_or_default(),
                from,
                starttls: std::env::var("SMTP_STARTTLS")
                    .map(|v| v != "false")
                    .unwrap_or(true),
            }),
            _ => None,
        };

        settings.twilio = match (
            std::env::var("TWILIO_ACCOUNT_SID"),
            std::env::var("TWILIO_AUTH_TOKEN"),
            std::env::var("TWILIO_PHONE_NUMBER"),
        ) {
            (Ok(account_sid), Ok(auth_token), Ok(from_number)) => Some(TwilioConfig {
                account_sid,
                auth_token,
                from_number,
                base_url: std::env::var("TWILIO_BASE_URL")
                    .unwrap_or_else(|_| TwilioConfig::DEFAULT_BASE_URL.to_string()),
            }),
            _ => None,
        };

        settings.fcm = std::env::var("FCM_SERVER_KEY").ok().map(|server_key| FcmConfig {
            server_key,
            url: std::env::var("FCM_URL").unwrap_or_else(|_| FcmConfig::DEFAULT_URL.to_string()),
        });

        settings.recipients = RecipientsConfig {
            emails: env_csv("NOTIFY_EMAILS"),
            phones: env_csv("NOTIFY_PHONES"),
            push_tokens: env_csv("NOTIFY_PUSH_TOKENS"),
        };

        settings
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_csv(key: &str) -> Vec<String> {
    std::env::var(key)
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_triage_defaults() {
        let config = TriageConfig::default();
        assert_eq!(config.stream, "obitos:detectados");
        assert_eq!(config.group, "triagem-motor");
        assert_eq!(config.block, Duration::from_secs(5));
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.rules_cache_ttl, Duration::from_secs(300));
    }

    #[test]
    fn test_worker_builder() {
        let config = WorkerConfig::default()
            .with_poll_interval(Duration::from_millis(50))
            .with_batch_size(0);
        assert_eq!(config.poll_interval, Duration::from_millis(50));
        // Batch size never drops below one
        assert_eq!(config.batch_size, 1);
    }
}
