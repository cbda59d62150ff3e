// Notification record types
//
// One NotificationRecord per delivery attempt outcome, per channel. For a
// dead-lettered queue item the terminal `falha` record is the sole durable
// trace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Delivery channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationChannel {
    Dashboard,
    Email,
    Sms,
    Push,
}

impl NotificationChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationChannel::Dashboard => "dashboard",
            NotificationChannel::Email => "email",
            NotificationChannel::Sms => "sms",
            NotificationChannel::Push => "push",
        }
    }
}

impl std::fmt::Display for NotificationChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a delivery attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Enviado,
    Falha,
    Pendente,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Enviado => "enviado",
            NotificationStatus::Falha => "falha",
            NotificationStatus::Pendente => "pendente",
        }
    }
}

/// Persisted delivery outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: Uuid,
    pub occurrence_id: Uuid,
    pub canal: NotificationChannel,
    pub status_envio: NotificationStatus,
    #[serde(default)]
    pub erro_mensagem: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub enviado_em: DateTime<Utc>,
}

/// Input for recording a delivery outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewNotificationRecord {
    pub occurrence_id: Uuid,
    pub canal: NotificationChannel,
    pub status_envio: NotificationStatus,
    pub erro_mensagem: Option<String>,
    pub metadata: serde_json::Value,
}

impl NewNotificationRecord {
    /// A successful delivery outcome
    pub fn sent(
        occurrence_id: Uuid,
        canal: NotificationChannel,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            occurrence_id,
            canal,
            status_envio: NotificationStatus::Enviado,
            erro_mensagem: None,
            metadata,
        }
    }

    /// A failed (or dead-lettered) delivery outcome
    pub fn failed(
        occurrence_id: Uuid,
        canal: NotificationChannel,
        error: impl Into<String>,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            occurrence_id,
            canal,
            status_envio: NotificationStatus::Falha,
            erro_mensagem: Some(error.into()),
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_wire_names() {
        assert_eq!(
            serde_json::to_string(&NotificationChannel::Dashboard).unwrap(),
            r#""dashboard""#
        );
        assert_eq!(
            serde_json::to_string(&NotificationStatus::Falha).unwrap(),
            r#""falha""#
        );
    }

    #[test]
    fn test_failed_record_carries_error() {
        let rec = NewNotificationRecord::failed(
            Uuid::now_v7(),
            NotificationChannel::Sms,
            "rate limited",
            serde_json::json!({}),
        );
        assert_eq!(rec.status_envio, NotificationStatus::Falha);
        assert_eq!(rec.erro_mensagem.as_deref(), Some("rate limited"));
    }
}
