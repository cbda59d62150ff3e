// SSE wire payload for the dashboard channel

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::occurrence::{format_time_remaining, Occurrence};

/// Event pushed to connected dashboard clients
///
/// Wire shape: `{type, occurrence_id, hospital_nome, setor, tempo_restante,
/// created_at}`; the heartbeat variant carries only `type` and `created_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SseEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub occurrence_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hospital_nome: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub setor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tempo_restante: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SseEvent {
    /// Event announcing a newly created occurrence
    pub fn new_occurrence(occurrence: &Occurrence, hospital_nome: &str) -> Self {
        let now = Utc::now();
        Self {
            event_type: "new_occurrence".to_string(),
            occurrence_id: Some(occurrence.id),
            hospital_nome: Some(hospital_nome.to_string()),
            setor: occurrence.setor(),
            tempo_restante: Some(format_time_remaining(occurrence.time_remaining(now))),
            created_at: now,
        }
    }

    /// Keep-alive heartbeat
    pub fn heartbeat() -> Self {
        Self {
            event_type: "heartbeat".to_string(),
            occurrence_id: None,
            hospital_nome: None,
            setor: None,
            tempo_restante: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_heartbeat(&self) -> bool {
        self.event_type == "heartbeat"
    }
}
