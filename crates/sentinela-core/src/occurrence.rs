// Occurrence domain types
//
// An Occurrence is the durable, triage-approved record of an eligible
// donation case. This pipeline creates it exactly once per obito and never
// mutates it afterwards; status transitions belong to the downstream
// workflow service.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Occurrence workflow status
///
/// Only `Pendente` is produced here; the remaining states exist so downstream
/// rows deserialize cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OccurrenceStatus {
    #[serde(rename = "PENDENTE")]
    Pendente,
    #[serde(rename = "EM_ANDAMENTO")]
    EmAndamento,
    #[serde(rename = "ACEITA")]
    Aceita,
    #[serde(rename = "RECUSADA")]
    Recusada,
    #[serde(rename = "CANCELADA")]
    Cancelada,
    #[serde(rename = "CONCLUIDA")]
    Concluida,
}

impl OccurrenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OccurrenceStatus::Pendente => "PENDENTE",
            OccurrenceStatus::EmAndamento => "EM_ANDAMENTO",
            OccurrenceStatus::Aceita => "ACEITA",
            OccurrenceStatus::Recusada => "RECUSADA",
            OccurrenceStatus::Cancelada => "CANCELADA",
            OccurrenceStatus::Concluida => "CONCLUIDA",
        }
    }
}

/// A triage-approved donation case
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Occurrence {
    pub id: Uuid,
    pub obito_id: Uuid,
    pub hospital_id: Uuid,
    pub status: OccurrenceStatus,
    pub score_priorizacao: i32,
    pub nome_paciente_mascarado: String,
    /// Unmasked snapshot of the obito, hidden from API responses (LGPD)
    #[serde(skip_serializing)]
    pub dados_completos: serde_json::Value,
    pub data_obito: DateTime<Utc>,
    pub janela_expira_em: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Occurrence {
    /// Time left until the capture window closes, clamped at zero
    pub fn time_remaining(&self, now: DateTime<Utc>) -> Duration {
        let remaining = self.janela_expira_em - now;
        if remaining < Duration::zero() {
            Duration::zero()
        } else {
            remaining
        }
    }

    /// Sector extracted from the dados_completos snapshot
    pub fn setor(&self) -> Option<String> {
        self.dados_completos
            .get("setor")
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }
}

/// Input for idempotent occurrence creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOccurrenceInput {
    pub obito_id: Uuid,
    pub hospital_id: Uuid,
    pub score_priorizacao: i32,
    pub nome_paciente_mascarado: String,
    pub dados_completos: serde_json::Value,
    pub data_obito: DateTime<Utc>,
    pub janela_expira_em: DateTime<Utc>,
}

/// Human-readable remaining window: "2h 30min", "2h", "45min" or "Expirado"
pub fn format_time_remaining(remaining: Duration) -> String {
    if remaining <= Duration::zero() {
        return "Expirado".to_string();
    }

    let hours = remaining.num_hours();
    let minutes = remaining.num_minutes() % 60;

    if hours > 0 {
        if minutes > 0 {
            format!("{hours}h {minutes}min")
        } else {
            format!("{hours}h")
        }
    } else {
        format!("{minutes}min")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_time_remaining() {
        assert_eq!(
            format_time_remaining(Duration::hours(2) + Duration::minutes(30)),
            "2h 30min"
        );
        assert_eq!(format_time_remaining(Duration::hours(2)), "2h");
        assert_eq!(format_time_remaining(Duration::minutes(45)), "45min");
        assert_eq!(format_time_remaining(Duration::zero()), "Expirado");
        assert_eq!(format_time_remaining(Duration::minutes(-10)), "Expirado");
    }

    #[test]
    fn test_status_serializes_upstream_names() {
        let json = serde_json::to_string(&OccurrenceStatus::Pendente).unwrap();
        assert_eq!(json, r#""PENDENTE""#);
    }
}
