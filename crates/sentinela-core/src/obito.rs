// Obito (death record) domain types
//
// ObitoRecord mirrors the row ingested from the hospital feed; DeathEvent is
// the ephemeral stream payload that points at it.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

/// Default capture window after time of death, in hours
pub const DEFAULT_WINDOW_HOURS: i64 = 6;

/// Stream payload announcing a detected death
///
/// Read once per stream entry. Unknown extra fields from upstream detectors
/// are tolerated and ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeathEvent {
    pub obito_id: Uuid,
    pub hospital_id: Uuid,
    #[serde(default)]
    pub timestamp_deteccao: Option<DateTime<Utc>>,
}

/// A death record fetched from the external obito store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObitoRecord {
    pub id: Uuid,
    pub hospital_id: Uuid,
    pub nome_paciente: String,
    pub data_nascimento: NaiveDate,
    pub data_obito: DateTime<Utc>,
    pub causa_mortis: String,
    #[serde(default)]
    pub prontuario: Option<String>,
    #[serde(default)]
    pub setor: Option<String>,
    #[serde(default)]
    pub leito: Option<String>,
    #[serde(default)]
    pub identificacao_desconhecida: bool,
}

impl ObitoRecord {
    /// Age in whole years at the time of death, floored
    ///
    /// Subtracts one year when the birthday has not yet been reached in the
    /// death year. Compares calendar (month, day), not day-of-year, so leap
    /// and non-leap years line up.
    pub fn age_at_death(&self) -> i32 {
        let death = self.data_obito.date_naive();
        let birth = self.data_nascimento;
        let mut years = death.year() - birth.year();
        if (death.month(), death.day()) < (birth.month(), birth.day()) {
            years -= 1;
        }
        years
    }

    /// Whether the record is still inside the capture window at `now`
    ///
    /// The boundary is exclusive: at exactly `window_hours` elapsed the record
    /// is out of window.
    pub fn is_within_window(&self, window_hours: i64, now: DateTime<Utc>) -> bool {
        now < self.window_deadline(window_hours)
    }

    /// Instant at which the capture window closes
    pub fn window_deadline(&self, window_hours: i64) -> DateTime<Utc> {
        self.data_obito + Duration::hours(window_hours)
    }

    /// Time left in the capture window, clamped at zero
    pub fn time_remaining(&self, window_hours: i64, now: DateTime<Utc>) -> Duration {
        let remaining = self.window_deadline(window_hours) - now;
        if remaining < Duration::zero() {
            Duration::zero()
        } else {
            remaining
        }
    }

    /// Full snapshot stored in the occurrence's dados_completos
    ///
    /// This is the only place the unmasked patient name is persisted.
    pub fn snapshot(&self) -> serde_json::Value {
        json!({
            "obito_id": self.id,
            "hospital_id": self.hospital_id,
            "nome_paciente": self.nome_paciente,
            "data_nascimento": self.data_nascimento,
            "data_obito": self.data_obito,
            "causa_mortis": self.causa_mortis,
            "idade": self.age_at_death(),
            "prontuario": self.prontuario,
            "setor": self.setor,
            "leito": self.leito,
            "identificacao_desconhecida": self.identificacao_desconhecida,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn obito(birth: NaiveDate, death: DateTime<Utc>) -> ObitoRecord {
        ObitoRecord {
            id: Uuid::now_v7(),
            hospital_id: Uuid::now_v7(),
            nome_paciente: "Joao Silva".to_string(),
            data_nascimento: birth,
            data_obito: death,
            causa_mortis: "Parada cardiorrespiratoria".to_string(),
            prontuario: None,
            setor: Some("UTI".to_string()),
            leito: None,
            identificacao_desconhecida: false,
        }
    }

    #[test]
    fn test_age_after_birthday() {
        let o = obito(
            NaiveDate::from_ymd_opt(1960, 3, 1).unwrap(),
            Utc.with_ymd_and_hms(2025, 6, 15, 10, 0, 0).unwrap(),
        );
        assert_eq!(o.age_at_death(), 65);
    }

    #[test]
    fn test_age_before_birthday() {
        let o = obito(
            NaiveDate::from_ymd_opt(1960, 8, 1).unwrap(),
            Utc.with_ymd_and_hms(2025, 6, 15, 10, 0, 0).unwrap(),
        );
        assert_eq!(o.age_at_death(), 64);
    }

    #[test]
    fn test_age_on_birthday() {
        let o = obito(
            NaiveDate::from_ymd_opt(1960, 6, 15).unwrap(),
            Utc.with_ymd_and_hms(2025, 6, 15, 0, 0, 0).unwrap(),
        );
        assert_eq!(o.age_at_death(), 65);
    }

    #[test]
    fn test_age_for_leap_day_birth() {
        let birth = NaiveDate::from_ymd_opt(2000, 2, 29).unwrap();
        let before = obito(birth, Utc.with_ymd_and_hms(2025, 2, 28, 12, 0, 0).unwrap());
        assert_eq!(before.age_at_death(), 24);
        let after = obito(birth, Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap());
        assert_eq!(after.age_at_death(), 25);
    }

    #[test]
    fn test_window_boundary_exclusive() {
        let death = Utc.with_ymd_and_hms(2025, 6, 15, 10, 0, 0).unwrap();
        let o = obito(NaiveDate::from_ymd_opt(1960, 1, 1).unwrap(), death);

        let just_inside = death + Duration::hours(6) - Duration::seconds(1);
        assert!(o.is_within_window(6, just_inside));

        // Exactly at the 6h mark is out of window
        let at_boundary = death + Duration::hours(6);
        assert!(!o.is_within_window(6, at_boundary));
    }

    #[test]
    fn test_time_remaining_clamped() {
        let death = Utc.with_ymd_and_hms(2025, 6, 15, 10, 0, 0).unwrap();
        let o = obito(NaiveDate::from_ymd_opt(1960, 1, 1).unwrap(), death);

        let late = death + Duration::hours(8);
        assert_eq!(o.time_remaining(6, late), Duration::zero());

        let early = death + Duration::hours(1);
        assert_eq!(o.time_remaining(6, early), Duration::hours(5));
    }

    #[test]
    fn test_death_event_tolerates_extra_fields() {
        let raw = format!(
            r#"{{"obito_id":"{}","hospital_id":"{}","nome_paciente":"X","idade":40}}"#,
            Uuid::now_v7(),
            Uuid::now_v7()
        );
        let event: DeathEvent = serde_json::from_str(&raw).unwrap();
        assert!(event.timestamp_deteccao.is_none());
    }
}
