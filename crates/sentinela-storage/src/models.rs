// Row types for the Postgres tables
//
// These map the persisted shape; conversions into the domain types live
// alongside so repositories stay thin.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use sentinela_core::{
    EligibilityRule, ObitoRecord, Occurrence, OccurrenceStatus,
};

#[derive(Debug, FromRow)]
pub struct ObitoRow {
    pub id: Uuid,
    pub hospital_id: Uuid,
    pub nome_paciente: String,
    pub data_nascimento: NaiveDate,
    pub data_obito: DateTime<Utc>,
    pub causa_mortis: String,
    pub prontuario: Option<String>,
    pub setor: Option<String>,
    pub leito: Option<String>,
    pub identificacao_desconhecida: bool,
}

impl From<ObitoRow> for ObitoRecord {
    fn from(row: ObitoRow) -> Self {
        ObitoRecord {
            id: row.id,
            hospital_id: row.hospital_id,
            nome_paciente: row.nome_paciente,
            data_nascimento: row.data_nascimento,
            data_obito: row.data_obito,
            causa_mortis: row.causa_mortis,
            prontuario: row.prontuario,
            setor: row.setor,
            leito: row.leito,
            identificacao_desconhecida: row.identificacao_desconhecida,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct OccurrenceRow {
    pub id: Uuid,
    pub obito_id: Uuid,
    pub hospital_id: Uuid,
    pub status: String,
    pub score_priorizacao: i32,
    pub nome_paciente_mascarado: String,
    pub dados_completos: serde_json::Value,
    pub data_obito: DateTime<Utc>,
    pub janela_expira_em: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<OccurrenceRow> for Occurrence {
    fn from(row: OccurrenceRow) -> Self {
        // Rows written by this pipeline always carry PENDENTE; tolerate
        // downstream transitions when re-reading.
        let status = match row.status.as_str() {
            "EM_ANDAMENTO" => OccurrenceStatus::EmAndamento,
            "ACEITA" => OccurrenceStatus::Aceita,
            "RECUSADA" => OccurrenceStatus::Recusada,
            "CANCELADA" => OccurrenceStatus::Cancelada,
            "CONCLUIDA" => OccurrenceStatus::Concluida,
            _ => OccurrenceStatus::Pendente,
        };
        Occurrence {
            id: row.id,
            obito_id: row.obito_id,
            hospital_id: row.hospital_id,
            status,
            score_priorizacao: row.score_priorizacao,
            nome_paciente_mascarado: row.nome_paciente_mascarado,
            dados_completos: row.dados_completos,
            data_obito: row.data_obito,
            janela_expira_em: row.janela_expira_em,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct RuleRow {
    pub id: Uuid,
    pub nome: String,
    pub tipo: String,
    pub parametros: serde_json::Value,
    pub prioridade: i32,
    pub ativa: bool,
}

impl From<RuleRow> for EligibilityRule {
    fn from(row: RuleRow) -> Self {
        EligibilityRule {
            id: row.id,
            nome: row.nome,
            tipo: row.tipo,
            parametros: row.parametros,
            prioridade: row.prioridade,
            ativa: row.ativa,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_status_falls_back_to_pendente() {
        let now = Utc::now();
        let row = OccurrenceRow {
            id: Uuid::now_v7(),
            obito_id: Uuid::now_v7(),
            hospital_id: Uuid::now_v7(),
            status: "ALGO_NOVO".to_string(),
            score_priorizacao: 50,
            nome_paciente_mascarado: "Jo**".to_string(),
            dados_completos: serde_json::json!({}),
            data_obito: now,
            janela_expira_em: now,
            created_at: now,
            updated_at: now,
        };
        let occurrence: Occurrence = row.into();
        assert_eq!(occurrence.status, OccurrenceStatus::Pendente);
    }
}
