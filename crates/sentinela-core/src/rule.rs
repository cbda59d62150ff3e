// Eligibility rules
//
// Rules arrive as DB rows with a `tipo` tag and a `parametros` JSON object
// and are decoded into the closed RuleKind enum. The rule vocabulary is
// centrally versioned, so a match over a closed enum is preferred over open
// polymorphism.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::obito::DEFAULT_WINDOW_HOURS;

/// Configurable eligibility rule as stored in the rule store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EligibilityRule {
    pub id: Uuid,
    pub nome: String,
    /// Type tag: idade_maxima, janela_horas, identificacao_desconhecida,
    /// causas_excludentes, setor_priorizacao
    pub tipo: String,
    pub parametros: serde_json::Value,
    /// Evaluation order (ascending)
    pub prioridade: i32,
    pub ativa: bool,
}

/// Decoded rule kind
#[derive(Debug, Clone, PartialEq)]
pub enum RuleKind {
    /// Ineligible if age > max_years; age == max_years is still eligible
    MaxAge { max_years: i64 },
    /// Ineligible once elapsed time since death reaches `hours` (exclusive bound)
    TimeWindow { hours: i64 },
    /// Ineligible if `reject` and the record has unknown identification
    UnknownIdentification { reject: bool },
    /// Ineligible if the cause of death contains any listed substring
    ExcludedCauses { causes: Vec<String> },
    /// Non-disqualifying; overrides the sector base-score table
    SectorPriority { scores: HashMap<String, u32> },
}

/// Rule row whose parameters do not decode
#[derive(Debug, Error)]
#[error("rule '{nome}' ({tipo}) has invalid parameters: {reason}")]
pub struct RuleDecodeError {
    pub nome: String,
    pub tipo: String,
    pub reason: String,
}

impl EligibilityRule {
    /// Decode the `tipo` + `parametros` pair into a RuleKind
    pub fn kind(&self) -> Result<RuleKind, RuleDecodeError> {
        let valor = self.parametros.get("valor");
        let invalid = |reason: &str| RuleDecodeError {
            nome: self.nome.clone(),
            tipo: self.tipo.clone(),
            reason: reason.to_string(),
        };

        match self.tipo.as_str() {
            "idade_maxima" => {
                let max_years = valor
                    .and_then(|v| v.as_i64())
                    .ok_or_else(|| invalid("expected integer valor"))?;
                Ok(RuleKind::MaxAge { max_years })
            }
            "janela_horas" => {
                let hours = valor
                    .and_then(|v| v.as_i64())
                    .ok_or_else(|| invalid("expected integer valor"))?;
                Ok(RuleKind::TimeWindow { hours })
            }
            "identificacao_desconhecida" => {
                let reject = valor
                    .and_then(|v| v.as_bool())
                    .ok_or_else(|| invalid("expected boolean valor"))?;
                Ok(RuleKind::UnknownIdentification { reject })
            }
            "causas_excludentes" => {
                let causes = valor
                    .and_then(|v| v.as_array())
                    .ok_or_else(|| invalid("expected array valor"))?
                    .iter()
                    .filter_map(|c| c.as_str())
                    .map(|c| c.to_lowercase())
                    .collect();
                Ok(RuleKind::ExcludedCauses { causes })
            }
            "setor_priorizacao" => {
                let scores = valor
                    .and_then(|v| v.as_object())
                    .ok_or_else(|| invalid("expected object valor"))?
                    .iter()
                    .filter_map(|(k, v)| v.as_u64().map(|s| (k.clone(), s.min(100) as u32)))
                    .collect();
                Ok(RuleKind::SectorPriority { scores })
            }
            other => Err(RuleDecodeError {
                nome: self.nome.clone(),
                tipo: other.to_string(),
                reason: "unknown rule type".to_string(),
            }),
        }
    }
}

/// Result of evaluating all rules against one obito
///
/// Immutable once produced. All rules run even after a disqualification so
/// `motivos` aggregates every reason for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EligibilityResult {
    pub elegivel: bool,
    /// Priority score in [0, 100]; 0 when ineligible
    pub score: u32,
    pub motivos: Vec<String>,
    pub rules_applied: Vec<String>,
}

/// Base priority score for a hospital sector; unknown sectors score as Outros
pub fn sector_score(setor: &str) -> u32 {
    match setor {
        "UTI" => 100,
        "Emergencia" => 80,
        "Centro Cirurgico" => 70,
        "Enfermaria" => 50,
        _ => 40,
    }
}

/// Built-in default rule set
///
/// Used when the rule store is unavailable and nothing stale is cached, so
/// triage degrades gracefully instead of stalling.
pub fn default_rules() -> Vec<EligibilityRule> {
    vec![
        EligibilityRule {
            id: Uuid::now_v7(),
            nome: "Idade Maxima".to_string(),
            tipo: "idade_maxima".to_string(),
            parametros: serde_json::json!({ "valor": 80 }),
            prioridade: 1,
            ativa: true,
        },
        EligibilityRule {
            id: Uuid::now_v7(),
            nome: "Janela 6 Horas".to_string(),
            tipo: "janela_horas".to_string(),
            parametros: serde_json::json!({ "valor": DEFAULT_WINDOW_HOURS }),
            prioridade: 2,
            ativa: true,
        },
        EligibilityRule {
            id: Uuid::now_v7(),
            nome: "Identificacao Desconhecida".to_string(),
            tipo: "identificacao_desconhecida".to_string(),
            parametros: serde_json::json!({ "valor": true }),
            prioridade: 3,
            ativa: true,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(tipo: &str, parametros: serde_json::Value) -> EligibilityRule {
        EligibilityRule {
            id: Uuid::now_v7(),
            nome: "test".to_string(),
            tipo: tipo.to_string(),
            parametros,
            prioridade: 1,
            ativa: true,
        }
    }

    #[test]
    fn test_decode_max_age() {
        let kind = rule("idade_maxima", serde_json::json!({ "valor": 80 }))
            .kind()
            .unwrap();
        assert_eq!(kind, RuleKind::MaxAge { max_years: 80 });
    }

    #[test]
    fn test_decode_excluded_causes_lowercased() {
        let kind = rule(
            "causas_excludentes",
            serde_json::json!({ "valor": ["Sepse", "HIV"] }),
        )
        .kind()
        .unwrap();
        assert_eq!(
            kind,
            RuleKind::ExcludedCauses {
                causes: vec!["sepse".to_string(), "hiv".to_string()]
            }
        );
    }

    #[test]
    fn test_decode_rejects_bad_parameters() {
        assert!(rule("idade_maxima", serde_json::json!({ "valor": "oitenta" }))
            .kind()
            .is_err());
        assert!(rule("desconhecido", serde_json::json!({})).kind().is_err());
    }

    #[test]
    fn test_sector_scores() {
        assert_eq!(sector_score("UTI"), 100);
        assert_eq!(sector_score("Emergencia"), 80);
        assert_eq!(sector_score("Centro Cirurgico"), 70);
        assert_eq!(sector_score("Enfermaria"), 50);
        assert_eq!(sector_score("Corredor 3"), 40);
    }

    #[test]
    fn test_default_rules_decode() {
        let rules = default_rules();
        assert_eq!(rules.len(), 3);
        for r in &rules {
            assert!(r.ativa);
            r.kind().unwrap();
        }
    }
}
