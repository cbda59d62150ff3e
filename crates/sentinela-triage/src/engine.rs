// Eligibility rule engine
//
// Pure functions: rules + obito + clock in, EligibilityResult out. Taking
// `now` explicitly keeps the window and urgency boundaries testable.

use chrono::{DateTime, Utc};
use tracing::warn;

use sentinela_core::obito::DEFAULT_WINDOW_HOURS;
use sentinela_core::rule::{sector_score, EligibilityResult, EligibilityRule, RuleKind};
use sentinela_core::ObitoRecord;

/// Evaluate all rules against one obito
///
/// Rules run in the order given (the rule source orders by prioridade).
/// A disqualifying rule never short-circuits: every rule still executes so
/// `motivos` carries the full rejection picture. Rows whose parameters do not
/// decode are skipped with a warning rather than poisoning the batch.
pub fn evaluate(
    rules: &[EligibilityRule],
    obito: &ObitoRecord,
    now: DateTime<Utc>,
) -> EligibilityResult {
    let mut elegivel = true;
    let mut motivos = Vec::new();
    let mut rules_applied = Vec::new();
    let mut sector_overrides = None;

    for rule in rules {
        if !rule.ativa {
            continue;
        }

        let kind = match rule.kind() {
            Ok(kind) => kind,
            Err(err) => {
                warn!(rule = %rule.nome, %err, "skipping rule with invalid parameters");
                continue;
            }
        };

        rules_applied.push(rule.nome.clone());

        match kind {
            RuleKind::MaxAge { max_years } => {
                // age == max_years is still eligible
                if i64::from(obito.age_at_death()) > max_years {
                    elegivel = false;
                    motivos.push("Idade acima do limite".to_string());
                }
            }
            RuleKind::TimeWindow { hours } => {
                if !obito.is_within_window(hours, now) {
                    elegivel = false;
                    motivos.push("Fora da janela de captacao".to_string());
                }
            }
            RuleKind::UnknownIdentification { reject } => {
                if reject && obito.identificacao_desconhecida {
                    elegivel = false;
                    motivos.push("Identificacao desconhecida (indigente)".to_string());
                }
            }
            RuleKind::ExcludedCauses { causes } => {
                let causa = obito.causa_mortis.to_lowercase();
                if let Some(hit) = causes.iter().find(|c| causa.contains(c.as_str())) {
                    elegivel = false;
                    motivos.push(format!("Causa de morte excludente: {hit}"));
                }
            }
            RuleKind::SectorPriority { scores } => {
                // Non-disqualifying; only affects the score below
                sector_overrides = Some(scores);
            }
        }
    }

    let score = if elegivel {
        priority_score(obito, now, sector_overrides.as_ref())
    } else {
        0
    };

    EligibilityResult {
        elegivel,
        score,
        motivos,
        rules_applied,
    }
}

/// Priority score in [0, 100]: sector base plus urgency bonus
///
/// Base comes from the sector table (or the SectorPriority rule's override);
/// the bonus grows as the default capture window runs out: <=1h +20,
/// <=2h +10, <=3h +5.
pub fn priority_score(
    obito: &ObitoRecord,
    now: DateTime<Utc>,
    overrides: Option<&std::collections::HashMap<String, u32>>,
) -> u32 {
    let setor = obito.setor.as_deref().unwrap_or("Outros");
    let base = overrides
        .and_then(|scores| scores.get(setor).copied())
        .unwrap_or_else(|| sector_score(setor));

    let remaining = obito.time_remaining(DEFAULT_WINDOW_HOURS, now);
    let bonus = if remaining <= chrono::Duration::zero() {
        0
    } else if remaining <= chrono::Duration::hours(1) {
        20
    } else if remaining <= chrono::Duration::hours(2) {
        10
    } else if remaining <= chrono::Duration::hours(3) {
        5
    } else {
        0
    };

    (base + bonus).min(100)
}
