// Postgres repository layer
//
// One Database handle implements every store port. Schema administration
// (migrations, seed rules) belongs to the backoffice service; this crate only
// reads and writes the rows the pipeline needs.

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use sentinela_core::{
    CreateOccurrenceInput, EligibilityRule, HospitalDirectory, NewNotificationRecord,
    NotificationLog, ObitoRecord, ObitoStore, Occurrence, OccurrenceStore, RuleSource, StoreError,
};

use crate::models::{ObitoRow, OccurrenceRow, RuleRow};

const OCCURRENCE_COLUMNS: &str = "id, obito_id, hospital_id, status, score_priorizacao, \
     nome_paciente_mascarado, dados_completos, data_obito, janela_expira_em, \
     created_at, updated_at";

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a pooled connection from a database URL
    pub async fn from_url(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn db_err(err: sqlx::Error) -> StoreError {
    StoreError::database(err.to_string())
}

#[async_trait]
impl ObitoStore for Database {
    async fn get_by_id(&self, id: Uuid) -> Result<Option<ObitoRecord>, StoreError> {
        let row = sqlx::query_as::<_, ObitoRow>(
            r#"
            SELECT id, hospital_id, nome_paciente, data_nascimento, data_obito,
                   causa_mortis, prontuario, setor, leito, identificacao_desconhecida
            FROM obitos
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(Into::into))
    }
}

#[async_trait]
impl OccurrenceStore for Database {
    async fn exists_by_obito_id(&self, obito_id: Uuid) -> Result<bool, StoreError> {
        let exists: (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM ocorrencias WHERE obito_id = $1)")
                .bind(obito_id)
                .fetch_one(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(exists.0)
    }

    async fn create(&self, input: CreateOccurrenceInput) -> Result<Occurrence, StoreError> {
        // obito_id carries a unique constraint; a concurrent insert loses the
        // conflict and falls through to reading the winner's row
        let inserted = sqlx::query_as::<_, OccurrenceRow>(&format!(
            r#"
            INSERT INTO ocorrencias
                (id, obito_id, hospital_id, status, score_priorizacao,
                 nome_paciente_mascarado, dados_completos, data_obito,
                 janela_expira_em, created_at, updated_at)
            VALUES ($1, $2, $3, 'PENDENTE', $4, $5, $6, $7, $8, NOW(), NOW())
            ON CONFLICT (obito_id) DO NOTHING
            RETURNING {OCCURRENCE_COLUMNS}
            "#
        ))
        .bind(Uuid::now_v7())
        .bind(input.obito_id)
        .bind(input.hospital_id)
        .bind(input.score_priorizacao)
        .bind(&input.nome_paciente_mascarado)
        .bind(&input.dados_completos)
        .bind(input.data_obito)
        .bind(input.janela_expira_em)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        if let Some(row) = inserted {
            return Ok(row.into());
        }

        let existing = sqlx::query_as::<_, OccurrenceRow>(&format!(
            "SELECT {OCCURRENCE_COLUMNS} FROM ocorrencias WHERE obito_id = $1"
        ))
        .bind(input.obito_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        existing
            .map(Into::into)
            .ok_or(StoreError::NotFound(input.obito_id))
    }
}

#[async_trait]
impl RuleSource for Database {
    async fn list_active_rules(&self) -> Result<Vec<EligibilityRule>, StoreError> {
        let rows = sqlx::query_as::<_, RuleRow>(
            r#"
            SELECT id, nome, tipo, parametros, prioridade, ativa
            FROM regras_triagem
            WHERE ativa = TRUE
            ORDER BY prioridade ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

#[async_trait]
impl HospitalDirectory for Database {
    async fn name_by_id(&self, id: Uuid) -> Result<Option<String>, StoreError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT nome FROM hospitais WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.map(|(nome,)| nome))
    }
}

#[async_trait]
impl NotificationLog for Database {
    async fn record(&self, record: NewNotificationRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO notificacoes
                (id, ocorrencia_id, canal, status_envio, erro_mensagem, metadata, enviado_em)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(record.occurrence_id)
        .bind(record.canal.as_str())
        .bind(record.status_envio.as_str())
        .bind(&record.erro_mensagem)
        .bind(&record.metadata)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}
