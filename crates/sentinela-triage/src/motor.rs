// Triage motor: stream consumer, evaluator, occurrence creator
//
// Consumes every death event at least once through a consumer group,
// deduplicates by obito_id, evaluates the rules and triggers fan-out.
// Ack policy per entry:
// - malformed payload / missing obito: ack (poison, never retried)
// - transient store failure: no ack, the stream redelivers
// - duplicate obito: ack, no side effects (idempotency)
// - evaluated: ack after the occurrence is durable

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use sentinela_core::config::TriageConfig;
use sentinela_core::lgpd::mask_name;
use sentinela_core::obito::DEFAULT_WINDOW_HOURS;
use sentinela_core::{
    CreateOccurrenceInput, DeathEvent, EventStream, HospitalDirectory, ObitoRecord, ObitoStore,
    OccurrenceSink, OccurrenceStore, StreamEntry,
};

use crate::cache::RuleCache;
use crate::engine::evaluate;
use crate::stats::TriageStats;

const UNKNOWN_HOSPITAL: &str = "Hospital Desconhecido";

/// Whether to acknowledge a stream entry after processing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Ack,
    Redeliver,
}

/// Stream-consuming triage motor
///
/// Multiple instances share load through the consumer group; occurrence
/// creation stays idempotent per obito_id under redelivery.
pub struct TriageMotor {
    stream: Arc<dyn EventStream>,
    obitos: Arc<dyn ObitoStore>,
    occurrences: Arc<dyn OccurrenceStore>,
    hospitals: Arc<dyn HospitalDirectory>,
    rules: Arc<RuleCache>,
    sink: Arc<dyn OccurrenceSink>,
    stats: Arc<TriageStats>,
    config: TriageConfig,
    shutdown_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TriageMotor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        stream: Arc<dyn EventStream>,
        obitos: Arc<dyn ObitoStore>,
        occurrences: Arc<dyn OccurrenceStore>,
        hospitals: Arc<dyn HospitalDirectory>,
        rules: Arc<RuleCache>,
        sink: Arc<dyn OccurrenceSink>,
        stats: Arc<TriageStats>,
        config: TriageConfig,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            stream,
            obitos,
            occurrences,
            hospitals,
            rules,
            sink,
            stats,
            config,
            shutdown_tx,
            handle: Mutex::new(None),
        }
    }

    pub fn stats(&self) -> Arc<TriageStats> {
        self.stats.clone()
    }

    /// Start the consumer loop; idempotent
    pub async fn start(self: &Arc<Self>) {
        if !self.stats.mark_started() {
            return;
        }

        info!(
            stream = %self.config.stream,
            group = %self.config.group,
            consumer = %self.config.consumer,
            "starting triage motor"
        );

        if let Err(err) = self
            .stream
            .ensure_group(&self.config.stream, &self.config.group)
            .await
        {
            // The group usually already exists; the read loop will surface
            // anything persistent.
            warn!(%err, "could not ensure consumer group");
        }

        let motor = self.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                if *shutdown_rx.borrow() {
                    break;
                }
                motor.consume_batch(&mut shutdown_rx).await;
            }
            info!("triage motor stopped");
        });
        *self.handle.lock() = Some(handle);
    }

    /// Signal shutdown and wait for the in-flight batch to finish; idempotent
    pub async fn stop(&self) {
        if !self.stats.mark_stopped() {
            return;
        }
        let _ = self.shutdown_tx.send(true);
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        // Reset so a later start() observes a clean flag
        let _ = self.shutdown_tx.send(false);
    }

    /// Read one batch and process every entry in delivery order
    async fn consume_batch(&self, shutdown_rx: &mut watch::Receiver<bool>) {
        let entries = match self
            .stream
            .read_next(
                &self.config.stream,
                &self.config.group,
                &self.config.consumer,
                self.config.batch_size,
                self.config.block,
            )
            .await
        {
            Ok(entries) => entries,
            Err(err) => {
                error!(%err, "error reading from stream");
                self.stats.incr_errors();
                // Back off briefly, but stay responsive to shutdown
                tokio::select! {
                    _ = tokio::time::sleep(std::time::Duration::from_secs(1)) => {}
                    _ = shutdown_rx.changed() => {}
                }
                return;
            }
        };

        for entry in entries {
            if self.process_entry(&entry).await == Disposition::Ack {
                self.ack(&entry.id).await;
            }
        }
    }

    #[instrument(skip(self, entry), fields(entry_id = %entry.id))]
    async fn process_entry(&self, entry: &StreamEntry) -> Disposition {
        let event: DeathEvent = match serde_json::from_str(&entry.payload) {
            Ok(event) => event,
            Err(err) => {
                warn!(%err, "malformed stream entry, dropping");
                self.stats.incr_errors();
                return Disposition::Ack;
            }
        };

        debug!(obito_id = %event.obito_id, hospital_id = %event.hospital_id, "processing death event");

        let obito = match self.obitos.get_by_id(event.obito_id).await {
            Ok(Some(obito)) => obito,
            Ok(None) => {
                warn!(obito_id = %event.obito_id, "obito not found, dropping entry");
                self.stats.incr_errors();
                return Disposition::Ack;
            }
            Err(err) => {
                error!(obito_id = %event.obito_id, %err, "error fetching obito");
                self.stats.incr_errors();
                return Disposition::Redeliver;
            }
        };

        match self.occurrences.exists_by_obito_id(event.obito_id).await {
            Ok(true) => {
                debug!(obito_id = %event.obito_id, "occurrence already exists, skipping");
                return Disposition::Ack;
            }
            Ok(false) => {}
            Err(err) => {
                error!(obito_id = %event.obito_id, %err, "error checking occurrence existence");
                self.stats.incr_errors();
                return Disposition::Redeliver;
            }
        }

        let rules = self.rules.rules().await;
        let result = evaluate(&rules, &obito, Utc::now());
        self.stats.incr_processed();

        if !result.elegivel {
            self.stats.incr_ineligible();
            info!(
                obito_id = %obito.id,
                motivos = ?result.motivos,
                "obito ineligible"
            );
            return Disposition::Ack;
        }

        let input = CreateOccurrenceInput {
            obito_id: obito.id,
            hospital_id: obito.hospital_id,
            score_priorizacao: result.score as i32,
            nome_paciente_mascarado: mask_name(&obito.nome_paciente),
            dados_completos: obito.snapshot(),
            data_obito: obito.data_obito,
            janela_expira_em: obito.window_deadline(DEFAULT_WINDOW_HOURS),
        };

        let occurrence = match self.occurrences.create(input).await {
            Ok(occurrence) => occurrence,
            Err(err) => {
                error!(obito_id = %obito.id, %err, "error creating occurrence");
                self.stats.incr_errors();
                return Disposition::Redeliver;
            }
        };

        self.stats.incr_eligible();
        info!(
            occurrence_id = %occurrence.id,
            obito_id = %obito.id,
            score = result.score,
            "obito eligible, occurrence created"
        );

        self.dispatch(occurrence, &obito).await;
        Disposition::Ack
    }

    /// Hand the occurrence to the sink without waiting on delivery
    ///
    /// The occurrence is already durable; channel failures are the sink's
    /// concern and never block the ack.
    async fn dispatch(&self, occurrence: sentinela_core::Occurrence, obito: &ObitoRecord) {
        let hospital_nome = self.hospital_name(obito.hospital_id).await;
        let sink = self.sink.clone();
        tokio::spawn(async move {
            sink.on_eligible_occurrence(occurrence, hospital_nome).await;
        });
    }

    async fn hospital_name(&self, hospital_id: Uuid) -> String {
        match self.hospitals.name_by_id(hospital_id).await {
            Ok(Some(nome)) => nome,
            Ok(None) => UNKNOWN_HOSPITAL.to_string(),
            Err(err) => {
                warn!(%hospital_id, %err, "error fetching hospital name");
                UNKNOWN_HOSPITAL.to_string()
            }
        }
    }

    async fn ack(&self, entry_id: &str) {
        if let Err(err) = self
            .stream
            .ack(&self.config.stream, &self.config.group, entry_id)
            .await
        {
            error!(entry_id, %err, "error acknowledging entry");
            self.stats.incr_errors();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use sentinela_storage::memory::{
        InMemoryHospitalDirectory, InMemoryObitoStore, InMemoryOccurrenceStore, InMemoryRuleSource,
        InMemoryStream, RecordingSink,
    };
    use std::time::Duration as StdDuration;

    struct Fixture {
        motor: Arc<TriageMotor>,
        stream: Arc<InMemoryStream>,
        obitos: Arc<InMemoryObitoStore>,
        occurrences: Arc<InMemoryOccurrenceStore>,
        sink: Arc<RecordingSink>,
        config: TriageConfig,
    }

    fn fixture() -> Fixture {
        let stream = Arc::new(InMemoryStream::new());
        let obitos = Arc::new(InMemoryObitoStore::new());
        let occurrences = Arc::new(InMemoryOccurrenceStore::new());
        let hospitals = Arc::new(InMemoryHospitalDirectory::new());
        let rules = Arc::new(RuleCache::new(
            Arc::new(InMemoryRuleSource::with_defaults()),
            StdDuration::from_secs(300),
        ));
        let sink = Arc::new(RecordingSink::new());
        let config = TriageConfig::default().with_block(StdDuration::from_millis(10));

        let motor = Arc::new(TriageMotor::new(
            stream.clone(),
            obitos.clone(),
            occurrences.clone(),
            hospitals,
            rules,
            sink.clone(),
            Arc::new(TriageStats::new()),
            config.clone(),
        ));

        Fixture {
            motor,
            stream,
            obitos,
            occurrences,
            sink,
            config,
        }
    }

    fn eligible_obito() -> ObitoRecord {
        ObitoRecord {
            id: Uuid::now_v7(),
            hospital_id: Uuid::now_v7(),
            nome_paciente: "Joao Silva".to_string(),
            data_nascimento: NaiveDate::from_ymd_opt(1970, 1, 1).unwrap(),
            data_obito: Utc::now() - Duration::minutes(30),
            causa_mortis: "Parada cardiorrespiratoria".to_string(),
            prontuario: None,
            setor: Some("UTI".to_string()),
            leito: Some("12".to_string()),
            identificacao_desconhecida: false,
        }
    }

    async fn publish_event(fx: &Fixture, obito: &ObitoRecord) -> StreamEntry {
        let payload = serde_json::to_string(&DeathEvent {
            obito_id: obito.id,
            hospital_id: obito.hospital_id,
            timestamp_deteccao: Some(Utc::now()),
        })
        .unwrap();
        let id = fx
            .stream
            .append(&fx.config.stream, &payload)
            .await
            .unwrap();
        StreamEntry { id, payload }
    }

    #[tokio::test]
    async fn test_eligible_obito_creates_occurrence_and_invokes_sink() {
        let fx = fixture();
        let obito = eligible_obito();
        fx.obitos.insert(obito.clone());
        let entry = publish_event(&fx, &obito).await;

        assert_eq!(fx.motor.process_entry(&entry).await, Disposition::Ack);

        assert!(fx.occurrences.exists_by_obito_id(obito.id).await.unwrap());
        let created = fx.occurrences.all();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].score_priorizacao, 100);
        assert_eq!(created[0].nome_paciente_mascarado, "Jo** Si***");

        // Sink runs on a spawned task
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        assert_eq!(fx.sink.deliveries().len(), 1);

        let snap = fx.motor.stats().snapshot();
        assert_eq!(snap.total_processed, 1);
        assert_eq!(snap.total_eligible, 1);
    }

    #[tokio::test]
    async fn test_duplicate_event_creates_single_occurrence() {
        let fx = fixture();
        let obito = eligible_obito();
        fx.obitos.insert(obito.clone());

        let first = publish_event(&fx, &obito).await;
        let second = publish_event(&fx, &obito).await;

        assert_eq!(fx.motor.process_entry(&first).await, Disposition::Ack);
        assert_eq!(fx.motor.process_entry(&second).await, Disposition::Ack);

        assert_eq!(fx.occurrences.all().len(), 1);
        // The duplicate never reaches evaluation
        assert_eq!(fx.motor.stats().snapshot().total_processed, 1);
    }

    #[tokio::test]
    async fn test_ineligible_obito_acked_without_occurrence() {
        let fx = fixture();
        let mut obito = eligible_obito();
        obito.data_nascimento = NaiveDate::from_ymd_opt(1930, 1, 1).unwrap();
        fx.obitos.insert(obito.clone());
        let entry = publish_event(&fx, &obito).await;

        assert_eq!(fx.motor.process_entry(&entry).await, Disposition::Ack);
        assert!(fx.occurrences.all().is_empty());
        assert_eq!(fx.motor.stats().snapshot().total_ineligible, 1);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_acked_poison() {
        let fx = fixture();
        let entry = StreamEntry {
            id: "1-0".to_string(),
            payload: "not json".to_string(),
        };
        assert_eq!(fx.motor.process_entry(&entry).await, Disposition::Ack);
        assert_eq!(fx.motor.stats().snapshot().errors, 1);
    }

    #[tokio::test]
    async fn test_missing_obito_is_acked_poison() {
        let fx = fixture();
        let obito = eligible_obito();
        // Not inserted into the store
        let entry = publish_event(&fx, &obito).await;
        assert_eq!(fx.motor.process_entry(&entry).await, Disposition::Ack);
        assert_eq!(fx.motor.stats().snapshot().errors, 1);
    }

    #[tokio::test]
    async fn test_store_failure_leaves_entry_for_redelivery() {
        let fx = fixture();
        let obito = eligible_obito();
        fx.obitos.insert(obito.clone());
        fx.occurrences.fail_next_create();
        let entry = publish_event(&fx, &obito).await;

        assert_eq!(fx.motor.process_entry(&entry).await, Disposition::Redeliver);
        assert!(fx.occurrences.all().is_empty());

        // Redelivery after the store recovers succeeds
        assert_eq!(fx.motor.process_entry(&entry).await, Disposition::Ack);
        assert_eq!(fx.occurrences.all().len(), 1);
    }

    #[tokio::test]
    async fn test_start_stop_is_idempotent_and_drains() {
        let fx = fixture();
        let obito = eligible_obito();
        fx.obitos.insert(obito.clone());
        publish_event(&fx, &obito).await;

        fx.motor.start().await;
        fx.motor.start().await;
        assert!(fx.motor.stats().is_running());

        tokio::time::sleep(StdDuration::from_millis(100)).await;
        fx.motor.stop().await;
        fx.motor.stop().await;
        assert!(!fx.motor.stats().is_running());

        assert_eq!(fx.occurrences.all().len(), 1);
        // The entry was acked: nothing pending for this group
        assert_eq!(fx.stream.unacked_len(&fx.config.group), 0);
    }
}
