// In-memory implementations of every port
//
// Used by unit tests across the workspace and by local runs without a broker.
// Semantics mirror the Redis backends closely enough that the motor and the
// workers cannot tell them apart: consumer groups track unacknowledged
// entries, the queue keeps a visible in-flight list, pub/sub fans out to all
// live subscribers.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use sentinela_core::rule::default_rules;
use sentinela_core::{
    CreateOccurrenceInput, DeliveryQueue, EligibilityRule, EventStream, HospitalDirectory,
    NewNotificationRecord, ObitoRecord, ObitoStore, Occurrence, OccurrenceSink, OccurrenceStatus,
    OccurrenceStore, PublishError, Publisher, QueueError, QueueItem, RecipientDirectory,
    RuleSource, StoreError, StreamEntry, Subscriber,
};

// ============================================================================
// Event stream
// ============================================================================

#[derive(Default)]
struct GroupState {
    /// Index of the next never-delivered entry
    cursor: usize,
    /// Entries delivered but not yet acknowledged, by entry id
    unacked: HashMap<String, String>,
    /// Entry ids queued for redelivery, oldest first
    redeliver: VecDeque<String>,
}

#[derive(Default)]
struct StreamState {
    entries: Vec<StreamEntry>,
    groups: HashMap<String, GroupState>,
    next_seq: u64,
}

/// In-memory event stream with consumer-group semantics
#[derive(Default)]
pub struct InMemoryStream {
    streams: Mutex<HashMap<String, StreamState>>,
}

impl InMemoryStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of delivered-but-unacknowledged entries for a group
    pub fn unacked_len(&self, group: &str) -> usize {
        let streams = self.streams.lock();
        streams
            .values()
            .filter_map(|s| s.groups.get(group))
            .map(|g| g.unacked.len())
            .sum()
    }

    /// Queue every unacknowledged entry of the group for redelivery,
    /// simulating a crashed consumer whose pending entries were claimed
    pub fn redeliver_unacked(&self, stream: &str, group: &str) {
        let mut streams = self.streams.lock();
        if let Some(state) = streams.get_mut(stream) {
            if let Some(g) = state.groups.get_mut(group) {
                let mut ids: Vec<String> = g.unacked.keys().cloned().collect();
                ids.sort();
                g.redeliver.extend(ids);
            }
        }
    }

    fn take_batch(&self, stream: &str, group: &str, count: usize) -> Vec<StreamEntry> {
        let mut streams = self.streams.lock();
        let state = streams.entry(stream.to_string()).or_default();
        let entries = std::mem::take(&mut state.entries);
        let g = state.groups.entry(group.to_string()).or_default();

        let mut batch = Vec::new();
        while batch.len() < count {
            if let Some(id) = g.redeliver.pop_front() {
                if let Some(payload) = g.unacked.get(&id) {
                    batch.push(StreamEntry {
                        id,
                        payload: payload.clone(),
                    });
                }
                continue;
            }
            let Some(entry) = entries.get(g.cursor) else {
                break;
            };
            g.cursor += 1;
            g.unacked.insert(entry.id.clone(), entry.payload.clone());
            batch.push(entry.clone());
        }
        state.entries = entries;
        batch
    }
}

#[async_trait]
impl EventStream for InMemoryStream {
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), sentinela_core::StreamError> {
        let mut streams = self.streams.lock();
        let state = streams.entry(stream.to_string()).or_default();
        state.groups.entry(group.to_string()).or_default();
        Ok(())
    }

    async fn read_next(
        &self,
        stream: &str,
        group: &str,
        _consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>, sentinela_core::StreamError> {
        let batch = self.take_batch(stream, group, count);
        if !batch.is_empty() {
            return Ok(batch);
        }
        tokio::time::sleep(block).await;
        Ok(self.take_batch(stream, group, count))
    }

    async fn ack(
        &self,
        stream: &str,
        group: &str,
        entry_id: &str,
    ) -> Result<(), sentinela_core::StreamError> {
        let mut streams = self.streams.lock();
        if let Some(state) = streams.get_mut(stream) {
            if let Some(g) = state.groups.get_mut(group) {
                g.unacked.remove(entry_id);
            }
        }
        Ok(())
    }

    async fn append(
        &self,
        stream: &str,
        payload: &str,
    ) -> Result<String, sentinela_core::StreamError> {
        let mut streams = self.streams.lock();
        let state = streams.entry(stream.to_string()).or_default();
        state.next_seq += 1;
        let id = format!("{}-0", state.next_seq);
        state.entries.push(StreamEntry {
            id: id.clone(),
            payload: payload.to_string(),
        });
        Ok(id)
    }
}

// ============================================================================
// Stores
// ============================================================================

/// In-memory obito store with optional failure injection
#[derive(Default)]
pub struct InMemoryObitoStore {
    records: Mutex<HashMap<Uuid, ObitoRecord>>,
    fail_next_get: AtomicBool,
}

impl InMemoryObitoStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, obito: ObitoRecord) {
        self.records.lock().insert(obito.id, obito);
    }

    /// Make the next get_by_id fail with a database error
    pub fn fail_next_get(&self) {
        self.fail_next_get.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObitoStore for InMemoryObitoStore {
    async fn get_by_id(&self, id: Uuid) -> Result<Option<ObitoRecord>, StoreError> {
        if self.fail_next_get.swap(false, Ordering::SeqCst) {
            return Err(StoreError::database("injected failure"));
        }
        Ok(self.records.lock().get(&id).cloned())
    }
}

/// In-memory occurrence store with idempotent creation
#[derive(Default)]
pub struct InMemoryOccurrenceStore {
    occurrences: Mutex<Vec<Occurrence>>,
    fail_next_create: AtomicBool,
}

impl InMemoryOccurrenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<Occurrence> {
        self.occurrences.lock().clone()
    }

    /// Make the next create fail with a database error
    pub fn fail_next_create(&self) {
        self.fail_next_create.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl OccurrenceStore for InMemoryOccurrenceStore {
    async fn exists_by_obito_id(&self, obito_id: Uuid) -> Result<bool, StoreError> {
        Ok(self
            .occurrences
            .lock()
            .iter()
            .any(|o| o.obito_id == obito_id))
    }

    async fn create(&self, input: CreateOccurrenceInput) -> Result<Occurrence, StoreError> {
        if self.fail_next_create.swap(false, Ordering::SeqCst) {
            return Err(StoreError::database("injected failure"));
        }
        let mut occurrences = self.occurrences.lock();
        if let Some(existing) = occurrences.iter().find(|o| o.obito_id == input.obito_id) {
            return Ok(existing.clone());
        }
        let now = Utc::now();
        let occurrence = Occurrence {
            id: Uuid::now_v7(),
            obito_id: input.obito_id,
            hospital_id: input.hospital_id,
            status: OccurrenceStatus::Pendente,
            score_priorizacao: input.score_priorizacao,
            nome_paciente_mascarado: input.nome_paciente_mascarado,
            dados_completos: input.dados_completos,
            data_obito: input.data_obito,
            janela_expira_em: input.janela_expira_em,
            created_at: now,
            updated_at: now,
        };
        occurrences.push(occurrence.clone());
        Ok(occurrence)
    }
}

/// In-memory hospital name lookup
#[derive(Default)]
pub struct InMemoryHospitalDirectory {
    names: Mutex<HashMap<Uuid, String>>,
}

impl InMemoryHospitalDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: Uuid, nome: impl Into<String>) {
        self.names.lock().insert(id, nome.into());
    }
}

#[async_trait]
impl HospitalDirectory for InMemoryHospitalDirectory {
    async fn name_by_id(&self, id: Uuid) -> Result<Option<String>, StoreError> {
        Ok(self.names.lock().get(&id).cloned())
    }
}

/// In-memory rule source with optional failure injection
#[derive(Default)]
pub struct InMemoryRuleSource {
    rules: Mutex<Vec<EligibilityRule>>,
    fail_next: AtomicBool,
}

impl InMemoryRuleSource {
    pub fn new(rules: Vec<EligibilityRule>) -> Self {
        Self {
            rules: Mutex::new(rules),
            fail_next: AtomicBool::new(false),
        }
    }

    /// Seeded with the built-in default rule set
    pub fn with_defaults() -> Self {
        Self::new(default_rules())
    }

    pub fn set_rules(&self, rules: Vec<EligibilityRule>) {
        *self.rules.lock() = rules;
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl RuleSource for InMemoryRuleSource {
    async fn list_active_rules(&self) -> Result<Vec<EligibilityRule>, StoreError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(StoreError::database("injected failure"));
        }
        Ok(self.rules.lock().clone())
    }
}

/// In-memory notification audit log
#[derive(Default)]
pub struct InMemoryNotificationLog {
    records: Mutex<Vec<NewNotificationRecord>>,
}

impl InMemoryNotificationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<NewNotificationRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl sentinela_core::NotificationLog for InMemoryNotificationLog {
    async fn record(&self, record: NewNotificationRecord) -> Result<(), StoreError> {
        self.records.lock().push(record);
        Ok(())
    }
}

/// Fixed recipient lists
#[derive(Default)]
pub struct InMemoryRecipientDirectory {
    pub emails: Vec<String>,
    pub phones: Vec<String>,
    pub tokens: Vec<String>,
}

impl InMemoryRecipientDirectory {
    pub fn new(emails: Vec<String>, phones: Vec<String>, tokens: Vec<String>) -> Self {
        Self {
            emails,
            phones,
            tokens,
        }
    }
}

#[async_trait]
impl RecipientDirectory for InMemoryRecipientDirectory {
    async fn email_recipients(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.emails.clone())
    }

    async fn sms_recipients(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.phones.clone())
    }

    async fn push_tokens(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.tokens.clone())
    }
}

// ============================================================================
// Delivery queue
// ============================================================================

/// In-memory reliable queue: a pending deque plus a visible in-flight list
#[derive(Default)]
pub struct InMemoryQueue {
    pending: Mutex<VecDeque<String>>,
    inflight: Mutex<Vec<String>>,
    fail_next_enqueue: AtomicBool,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw pending payloads, oldest first
    pub fn pending_raw(&self) -> Vec<String> {
        self.pending.lock().iter().cloned().collect()
    }

    /// Arm a one-shot enqueue failure
    pub fn fail_next_enqueue(&self) {
        self.fail_next_enqueue.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl DeliveryQueue for InMemoryQueue {
    async fn enqueue(&self, item: &QueueItem) -> Result<(), QueueError> {
        if self.fail_next_enqueue.swap(false, Ordering::SeqCst) {
            return Err(QueueError::Enqueue("injected enqueue failure".to_string()));
        }
        let raw =
            serde_json::to_string(item).map_err(|e| QueueError::Enqueue(e.to_string()))?;
        self.pending.lock().push_back(raw);
        Ok(())
    }

    async fn pull_to_inflight(&self) -> Result<Option<String>, QueueError> {
        let mut pending = self.pending.lock();
        let Some(raw) = pending.pop_front() else {
            return Ok(None);
        };
        self.inflight.lock().push(raw.clone());
        Ok(Some(raw))
    }

    async fn requeue(&self, raw: &str, item: &QueueItem) -> Result<(), QueueError> {
        let updated =
            serde_json::to_string(item).map_err(|e| QueueError::Operation(e.to_string()))?;
        let mut inflight = self.inflight.lock();
        if let Some(pos) = inflight.iter().position(|r| r == raw) {
            inflight.remove(pos);
        }
        self.pending.lock().push_back(updated);
        Ok(())
    }

    async fn remove_inflight(&self, raw: &str) -> Result<(), QueueError> {
        let mut inflight = self.inflight.lock();
        if let Some(pos) = inflight.iter().position(|r| r == raw) {
            inflight.remove(pos);
        }
        Ok(())
    }

    async fn recover_inflight(&self) -> Result<usize, QueueError> {
        let mut inflight = self.inflight.lock();
        let mut pending = self.pending.lock();
        let count = inflight.len();
        for raw in inflight.drain(..) {
            pending.push_back(raw);
        }
        Ok(count)
    }

    async fn pending_len(&self) -> Result<usize, QueueError> {
        Ok(self.pending.lock().len())
    }

    async fn inflight_len(&self) -> Result<usize, QueueError> {
        Ok(self.inflight.lock().len())
    }
}

// ============================================================================
// Pub/sub
// ============================================================================

/// In-process pub/sub: payloads fan out to every live subscriber
#[derive(Default)]
pub struct InMemoryPubSub {
    subscribers: Mutex<HashMap<String, Vec<mpsc::Sender<String>>>>,
    fail_next_publish: AtomicBool,
}

impl InMemoryPubSub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a one-shot publish failure
    pub fn fail_next_publish(&self) {
        self.fail_next_publish.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Publisher for InMemoryPubSub {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), PublishError> {
        if self.fail_next_publish.swap(false, Ordering::SeqCst) {
            return Err(PublishError::Publish("injected publish failure".to_string()));
        }
        let mut subscribers = self.subscribers.lock();
        if let Some(senders) = subscribers.get_mut(channel) {
            senders.retain(|tx| tx.try_send(payload.to_string()).is_ok());
        }
        Ok(())
    }
}

#[async_trait]
impl Subscriber for InMemoryPubSub {
    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<String>, PublishError> {
        let (tx, rx) = mpsc::channel(64);
        self.subscribers
            .lock()
            .entry(channel.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }
}

// ============================================================================
// Sink
// ============================================================================

/// Records every sink invocation for assertions
#[derive(Default)]
pub struct RecordingSink {
    deliveries: Mutex<Vec<(Occurrence, String)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deliveries(&self) -> Vec<(Occurrence, String)> {
        self.deliveries.lock().clone()
    }
}

#[async_trait]
impl OccurrenceSink for RecordingSink {
    async fn on_eligible_occurrence(&self, occurrence: Occurrence, hospital_nome: String) {
        self.deliveries.lock().push((occurrence, hospital_nome));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn obito() -> ObitoRecord {
        ObitoRecord {
            id: Uuid::now_v7(),
            hospital_id: Uuid::now_v7(),
            nome_paciente: "Maria Souza".to_string(),
            data_nascimento: NaiveDate::from_ymd_opt(1980, 5, 2).unwrap(),
            data_obito: Utc::now(),
            causa_mortis: "PCR".to_string(),
            prontuario: None,
            setor: None,
            leito: None,
            identificacao_desconhecida: false,
        }
    }

    #[tokio::test]
    async fn test_stream_groups_share_delivery_and_track_unacked() {
        let stream = InMemoryStream::new();
        stream.append("s", "a").await.unwrap();
        stream.append("s", "b").await.unwrap();

        let batch = stream
            .read_next("s", "g", "c1", 10, Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(stream.unacked_len("g"), 2);

        // A second consumer of the same group sees nothing new
        let empty = stream
            .read_next("s", "g", "c2", 10, Duration::from_millis(1))
            .await
            .unwrap();
        assert!(empty.is_empty());

        stream.ack("s", "g", &batch[0].id).await.unwrap();
        assert_eq!(stream.unacked_len("g"), 1);
    }

    #[tokio::test]
    async fn test_stream_redelivers_unacked_entries() {
        let stream = InMemoryStream::new();
        stream.append("s", "a").await.unwrap();

        let first = stream
            .read_next("s", "g", "c1", 10, Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(first.len(), 1);

        stream.redeliver_unacked("s", "g");
        let again = stream
            .read_next("s", "g", "c1", 10, Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].id, first[0].id);
        assert_eq!(again[0].payload, "a");
    }

    #[tokio::test]
    async fn test_occurrence_create_is_idempotent() {
        let store = InMemoryOccurrenceStore::new();
        let o = obito();
        let input = CreateOccurrenceInput {
            obito_id: o.id,
            hospital_id: o.hospital_id,
            score_priorizacao: 80,
            nome_paciente_mascarado: "Ma*** So***".to_string(),
            dados_completos: o.snapshot(),
            data_obito: o.data_obito,
            janela_expira_em: o.window_deadline(6),
        };

        let first = store.create(input.clone()).await.unwrap();
        let second = store.create(input).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.all().len(), 1);
    }

    #[tokio::test]
    async fn test_queue_pull_requeue_and_recover() {
        let queue = InMemoryQueue::new();
        let item = QueueItem::new(Uuid::now_v7(), "a@b.c", serde_json::json!({}), 3);
        queue.enqueue(&item).await.unwrap();

        let raw = queue.pull_to_inflight().await.unwrap().unwrap();
        assert_eq!(queue.pending_len().await.unwrap(), 0);
        assert_eq!(queue.inflight_len().await.unwrap(), 1);

        let mut updated = item.clone();
        updated.retries = 1;
        queue.requeue(&raw, &updated).await.unwrap();
        assert_eq!(queue.pending_len().await.unwrap(), 1);
        assert_eq!(queue.inflight_len().await.unwrap(), 0);

        // Simulate a crash mid-send: item stuck in-flight, then recovered
        let raw = queue.pull_to_inflight().await.unwrap().unwrap();
        assert_eq!(queue.recover_inflight().await.unwrap(), 1);
        assert_eq!(queue.pending_len().await.unwrap(), 1);

        let back = queue.pull_to_inflight().await.unwrap().unwrap();
        assert_eq!(back, raw);
        queue.remove_inflight(&back).await.unwrap();
        assert_eq!(queue.inflight_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_pubsub_fans_out_and_drops_closed() {
        let bus = InMemoryPubSub::new();
        let mut rx1 = bus.subscribe("ch").await.unwrap();
        let rx2 = bus.subscribe("ch").await.unwrap();
        drop(rx2);

        bus.publish("ch", "hello").await.unwrap();
        assert_eq!(rx1.recv().await.as_deref(), Some("hello"));

        // Closed subscriber was pruned; publishing again still works
        bus.publish("ch", "again").await.unwrap();
        assert_eq!(rx1.recv().await.as_deref(), Some("again"));
    }
}
