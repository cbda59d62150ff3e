// Fan-out sink: one eligible occurrence in, four channels out
//
// Invoked by the triage motor after the occurrence is durable. Every channel
// handles its own failure; the worst outcome of a broken channel is a logged
// warning and a `falha` notification record.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use sentinela_core::occurrence::format_time_remaining;
use sentinela_core::sse::SseEvent;
use sentinela_core::{
    DeliveryQueue, NewNotificationRecord, NotificationChannel, NotificationLog, Occurrence,
    OccurrenceSink, QueueItem, RecipientDirectory,
};

use crate::push::PushGateway;
use crate::sse::SseHub;

pub const EMAIL_MAX_RETRIES: u32 = 3;
pub const SMS_MAX_RETRIES: u32 = 5;

/// Rendering context shared by the email, SMS and push channels
///
/// Serialized into each QueueItem payload, so workers render without
/// re-reading the occurrence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OccurrenceAlert {
    pub occurrence_id: Uuid,
    pub hospital_nome: String,
    pub setor: String,
    pub idade: i64,
    pub data_obito: DateTime<Utc>,
    /// Human-formatted remaining window ("2h 30min", "45min", "Expirado")
    pub tempo_restante: String,
    pub janela_horas_restantes: i64,
    pub janela_minutos_restantes: i64,
    pub score: i32,
    pub url: String,
}

impl OccurrenceAlert {
    pub fn new(
        occurrence: &Occurrence,
        hospital_nome: &str,
        dashboard_url: &str,
        now: DateTime<Utc>,
    ) -> Self {
        let remaining = occurrence.time_remaining(now);
        let idade = occurrence
            .dados_completos
            .get("idade")
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        Self {
            occurrence_id: occurrence.id,
            hospital_nome: hospital_nome.to_string(),
            setor: occurrence
                .setor()
                .unwrap_or_else(|| "Nao informado".to_string()),
            idade,
            data_obito: occurrence.data_obito,
            tempo_restante: format_time_remaining(remaining),
            janela_horas_restantes: remaining.num_hours(),
            janela_minutos_restantes: remaining.num_minutes(),
            score: occurrence.score_priorizacao,
            url: dashboard_url.to_string(),
        }
    }
}

/// Multi-channel fan-out, one instance wired at startup
pub struct NotificationFanout {
    hub: Arc<SseHub>,
    /// None disables the channel (missing SMTP credentials)
    email_queue: Option<Arc<dyn DeliveryQueue>>,
    /// None disables the channel (missing Twilio credentials)
    sms_queue: Option<Arc<dyn DeliveryQueue>>,
    /// None disables the channel (missing FCM key)
    push: Option<Arc<PushGateway>>,
    recipients: Arc<dyn RecipientDirectory>,
    log: Arc<dyn NotificationLog>,
    dashboard_url: String,
}

impl NotificationFanout {
    pub fn new(
        hub: Arc<SseHub>,
        email_queue: Option<Arc<dyn DeliveryQueue>>,
        sms_queue: Option<Arc<dyn DeliveryQueue>>,
        push: Option<Arc<PushGateway>>,
        recipients: Arc<dyn RecipientDirectory>,
        log: Arc<dyn NotificationLog>,
        dashboard_url: impl Into<String>,
    ) -> Self {
        Self {
            hub,
            email_queue,
            sms_queue,
            push,
            recipients,
            log,
            dashboard_url: dashboard_url.into(),
        }
    }

    async fn notify_dashboard(&self, occurrence: &Occurrence, alert: &OccurrenceAlert) {
        let event = SseEvent::new_occurrence(occurrence, &alert.hospital_nome);
        self.hub.publish_new_occurrence(&event, occurrence.id).await;
    }

    async fn enqueue_channel(
        &self,
        queue: &Arc<dyn DeliveryQueue>,
        canal: NotificationChannel,
        recipients: Vec<String>,
        occurrence_id: Uuid,
        payload: &serde_json::Value,
        max_retries: u32,
    ) {
        for recipient in recipients {
            let item = QueueItem::new(occurrence_id, recipient, payload.clone(), max_retries);
            if let Err(err) = queue.enqueue(&item).await {
                warn!(%canal, %occurrence_id, %err, "failed to enqueue notification");
                let record = NewNotificationRecord::failed(
                    occurrence_id,
                    canal,
                    err.to_string(),
                    serde_json::json!({}),
                );
                if let Err(err) = self.log.record(record).await {
                    warn!(%canal, %err, "failed to record enqueue failure");
                }
            }
        }
    }

    async fn notify_email(&self, occurrence_id: Uuid, payload: &serde_json::Value) {
        let Some(queue) = &self.email_queue else {
            return;
        };
        let recipients = match self.recipients.email_recipients().await {
            Ok(recipients) => recipients,
            Err(err) => {
                warn!(%err, "could not resolve email recipients");
                Vec::new()
            }
        };
        self.enqueue_channel(
            queue,
            NotificationChannel::Email,
            recipients,
            occurrence_id,
            payload,
            EMAIL_MAX_RETRIES,
        )
        .await;
    }

    async fn notify_sms(&self, occurrence_id: Uuid, payload: &serde_json::Value) {
        let Some(queue) = &self.sms_queue else {
            return;
        };
        let recipients = match self.recipients.sms_recipients().await {
            Ok(recipients) => recipients,
            Err(err) => {
                warn!(%err, "could not resolve sms recipients");
                Vec::new()
            }
        };
        self.enqueue_channel(
            queue,
            NotificationChannel::Sms,
            recipients,
            occurrence_id,
            payload,
            SMS_MAX_RETRIES,
        )
        .await;
    }

    async fn notify_push(&self, occurrence_id: Uuid, alert: &OccurrenceAlert) {
        let Some(push) = &self.push else {
            return;
        };
        let tokens = match self.recipients.push_tokens().await {
            Ok(tokens) => tokens,
            Err(err) => {
                warn!(%err, "could not resolve push tokens");
                Vec::new()
            }
        };
        for token in tokens {
            let record = match push.send_new_occurrence(&token, alert).await {
                Ok(metadata) => {
                    NewNotificationRecord::sent(occurrence_id, NotificationChannel::Push, metadata)
                }
                Err(err) => {
                    warn!(%occurrence_id, %err, "push delivery failed");
                    NewNotificationRecord::failed(
                        occurrence_id,
                        NotificationChannel::Push,
                        err.to_string(),
                        serde_json::json!({}),
                    )
                }
            };
            if let Err(err) = self.log.record(record).await {
                warn!(%occurrence_id, %err, "failed to record push outcome");
            }
        }
    }
}

#[async_trait]
impl OccurrenceSink for NotificationFanout {
    #[instrument(skip(self, occurrence), fields(occurrence_id = %occurrence.id))]
    async fn on_eligible_occurrence(&self, occurrence: Occurrence, hospital_nome: String) {
        let alert = OccurrenceAlert::new(&occurrence, &hospital_nome, &self.dashboard_url, Utc::now());
        let payload = match serde_json::to_value(&alert) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(%err, "could not serialize alert payload");
                return;
            }
        };

        info!(
            hospital = %alert.hospital_nome,
            setor = %alert.setor,
            score = alert.score,
            "fanning out eligible occurrence"
        );

        self.notify_dashboard(&occurrence, &alert).await;
        self.notify_email(occurrence.id, &payload).await;
        self.notify_sms(occurrence.id, &payload).await;
        self.notify_push(occurrence.id, &alert).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use sentinela_core::{NotificationStatus, OccurrenceStatus, Publisher, Subscriber};
    use sentinela_storage::memory::{
        InMemoryNotificationLog, InMemoryPubSub, InMemoryQueue, InMemoryRecipientDirectory,
    };

    fn occurrence() -> Occurrence {
        let now = Utc::now();
        Occurrence {
            id: Uuid::now_v7(),
            obito_id: Uuid::now_v7(),
            hospital_id: Uuid::now_v7(),
            status: OccurrenceStatus::Pendente,
            score_priorizacao: 100,
            nome_paciente_mascarado: "Jo** Si***".to_string(),
            dados_completos: serde_json::json!({ "setor": "UTI", "idade": 55 }),
            data_obito: now - Duration::minutes(30),
            janela_expira_em: now + Duration::hours(5) + Duration::minutes(30),
            created_at: now,
            updated_at: now,
        }
    }

    fn hub(log: Arc<InMemoryNotificationLog>) -> Arc<SseHub> {
        let bus = Arc::new(InMemoryPubSub::new());
        Arc::new(SseHub::new(
            bus.clone() as Arc<dyn Publisher>,
            bus as Arc<dyn Subscriber>,
            log,
        ))
    }

    #[tokio::test]
    async fn test_fanout_enqueues_per_recipient_with_channel_budgets() {
        let log = Arc::new(InMemoryNotificationLog::new());
        let email_queue = Arc::new(InMemoryQueue::new());
        let sms_queue = Arc::new(InMemoryQueue::new());
        let recipients = Arc::new(InMemoryRecipientDirectory::new(
            vec!["a@opo.br".to_string(), "b@opo.br".to_string()],
            vec!["+5511999990000".to_string()],
            vec![],
        ));

        let fanout = NotificationFanout::new(
            hub(log.clone()),
            Some(email_queue.clone() as Arc<dyn DeliveryQueue>),
            Some(sms_queue.clone() as Arc<dyn DeliveryQueue>),
            None,
            recipients,
            log.clone(),
            "http://localhost:3000/dashboard/status",
        );

        fanout
            .on_eligible_occurrence(occurrence(), "Hospital Central".to_string())
            .await;

        assert_eq!(email_queue.pending_len().await.unwrap(), 2);
        assert_eq!(sms_queue.pending_len().await.unwrap(), 1);

        let raw = sms_queue.pull_to_inflight().await.unwrap().unwrap();
        let item: QueueItem = serde_json::from_str(&raw).unwrap();
        assert_eq!(item.max_retries, SMS_MAX_RETRIES);
        let alert: OccurrenceAlert = serde_json::from_value(item.payload).unwrap();
        assert_eq!(alert.hospital_nome, "Hospital Central");
        assert_eq!(alert.setor, "UTI");

        let raw = email_queue.pull_to_inflight().await.unwrap().unwrap();
        let item: QueueItem = serde_json::from_str(&raw).unwrap();
        assert_eq!(item.max_retries, EMAIL_MAX_RETRIES);

        // Dashboard outcome recorded
        let records = log.records();
        assert!(records
            .iter()
            .any(|r| r.canal == NotificationChannel::Dashboard
                && r.status_envio == NotificationStatus::Enviado));
    }

    #[tokio::test]
    async fn test_broken_channels_do_not_block_the_rest() {
        let log = Arc::new(InMemoryNotificationLog::new());
        let bus = Arc::new(InMemoryPubSub::new());
        let hub = Arc::new(SseHub::new(
            bus.clone() as Arc<dyn Publisher>,
            bus.clone() as Arc<dyn Subscriber>,
            log.clone(),
        ));
        let email_queue = Arc::new(InMemoryQueue::new());
        let sms_queue = Arc::new(InMemoryQueue::new());
        let recipients = Arc::new(InMemoryRecipientDirectory::new(
            vec!["a@opo.br".to_string()],
            vec!["+5511999990000".to_string()],
            vec![],
        ));

        let fanout = NotificationFanout::new(
            hub,
            Some(email_queue.clone() as Arc<dyn DeliveryQueue>),
            Some(sms_queue.clone() as Arc<dyn DeliveryQueue>),
            None,
            recipients,
            log.clone(),
            "http://localhost:3000",
        );

        // Dashboard publish and email enqueue both break; SMS must still land
        bus.fail_next_publish();
        email_queue.fail_next_enqueue();
        fanout
            .on_eligible_occurrence(occurrence(), "Hospital Central".to_string())
            .await;

        assert_eq!(email_queue.pending_len().await.unwrap(), 0);
        assert_eq!(sms_queue.pending_len().await.unwrap(), 1);

        let records = log.records();
        assert!(records
            .iter()
            .any(|r| r.canal == NotificationChannel::Dashboard
                && r.status_envio == NotificationStatus::Falha));
        let email_falha = records
            .iter()
            .find(|r| r.canal == NotificationChannel::Email)
            .unwrap();
        assert_eq!(email_falha.status_envio, NotificationStatus::Falha);
        assert!(email_falha
            .erro_mensagem
            .as_deref()
            .unwrap()
            .contains("injected enqueue failure"));
    }

    #[tokio::test]
    async fn test_disabled_channels_are_skipped() {
        let log = Arc::new(InMemoryNotificationLog::new());
        let recipients = Arc::new(InMemoryRecipientDirectory::new(
            vec!["a@opo.br".to_string()],
            vec!["+5511999990000".to_string()],
            vec!["token".to_string()],
        ));

        let fanout = NotificationFanout::new(
            hub(log.clone()),
            None,
            None,
            None,
            recipients,
            log.clone(),
            "http://localhost:3000",
        );

        // Nothing to enqueue or call; only the dashboard record exists
        fanout
            .on_eligible_occurrence(occurrence(), "Hospital Central".to_string())
            .await;
        let records = log.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].canal, NotificationChannel::Dashboard);
    }
}
