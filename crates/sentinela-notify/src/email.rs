// Email channel: SMTP via lettre, HTML body via minijinja
//
// Runs behind the reliable queue worker (3 retries). Address and rendering
// problems are permanent; SMTP transport problems are transient.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use minijinja::Environment;
use thiserror::Error;
use tracing::debug;

use sentinela_core::config::SmtpConfig;
use sentinela_core::{DeliveryError, NotificationChannel, QueueItem};

use crate::fanout::OccurrenceAlert;
use crate::worker::QueueDelivery;

const ALERT_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"></head>
<body style="font-family: Arial, sans-serif; color: #1a1a1a;">
  <div style="background: #b71c1c; color: #fff; padding: 16px;">
    <h2 style="margin: 0;">Nova Ocorrencia Elegivel</h2>
  </div>
  <div style="padding: 16px;">
    <p><strong>Hospital:</strong> {{ hospital_nome }}</p>
    <p><strong>Setor:</strong> {{ setor }}</p>
    <p><strong>Data do obito:</strong> {{ data_obito }}</p>
    <p><strong>Tempo restante da janela:</strong> {{ tempo_restante }}</p>
    <p><strong>Score de priorizacao:</strong> {{ score }}</p>
    <p style="margin-top: 24px;">
      <a href="{{ url }}" style="background: #b71c1c; color: #fff; padding: 12px 24px; text-decoration: none;">
        Abrir ocorrencia
      </a>
    </p>
  </div>
  <div style="padding: 16px; color: #757575; font-size: 12px;">
    Mensagem automatica do Sentinela. Nao responda este email.
  </div>
</body>
</html>
"#;

#[derive(Debug, Error)]
pub enum EmailSetupError {
    #[error("invalid from address: {0}")]
    FromAddress(#[from] lettre::address::AddressError),

    #[error("smtp transport: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),

    #[error("template: {0}")]
    Template(#[from] minijinja::Error),
}

pub struct EmailSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    env: Environment<'static>,
}

impl EmailSender {
    pub fn new(config: &SmtpConfig) -> Result<Self, EmailSetupError> {
        let from: Mailbox = config.from.parse()?;

        let mut builder = if config.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        };
        builder = builder.port(config.port);
        if !config.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ));
        }

        let mut env = Environment::new();
        env.add_template("alert", ALERT_TEMPLATE)?;

        Ok(Self {
            transport: builder.build(),
            from,
            env,
        })
    }

    fn subject(alert: &OccurrenceAlert) -> String {
        format!("[URGENTE] Nova Ocorrencia Elegivel - {}", alert.hospital_nome)
    }

    fn render_body(&self, alert: &OccurrenceAlert) -> Result<String, minijinja::Error> {
        self.env.get_template("alert")?.render(alert)
    }
}

#[async_trait]
impl QueueDelivery for EmailSender {
    fn channel(&self) -> NotificationChannel {
        NotificationChannel::Email
    }

    async fn deliver(&self, item: &QueueItem) -> Result<serde_json::Value, DeliveryError> {
        let alert: OccurrenceAlert = serde_json::from_value(item.payload.clone())
            .map_err(|e| DeliveryError::permanent(format!("unrenderable payload: {e}")))?;

        let to: Mailbox = item
            .recipient
            .parse()
            .map_err(|e| DeliveryError::permanent(format!("invalid recipient address: {e}")))?;

        let html = self
            .render_body(&alert)
            .map_err(|e| DeliveryError::permanent(format!("template render: {e}")))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(Self::subject(&alert))
            .header(ContentType::TEXT_HTML)
            .body(html)
            .map_err(|e| DeliveryError::permanent(format!("message build: {e}")))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| DeliveryError::transient(format!("smtp send: {e}")))?;

        debug!(recipient = %item.recipient, "email sent");
        Ok(serde_json::json!({ "recipient": item.recipient }))
    }
}
