// SMS channel: Twilio REST via reqwest
//
// Runs behind the reliable queue worker (5 retries). The 160-character
// budget is enforced by shortening the hospital name first and hard
// truncation as a last resort. Phone numbers are validated before sending
// and only ever logged masked.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use sentinela_core::config::TwilioConfig;
use sentinela_core::lgpd::{mask_phone, validate_phone};
use sentinela_core::{DeliveryError, NotificationChannel, QueueItem};

use crate::fanout::OccurrenceAlert;
use crate::worker::QueueDelivery;

/// Single-segment GSM-7 budget
const SMS_MAX_LEN: usize = 160;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Compose the alert SMS within the 160-character budget
///
/// Over budget: shorten the hospital name by the excess plus an ellipsis;
/// if still over, fall back to the name's first 10 characters; the final
/// guard truncates the whole message to 157 + "...".
pub fn build_message(alert: &OccurrenceAlert) -> String {
    let message = render(&alert.hospital_nome, alert);
    if message.chars().count() <= SMS_MAX_LEN {
        return message;
    }

    let excess = message.chars().count() - SMS_MAX_LEN;
    let hospital_len = alert.hospital_nome.chars().count();
    if hospital_len > excess + 3 {
        let kept: String = alert
            .hospital_nome
            .chars()
            .take(hospital_len - excess - 3)
            .collect();
        let message = render(&format!("{kept}..."), alert);
        if message.chars().count() <= SMS_MAX_LEN {
            return message;
        }
    }

    let kept: String = alert.hospital_nome.chars().take(10).collect();
    let message = render(&format!("{kept}..."), alert);
    if message.chars().count() <= SMS_MAX_LEN {
        return message;
    }

    let truncated: String = message.chars().take(SMS_MAX_LEN - 3).collect();
    format!("{truncated}...")
}

fn render(hospital: &str, alert: &OccurrenceAlert) -> String {
    format!(
        "[SENTINELA] ALERTA CRITICO: Obito PCR detectado. Hosp: {hospital} Idade: {idade} Janela: {horas}h restantes. Acao: {url}",
        idade = alert.idade,
        horas = alert.janela_horas_restantes,
        url = alert.url,
    )
}

#[derive(Debug, Deserialize)]
struct TwilioResponse {
    sid: Option<String>,
    code: Option<i64>,
    message: Option<String>,
}

pub struct SmsSender {
    client: reqwest::Client,
    config: TwilioConfig,
}

impl SmsSender {
    pub fn new(config: TwilioConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self { client, config })
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.config.base_url, self.config.account_sid
        )
    }

    /// Map a Twilio error code + HTTP status to retry-vs-dead-letter
    fn classify(status: reqwest::StatusCode, body: &TwilioResponse) -> DeliveryError {
        let detail = body
            .message
            .clone()
            .unwrap_or_else(|| format!("http {status}"));
        match body.code {
            // Invalid or unreachable destination number
            Some(21610) | Some(21614) => {
                DeliveryError::permanent(format!("invalid phone: {detail}"))
            }
            // Credentials problems heal when the operator fixes the account
            Some(20001) | Some(20003) => {
                DeliveryError::transient(format!("twilio auth: {detail}"))
            }
            // Rate limited
            Some(14107) => DeliveryError::transient(format!("twilio rate limit: {detail}")),
            _ if status.is_server_error() => {
                DeliveryError::transient(format!("twilio {status}: {detail}"))
            }
            _ => DeliveryError::permanent(format!("twilio {status}: {detail}")),
        }
    }
}

#[async_trait]
impl QueueDelivery for SmsSender {
    fn channel(&self) -> NotificationChannel {
        NotificationChannel::Sms
    }

    async fn deliver(&self, item: &QueueItem) -> Result<serde_json::Value, DeliveryError> {
        let alert: OccurrenceAlert = serde_json::from_value(item.payload.clone())
            .map_err(|e| DeliveryError::permanent(format!("unrenderable payload: {e}")))?;

        if !validate_phone(&item.recipient) {
            return Err(DeliveryError::permanent(format!(
                "invalid phone format: {}",
                mask_phone(&item.recipient)
            )));
        }

        let body = build_message(&alert);
        let response = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&[
                ("To", item.recipient.as_str()),
                ("From", self.config.from_number.as_str()),
                ("Body", body.as_str()),
            ])
            .send()
            .await
            .map_err(|e| DeliveryError::transient(format!("twilio request: {e}")))?;

        let status = response.status();
        let twilio: TwilioResponse = response.json().await.unwrap_or(TwilioResponse {
            sid: None,
            code: None,
            message: None,
        });

        if status.is_success() {
            debug!(recipient = %mask_phone(&item.recipient), sid = ?twilio.sid, "sms sent");
            return Ok(serde_json::json!({
                "twilio_sid": twilio.sid,
                "recipient": mask_phone(&item.recipient),
            }));
        }

        let err = Self::classify(status, &twilio);
        warn!(
            recipient = %mask_phone(&item.recipient),
            code = ?twilio.code,
            %status,
            "sms delivery failed"
        );
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn alert(hospital: &str) -> OccurrenceAlert {
        OccurrenceAlert {
            occurrence_id: Uuid::now_v7(),
            hospital_nome: hospital.to_string(),
            setor: "UTI".to_string(),
            idade: 55,
            data_obito: Utc::now(),
            tempo_restante: "5h 30min".to_string(),
            janela_horas_restantes: 5,
            janela_minutos_restantes: 330,
            score: 100,
            url: "http://localhost:3000/dashboard/status".to_string(),
        }
    }

    fn sender(base_url: &str) -> SmsSender {
        SmsSender::new(TwilioConfig {
            account_sid: "AC_test".to_string(),
            auth_token: "secret".to_string(),
            from_number: "+15005550006".to_string(),
            base_url: base_url.to_string(),
        })
        .unwrap()
    }

    fn item(payload: &OccurrenceAlert) -> QueueItem {
        QueueItem::new(
            Uuid::now_v7(),
            "+5511999990000",
            serde_json::to_value(payload).unwrap(),
            5,
        )
    }

    #[test]
    fn test_message_within_budget_untouched() {
        let message = build_message(&alert("Hospital Central"));
        assert!(message.chars().count() <= SMS_MAX_LEN);
        assert!(message.contains("Hosp: Hospital Central"));
        assert!(message.contains("Idade: 55"));
        assert!(message.contains("Janela: 5h"));
    }

    #[test]
    fn test_long_hospital_name_truncated_with_ellipsis() {
        let long_name =
            "Hospital Universitario Professor Doutor Alberto Santos Dumont de Ribeirao Preto";
        let message = build_message(&alert(long_name));
        assert!(message.chars().count() <= SMS_MAX_LEN);
        assert!(message.contains("..."));
        // The prefix of the name survives
        assert!(message.contains("Hospital Universitario"));
    }

    #[test]
    fn test_extreme_overflow_hard_truncates() {
        let mut a = alert("Hospital");
        a.url = format!("http://localhost:3000/{}", "x".repeat(200));
        let message = build_message(&a);
        assert_eq!(message.chars().count(), SMS_MAX_LEN);
        assert!(message.ends_with("..."));
    }

    #[tokio::test]
    async fn test_invalid_phone_is_permanent_without_request() {
        let sender = sender("http://127.0.0.1:9");
        let mut bad = item(&alert("HC"));
        bad.recipient = "11999990000".to_string();
        let err = sender.deliver(&bad).await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_successful_send_returns_sid_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/2010-04-01/Accounts/AC_test/Messages.json"))
            .and(body_string_contains("SENTINELA"))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(serde_json::json!({ "sid": "SM123" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let metadata = sender(&server.uri())
            .deliver(&item(&alert("HC")))
            .await
            .unwrap();
        assert_eq!(metadata["twilio_sid"], "SM123");
        // Metadata never carries the raw number
        assert_eq!(metadata["recipient"], "+5511*****0000");
    }

    #[tokio::test]
    async fn test_invalid_number_code_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(
                serde_json::json!({ "code": 21614, "message": "not a mobile number" }),
            ))
            .mount(&server)
            .await;

        let err = sender(&server.uri())
            .deliver(&item(&alert("HC")))
            .await
            .unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_rate_limit_and_5xx_are_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(
                serde_json::json!({ "code": 14107, "message": "rate exceeded" }),
            ))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let sender = sender(&server.uri());
        let err = sender.deliver(&item(&alert("HC"))).await.unwrap_err();
        assert!(err.is_transient());

        let err = sender.deliver(&item(&alert("HC"))).await.unwrap_err();
        assert!(err.is_transient());
    }
}
