// Web push channel: FCM legacy HTTP API
//
// Direct gateway calls, no retry queue; the fan-out records each outcome.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use sentinela_core::config::FcmConfig;
use sentinela_core::DeliveryError;

use crate::fanout::OccurrenceAlert;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct FcmResponse {
    #[serde(default)]
    success: i64,
    #[serde(default)]
    failure: i64,
    #[serde(default)]
    results: Vec<FcmResult>,
}

#[derive(Debug, Deserialize)]
struct FcmResult {
    error: Option<String>,
}

pub struct PushGateway {
    client: reqwest::Client,
    config: FcmConfig,
}

impl PushGateway {
    pub fn new(config: FcmConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self { client, config })
    }

    /// Send one new-occurrence push to a device token
    pub async fn send_new_occurrence(
        &self,
        token: &str,
        alert: &OccurrenceAlert,
    ) -> Result<serde_json::Value, DeliveryError> {
        let body = json!({
            "to": token,
            "notification": {
                "title": format!("Nova Ocorrencia - {}", alert.hospital_nome),
                "body": format!(
                    "Setor: {} | Tempo restante: {} min",
                    alert.setor, alert.janela_minutos_restantes
                ),
            },
            "data": {
                "type": "new_occurrence",
                "occurrence_id": alert.occurrence_id,
                "url": alert.url,
            },
            "webpush": {
                "fcm_options": { "link": alert.url },
            },
        });

        let response = self
            .client
            .post(&self.config.url)
            .header(
                "Authorization",
                format!("key={}", self.config.server_key),
            )
            .json(&body)
            .send()
            .await
            .map_err(|e| DeliveryError::transient(format!("fcm request: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            if status.is_server_error() {
                return Err(DeliveryError::transient(format!("fcm {status}")));
            }
            return Err(DeliveryError::permanent(format!("fcm {status}")));
        }

        let fcm: FcmResponse = response
            .json()
            .await
            .map_err(|e| DeliveryError::transient(format!("fcm response: {e}")))?;

        if fcm.failure > 0 {
            let reason = fcm
                .results
                .first()
                .and_then(|r| r.error.clone())
                .unwrap_or_else(|| "unknown".to_string());
            // Dead tokens cannot heal; everything else might
            let err = match reason.as_str() {
                "NotRegistered" | "InvalidRegistration" | "MissingRegistration" => {
                    DeliveryError::permanent(format!("fcm: {reason}"))
                }
                _ => DeliveryError::transient(format!("fcm: {reason}")),
            };
            return Err(err);
        }

        debug!(success = fcm.success, "push sent");
        Ok(json!({ "fcm_success": fcm.success }))
    }
}
