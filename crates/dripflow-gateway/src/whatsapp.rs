//! WhatsApp Business Cloud API gateway.
//!
//! Sends outbound sequence messages through the official Cloud API. Each
//! tenant connection carries its own access token and phone number id; the
//! gateway itself only holds the HTTP client and the API base URL.

use async_trait::async_trait;
use dripflow_core::config::GatewayConfig;
use dripflow_core::error::{DripflowError, Result};
use dripflow_core::traits::MessageGateway;
use dripflow_core::types::{Connection, MediaKind};

/// WhatsApp Cloud API client.
pub struct WhatsAppGateway {
    api_base: String,
    client: reqwest::Client,
}

impl WhatsAppGateway {
    pub fn new(config: &GatewayConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            client,
        }
    }

    fn token(connection: &Connection) -> Result<&str> {
        connection
            .access_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                DripflowError::AuthFailed(format!(
                    "connection {} has no access token",
                    connection.id
                ))
            })
    }

    /// POST a message payload; returns the provider message id.
    async fn post_message(
        &self,
        connection: &Connection,
        body: serde_json::Value,
    ) -> Result<String> {
        let token = Self::token(connection)?;
        let url = format!("{}/{}/messages", self.api_base, connection.phone_number_id);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {token}"))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| DripflowError::Gateway(format!("WhatsApp API request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(DripflowError::Gateway(format!(
                "WhatsApp API error {status}: {error_text}"
            )));
        }

        let result: serde_json::Value = response
            .json()
            .await
            .map_err(|e| DripflowError::Gateway(format!("Invalid WhatsApp response: {e}")))?;

        let msg_id = result["messages"][0]["id"]
            .as_str()
            .unwrap_or("unknown")
            .to_string();

        tracing::debug!("WhatsApp message sent: {} → {}", msg_id, body["to"]);
        Ok(msg_id)
    }
}

#[async_trait]
impl MessageGateway for WhatsAppGateway {
    async fn send_text(
        &self,
        connection: &Connection,
        recipient: &str,
        body: &str,
    ) -> Result<String> {
        let payload = serde_json::json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": recipient,
            "type": "text",
            "text": {
                "preview_url": false,
                "body": body
            }
        });
        self.post_message(connection, payload).await
    }

    async fn send_media(
        &self,
        connection: &Connection,
        recipient: &str,
        kind: MediaKind,
        url: &str,
        caption: Option<&str>,
    ) -> Result<String> {
        let mut media = serde_json::json!({ "link": url });
        // The Cloud API rejects captions on audio messages.
        if kind != MediaKind::Audio {
            if let Some(caption) = caption {
                media["caption"] = serde_json::Value::String(caption.to_string());
            }
        }
        let mut payload = serde_json::json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": recipient,
            "type": kind.as_str()
        });
        payload[kind.as_str()] = media;
        self.post_message(connection, payload).await
    }
}
