use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("transport: {0}")]
    Transport(String),
    #[error("rejected: {0}")]
    Rejected(String),
}

/// Outbound mail capability. Opaque to this crate: one slow, failure-prone
/// call, awaited only inside detached notification tasks.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, text: &str) -> Result<(), MailError>;
}

/// Production transport: POST to an HTTP mail relay (Hostinger-style SMTP
/// sits behind it). Relay URL and key come from env; the request carries a
/// hard timeout so a hung relay surfaces as a plain failure.
pub struct HttpRelayMailer {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    from_name: String,
    from_email: String,
}

impl HttpRelayMailer {
    pub fn from_env() -> anyhow::Result<Self> {
        let endpoint = std::env::var("MAIL_RELAY_URL")
            .map_err(|_| anyhow::anyhow!("MAIL_RELAY_URL must be set"))?;
        let api_key = std::env::var("MAIL_RELAY_KEY").unwrap_or_default();
        let from_name = std::env::var("MAIL_FROM_NAME").unwrap_or_else(|_| "Confide".into());
        let from_email = std::env::var("MAIL_FROM_EMAIL")
            .map_err(|_| anyhow::anyhow!("MAIL_FROM_EMAIL must be set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            endpoint,
            api_key,
            from_name,
            from_email,
        })
    }
}

#[async_trait]
impl Mailer for HttpRelayMailer {
    async fn send(&self, to: &str, subject: &str, text: &str) -> Result<(), MailError> {
        let body = serde_json::json!({
            "from": { "name": self.from_name, "email": self.from_email },
            "to": to,
            "reply_to": self.from_email,
            "subject": subject,
            "text": text,
            "headers": {
                "List-Unsubscribe": format!("<mailto:{}?subject=unsubscribe>", self.from_email),
                "Precedence": "bulk"
            }
        });
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(MailError::Rejected(format!("status {}", resp.status())));
        }
        Ok(())
    }
}

// Factory helper used in main (panic early if misconfigured)
pub fn build_mailer() -> Arc<dyn Mailer> {
    match HttpRelayMailer::from_env() {
        Ok(m) => Arc::new(m),
        Err(e) => panic!("Failed to initialize mail relay: {e}"),
    }
}
