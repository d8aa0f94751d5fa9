use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::json;

#[derive(Debug, Clone)]
pub struct OutboundEmail {
    pub from: String,
    pub to: String,
    pub reply_to: Option<String>,
    pub subject: String,
    pub text: String,
    pub html: Option<String>,
}

#[async_trait]
pub trait Mailer: Send + Sync + 'static {
    async fn send(&self, email: OutboundEmail) -> Result<()>;
}

/// Stand-in used when no email API key is configured.
pub struct DisabledMailer;

#[async_trait]
impl Mailer for DisabledMailer {
    async fn send(&self, _email: OutboundEmail) -> Result<()> {
        Err(anyhow!("email provider is not configured"))
    }
}

pub struct ResendMailer {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ResendMailer {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("collabspace")
            .build()
            .context("failed to construct HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl Mailer for ResendMailer {
    async fn send(&self, email: OutboundEmail) -> Result<()> {
        let mut body = json!({
            "from": email.from,
            "to": email.to,
            "subject": email.subject,
            "text": email.text,
        });
        if let Some(reply_to) = &email.reply_to {
            body["reply_to"] = json!(reply_to);
        }
        if let Some(html) = &email.html {
            body["html"] = json!(html);
        }

        let response = self
            .http
            .post(format!("{}/emails", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("failed to reach email provider")?;

        if !response.status().is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(anyhow!("failed to send email: {detail}"));
        }
        Ok(())
    }
}
