use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

pub const JOIN_TOKEN_EXPIRY_SECS: i64 = 3600;

#[derive(Debug, Clone, Deserialize)]
pub struct Room {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenRequest {
    pub room_name: String,
    pub user_id: String,
    pub user_name: String,
    pub is_owner: bool,
}

/// Hosted video-conferencing seam. Rooms are named by meeting id; participants
/// join with short-lived tokens minted here.
#[async_trait]
pub trait VideoProvider: Send + Sync + 'static {
    async fn create_room(&self, room_name: &str) -> Result<Room>;

    /// Returns `None` when the room does not exist.
    async fn get_room(&self, room_name: &str) -> Result<Option<Room>>;

    async fn delete_room(&self, room_name: &str) -> Result<()>;

    async fn meeting_token(&self, request: TokenRequest) -> Result<String>;
}

/// Stand-in used when no video API key is configured; every call fails with
/// a clear message instead of a connection error.
pub struct DisabledVideoProvider;

#[async_trait]
impl VideoProvider for DisabledVideoProvider {
    async fn create_room(&self, _room_name: &str) -> Result<Room> {
        Err(anyhow!("video provider is not configured"))
    }

    async fn get_room(&self, _room_name: &str) -> Result<Option<Room>> {
        Err(anyhow!("video provider is not configured"))
    }

    async fn delete_room(&self, _room_name: &str) -> Result<()> {
        Err(anyhow!("video provider is not configured"))
    }

    async fn meeting_token(&self, _request: TokenRequest) -> Result<String> {
        Err(anyhow!("video provider is not configured"))
    }
}

pub struct DailyVideoClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    domain: Option<String>,
}

impl DailyVideoClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, domain: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("collabspace")
            .build()
            .context("failed to construct HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
            domain,
        })
    }

    fn room_url_fallback(&self, room_name: &str) -> String {
        match &self.domain {
            Some(domain) => format!("https://{domain}.daily.co/{room_name}"),
            None => format!("https://daily.co/{room_name}"),
        }
    }
}

#[derive(Deserialize)]
struct RoomPayload {
    name: String,
    url: Option<String>,
}

#[derive(Deserialize)]
struct TokenPayload {
    token: String,
}

#[async_trait]
impl VideoProvider for DailyVideoClient {
    async fn create_room(&self, room_name: &str) -> Result<Room> {
        let response = self
            .http
            .post(format!("{}/rooms", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "name": room_name,
                "privacy": "private",
                "properties": { "enable_transcription": true },
            }))
            .send()
            .await
            .context("failed to reach video provider")?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("failed to create room: {body}"));
        }

        let payload: RoomPayload = response.json().await.context("malformed room response")?;
        let url = payload
            .url
            .unwrap_or_else(|| self.room_url_fallback(room_name));
        Ok(Room {
            name: payload.name,
            url,
        })
    }

    async fn get_room(&self, room_name: &str) -> Result<Option<Room>> {
        let response = self
            .http
            .get(format!("{}/rooms/{room_name}", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .context("failed to reach video provider")?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("failed to get room: {body}"));
        }

        let payload: RoomPayload = response.json().await.context("malformed room response")?;
        let url = payload
            .url
            .unwrap_or_else(|| self.room_url_fallback(room_name));
        Ok(Some(Room {
            name: payload.name,
            url,
        }))
    }

    async fn delete_room(&self, room_name: &str) -> Result<()> {
        let response = self
            .http
            .delete(format!("{}/rooms/{room_name}", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .context("failed to reach video provider")?;

        if !response.status().is_success() && response.status() != reqwest::StatusCode::NOT_FOUND {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("failed to delete room: {body}"));
        }
        Ok(())
    }

    async fn meeting_token(&self, request: TokenRequest) -> Result<String> {
        let exp = Utc::now().timestamp() + JOIN_TOKEN_EXPIRY_SECS;
        let response = self
            .http
            .post(format!("{}/meeting-tokens", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "properties": {
                    "room_name": request.room_name,
                    "exp": exp,
                    "is_owner": request.is_owner,
                    "user_name": request.user_name,
                    "user_id": request.user_id,
                },
            }))
            .send()
            .await
            .context("failed to reach video provider")?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("failed to create meeting token: {body}"));
        }

        let payload: TokenPayload = response.json().await.context("malformed token response")?;
        Ok(payload.token)
    }
}
