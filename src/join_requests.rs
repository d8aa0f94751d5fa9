use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use uuid::Uuid;

/// Agent credentials handed from the video-provider webhook to the polling
/// client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentJoinRequest {
    pub token: String,
    pub room_url: String,
    pub agent_id: Uuid,
    pub agent_name: String,
}

struct TimedEntry {
    request: AgentJoinRequest,
    inserted_at: Instant,
}

/// Short-TTL, one-time-read hand-off keyed by meeting id. Entries expire
/// after `ttl` and are removed on the first successful read, so a token is
/// never delivered twice.
pub struct JoinRequestStore {
    inner: RwLock<HashMap<Uuid, TimedEntry>>,
    ttl: Duration,
}

impl JoinRequestStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub async fn insert(&self, meeting_id: Uuid, request: AgentJoinRequest) {
        let mut map = self.inner.write().await;
        map.retain(|_, entry| entry.inserted_at.elapsed() < self.ttl);
        map.insert(
            meeting_id,
            TimedEntry {
                request,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Removes and returns the pending request, if any unexpired one exists.
    pub async fn take(&self, meeting_id: &Uuid) -> Option<AgentJoinRequest> {
        let mut map = self.inner.write().await;
        let entry = map.remove(meeting_id)?;
        if entry.inserted_at.elapsed() < self.ttl {
            Some(entry.request)
        } else {
            None
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}
