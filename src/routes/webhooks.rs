use axum::{extract::State, http::StatusCode, Json};
use diesel::prelude::*;
use serde::Deserialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    error::AppResult,
    join_requests::AgentJoinRequest,
    models::{Agent, Meeting},
    schema::{agents, meetings},
    state::AppState,
    video::TokenRequest,
};

#[derive(Debug, Deserialize)]
pub struct VideoEvent {
    #[serde(rename = "type")]
    pub event: String,
    #[serde(default)]
    pub payload: VideoEventPayload,
}

#[derive(Debug, Default, Deserialize)]
pub struct VideoEventPayload {
    pub room: Option<String>,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
}

/// Video-provider event sink. Always answers 200 so the provider does not
/// retry; failures are logged and dropped.
pub async fn video_event(
    State(state): State<AppState>,
    Json(event): Json<VideoEvent>,
) -> StatusCode {
    match event.event.as_str() {
        "participant-joined" => {
            if let Err(err) = handle_participant_joined(&state, &event.payload).await {
                warn!(error = %err, "video webhook processing failed");
            }
        }
        other => {
            debug!(event = other, "ignoring video webhook event");
        }
    }
    StatusCode::OK
}

/// A human joining a meeting room triggers the agent hand-off: mint a join
/// token for the meeting's agent and park it for the client poll.
async fn handle_participant_joined(
    state: &AppState,
    payload: &VideoEventPayload,
) -> AppResult<()> {
    let room = match &payload.room {
        Some(room) => room,
        None => return Ok(()),
    };
    let meeting_id = match room.parse::<Uuid>() {
        Ok(id) => id,
        Err(_) => {
            debug!(room, "webhook room is not a meeting id");
            return Ok(());
        }
    };

    let (meeting, agent) = {
        let mut conn = state.db()?;
        let row: Result<(Meeting, Agent), _> = meetings::table
            .inner_join(agents::table)
            .filter(meetings::id.eq(meeting_id))
            .select((meetings::all_columns, agents::all_columns))
            .first(&mut conn);
        match row {
            Ok(row) => row,
            Err(diesel::result::Error::NotFound) => {
                debug!(%meeting_id, "webhook for unknown meeting");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        }
    };

    // The agent's own join also fires this event; do not hand off again.
    if payload.user_id.as_deref() == Some(agent.id.to_string().as_str()) {
        return Ok(());
    }

    let room = match state.video.get_room(&meeting_id.to_string()).await? {
        Some(room) => room,
        None => {
            debug!(%meeting_id, "webhook room no longer exists");
            return Ok(());
        }
    };

    let token = state
        .video
        .meeting_token(TokenRequest {
            room_name: room.name.clone(),
            user_id: agent.id.to_string(),
            user_name: agent.name.clone(),
            is_owner: false,
        })
        .await?;

    state
        .join_requests
        .insert(
            meeting.id,
            AgentJoinRequest {
                token,
                room_url: room.url,
                agent_id: agent.id,
                agent_name: agent.name,
            },
        )
        .await;

    Ok(())
}
