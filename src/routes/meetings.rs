use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::{Agent, Meeting, NewMeeting},
    routes::{to_iso, Paginated, Pagination},
    schema::{agents, meetings},
    state::AppState,
    video::{Room, TokenRequest},
};

pub const MEETING_STATUSES: &[&str] = &["upcoming", "active", "completed", "cancelled"];

#[derive(Serialize)]
pub struct MeetingView {
    pub id: Uuid,
    pub name: String,
    pub agent_id: Uuid,
    pub status: String,
    pub started_at: Option<String>,
    pub ended_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Meeting> for MeetingView {
    fn from(meeting: Meeting) -> Self {
        Self {
            id: meeting.id,
            name: meeting.name,
            agent_id: meeting.agent_id,
            status: meeting.status,
            started_at: meeting.started_at.map(to_iso),
            ended_at: meeting.ended_at.map(to_iso),
            created_at: to_iso(meeting.created_at),
            updated_at: to_iso(meeting.updated_at),
        }
    }
}

#[derive(Deserialize)]
pub struct CreateMeetingRequest {
    pub name: String,
    pub agent_id: Uuid,
}

/// Creates the meeting and provisions its provider room in one go. The room
/// is named by the meeting id so the webhook can map room events back to a
/// meeting without extra bookkeeping.
pub async fn create(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateMeetingRequest>,
) -> AppResult<(StatusCode, Json<MeetingView>)> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("meeting name must not be empty"));
    }

    let meeting_id = Uuid::new_v4();
    {
        let mut conn = state.db()?;
        find_owned_agent(&mut conn, payload.agent_id, user.user_id)?;

        diesel::insert_into(meetings::table)
            .values(&NewMeeting {
                id: meeting_id,
                name: name.to_string(),
                user_id: user.user_id,
                agent_id: payload.agent_id,
                status: "upcoming".to_string(),
            })
            .execute(&mut conn)?;
    }

    if let Err(err) = state.video.create_room(&meeting_id.to_string()).await {
        // Roll the row back so a retry starts clean.
        let mut conn = state.db()?;
        if let Err(err) = diesel::delete(meetings::table.find(meeting_id)).execute(&mut conn) {
            warn!(%meeting_id, error = %err, "failed to remove meeting after room provisioning error");
        }
        return Err(AppError::internal(format!(
            "failed to provision meeting room: {err}"
        )));
    }

    let mut conn = state.db()?;
    let meeting: Meeting = meetings::table.find(meeting_id).first(&mut conn)?;
    Ok((StatusCode::CREATED, Json(meeting.into())))
}

#[derive(Debug, Default, Deserialize)]
pub struct MeetingFilter {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    pub search: Option<String>,
    pub status: Option<String>,
    pub agent_id: Option<Uuid>,
}

pub async fn get_many(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(filter): Query<MeetingFilter>,
) -> AppResult<Json<Paginated<MeetingView>>> {
    if let Some(status) = &filter.status {
        if !MEETING_STATUSES.contains(&status.as_str()) {
            return Err(AppError::bad_request("unknown meeting status"));
        }
    }

    let pagination = Pagination {
        page: filter.page,
        page_size: filter.page_size,
        search: filter.search.clone(),
    };
    let mut conn = state.db()?;

    let mut query = meetings::table
        .filter(meetings::user_id.eq(user.user_id))
        .into_boxed();
    let mut count_query = meetings::table
        .filter(meetings::user_id.eq(user.user_id))
        .into_boxed();

    if let Some(term) = pagination.search_term() {
        let pattern = format!("%{term}%");
        query = query.filter(meetings::name.ilike(pattern.clone()));
        count_query = count_query.filter(meetings::name.ilike(pattern));
    }
    if let Some(status) = &filter.status {
        query = query.filter(meetings::status.eq(status.clone()));
        count_query = count_query.filter(meetings::status.eq(status.clone()));
    }
    if let Some(agent_id) = filter.agent_id {
        query = query.filter(meetings::agent_id.eq(agent_id));
        count_query = count_query.filter(meetings::agent_id.eq(agent_id));
    }

    let total: i64 = count_query.count().get_result(&mut conn)?;
    let items: Vec<Meeting> = query
        .order(meetings::created_at.desc())
        .offset(pagination.offset())
        .limit(pagination.page_size())
        .load(&mut conn)?;

    Ok(Json(Paginated::new(
        items.into_iter().map(Into::into).collect(),
        total,
        &pagination,
    )))
}

pub async fn get_one(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(meeting_id): Path<Uuid>,
) -> AppResult<Json<MeetingView>> {
    let mut conn = state.db()?;
    let meeting = find_owned(&mut conn, meeting_id, user.user_id)?;
    Ok(Json(meeting.into()))
}

#[derive(Deserialize)]
pub struct UpdateMeetingRequest {
    pub name: Option<String>,
    pub agent_id: Option<Uuid>,
}

#[derive(AsChangeset)]
#[diesel(table_name = meetings)]
struct MeetingChanges {
    name: Option<String>,
    agent_id: Option<Uuid>,
    updated_at: NaiveDateTime,
}

pub async fn update(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(meeting_id): Path<Uuid>,
    Json(payload): Json<UpdateMeetingRequest>,
) -> AppResult<Json<MeetingView>> {
    let name = match payload.name {
        Some(name) => {
            let trimmed = name.trim();
            if trimmed.is_empty() {
                return Err(AppError::bad_request("meeting name must not be empty"));
            }
            Some(trimmed.to_string())
        }
        None => None,
    };

    let mut conn = state.db()?;
    if let Some(agent_id) = payload.agent_id {
        find_owned_agent(&mut conn, agent_id, user.user_id)?;
    }

    let changes = MeetingChanges {
        name,
        agent_id: payload.agent_id,
        updated_at: Utc::now().naive_utc(),
    };

    let updated = diesel::update(
        meetings::table
            .filter(meetings::id.eq(meeting_id))
            .filter(meetings::user_id.eq(user.user_id)),
    )
    .set(&changes)
    .get_result::<Meeting>(&mut conn);

    match updated {
        Ok(meeting) => Ok(Json(meeting.into())),
        Err(diesel::result::Error::NotFound) => Err(AppError::not_found()),
        Err(err) => Err(AppError::from(err)),
    }
}

pub async fn start(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(meeting_id): Path<Uuid>,
) -> AppResult<Json<MeetingView>> {
    let mut conn = state.db()?;
    let meeting = find_owned(&mut conn, meeting_id, user.user_id)?;
    if meeting.status != "upcoming" {
        return Err(AppError::bad_request("only upcoming meetings can start"));
    }

    let now = Utc::now().naive_utc();
    let updated = diesel::update(
        meetings::table
            .filter(meetings::id.eq(meeting_id))
            .filter(meetings::status.eq("upcoming")),
    )
    .set((
        meetings::status.eq("active"),
        meetings::started_at.eq(now),
        meetings::updated_at.eq(now),
    ))
    .get_result::<Meeting>(&mut conn);

    match updated {
        Ok(meeting) => Ok(Json(meeting.into())),
        // Lost the race with a concurrent start.
        Err(diesel::result::Error::NotFound) => {
            Err(AppError::bad_request("only upcoming meetings can start"))
        }
        Err(err) => Err(AppError::from(err)),
    }
}

pub async fn remove(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(meeting_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    {
        let mut conn = state.db()?;
        let deleted = diesel::delete(
            meetings::table
                .filter(meetings::id.eq(meeting_id))
                .filter(meetings::user_id.eq(user.user_id)),
        )
        .execute(&mut conn)?;
        if deleted == 0 {
            return Err(AppError::not_found());
        }
    }

    // Best effort; an orphaned provider room is harmless.
    if let Err(err) = state.video.delete_room(&meeting_id.to_string()).await {
        warn!(%meeting_id, error = %err, "failed to delete meeting room");
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
pub struct JoinTokenResponse {
    pub token: String,
    pub room_url: String,
}

pub async fn generate_token(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(meeting_id): Path<Uuid>,
) -> AppResult<Json<JoinTokenResponse>> {
    {
        let mut conn = state.db()?;
        find_owned(&mut conn, meeting_id, user.user_id)?;
    }

    let room = ensure_room(&state, meeting_id).await?;
    let token = state
        .video
        .meeting_token(TokenRequest {
            room_name: room.name.clone(),
            user_id: user.user_id.to_string(),
            user_name: user.name.clone(),
            is_owner: true,
        })
        .await
        .map_err(AppError::from)?;

    Ok(Json(JoinTokenResponse {
        token,
        room_url: room.url,
    }))
}

pub async fn generate_agent_token(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(meeting_id): Path<Uuid>,
) -> AppResult<Json<JoinTokenResponse>> {
    let agent = {
        let mut conn = state.db()?;
        let meeting = find_owned(&mut conn, meeting_id, user.user_id)?;
        agents::table
            .find(meeting.agent_id)
            .first::<Agent>(&mut conn)
            .map_err(AppError::from)?
    };

    let room = ensure_room(&state, meeting_id).await?;
    let token = state
        .video
        .meeting_token(TokenRequest {
            room_name: room.name.clone(),
            user_id: agent.id.to_string(),
            user_name: agent.name,
            is_owner: false,
        })
        .await
        .map_err(AppError::from)?;

    Ok(Json(JoinTokenResponse {
        token,
        room_url: room.url,
    }))
}

#[derive(Serialize)]
pub struct AgentJoinResponse {
    pub token: Option<String>,
    pub room_url: Option<String>,
    pub agent_id: Option<Uuid>,
    pub agent_name: Option<String>,
}

/// Poll endpoint for the webhook hand-off. The pending entry is consumed on
/// first read; further polls see null until the webhook fires again.
pub async fn agent_join(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(meeting_id): Path<Uuid>,
) -> AppResult<Json<AgentJoinResponse>> {
    {
        let mut conn = state.db()?;
        find_owned(&mut conn, meeting_id, user.user_id)?;
    }

    let response = match state.join_requests.take(&meeting_id).await {
        Some(request) => AgentJoinResponse {
            token: Some(request.token),
            room_url: Some(request.room_url),
            agent_id: Some(request.agent_id),
            agent_name: Some(request.agent_name),
        },
        None => AgentJoinResponse {
            token: None,
            room_url: None,
            agent_id: None,
            agent_name: None,
        },
    };
    Ok(Json(response))
}

/// Meeting chat history was retired; channel messages replaced it.
pub async fn send_message(
    _user: AuthenticatedUser,
    Path(_meeting_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    Err(AppError::not_implemented(
        "meeting chat has been retired, use channel messages",
    ))
}

/// Find-or-create so tokens still work when the provider expired the room.
async fn ensure_room(state: &AppState, meeting_id: Uuid) -> AppResult<Room> {
    let room_name = meeting_id.to_string();
    match state.video.get_room(&room_name).await.map_err(AppError::from)? {
        Some(room) => Ok(room),
        None => state
            .video
            .create_room(&room_name)
            .await
            .map_err(AppError::from),
    }
}

fn find_owned(conn: &mut PgConnection, meeting_id: Uuid, user_id: Uuid) -> AppResult<Meeting> {
    meetings::table
        .filter(meetings::id.eq(meeting_id))
        .filter(meetings::user_id.eq(user_id))
        .first(conn)
        .map_err(AppError::from)
}

fn find_owned_agent(conn: &mut PgConnection, agent_id: Uuid, user_id: Uuid) -> AppResult<Agent> {
    agents::table
        .filter(agents::id.eq(agent_id))
        .filter(agents::user_id.eq(user_id))
        .first(conn)
        .map_err(AppError::from)
}
