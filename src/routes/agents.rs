use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    ai::{self, ChatRole, ChatTurn, CompletionError},
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::{Agent, NewAgent},
    routes::{to_iso, Paginated, Pagination},
    schema::agents,
    state::AppState,
};

#[derive(Serialize)]
pub struct AgentView {
    pub id: Uuid,
    pub name: String,
    pub instructions: String,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Agent> for AgentView {
    fn from(agent: Agent) -> Self {
        Self {
            id: agent.id,
            name: agent.name,
            instructions: agent.instructions,
            created_at: to_iso(agent.created_at),
            updated_at: to_iso(agent.updated_at),
        }
    }
}

#[derive(Deserialize)]
pub struct CreateAgentRequest {
    pub name: String,
    pub instructions: String,
}

pub async fn create(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateAgentRequest>,
) -> AppResult<(StatusCode, Json<AgentView>)> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("agent name must not be empty"));
    }
    if payload.instructions.trim().is_empty() {
        return Err(AppError::bad_request("agent instructions must not be empty"));
    }

    let mut conn = state.db()?;
    let new_agent = NewAgent {
        id: Uuid::new_v4(),
        name: name.to_string(),
        instructions: payload.instructions,
        user_id: user.user_id,
    };

    diesel::insert_into(agents::table)
        .values(&new_agent)
        .execute(&mut conn)?;

    let agent: Agent = agents::table.find(new_agent.id).first(&mut conn)?;
    Ok((StatusCode::CREATED, Json(agent.into())))
}

pub async fn get_many(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(pagination): Query<Pagination>,
) -> AppResult<Json<Paginated<AgentView>>> {
    let mut conn = state.db()?;

    let mut query = agents::table
        .filter(agents::user_id.eq(user.user_id))
        .into_boxed();
    let mut count_query = agents::table
        .filter(agents::user_id.eq(user.user_id))
        .into_boxed();

    if let Some(term) = pagination.search_term() {
        let pattern = format!("%{term}%");
        query = query.filter(agents::name.ilike(pattern.clone()));
        count_query = count_query.filter(agents::name.ilike(pattern));
    }

    let total: i64 = count_query.count().get_result(&mut conn)?;
    let items: Vec<Agent> = query
        .order(agents::created_at.desc())
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
    Path(agent_id): Path<Uuid>,
) -> AppResult<Json<AgentView>> {
    let mut conn = state.db()?;
    let agent = find_owned(&mut conn, agent_id, user.user_id)?;
    Ok(Json(agent.into()))
}

#[derive(Deserialize)]
pub struct UpdateAgentRequest {
    pub name: Option<String>,
    pub instructions: Option<String>,
}

#[derive(AsChangeset)]
#[diesel(table_name = agents)]
struct AgentChanges {
    name: Option<String>,
    instructions: Option<String>,
    updated_at: NaiveDateTime,
}

pub async fn update(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(agent_id): Path<Uuid>,
    Json(payload): Json<UpdateAgentRequest>,
) -> AppResult<Json<AgentView>> {
    let name = match payload.name {
        Some(name) => {
            let trimmed = name.trim();
            if trimmed.is_empty() {
                return Err(AppError::bad_request("agent name must not be empty"));
            }
            Some(trimmed.to_string())
        }
        None => None,
    };
    if let Some(instructions) = &payload.instructions {
        if instructions.trim().is_empty() {
            return Err(AppError::bad_request("agent instructions must not be empty"));
        }
    }

    let mut conn = state.db()?;
    let changes = AgentChanges {
        name,
        instructions: payload.instructions,
        updated_at: Utc::now().naive_utc(),
    };

    let updated = diesel::update(
        agents::table
            .filter(agents::id.eq(agent_id))
            .filter(agents::user_id.eq(user.user_id)),
    )
    .set(&changes)
    .get_result::<Agent>(&mut conn);

    match updated {
        Ok(agent) => Ok(Json(agent.into())),
        Err(diesel::result::Error::NotFound) => Err(AppError::not_found()),
        Err(err) => Err(AppError::from(err)),
    }
}

pub async fn remove(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(agent_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let deleted = diesel::delete(
        agents::table
            .filter(agents::id.eq(agent_id))
            .filter(agents::user_id.eq(user.user_id)),
    )
    .execute(&mut conn)?;

    if deleted == 0 {
        return Err(AppError::not_found());
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct RespondRequest {
    pub messages: Vec<ChatTurn>,
}

#[derive(Serialize)]
pub struct RespondResponse {
    pub reply: String,
}

/// Runs the agent's instructions over a chat transcript. The transcript must
/// end with a user turn; the reply is not persisted.
pub async fn respond(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(agent_id): Path<Uuid>,
    Json(payload): Json<RespondRequest>,
) -> AppResult<Json<RespondResponse>> {
    match payload.messages.last() {
        Some(turn) if turn.role == ChatRole::User => {}
        Some(_) => {
            return Err(AppError::bad_request("last message must be from the user"));
        }
        None => return Err(AppError::bad_request("messages must not be empty")),
    }

    let agent = {
        let mut conn = state.db()?;
        find_owned(&mut conn, agent_id, user.user_id)?
    };

    let reply = ai::generate_reply(state.ai.as_ref(), &agent.instructions, &payload.messages)
        .await
        .map_err(completion_error)?;

    Ok(Json(RespondResponse { reply }))
}

fn completion_error(err: CompletionError) -> AppError {
    match err {
        CompletionError::RateLimited { .. } => AppError::new(
            axum::http::StatusCode::TOO_MANY_REQUESTS,
            "the assistant is rate limited, try again shortly",
        ),
        other => AppError::internal(other),
    }
}

fn find_owned(conn: &mut PgConnection, agent_id: Uuid, user_id: Uuid) -> AppResult<Agent> {
    agents::table
        .filter(agents::id.eq(agent_id))
        .filter(agents::user_id.eq(user_id))
        .first(conn)
        .map_err(AppError::from)
}
