use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use diesel::dsl::exists;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    attachments::{self, Attachment},
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::{Channel, Message, NewChannel, NewChannelMember, NewMessage},
    routes::{to_iso, Paginated, Pagination},
    schema::{channel_members, channels, messages, users},
    state::AppState,
    utils::grouping,
};

pub const GENERAL_CHANNEL: &str = "General";

#[derive(Serialize)]
pub struct ChannelView {
    pub id: Uuid,
    pub name: String,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Channel> for ChannelView {
    fn from(channel: Channel) -> Self {
        Self {
            id: channel.id,
            name: channel.name,
            created_at: to_iso(channel.created_at),
            updated_at: to_iso(channel.updated_at),
        }
    }
}

#[derive(Debug, Clone, Queryable, Serialize)]
pub struct AuthorView {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub image: Option<String>,
}

#[derive(Serialize)]
pub struct MessageView {
    pub id: Uuid,
    pub channel_id: Option<Uuid>,
    pub content: String,
    pub attachments: Vec<Attachment>,
    pub pinned: bool,
    pub grouped: bool,
    pub created_at: String,
    pub author: AuthorView,
}

impl MessageView {
    fn assemble(message: Message, author: AuthorView, grouped: bool) -> Self {
        let attachments = attachments::from_columns(
            message.attachments.as_ref(),
            message.attachment_types.as_ref(),
        );
        Self {
            id: message.id,
            channel_id: message.channel_id,
            content: message.content,
            attachments,
            pinned: message.pinned,
            grouped,
            created_at: to_iso(message.created_at),
            author,
        }
    }
}

/// Membership gate for every channel-scoped operation. Always a fresh
/// existence query; non-members get FORBIDDEN regardless of whether the
/// channel exists.
pub fn require_membership(
    conn: &mut PgConnection,
    channel_id: Uuid,
    user_id: Uuid,
) -> AppResult<()> {
    let is_member: bool = diesel::select(exists(
        channel_members::table
            .filter(channel_members::channel_id.eq(channel_id))
            .filter(channel_members::user_id.eq(user_id)),
    ))
    .get_result(conn)?;

    if is_member {
        Ok(())
    } else {
        Err(AppError::forbidden("you are not a member of this channel"))
    }
}

#[derive(Deserialize)]
pub struct CreateChannelRequest {
    pub name: String,
}

pub async fn create(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateChannelRequest>,
) -> AppResult<(StatusCode, Json<ChannelView>)> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("channel name must not be empty"));
    }

    let mut conn = state.db()?;
    let new_channel = NewChannel {
        id: Uuid::new_v4(),
        name: name.to_string(),
    };

    let channel = conn.transaction::<Channel, AppError, _>(|conn| {
        match diesel::insert_into(channels::table)
            .values(&new_channel)
            .execute(conn)
        {
            Ok(_) => {}
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                return Err(AppError::bad_request("channel name is already taken"));
            }
            Err(err) => return Err(AppError::from(err)),
        }

        diesel::insert_into(channel_members::table)
            .values(&NewChannelMember {
                channel_id: new_channel.id,
                user_id: user.user_id,
            })
            .execute(conn)?;

        let channel = channels::table.find(new_channel.id).first(conn)?;
        Ok(channel)
    })?;

    Ok((StatusCode::CREATED, Json(channel.into())))
}

/// Channels the caller belongs to, newest first. A caller with no
/// memberships is placed into the shared "General" channel, which is created
/// on first demand; the conditional insert under the unique name constraint
/// makes the ensure step race-free across concurrent first requests.
pub async fn list(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<ChannelView>>> {
    let mut conn = state.db()?;

    let mut memberships: Vec<Channel> = channels::table
        .inner_join(channel_members::table)
        .filter(channel_members::user_id.eq(user.user_id))
        .select(channels::all_columns)
        .order(channels::created_at.desc())
        .load(&mut conn)?;

    if memberships.is_empty() {
        let general = ensure_general_membership(&mut conn, user.user_id)?;
        memberships = vec![general];
    }

    Ok(Json(memberships.into_iter().map(Into::into).collect()))
}

fn ensure_general_membership(conn: &mut PgConnection, user_id: Uuid) -> AppResult<Channel> {
    conn.transaction::<Channel, AppError, _>(|conn| {
        diesel::insert_into(channels::table)
            .values(&NewChannel {
                id: Uuid::new_v4(),
                name: GENERAL_CHANNEL.to_string(),
            })
            .on_conflict(channels::name)
            .do_nothing()
            .execute(conn)?;

        let general: Channel = channels::table
            .filter(channels::name.eq(GENERAL_CHANNEL))
            .first(conn)?;

        diesel::insert_into(channel_members::table)
            .values(&NewChannelMember {
                channel_id: general.id,
                user_id,
            })
            .on_conflict((channel_members::channel_id, channel_members::user_id))
            .do_nothing()
            .execute(conn)?;

        Ok(general)
    })
}

pub async fn get_many(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(pagination): Query<Pagination>,
) -> AppResult<Json<Paginated<ChannelView>>> {
    let mut conn = state.db()?;

    let mut query = channels::table
        .inner_join(channel_members::table)
        .filter(channel_members::user_id.eq(user.user_id))
        .into_boxed();
    let mut count_query = channels::table
        .inner_join(channel_members::table)
        .filter(channel_members::user_id.eq(user.user_id))
        .into_boxed();

    if let Some(term) = pagination.search_term() {
        let pattern = format!("%{term}%");
        query = query.filter(channels::name.ilike(pattern.clone()));
        count_query = count_query.filter(channels::name.ilike(pattern));
    }

    let total: i64 = count_query.count().get_result(&mut conn)?;
    let items: Vec<Channel> = query
        .select(channels::all_columns)
        .order(channels::created_at.desc())
        .offset(pagination.offset())
        .limit(pagination.page_size())
        .load(&mut conn)?;

    Ok(Json(Paginated::new(
        items.into_iter().map(Into::into).collect(),
        total,
        &pagination,
    )))
}

#[derive(Deserialize)]
pub struct UpdateChannelRequest {
    pub name: String,
}

pub async fn update(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(channel_id): Path<Uuid>,
    Json(payload): Json<UpdateChannelRequest>,
) -> AppResult<Json<ChannelView>> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("channel name must not be empty"));
    }

    let mut conn = state.db()?;
    require_membership(&mut conn, channel_id, user.user_id)?;

    let updated = diesel::update(channels::table.find(channel_id))
        .set((
            channels::name.eq(name),
            channels::updated_at.eq(Utc::now().naive_utc()),
        ))
        .get_result::<Channel>(&mut conn);

    match updated {
        Ok(channel) => Ok(Json(channel.into())),
        Err(DieselError::NotFound) => Err(AppError::not_found()),
        Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
            Err(AppError::bad_request("channel name is already taken"))
        }
        Err(err) => Err(AppError::from(err)),
    }
}

pub async fn remove(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(channel_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    require_membership(&mut conn, channel_id, user.user_id)?;

    // Members and messages go with the channel via FK cascade.
    let deleted = diesel::delete(channels::table.find(channel_id)).execute(&mut conn)?;
    if deleted == 0 {
        return Err(AppError::not_found());
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct AddMemberRequest {
    pub user_id: Uuid,
}

pub async fn add_member(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(channel_id): Path<Uuid>,
    Json(payload): Json<AddMemberRequest>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    require_membership(&mut conn, channel_id, user.user_id)?;

    let target_exists: bool = diesel::select(exists(
        users::table.filter(users::id.eq(payload.user_id)),
    ))
    .get_result(&mut conn)?;
    if !target_exists {
        return Err(AppError::not_found());
    }

    match diesel::insert_into(channel_members::table)
        .values(&NewChannelMember {
            channel_id,
            user_id: payload.user_id,
        })
        .execute(&mut conn)
    {
        Ok(_) => Ok(StatusCode::CREATED),
        Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
            Err(AppError::bad_request("user is already a member"))
        }
        Err(err) => Err(AppError::from(err)),
    }
}

#[derive(Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

pub async fn send_message(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(channel_id): Path<Uuid>,
    Json(payload): Json<SendMessageRequest>,
) -> AppResult<(StatusCode, Json<MessageView>)> {
    if payload.content.trim().is_empty() && payload.attachments.is_empty() {
        return Err(AppError::bad_request(
            "message needs content or at least one attachment",
        ));
    }

    let mut conn = state.db()?;
    require_membership(&mut conn, channel_id, user.user_id)?;

    let (payloads, kinds) = attachments::to_columns(&payload.attachments);
    let new_message = NewMessage {
        id: Uuid::new_v4(),
        content: payload.content,
        channel_id: Some(channel_id),
        user_id: user.user_id,
        attachments: if payloads.is_empty() {
            None
        } else {
            Some(payloads)
        },
        attachment_types: if kinds.is_empty() { None } else { Some(kinds) },
    };

    diesel::insert_into(messages::table)
        .values(&new_message)
        .execute(&mut conn)?;

    let (message, author): (Message, AuthorView) = messages::table
        .inner_join(users::table)
        .filter(messages::id.eq(new_message.id))
        .select((
            messages::all_columns,
            (users::id, users::name, users::email, users::image),
        ))
        .first(&mut conn)?;

    Ok((
        StatusCode::CREATED,
        Json(MessageView::assemble(message, author, false)),
    ))
}

/// Full channel history, oldest first, each row denormalized with its author
/// and flagged when it visually continues the previous author's run.
pub async fn list_messages(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(channel_id): Path<Uuid>,
) -> AppResult<Json<Vec<MessageView>>> {
    let mut conn = state.db()?;
    require_membership(&mut conn, channel_id, user.user_id)?;

    let rows: Vec<(Message, AuthorView)> = messages::table
        .inner_join(users::table)
        .filter(messages::channel_id.eq(channel_id))
        .select((
            messages::all_columns,
            (users::id, users::name, users::email, users::image),
        ))
        .order(messages::created_at.asc())
        .load(&mut conn)?;

    let flags = grouping::grouped_flags(
        &rows
            .iter()
            .map(|(message, _)| (message.user_id, message.created_at))
            .collect::<Vec<_>>(),
    );

    let views = rows
        .into_iter()
        .zip(flags)
        .map(|((message, author), grouped)| MessageView::assemble(message, author, grouped))
        .collect();

    Ok(Json(views))
}
