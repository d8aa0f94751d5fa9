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
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::{NewNote, Note},
    routes::{to_iso, Paginated, Pagination},
    schema::notes,
    state::AppState,
};

#[derive(Serialize)]
pub struct NoteView {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub pinned: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Note> for NoteView {
    fn from(note: Note) -> Self {
        Self {
            id: note.id,
            title: note.title,
            content: note.content,
            tags: note.tags,
            pinned: note.pinned,
            created_at: to_iso(note.created_at),
            updated_at: to_iso(note.updated_at),
        }
    }
}

#[derive(Deserialize)]
pub struct CreateNoteRequest {
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

pub async fn create(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateNoteRequest>,
) -> AppResult<(StatusCode, Json<NoteView>)> {
    let title = payload.title.trim();
    if title.is_empty() {
        return Err(AppError::bad_request("note title must not be empty"));
    }

    let mut conn = state.db()?;
    let new_note = NewNote {
        id: Uuid::new_v4(),
        title: title.to_string(),
        content: payload.content,
        tags: payload.tags,
        user_id: user.user_id,
    };

    diesel::insert_into(notes::table)
        .values(&new_note)
        .execute(&mut conn)?;

    let note: Note = notes::table.find(new_note.id).first(&mut conn)?;
    Ok((StatusCode::CREATED, Json(note.into())))
}

// Query-string deserialization cannot see through serde(flatten), so the
// pagination fields are repeated here.
#[derive(Debug, Default, Deserialize)]
pub struct NoteFilter {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    pub search: Option<String>,
    pub pinned: Option<bool>,
}

impl NoteFilter {
    fn pagination(&self) -> Pagination {
        Pagination {
            page: self.page,
            page_size: self.page_size,
            search: self.search.clone(),
        }
    }
}

pub async fn list(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(filter): Query<NoteFilter>,
) -> AppResult<Json<Paginated<NoteView>>> {
    let pagination = filter.pagination();
    let mut conn = state.db()?;

    let mut query = notes::table
        .filter(notes::user_id.eq(user.user_id))
        .into_boxed();
    let mut count_query = notes::table
        .filter(notes::user_id.eq(user.user_id))
        .into_boxed();

    if let Some(term) = pagination.search_term() {
        let pattern = format!("%{term}%");
        query = query.filter(
            notes::title
                .ilike(pattern.clone())
                .or(notes::content.ilike(pattern.clone())),
        );
        count_query = count_query.filter(
            notes::title
                .ilike(pattern.clone())
                .or(notes::content.ilike(pattern)),
        );
    }
    if let Some(pinned) = filter.pinned {
        query = query.filter(notes::pinned.eq(pinned));
        count_query = count_query.filter(notes::pinned.eq(pinned));
    }

    let total: i64 = count_query.count().get_result(&mut conn)?;
    let items: Vec<Note> = query
        .order(notes::updated_at.desc())
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
    Path(note_id): Path<Uuid>,
) -> AppResult<Json<NoteView>> {
    let mut conn = state.db()?;
    let note = find_owned(&mut conn, note_id, user.user_id)?;
    Ok(Json(note.into()))
}

#[derive(Deserialize)]
pub struct UpdateNoteRequest {
    pub title: Option<String>,
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
    pub pinned: Option<bool>,
}

#[derive(AsChangeset)]
#[diesel(table_name = notes)]
struct NoteChanges {
    title: Option<String>,
    content: Option<String>,
    tags: Option<Vec<String>>,
    pinned: Option<bool>,
    updated_at: NaiveDateTime,
}

pub async fn update(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(note_id): Path<Uuid>,
    Json(payload): Json<UpdateNoteRequest>,
) -> AppResult<Json<NoteView>> {
    let title = match payload.title {
        Some(title) => {
            let trimmed = title.trim();
            if trimmed.is_empty() {
                return Err(AppError::bad_request("note title must not be empty"));
            }
            Some(trimmed.to_string())
        }
        None => None,
    };

    let mut conn = state.db()?;
    let changes = NoteChanges {
        title,
        content: payload.content,
        tags: payload.tags,
        pinned: payload.pinned,
        updated_at: Utc::now().naive_utc(),
    };

    let updated = diesel::update(
        notes::table
            .filter(notes::id.eq(note_id))
            .filter(notes::user_id.eq(user.user_id)),
    )
    .set(&changes)
    .get_result::<Note>(&mut conn);

    match updated {
        Ok(note) => Ok(Json(note.into())),
        Err(diesel::result::Error::NotFound) => Err(AppError::not_found()),
        Err(err) => Err(AppError::from(err)),
    }
}

pub async fn remove(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(note_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let deleted = diesel::delete(
        notes::table
            .filter(notes::id.eq(note_id))
            .filter(notes::user_id.eq(user.user_id)),
    )
    .execute(&mut conn)?;

    if deleted == 0 {
        return Err(AppError::not_found());
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn toggle_pin(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(note_id): Path<Uuid>,
) -> AppResult<Json<NoteView>> {
    let mut conn = state.db()?;
    let updated = diesel::update(
        notes::table
            .filter(notes::id.eq(note_id))
            .filter(notes::user_id.eq(user.user_id)),
    )
    .set((
        notes::pinned.eq(diesel::dsl::not(notes::pinned)),
        notes::updated_at.eq(Utc::now().naive_utc()),
    ))
    .get_result::<Note>(&mut conn);

    match updated {
        Ok(note) => Ok(Json(note.into())),
        Err(diesel::result::Error::NotFound) => Err(AppError::not_found()),
        Err(err) => Err(AppError::from(err)),
    }
}

/// Owner scoping: a note id the caller does not own is indistinguishable
/// from a missing one.
fn find_owned(conn: &mut PgConnection, note_id: Uuid, user_id: Uuid) -> AppResult<Note> {
    notes::table
        .filter(notes::id.eq(note_id))
        .filter(notes::user_id.eq(user_id))
        .first(conn)
        .map_err(AppError::from)
}
