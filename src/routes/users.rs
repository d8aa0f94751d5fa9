use axum::{extract::State, http::StatusCode, Json};
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::User,
    routes::to_iso,
    schema::users,
    state::AppState,
};

#[derive(Serialize)]
pub struct UserView {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub image: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<User> for UserView {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
            image: user.image,
            created_at: to_iso(user.created_at),
            updated_at: to_iso(user.updated_at),
        }
    }
}

pub async fn get_one(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<UserView>> {
    let mut conn = state.db()?;
    let row: User = users::table
        .find(user.user_id)
        .first(&mut conn)
        .map_err(AppError::from)?;
    Ok(Json(row.into()))
}

#[derive(Deserialize)]
pub struct UpdateUserRequest {
    pub name: Option<String>,
    pub image: Option<String>,
}

#[derive(AsChangeset)]
#[diesel(table_name = users)]
struct UserChanges {
    name: Option<String>,
    #[diesel(treat_none_as_null = true)]
    image: Option<String>,
    updated_at: NaiveDateTime,
}

// Variant without the image column: a `None` name is simply skipped, so a
// payload that omits both fields only bumps `updated_at`.
#[derive(AsChangeset)]
#[diesel(table_name = users)]
struct ProfileChanges {
    name: Option<String>,
    updated_at: NaiveDateTime,
}

pub async fn update(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<UpdateUserRequest>,
) -> AppResult<Json<UserView>> {
    let name = match payload.name {
        Some(name) => {
            let trimmed = name.trim();
            if trimmed.is_empty() {
                return Err(AppError::bad_request("name must not be empty"));
            }
            Some(trimmed.to_string())
        }
        None => None,
    };

    let mut conn = state.db()?;

    // An empty image string clears the avatar; absence leaves it untouched.
    let row = match payload.image {
        Some(image) => {
            let changes = UserChanges {
                name,
                image: if image.trim().is_empty() {
                    None
                } else {
                    Some(image)
                },
                updated_at: Utc::now().naive_utc(),
            };
            diesel::update(users::table.find(user.user_id))
                .set(&changes)
                .get_result::<User>(&mut conn)
        }
        None => diesel::update(users::table.find(user.user_id))
            .set(&ProfileChanges {
                name,
                updated_at: Utc::now().naive_utc(),
            })
            .get_result::<User>(&mut conn),
    };

    match row {
        Ok(row) => Ok(Json(row.into())),
        Err(diesel::result::Error::NotFound) => Err(AppError::not_found()),
        Err(err) => Err(AppError::from(err)),
    }
}

pub async fn remove(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    // Refresh tokens, memberships, messages, notes, agents and meetings all
    // go via FK cascade.
    let deleted = diesel::delete(users::table.find(user.user_id)).execute(&mut conn)?;
    if deleted == 0 {
        return Err(AppError::not_found());
    }
    Ok(StatusCode::NO_CONTENT)
}
