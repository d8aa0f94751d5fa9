pub mod agents;
pub mod auth;
pub mod channels;
pub mod contact;
pub mod health;
pub mod meetings;
pub mod notes;
pub mod users;
pub mod webhooks;

use axum::{
    http::HeaderValue,
    routing::{get, patch, post},
    Router,
};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

use crate::state::AppState;

pub const DEFAULT_PAGE_SIZE: i64 = 10;
pub const MAX_PAGE_SIZE: i64 = 100;

pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(state.config.cors_allowed_origin.as_deref());

    Router::new()
        .route("/api/health", get(health::health))
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/refresh", post(auth::refresh))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/me", get(auth::me))
        .route("/api/channels", get(channels::list).post(channels::create))
        .route("/api/channels/browse", get(channels::get_many))
        .route(
            "/api/channels/:id",
            patch(channels::update).delete(channels::remove),
        )
        .route("/api/channels/:id/members", post(channels::add_member))
        .route(
            "/api/channels/:id/messages",
            get(channels::list_messages).post(channels::send_message),
        )
        .route("/api/notes", get(notes::list).post(notes::create))
        .route(
            "/api/notes/:id",
            get(notes::get_one)
                .patch(notes::update)
                .delete(notes::remove),
        )
        .route("/api/notes/:id/pin", post(notes::toggle_pin))
        .route(
            "/api/users/me",
            get(users::get_one)
                .patch(users::update)
                .delete(users::remove),
        )
        .route("/api/agents", get(agents::get_many).post(agents::create))
        .route(
            "/api/agents/:id",
            get(agents::get_one)
                .patch(agents::update)
                .delete(agents::remove),
        )
        .route("/api/agents/:id/respond", post(agents::respond))
        .route(
            "/api/meetings",
            get(meetings::get_many).post(meetings::create),
        )
        .route(
            "/api/meetings/:id",
            get(meetings::get_one)
                .patch(meetings::update)
                .delete(meetings::remove),
        )
        .route("/api/meetings/:id/start", post(meetings::start))
        .route("/api/meetings/:id/token", post(meetings::generate_token))
        .route(
            "/api/meetings/:id/agent-token",
            post(meetings::generate_agent_token),
        )
        .route("/api/meetings/:id/agent-join", get(meetings::agent_join))
        .route(
            "/api/meetings/:id/messages",
            post(meetings::send_message),
        )
        .route("/api/contact", post(contact::send_message))
        .route("/api/webhooks/video", post(webhooks::video_event))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(allowed_origin: Option<&str>) -> CorsLayer {
    match allowed_origin {
        Some(origin) => match origin.parse::<HeaderValue>() {
            Ok(value) => CorsLayer::new()
                .allow_origin(value)
                .allow_methods(Any)
                .allow_headers(Any),
            Err(_) => {
                warn!(origin, "invalid CORS_ALLOWED_ORIGIN, allowing any origin");
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any)
            }
        },
        None => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct Pagination {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    pub search: Option<String>,
}

impl Pagination {
    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn page_size(&self) -> i64 {
        self.page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> i64 {
        // Caller-supplied page numbers can be arbitrarily large.
        (self.page() - 1).saturating_mul(self.page_size())
    }

    /// Non-empty trimmed search term, if one was supplied.
    pub fn search_term(&self) -> Option<&str> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|term| !term.is_empty())
    }
}

#[derive(Debug, Serialize)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub total_pages: i64,
    pub page: i64,
    pub page_size: i64,
}

impl<T> Paginated<T> {
    pub fn new(items: Vec<T>, total: i64, pagination: &Pagination) -> Self {
        let page_size = pagination.page_size();
        Self {
            items,
            total,
            total_pages: (total + page_size - 1) / page_size,
            page: pagination.page(),
            page_size,
        }
    }
}

/// Timestamps leave the API as RFC 3339 UTC with millisecond precision.
pub fn to_iso(timestamp: NaiveDateTime) -> String {
    DateTime::<Utc>::from_naive_utc_and_offset(timestamp, Utc)
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}
