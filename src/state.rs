use std::sync::Arc;

use diesel::{
    pg::PgConnection,
    r2d2::{ConnectionManager, PooledConnection},
};

use crate::{
    ai::CompletionProvider,
    auth::jwt::JwtService,
    config::AppConfig,
    db::PgPool,
    error::{AppError, AppResult},
    join_requests::JoinRequestStore,
    mailer::Mailer,
    video::VideoProvider,
};

type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    pub jwt: JwtService,
    pub video: Arc<dyn VideoProvider>,
    pub ai: Arc<dyn CompletionProvider>,
    pub mailer: Arc<dyn Mailer>,
    pub join_requests: Arc<JoinRequestStore>,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        config: AppConfig,
        jwt: JwtService,
        video: Arc<dyn VideoProvider>,
        ai: Arc<dyn CompletionProvider>,
        mailer: Arc<dyn Mailer>,
        join_requests: Arc<JoinRequestStore>,
    ) -> Self {
        Self {
            pool,
            config: Arc::new(config),
            jwt,
            video,
            ai,
            mailer,
            join_requests,
        }
    }

    pub fn db(&self) -> AppResult<PgPooledConnection> {
        self.pool
            .get()
            .map_err(|err| AppError::internal(format!("database pool error: {err}")))
    }
}
