use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use collabspace::ai::{ChatTurn, CompletionError, CompletionProvider};
use collabspace::auth::jwt::JwtService;
use collabspace::auth::password::hash_password;
use collabspace::config::AppConfig;
use collabspace::db::{self, PgPool};
use collabspace::join_requests::JoinRequestStore;
use collabspace::mailer::{Mailer, OutboundEmail};
use collabspace::models::NewUser;
use collabspace::routes;
use collabspace::state::AppState;
use collabspace::video::{Room, TokenRequest, VideoProvider};
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::PgConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use http_body_util::BodyExt;
use once_cell::sync::Lazy;
use serde::Serialize;
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

#[derive(Default)]
pub struct FakeVideo {
    rooms: Mutex<HashMap<String, Room>>,
    tokens: Mutex<Vec<TokenRequest>>,
}

impl FakeVideo {
    #[allow(dead_code)]
    pub async fn room_count(&self) -> usize {
        self.rooms.lock().await.len()
    }

    #[allow(dead_code)]
    pub async fn has_room(&self, name: &str) -> bool {
        self.rooms.lock().await.contains_key(name)
    }

    #[allow(dead_code)]
    pub async fn token_requests(&self) -> Vec<TokenRequest> {
        self.tokens.lock().await.clone()
    }
}

#[async_trait]
impl VideoProvider for FakeVideo {
    async fn create_room(&self, room_name: &str) -> Result<Room> {
        let room = Room {
            name: room_name.to_string(),
            url: format!("https://fake.daily.co/{room_name}"),
        };
        self.rooms
            .lock()
            .await
            .insert(room_name.to_string(), room.clone());
        Ok(room)
    }

    async fn get_room(&self, room_name: &str) -> Result<Option<Room>> {
        Ok(self.rooms.lock().await.get(room_name).cloned())
    }

    async fn delete_room(&self, room_name: &str) -> Result<()> {
        self.rooms.lock().await.remove(room_name);
        Ok(())
    }

    async fn meeting_token(&self, request: TokenRequest) -> Result<String> {
        let token = format!("tok-{}-{}", request.room_name, request.user_id);
        self.tokens.lock().await.push(request);
        Ok(token)
    }
}

pub struct FakeCompletion {
    pub reply: String,
    calls: Mutex<Vec<(String, String, Vec<ChatTurn>)>>,
}

impl Default for FakeCompletion {
    fn default() -> Self {
        Self {
            reply: "Certainly, here is a summary.".to_string(),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl FakeCompletion {
    #[allow(dead_code)]
    pub async fn calls(&self) -> Vec<(String, String, Vec<ChatTurn>)> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl CompletionProvider for FakeCompletion {
    async fn complete(
        &self,
        model: &str,
        instructions: &str,
        turns: &[ChatTurn],
    ) -> Result<String, CompletionError> {
        self.calls.lock().await.push((
            model.to_string(),
            instructions.to_string(),
            turns.to_vec(),
        ));
        Ok(self.reply.clone())
    }
}

#[derive(Default)]
pub struct FakeMailer {
    sent: Mutex<Vec<OutboundEmail>>,
}

impl FakeMailer {
    #[allow(dead_code)]
    pub async fn sent(&self) -> Vec<OutboundEmail> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Mailer for FakeMailer {
    async fn send(&self, email: OutboundEmail) -> Result<()> {
        self.sent.lock().await.push(email);
        Ok(())
    }
}

pub struct TestApp {
    pub state: AppState,
    router: Router,
    video: Arc<FakeVideo>,
    completion: Arc<FakeCompletion>,
    mailer: Arc<FakeMailer>,
}

impl TestApp {
    pub async fn new() -> Result<Self> {
        let database_url = env::var("TEST_DATABASE_URL")
            .context("TEST_DATABASE_URL must be set for integration tests")?;

        let config = AppConfig {
            database_url: database_url.clone(),
            database_max_pool_size: db::DEFAULT_MAX_POOL_SIZE,
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            jwt_secret: "test-secret".to_string(),
            jwt_issuer: "test-issuer".to_string(),
            jwt_audience: "test-audience".to_string(),
            jwt_expiry_minutes: 60,
            refresh_token_expiry_days: 30,
            refresh_cookie_secure: false,
            refresh_cookie_domain: None,
            cors_allowed_origin: None,
            daily_api_key: None,
            daily_api_url: "https://fake.daily.invalid".to_string(),
            daily_domain: None,
            gemini_api_key: None,
            gemini_api_url: "https://fake.gemini.invalid".to_string(),
            resend_api_key: None,
            resend_api_url: "https://fake.resend.invalid".to_string(),
            contact_recipient: Some("team@example.com".to_string()),
            contact_from_email: "noreply@example.com".to_string(),
            contact_from_name: "Contact Form".to_string(),
            agent_join_ttl_secs: 120,
        };

        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let video = Arc::new(FakeVideo::default());
        let completion = Arc::new(FakeCompletion::default());
        let mailer = Arc::new(FakeMailer::default());
        let join_requests = Arc::new(JoinRequestStore::new(Duration::from_secs(
            config.agent_join_ttl_secs,
        )));
        let jwt = JwtService::from_config(&config)?;
        let state = AppState::new(
            pool.clone(),
            config,
            jwt,
            video.clone(),
            completion.clone(),
            mailer.clone(),
            join_requests,
        );
        let router = routes::build_router(state.clone());

        Ok(Self {
            state,
            router,
            video,
            completion,
            mailer,
        })
    }

    pub async fn cleanup(&self) -> Result<()> {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get cleanup connection: {err}"))?;
            truncate_all(&mut conn)?;
            Ok(())
        })
        .await
        .context("cleanup task panicked")?
    }

    #[allow(dead_code)]
    pub fn video(&self) -> Arc<FakeVideo> {
        self.video.clone()
    }

    #[allow(dead_code)]
    pub fn completion(&self) -> Arc<FakeCompletion> {
        self.completion.clone()
    }

    #[allow(dead_code)]
    pub fn mailer(&self) -> Arc<FakeMailer> {
        self.mailer.clone()
    }

    pub async fn insert_user(&self, name: &str, email: &str, password: &str) -> Result<Uuid> {
        let name = name.to_string();
        let email = email.to_string();
        let password = password.to_string();
        self.with_conn(move |conn| {
            let password_hash = hash_password(&password).context("failed to hash password")?;
            let user = NewUser {
                id: Uuid::new_v4(),
                name,
                email,
                image: None,
                password_hash,
            };
            diesel::insert_into(collabspace::schema::users::table)
                .values(&user)
                .execute(conn)
                .context("failed to insert user")?;
            Ok(user.id)
        })
        .await
    }

    pub async fn login_token(&self, email: &str, password: &str) -> Result<String> {
        #[derive(Serialize)]
        struct LoginPayload<'a> {
            email: &'a str,
            password: &'a str,
        }

        let response = self
            .post_json("/api/auth/login", &LoginPayload { email, password }, None)
            .await?;

        anyhow::ensure!(
            response.status() == StatusCode::OK,
            "login failed with status {}",
            response.status()
        );

        let body = body_to_vec(response.into_body()).await?;
        #[derive(serde::Deserialize)]
        struct LoginResponse {
            access_token: String,
        }
        let parsed: LoginResponse = serde_json::from_slice(&body)?;
        Ok(parsed.access_token)
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn patch_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let mut builder = Request::builder()
            .method(Method::PATCH)
            .uri(path)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    /// POST with an explicit Cookie header, for the refresh-token flow.
    #[allow(dead_code)]
    pub async fn post_with_cookie(
        &self,
        path: &str,
        cookie: &str,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header("cookie", cookie);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(Method::GET).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn delete(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let builder = Request::builder().method(Method::DELETE).uri(path);
        let builder = if let Some(token) = token {
            builder.header("authorization", format!("Bearer {token}"))
        } else {
            builder
        };
        let request = builder.body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
            f(&mut conn)
        })
        .await
        .context("connection task panicked")?
    }
}

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|err| anyhow!("failed to run migrations: {err}"))?;
        truncate_all(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}

fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        "TRUNCATE TABLE meetings, agents, notes, messages, channel_members, channels, refresh_tokens, users RESTART IDENTITY CASCADE;",
    )
    .context("failed to truncate tables")?;
    Ok(())
}
