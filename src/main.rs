use std::{sync::Arc, time::Duration};

use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use collabspace::{
    ai::{CompletionProvider, DisabledCompletionProvider, GeminiClient},
    auth::jwt::JwtService,
    config::AppConfig,
    db,
    join_requests::JoinRequestStore,
    mailer::{DisabledMailer, Mailer, ResendMailer},
    routes::build_router,
    state::AppState,
    video::{DailyVideoClient, DisabledVideoProvider, VideoProvider},
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .compact()
        .init();

    let config = AppConfig::from_env()?;
    info!(
        database_url = %config.redacted_database_url(),
        host = %config.server_host,
        port = config.server_port,
        "starting collabspace"
    );

    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    let jwt = JwtService::from_config(&config)?;

    let video: Arc<dyn VideoProvider> = match &config.daily_api_key {
        Some(key) => Arc::new(DailyVideoClient::new(
            config.daily_api_url.clone(),
            key.clone(),
            config.daily_domain.clone(),
        )?),
        None => {
            warn!("DAILY_API_KEY not set, video features disabled");
            Arc::new(DisabledVideoProvider)
        }
    };

    let ai: Arc<dyn CompletionProvider> = match &config.gemini_api_key {
        Some(key) => Arc::new(GeminiClient::new(config.gemini_api_url.clone(), key.clone())?),
        None => {
            warn!("GEMINI_API_KEY not set, agent responses disabled");
            Arc::new(DisabledCompletionProvider)
        }
    };

    let mailer: Arc<dyn Mailer> = match &config.resend_api_key {
        Some(key) => Arc::new(ResendMailer::new(config.resend_api_url.clone(), key.clone())?),
        None => {
            warn!("RESEND_API_KEY not set, contact form disabled");
            Arc::new(DisabledMailer)
        }
    };

    let join_requests = Arc::new(JoinRequestStore::new(Duration::from_secs(
        config.agent_join_ttl_secs,
    )));

    let addr = format!("{}:{}", config.server_host, config.server_port);
    let state = AppState::new(pool, config, jwt, video, ai, mailer, join_requests);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}
