use anyhow::Context;
use booking_web_chat::clock::{Clock, SystemClock};
use booking_web_chat::config::AppConfig;
use booking_web_chat::{build_router, AppState, BookingEngine};
use common_db::{init_db_pool, SessionStore, SqliteDirectory, SqliteSessionStore};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing(log_json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    init_tracing(config.log_json);

    info!(
        version = booking_web_chat::built_info::PKG_VERSION,
        db_path = %config.db.db_path,
        "Iniciando booking-web-chat"
    );

    let pool = init_db_pool(&config.db).await?;
    let sessions = Arc::new(SqliteSessionStore::new(pool.clone()));
    let clock = Arc::new(SystemClock);

    let purged = sessions
        .purge_expired(clock.now())
        .await
        .context("Falha ao limpar sessões expiradas")?;
    info!(purged, "Sessões expiradas removidas");

    let engine = BookingEngine::new(
        sessions,
        Arc::new(SqliteDirectory::new(pool.clone())),
        clock,
        config.engine.clone(),
    );
    let app = build_router(
        AppState {
            engine: Arc::new(engine),
            pool,
        },
        config.max_concurrent_requests,
    );

    info!(addr = %config.bind_addr, "Servidor escutando");
    axum::Server::bind(&config.bind_addr)
        .serve(app.into_make_service())
        .await
        .context("Servidor HTTP encerrado com erro")?;

    Ok(())
}
