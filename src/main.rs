use actix_web::{web, App, HttpServer};
use live_chat_service::{
    config, error, logging, routes,
    state::AppState,
    users::{InMemoryUserDirectory, UserProfile},
};
use std::env;
use std::sync::Arc;

/// Seed the user directory from `USER_DIRECTORY`, a comma-separated list
/// of `id:name` or `id:name:avatar` tuples. In production the directory
/// is the account service; this keeps a standalone deployment usable.
async fn seed_directory() -> Result<Arc<InMemoryUserDirectory>, error::AppError> {
    let directory = InMemoryUserDirectory::new();
    let Ok(raw) = env::var("USER_DIRECTORY") else {
        return Ok(Arc::new(directory));
    };

    for tuple in raw.split(',').filter(|t| !t.trim().is_empty()) {
        let mut parts = tuple.trim().splitn(3, ':');
        let id = parts
            .next()
            .and_then(|p| p.parse::<i64>().ok())
            .ok_or_else(|| {
                error::AppError::Config(format!("USER_DIRECTORY: bad entry {tuple:?}"))
            })?;
        let name = parts
            .next()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                error::AppError::Config(format!("USER_DIRECTORY: missing name in {tuple:?}"))
            })?;
        directory
            .insert(UserProfile {
                id,
                name: name.to_string(),
                avatar: parts.next().map(str::to_string),
            })
            .await;
    }
    Ok(Arc::new(directory))
}

#[actix_web::main]
async fn main() -> Result<(), error::AppError> {
    logging::init_tracing();
    let cfg = Arc::new(config::Config::from_env()?);

    let users = seed_directory().await?;
    let state = AppState::new(cfg.clone(), users);

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    tracing::info!(%bind_addr, "starting live-chat-service");

    HttpServer::new(move || {
        let cors = actix_cors::Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(cors)
            .app_data(web::Data::new(state.clone()))
            .configure(routes::configure)
    })
    .bind(&bind_addr)
    .map_err(|e| error::AppError::StartServer(format!("bind: {e}")))?
    .run()
    .await
    .map_err(|e| error::AppError::StartServer(format!("run: {e}")))
}
