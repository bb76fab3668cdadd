use std::sync::Arc;

use anyhow::Context;
use db::DBService;
use server::{AppState, routes};
use services::services::{
    event_notifications::{EventNotificationService, FullyConnected, LogDispatcher},
    message_writer::ClaudeMessageWriter,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:greeting_tree.db".to_string());
    let db = DBService::new(&database_url)
        .await
        .context("failed to open database")?;

    let writer =
        Arc::new(ClaudeMessageWriter::from_env().context("notification copywriter unavailable")?);
    let dispatcher = Arc::new(LogDispatcher);
    // The real relationship graph lives outside this service; every pair of
    // active members is treated as connected here.
    let graph = Arc::new(FullyConnected);

    let _notification_worker = EventNotificationService::spawn(
        db.clone(),
        writer.clone(),
        dispatcher.clone(),
        graph.clone(),
    )
    .await;

    let state = AppState {
        db,
        writer,
        dispatcher,
        graph,
    };
    let app = routes::router().with_state(state);

    let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port = std::env::var("PORT").unwrap_or_else(|_| "3001".to_string());
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("listening on {addr}");

    axum::serve(listener, app).await?;
    Ok(())
}
