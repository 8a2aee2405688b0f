//! Procurement workflow server
//!
//! Wires the engine to its production adapters (Google Sheets for tabular
//! data, Google Drive for generated documents) and serves the stage API.

use std::sync::Arc;

use tracing::info;

use procure_core::{
    DocumentPipeline, DriveBlobStore, EngineConfig, HandlebarsRenderer, SequenceAllocator,
    SheetsStore, StageCatalog,
};

mod routes;

use routes::{create_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "procure_web_server=info,procure_core=info,tower_http=debug".to_string()),
        )
        .init();

    dotenvy::dotenv().ok();
    let config = EngineConfig::from_env()?;

    let client = reqwest::Client::new();
    let store = Arc::new(SheetsStore::new(
        client.clone(),
        config.spreadsheet_id.clone(),
        config.api_token.clone(),
    ));
    let blob = Arc::new(DriveBlobStore::new(
        client,
        config.drive_folder_id.clone(),
        config.api_token.clone(),
    ));
    let renderer = Arc::new(HandlebarsRenderer::new()?);
    let allocator = Arc::new(SequenceAllocator::new());
    let pipeline = Arc::new(DocumentPipeline::new(
        store.clone(),
        blob,
        renderer,
        allocator.clone(),
        "documents",
    ));

    let state = AppState {
        store,
        catalog: Arc::new(StageCatalog::procurement()),
        allocator,
        pipeline,
    };
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    info!("Starting procurement server on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
