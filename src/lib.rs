pub mod api;
pub mod config;
pub mod pipeline;

use std::sync::Arc;

use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::config::{ConfigError, ServiceConfig};
use crate::pipeline::llm::{LlmError, ModelDispatcher};
use crate::pipeline::TransformPipeline;

/// Failures that stop the service before it can serve requests.
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Model backend setup failed: {0}")]
    Backend(#[from] LlmError),
    #[error("Server failed to start: {0}")]
    Server(String),
}

/// Run the service until Ctrl-C.
pub async fn run() -> Result<(), StartupError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    let config = ServiceConfig::from_env()?;
    let dispatcher = ModelDispatcher::from_settings(&config.backends)?;
    tracing::info!(
        generation = %config.models.generation,
        labeler = %config.models.labeler,
        analysis = %config.models.analysis,
        "Model roster loaded"
    );

    let bind_addr = config.bind_addr;
    let pipeline = Arc::new(TransformPipeline::new(Arc::new(config), Arc::new(dispatcher)));
    let mut server = api::start_server(pipeline, bind_addr)
        .await
        .map_err(StartupError::Server)?;
    tracing::info!(addr = %server.session.server_addr, "Listening");

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {e}");
    }
    server.shutdown();
    server.stopped().await;
    Ok(())
}
