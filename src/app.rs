use crate::{
    auth::AuthService,
    config::Config,
    db::Database,
    model_provider::{ModelProvider, OrtModelProvider},
    prediction::PredictionService,
    server::{cookie_key, AppState, HttpServer},
    uploads::UploadStore,
    views::Views,
};
use std::{error::Error, sync::Arc};
use tokio::{signal, sync::broadcast};

pub async fn start_app(config: Config) -> Result<(), Box<dyn Error>> {
    let model_config = config.model.clone();
    let model: Arc<dyn ModelProvider> =
        match tokio::task::spawn_blocking(move || OrtModelProvider::new(&model_config)).await? {
            Ok(provider) => Arc::new(provider),
            Err(e) => {
                tracing::error!("Failed to initialize model provider: {}", e);
                return Err(Box::new(e));
            }
        };

    let db = match Database::connect(&config.database).await {
        Ok(db) => db,
        Err(e) => {
            tracing::error!("Failed to initialize database: {}", e);
            return Err(Box::new(e));
        }
    };

    let uploads = UploadStore::new(&config.uploads.dir).await?;
    tracing::info!("Storing uploads in {:?}", uploads.dir());

    let state = AppState {
        auth: Arc::new(AuthService::new(db.clone(), config.session.get_ttl())),
        prediction_service: Arc::new(PredictionService::new(model, db.clone(), uploads.clone())),
        db,
        uploads,
        cookie_key: cookie_key(&config.session.secret),
        views: Arc::new(Views::new()?),
    };

    let server = HttpServer::new(state, &config).await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let server_handle = server.run(shutdown_tx.subscribe()).await?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    server_handle.await??;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
