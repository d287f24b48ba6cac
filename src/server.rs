use crate::{
    auth::AuthService, config::Config, db::Database, prediction::PredictionService,
    routes::app_routes, uploads::UploadStore, views::Views,
};
use axum::{extract::DefaultBodyLimit, extract::FromRef, Router};
use axum_extra::extract::cookie::Key;
use sha2::{Digest, Sha512};
use std::sync::Arc;
use tokio::{net::TcpListener, sync::broadcast::Receiver, task::JoinHandle};

#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthService>,
    pub prediction_service: Arc<PredictionService>,
    pub db: Database,
    pub uploads: UploadStore,
    pub cookie_key: Key,
    pub views: Arc<Views>,
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.cookie_key.clone()
    }
}

/// Signing key for the session and flash cookies, stretched from the configured secret.
pub fn cookie_key(secret: &str) -> Key {
    let digest = Sha512::digest(secret.as_bytes());
    Key::from(digest.as_slice())
}

pub fn build_router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .merge(app_routes())
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}

pub struct HttpServer {
    router: Router,
    listener: TcpListener,
}

impl HttpServer {
    pub async fn new(state: AppState, config: &Config) -> anyhow::Result<Self> {
        let addr = config.server.get_address();
        let router = build_router(state, config.uploads.max_upload_bytes);
        let listener = TcpListener::bind(addr).await?;

        Ok(Self { router, listener })
    }

    pub async fn run(
        self,
        mut shutdown_rx: Receiver<()>,
    ) -> anyhow::Result<JoinHandle<anyhow::Result<()>>> {
        tracing::info!("Starting app on {}", self.listener.local_addr()?);

        let listener = self.listener;
        let router = self.router;
        let server_handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    shutdown_rx.recv().await.ok();
                })
                .await?;
            Ok(())
        });

        Ok(server_handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_key_is_deterministic() {
        let a = cookie_key("a-secret-that-is-long-enough-for-the-app");
        let b = cookie_key("a-secret-that-is-long-enough-for-the-app");
        let c = cookie_key("another-secret-that-is-long-enough-too");

        assert_eq!(a.master(), b.master());
        assert_ne!(a.master(), c.master());
    }
}
