mod auth;
mod dashboard;
mod health;
mod home;
mod predict;
mod uploads;

use crate::server::AppState;
use axum::{
    routing::{get, post},
    Router,
};

/// Everything but `/login`, `/register` and `/health` requires a session.
pub fn app_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(home::index))
        .route("/login", get(auth::login_page).post(auth::login))
        .route("/register", get(auth::register_page).post(auth::register))
        .route("/logout", get(auth::logout))
        .route("/predict", post(predict::predict))
        .route("/dashboard", get(dashboard::dashboard))
        .route("/uploads/{key}", get(uploads::serve_upload))
        .route("/health", get(health::healthcheck))
}
