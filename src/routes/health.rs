use crate::server::AppState;
use axum::{extract::State, response::IntoResponse, response::Json};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
pub struct Status {
    status: String,
    model_loaded: bool,
}

pub async fn healthcheck(State(state): State<AppState>) -> impl IntoResponse {
    Json(Status {
        status: "healthy".into(),
        model_loaded: state.prediction_service.model_loaded(),
    })
}
