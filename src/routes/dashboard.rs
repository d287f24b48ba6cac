use crate::{
    auth::CurrentUser,
    db::DbError,
    server::AppState,
    views::{DashboardView, ViewError},
};
use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use tracing::instrument;

const RECENT_LIMIT: i64 = 20;

pub enum DashboardError {
    Db(DbError),
    View(ViewError),
}

impl IntoResponse for DashboardError {
    fn into_response(self) -> Response {
        match self {
            DashboardError::Db(e) => {
                tracing::error!("Dashboard query failed: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Something went wrong loading the dashboard",
                )
                    .into_response()
            }
            DashboardError::View(e) => e.into_response(),
        }
    }
}

impl From<DbError> for DashboardError {
    fn from(err: DbError) -> Self {
        DashboardError::Db(err)
    }
}

impl From<ViewError> for DashboardError {
    fn from(err: ViewError) -> Self {
        DashboardError::View(err)
    }
}

#[instrument(skip(state, user), fields(user_id = user.id))]
pub async fn dashboard(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Html<String>, DashboardError> {
    let db = &state.db;
    let user_total = db.count_predictions_for_user(user.id).await?;
    let global_total = db.count_predictions().await?;
    let top_labels = db.top_labels_for_user(user.id).await?;
    let daily_counts = db.daily_counts_for_user(user.id).await?;
    let recent = db.list_predictions_for_user(user.id, RECENT_LIMIT).await?;

    Ok(state.views.dashboard_page(&DashboardView {
        username: &user.username,
        user_total,
        global_total,
        top_labels: &top_labels,
        daily_counts: &daily_counts,
        recent: &recent,
    })?)
}
