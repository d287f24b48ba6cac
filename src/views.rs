//! HTML pages rendered from `templates/`. Template names end in `.html`, so
//! minijinja escapes every interpolated value.

use crate::{
    db::{DailyCount, LabelCount, Prediction},
    flash::Flash,
    prediction::PredictionResult,
};
use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use minijinja::{context, Environment, Value};
use serde::Serialize;
use thiserror::Error;

const TEMPLATES: [(&str, &str); 6] = [
    ("layout.html", include_str!("../templates/layout.html")),
    ("login.html", include_str!("../templates/login.html")),
    ("register.html", include_str!("../templates/register.html")),
    ("index.html", include_str!("../templates/index.html")),
    ("result.html", include_str!("../templates/result.html")),
    ("dashboard.html", include_str!("../templates/dashboard.html")),
];

#[derive(Error, Debug)]
#[error("Failed to render {name}: {source}")]
pub struct ViewError {
    name: &'static str,
    #[source]
    source: minijinja::Error,
}

impl IntoResponse for ViewError {
    fn into_response(self) -> Response {
        tracing::error!("{}", self);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Something went wrong rendering the page",
        )
            .into_response()
    }
}

#[derive(Serialize)]
pub struct DashboardView<'a> {
    pub username: &'a str,
    pub user_total: i64,
    pub global_total: i64,
    pub top_labels: &'a [LabelCount],
    pub daily_counts: &'a [DailyCount],
    pub recent: &'a [Prediction],
}

pub struct Views {
    env: Environment<'static>,
}

impl Views {
    pub fn new() -> Result<Self, minijinja::Error> {
        let mut env = Environment::new();
        for (name, source) in TEMPLATES {
            env.add_template(name, source)?;
        }
        Ok(Self { env })
    }

    fn render(&self, name: &'static str, ctx: Value) -> Result<Html<String>, ViewError> {
        self.env
            .get_template(name)
            .and_then(|template| template.render(ctx))
            .map(Html)
            .map_err(|source| ViewError { name, source })
    }

    pub fn login_page(&self, flash: Option<&Flash>) -> Result<Html<String>, ViewError> {
        self.render("login.html", context! { flash })
    }

    pub fn register_page(&self, flash: Option<&Flash>) -> Result<Html<String>, ViewError> {
        self.render("register.html", context! { flash })
    }

    pub fn home_page(
        &self,
        username: &str,
        flash: Option<&Flash>,
    ) -> Result<Html<String>, ViewError> {
        self.render("index.html", context! { username, flash })
    }

    pub fn result_page(&self, result: &PredictionResult) -> Result<Html<String>, ViewError> {
        self.render("result.html", context! { result })
    }

    pub fn dashboard_page(&self, view: &DashboardView<'_>) -> Result<Html<String>, ViewError> {
        self.render("dashboard.html", Value::from_serialize(view))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flash::FlashLevel;

    #[test]
    fn test_all_templates_render() {
        let views = Views::new().unwrap();
        assert!(views.login_page(None).unwrap().0.contains("<h1>Log in</h1>"));
        assert!(views
            .register_page(None)
            .unwrap()
            .0
            .contains(r#"action="/register""#));
        assert!(views
            .home_page("alice", None)
            .unwrap()
            .0
            .contains("Signed in as alice."));
    }

    #[test]
    fn test_interpolated_values_are_escaped() {
        let views = Views::new().unwrap();
        let flash = Flash::new(FlashLevel::Danger, "<b>nope");
        let page = views.login_page(Some(&flash)).unwrap().0;
        assert!(page.contains(r#"<div class="flash danger">&lt;b&gt;nope</div>"#));

        let page = views.home_page(r#"<script>"x&y"#, None).unwrap().0;
        assert!(page.contains("&lt;script&gt;&quot;x&amp;y"));
        assert!(!page.contains("<script>"));
    }

    #[test]
    fn test_result_page_shows_label_and_image() {
        let views = Views::new().unwrap();
        let result = PredictionResult {
            prediction_id: 1,
            label: "Stop".into(),
            class_index: 14,
            confidence: 96.5,
            image_key: "abc.png".into(),
        };
        let page = views.result_page(&result).unwrap().0;

        assert!(page.contains("<strong>Stop</strong>"));
        assert!(page.contains(r#"src="/uploads/abc.png""#));
        assert!(page.contains("Confidence: 96.5%"));
    }

    #[test]
    fn test_dashboard_lists_aggregates() {
        let views = Views::new().unwrap();
        let top = vec![LabelCount {
            label: "Stop".into(),
            count: 2,
        }];
        let daily = vec![DailyCount {
            day: "2026-01-01".into(),
            count: 2,
        }];
        let page = views
            .dashboard_page(&DashboardView {
                username: "alice",
                user_total: 2,
                global_total: 5,
                top_labels: &top,
                daily_counts: &daily,
                recent: &[],
            })
            .unwrap()
            .0;

        assert!(page.contains("<tr><td>Stop</td><td>2</td></tr>"));
        assert!(page.contains("<tr><td>2026-01-01</td><td>2</td></tr>"));
        assert!(page.contains("Your predictions: 2"));
        assert!(page.contains("All predictions: 5"));
    }
}
