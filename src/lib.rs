mod routes;

pub mod app;
pub mod auth;
pub mod config;
pub mod db;
pub mod flash;
pub mod labels;
pub mod model_provider;
pub mod prediction;
pub mod preprocess;
pub mod server;
pub mod uploads;
pub mod views;

pub use app::start_app;
