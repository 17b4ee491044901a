pub mod auth;
pub mod config;
pub mod db;
pub mod docs;
pub mod error;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod utils;
pub mod ws;

pub use routes::create_app;
pub use state::AppState;
