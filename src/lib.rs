pub mod ai;
pub mod attachments;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod join_requests;
pub mod mailer;
pub mod models;
pub mod routes;
pub mod schema;
pub mod state;
pub mod utils;
pub mod video;
