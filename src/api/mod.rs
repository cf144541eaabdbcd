//! HTTP surface: client-facing API (port `client_port`) and admin API
//! (port `admin_port`), each its own axum `Router` assembled in
//! `src/main.rs`.

pub mod admin;
pub mod admin_auth;
pub mod access;
pub mod client;
pub mod context;
pub mod health;
pub mod metrics;
pub mod rate_limit;
pub mod request_id;
pub mod status;
