pub mod api;
pub mod auth;
pub mod clients;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod models;
pub mod processors;
pub mod utils;
