// Library root: re-exports all modules so integration tests and the binary
// can reach the crate's public API.

pub mod analytics;
pub mod auth;
pub mod cli;
pub mod collector;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod export;
pub mod models;
pub mod platforms;
pub mod realtime;
pub mod scheduler;
pub mod service;
pub mod validation;
pub mod ws_server;
