// Library root: the CLI binary and the integration tests share these modules.

pub mod cli;
pub mod config;
pub mod error;
pub mod health;
pub mod rollback;
pub mod runner;
pub mod steps;
pub mod workflow;
