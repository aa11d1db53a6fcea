pub mod auth;
pub mod catalog;
pub mod commands;
pub mod concurrency;
pub mod config;
pub mod cursor;
pub mod decimal;
pub mod error;
pub mod exec;
pub mod find_common;
pub mod namespace;
pub mod operation;
pub mod protocol;
pub mod server;
