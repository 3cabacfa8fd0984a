pub mod config;
pub mod error;
pub mod profile;
pub mod redis;
pub mod types;
