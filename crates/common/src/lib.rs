//! Shared configuration, error taxonomy and domain types for the notify workspace.

pub mod config;
pub mod db;
pub mod error;
pub mod redis_pool;
pub mod types;
