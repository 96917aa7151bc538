pub mod config;
pub mod error;
pub mod indexer;
pub mod types;
