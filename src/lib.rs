pub mod commands;
pub mod config;
pub mod indexer;
pub mod wallet;
