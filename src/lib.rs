pub mod cape;
pub mod cli;
pub mod config;
pub mod messages;
pub mod runtime;
