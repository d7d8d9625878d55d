pub mod bot_context;
pub mod client;
pub mod config;
