pub mod bot;
pub mod config;
pub mod core;
pub mod mcp;

pub use bot::{BotReply, SixSixBot};
pub use config::Config;
