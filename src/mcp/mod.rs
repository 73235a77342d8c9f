pub mod base;

pub use base::{available_tools, BotServer};
