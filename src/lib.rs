pub mod commands;
pub mod data;
pub mod handlers;
pub mod logging;
pub mod moderation;

pub const BOT_NAME: &str = "modwarden";
pub const COMMAND_TARGET: &str = "modwarden::command";
pub const ERROR_TARGET: &str = "modwarden::error";
pub const EVENT_TARGET: &str = "modwarden::handlers";
pub const MODERATION_TARGET: &str = "modwarden::moderation";
pub const CONSOLE_TARGET: &str = "modwarden";

pub use data::{Data, DataInner};
pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;
