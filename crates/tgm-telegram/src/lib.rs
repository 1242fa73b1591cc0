//! Bot API adapter: typed wrapper over the Telegram Bot HTTP methods the
//! mirror needs (long-poll `getUpdates`, file resolution, webhook state,
//! channel diagnostics).

pub mod client;
pub mod types;

pub use client::{post_from_message, BotApi, BotPermissions, DeliveryMode, HttpBotApi, TelegramClient};
