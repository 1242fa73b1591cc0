//! Core domain + application logic for the Telegram channel mirror.
//!
//! This crate is intentionally transport-agnostic. The Bot API client and the
//! HTTP surface live in adapter crates (`tgm-telegram`, `tgm-server`).

pub mod cache;
pub mod config;
pub mod domain;
pub mod errors;
pub mod logging;
pub mod ratelimit;
pub mod store;

pub use errors::{Error, Result};
