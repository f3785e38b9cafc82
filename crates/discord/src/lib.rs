//! Discord side of the relay: serenity gateway listener for inbound
//! messages and a webhook/bot delivery backend with rate-limit queueing.

pub mod adapter;
pub mod error;
pub mod gateway;
pub mod webhook;

pub use {
    adapter::DiscordAdapter,
    error::{Error, Result},
    gateway::{DiscordListener, SharedHttp, clean_inbound},
    webhook::{WebhookPayload, WebhookPoster, WebhookTransport},
};
