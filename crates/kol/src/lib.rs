//! Game-side protocol client: login and session upkeep, chat polling and
//! submission, channel membership reconciliation, and the sequential
//! message processor that feeds the router. Also hosts the listen-only
//! adapter for remote relay feeds speaking the same wire format.

pub mod adapter;
pub mod client;
pub mod error;
pub mod processor;
pub mod remote;
pub mod session;
pub mod wire;

pub use {
    adapter::KolChatAdapter,
    client::{DEFAULT_BASE_URL, EffectCleanup, KolClient, human_readable_time},
    error::{Error, Result},
    processor::KolProcessor,
    remote::RemoteChatAdapter,
    wire::RawChatMessage,
};
