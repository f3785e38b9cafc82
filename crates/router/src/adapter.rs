use {anyhow::Result, async_trait::async_trait};

use kolbridge_common::types::{ChannelIdentity, ChatMessage};

/// Capability interface every channel backend implements: a logged-in game
/// account, the Discord client, or a remote relay. The router resolves the
/// owning adapter for a target identity by asking each registered adapter
/// in registration order.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Adapter identifier for logs (account name, "discord", ...).
    fn id(&self) -> &str;

    /// Whether this adapter is the delivery backend for `identity`.
    fn owns_channel(&self, identity: &ChannelIdentity) -> bool;

    /// Deliver one relayed message to `target`.
    async fn send(&self, target: &ChannelIdentity, message: &ChatMessage) -> Result<()>;

    /// Bring the backend up (login, connect, spawn polling).
    async fn start(&self) -> Result<()>;
}
