//! Core relay types shared by the router and every channel adapter.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Which protocol family a channel surface belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    #[serde(rename = "KoL")]
    Kol,
    Discord,
    /// Game chat re-served by a remote relay service. Read-only.
    Remote,
    /// Process-internal surfaces (system/rollover notices). Never backed by
    /// a real server-side channel.
    Internal,
}

/// How a configured game account participates in the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountMode {
    /// Full two-way relay through the account's clan channels.
    Clan,
    /// Listens to every public channel it can join; never sends.
    Public,
    /// Configured but not started.
    Ignore,
}

/// Per-channel feature switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelFlag {
    /// Canned auto-responses may fire for messages originating here.
    Responses,
}

/// One addressable chat surface: a KoL chat channel, a Discord channel, or a
/// webhook-backed Discord channel.
///
/// Identities are built once from configuration and shared by `Arc` between
/// the router and adapters for the process lifetime. Equality is unique-id
/// equality; the listens-to edges are stored as unique ids so the graph can
/// be arbitrarily cyclic without reference cycles.
#[derive(Debug, Clone)]
pub struct ChannelIdentity {
    /// Account (KoL login or "discord") this surface belongs to.
    pub owning_account: String,
    /// Display name used when relaying through webhooks.
    pub name: Option<String>,
    /// Avatar URL used when relaying through webhooks.
    pub icon: Option<String>,
    pub side: Side,
    /// Discord guild id, or the KoL channel name ("clan", "games", ...).
    pub holder_id: String,
    /// Discord channel id. Unused on the KoL side.
    pub channel_id: Option<String>,
    pub flags: Vec<ChannelFlag>,
    /// Webhook endpoint for posting with a per-message username/avatar.
    pub webhook: Option<String>,
    /// `holder_id + "/" + channel_id` unless explicitly overridden.
    pub unique_id: String,
    /// Unique ids of the channels this one receives broadcasts from.
    /// Order matters for deterministic fan-out.
    pub listens_to: Vec<String>,
}

impl ChannelIdentity {
    pub fn derive_unique_id(holder_id: &str, channel_id: Option<&str>) -> String {
        match channel_id {
            Some(ch) => format!("{holder_id}/{ch}"),
            None => format!("{holder_id}/"),
        }
    }

    pub fn has_flag(&self, flag: ChannelFlag) -> bool {
        self.flags.contains(&flag)
    }
}

impl PartialEq for ChannelIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.unique_id == other.unique_id
    }
}

impl Eq for ChannelIdentity {}

/// A message rendered once for every destination dialect.
///
/// When the embed fields are set and the destination accepts rich rendering,
/// Discord targets use the embed; otherwise they fall back to
/// `discord_message`. KoL targets always use `kol_prefix` + `kol_message`
/// (the prefix is re-applied to every chunk after splitting).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedMessage {
    pub embed_title: Option<String>,
    pub embed_color: Option<u32>,
    pub embed_description: Option<String>,
    pub discord_message: String,
    pub kol_prefix: String,
    pub kol_message: String,
}

/// One unit of relay traffic, consumed once by every subscribed adapter.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub from: Arc<ChannelIdentity>,
    /// Sender display name, already stripped of markup.
    pub sender: String,
    pub message: RenderedMessage,
    /// Bot-originated notices that must not echo back to their origin
    /// family set this to the one side allowed to receive them.
    pub exclusive_to: Option<Side>,
}

/// Cached resolution of a moderator id to a display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeratorName {
    pub id: String,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_id_derivation() {
        assert_eq!(
            ChannelIdentity::derive_unique_id("guild1", Some("chan2")),
            "guild1/chan2"
        );
        assert_eq!(ChannelIdentity::derive_unique_id("clan", None), "clan/");
    }

    #[test]
    fn identity_equality_is_unique_id_equality() {
        let a = ChannelIdentity {
            owning_account: "alpha".into(),
            name: None,
            icon: None,
            side: Side::Kol,
            holder_id: "clan".into(),
            channel_id: None,
            flags: vec![],
            webhook: None,
            unique_id: "clan/".into(),
            listens_to: vec![],
        };
        let mut b = a.clone();
        b.owning_account = "beta".into();
        assert_eq!(a, b);
        b.unique_id = "games/".into();
        assert_ne!(a, b);
    }
}
