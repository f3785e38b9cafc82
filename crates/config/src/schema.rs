//! Raw TOML schema. One file carries everything: accounts, the Discord
//! token, channels with their listens-to keys, channel groups, canned
//! responses, and the moderator name table.

use {
    secrecy::Secret,
    serde::Deserialize,
};

use kolbridge_common::types::{AccountMode, ChannelFlag, ModeratorName, Side};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    #[serde(default)]
    pub discord: Option<DiscordSection>,
    #[serde(default)]
    pub accounts: Vec<AccountSection>,
    /// Sender names whose messages are never relayed (other bridge bots).
    #[serde(default)]
    pub ignore_chat: Vec<String>,
    #[serde(default)]
    pub responses: Vec<ResponseRule>,
    #[serde(default)]
    pub moderators: Vec<ModeratorName>,
    #[serde(default)]
    pub channels: Vec<ChannelSection>,
    #[serde(default)]
    pub groups: Vec<GroupSection>,
    #[serde(default)]
    pub remotes: Vec<RemoteSection>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiscordSection {
    pub token: Secret<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccountSection {
    pub username: String,
    pub password: Secret<String>,
    pub mode: AccountMode,
    /// Channel the account parks in for macros and bot notices.
    #[serde(default = "default_main_channel")]
    pub main_channel: String,
}

fn default_main_channel() -> String {
    "clan".to_string()
}

/// Ordered canned-response rule; first matching trigger wins.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResponseRule {
    pub trigger: String,
    pub replies: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelSection {
    /// Unique id override; defaults to `holder_id/channel_id`.
    #[serde(default)]
    pub id: Option<String>,
    pub owner: String,
    pub side: Side,
    /// Discord guild id, or the game channel name.
    pub holder_id: String,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub webhook: Option<String>,
    /// Group keys this channel receives broadcasts from: account names,
    /// channel unique ids, or named groups.
    #[serde(default)]
    pub listens_to: Vec<String>,
    #[serde(default)]
    pub flags: Vec<ChannelFlag>,
}

/// A relay service that re-serves game chat over JSON. Channels with
/// `side = "Remote"` name one of these as their owner.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoteSection {
    pub name: String,
    pub base_url: String,
}

/// A named union of other group keys, usable anywhere a key is.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupSection {
    pub name: String,
    pub channels: Vec<String>,
}
