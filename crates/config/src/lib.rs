//! Configuration: one TOML file describing accounts, channels, the
//! listens-to graph (via groups), canned responses, and ignore lists.

pub mod error;
pub mod expand;
pub mod loader;
pub mod schema;

use std::{path::Path, sync::Arc};

use kolbridge_common::types::{ChannelIdentity, ModeratorName};

pub use {
    error::{Context, Error, Result},
    schema::{
        AccountSection, ChannelSection, DiscordSection, GroupSection, RawConfig, RemoteSection,
        ResponseRule,
    },
};

/// Fully loaded and expanded configuration.
#[derive(Debug)]
pub struct Settings {
    pub discord: Option<DiscordSection>,
    pub accounts: Vec<AccountSection>,
    pub remotes: Vec<RemoteSection>,
    pub ignore_chat: Vec<String>,
    pub responses: Vec<ResponseRule>,
    pub moderators: Vec<ModeratorName>,
    pub identities: Vec<Arc<ChannelIdentity>>,
    /// Non-fatal configuration problems, surfaced at startup and by
    /// `check-config`.
    pub diagnostics: Vec<String>,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_source(&source, |name| std::env::var(name).ok())
    }

    pub fn from_source(
        source: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let substituted = loader::substitute_env_with(source, lookup)?;
        let raw = loader::parse(&substituted)?;
        let (identities, mut diagnostics) = expand::build_identities(&raw);
        diagnostics.extend(expand::validate(&raw, &identities));
        Ok(Self {
            discord: raw.discord,
            accounts: raw.accounts,
            remotes: raw.remotes,
            ignore_chat: raw.ignore_chat,
            responses: raw.responses,
            moderators: raw.moderators,
            identities,
            diagnostics,
        })
    }
}
