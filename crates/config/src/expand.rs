//! Group expansion: turns the raw channel list into shared
//! [`ChannelIdentity`] values with their listens-to edges resolved.
//!
//! Every channel is implicitly a member of two groups, one named after its
//! owning account and one after its unique id. Named groups union the
//! members of other keys. A `listens_to` entry may name any of the three.

use std::{collections::BTreeMap, sync::Arc};

use kolbridge_common::types::{ChannelIdentity, Side};

use crate::schema::RawConfig;

/// Build the identity set. Unresolvable references are reported as
/// diagnostics rather than errors: a typo in one channel must not take
/// the whole bridge down.
pub fn build_identities(config: &RawConfig) -> (Vec<Arc<ChannelIdentity>>, Vec<String>) {
    let mut diagnostics = Vec::new();

    let mut identities: Vec<ChannelIdentity> = config
        .channels
        .iter()
        .map(|channel| ChannelIdentity {
            owning_account: channel.owner.clone(),
            name: channel.name.clone(),
            icon: channel.icon.clone(),
            side: channel.side,
            holder_id: channel.holder_id.clone(),
            channel_id: channel.channel_id.clone(),
            flags: channel.flags.clone(),
            webhook: channel.webhook.clone(),
            unique_id: channel.id.clone().unwrap_or_else(|| {
                ChannelIdentity::derive_unique_id(
                    &channel.holder_id,
                    channel.channel_id.as_deref(),
                )
            }),
            listens_to: Vec::new(),
        })
        .collect();

    for i in 0..identities.len() {
        for j in (i + 1)..identities.len() {
            if identities[i].unique_id == identities[j].unique_id {
                diagnostics.push(format!(
                    "duplicate channel unique id '{}'",
                    identities[i].unique_id
                ));
            }
        }
    }

    // Group key -> member channel indices, insertion-ordered per group.
    let mut membership: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (index, identity) in identities.iter().enumerate() {
        for key in [&identity.owning_account, &identity.unique_id] {
            let members = membership.entry(key.clone()).or_default();
            if !members.contains(&index) {
                members.push(index);
            }
        }
    }

    // Groups resolve in file order, so a group may build on earlier ones.
    for group in &config.groups {
        let mut members = membership.get(&group.name).cloned().unwrap_or_default();
        for key in &group.channels {
            let Some(more) = membership.get(key) else {
                diagnostics.push(format!(
                    "group '{}' references unknown key '{key}'",
                    group.name
                ));
                continue;
            };
            for &member in more {
                if !members.contains(&member) {
                    members.push(member);
                }
            }
        }
        membership.insert(group.name.clone(), members);
    }

    let edges: Vec<Vec<String>> = config
        .channels
        .iter()
        .enumerate()
        .map(|(index, channel)| {
            let mut listens = Vec::new();
            for key in &channel.listens_to {
                let Some(members) = membership.get(key) else {
                    diagnostics.push(format!(
                        "channel '{}' listens to unknown key '{key}'",
                        identities[index].unique_id
                    ));
                    continue;
                };
                for &member in members {
                    let id = identities[member].unique_id.clone();
                    if !listens.contains(&id) {
                        listens.push(id);
                    }
                }
            }
            listens
        })
        .collect();
    for (identity, listens) in identities.iter_mut().zip(edges) {
        identity.listens_to = listens;
    }

    (identities.into_iter().map(Arc::new).collect(), diagnostics)
}

/// Cross-checks between accounts and channels that only matter at startup.
pub fn validate(config: &RawConfig, identities: &[Arc<ChannelIdentity>]) -> Vec<String> {
    let mut diagnostics = Vec::new();

    for identity in identities {
        match identity.side {
            Side::Kol | Side::Internal => {
                if !config
                    .accounts
                    .iter()
                    .any(|a| a.username == identity.owning_account)
                {
                    diagnostics.push(format!(
                        "channel '{}' is owned by '{}' but no such account is configured",
                        identity.unique_id, identity.owning_account
                    ));
                }
            }
            Side::Remote => {
                if !config
                    .remotes
                    .iter()
                    .any(|r| r.name == identity.owning_account)
                {
                    diagnostics.push(format!(
                        "channel '{}' is owned by '{}' but no such remote relay is configured",
                        identity.unique_id, identity.owning_account
                    ));
                }
            }
            Side::Discord => {
                if identity.channel_id.is_none() {
                    diagnostics.push(format!(
                        "discord channel '{}' has no channel_id",
                        identity.unique_id
                    ));
                }
                if config.discord.is_none() {
                    diagnostics.push(format!(
                        "channel '{}' needs the discord token, which is not configured",
                        identity.unique_id
                    ));
                }
            }
        }
    }

    for account in &config.accounts {
        if !identities
            .iter()
            .any(|i| i.owning_account == account.username)
        {
            diagnostics.push(format!(
                "account '{}' has no channels and will not be started",
                account.username
            ));
        }
    }

    for remote in &config.remotes {
        if !identities.iter().any(|i| i.owning_account == remote.name) {
            diagnostics.push(format!(
                "remote relay '{}' has no channels and will not be started",
                remote.name
            ));
        }
    }

    diagnostics
}
