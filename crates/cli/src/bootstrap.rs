//! Process wiring: build the router and one adapter per configured backend
//! from loaded settings.

use std::sync::Arc;

use {
    anyhow::Result,
    tracing::{info, warn},
};

use {
    kolbridge_common::types::{AccountMode, Side},
    kolbridge_config::Settings,
    kolbridge_discord::DiscordAdapter,
    kolbridge_kol::{DEFAULT_BASE_URL, KolChatAdapter, KolClient, RemoteChatAdapter},
    kolbridge_router::{ChannelAdapter, ResponseTrigger, Router},
};

pub struct Bridge {
    pub router: Arc<Router>,
    pub adapters: Vec<Arc<dyn ChannelAdapter>>,
}

/// Construct the router and every adapter, and register the adapters.
/// Nothing connects anywhere yet; that happens in [`start`].
pub fn build(settings: &Settings) -> Result<Bridge> {
    let responses = settings
        .responses
        .iter()
        .map(|rule| ResponseTrigger {
            trigger: rule.trigger.clone(),
            replies: rule.replies.clone(),
        })
        .collect();
    let router = Arc::new(Router::new(
        settings.identities.clone(),
        responses,
        settings.ignore_chat.clone(),
        settings.moderators.clone(),
    ));

    let mut adapters: Vec<Arc<dyn ChannelAdapter>> = Vec::new();

    if let Some(discord) = &settings.discord {
        adapters.push(DiscordAdapter::new(discord.token.clone(), Arc::clone(&router)));
    } else if settings.identities.iter().any(|i| i.side == Side::Discord) {
        warn!("discord channels configured but no discord token present");
    }

    for remote in &settings.remotes {
        let owned: Vec<_> = settings
            .identities
            .iter()
            .filter(|identity| identity.owning_account == remote.name)
            .cloned()
            .collect();
        if owned.is_empty() {
            info!(remote = %remote.name, "no channels use this relay feed, skipping");
            continue;
        }
        adapters.push(RemoteChatAdapter::new(
            &remote.name,
            &remote.base_url,
            Arc::clone(&router),
            owned,
        )?);
    }

    for account in &settings.accounts {
        let owned: Vec<_> = settings
            .identities
            .iter()
            .filter(|identity| identity.owning_account == account.username)
            .cloned()
            .collect();
        if owned.is_empty() {
            info!(user = %account.username, "no channels use this account, skipping");
            continue;
        }
        if account.mode == AccountMode::Ignore {
            info!(user = %account.username, "account mode is ignore, not starting");
            continue;
        }

        let client = Arc::new(KolClient::new(
            DEFAULT_BASE_URL,
            &account.username,
            account.password.clone(),
            &account.main_channel,
        )?);
        adapters.push(KolChatAdapter::new(
            client,
            Arc::clone(&router),
            owned,
            account.mode,
        ));
    }

    for adapter in &adapters {
        router.register_adapter(Arc::clone(adapter));
    }

    Ok(Bridge { router, adapters })
}

/// Bring every adapter up: gateway connection, logins, poll loops.
pub async fn start(bridge: &Bridge) -> Result<()> {
    for adapter in &bridge.adapters {
        info!(adapter = adapter.id(), "starting adapter");
        adapter.start().await?;
    }
    Ok(())
}
