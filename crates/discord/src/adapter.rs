//! Discord delivery backend: webhook posts where a channel has one
//! configured, direct bot messages otherwise.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use {
    async_trait::async_trait,
    secrecy::{ExposeSecret, Secret},
    serenity::all::{
        ChannelId, Client, CreateAllowedMentions, CreateEmbed, CreateMessage,
    },
    tracing::{error, info, warn},
};

use {
    kolbridge_common::types::{ChannelIdentity, ChatMessage, Side},
    kolbridge_router::{ChannelAdapter, Router},
};

use crate::{
    error::{Context, Result},
    gateway::{self, DiscordListener, SharedHttp},
    webhook::{WebhookPayload, WebhookPoster},
};

pub struct DiscordAdapter {
    token: Secret<String>,
    router: Arc<Router>,
    poster: WebhookPoster,
    http: Arc<SharedHttp>,
    /// Destinations that rejected embeds; once a destination is here it
    /// stays on plain content for the process lifetime.
    no_embeds: Mutex<HashSet<String>>,
}

impl DiscordAdapter {
    pub fn new(token: Secret<String>, router: Arc<Router>) -> Arc<Self> {
        Arc::new(Self {
            token,
            router,
            poster: WebhookPoster::new(),
            http: Arc::new(SharedHttp::default()),
            no_embeds: Mutex::new(HashSet::new()),
        })
    }

    /// Embed suppression is keyed by the actual delivery destination, so
    /// two identities sharing one webhook share the suppression.
    fn suppression_key(target: &ChannelIdentity) -> &str {
        target
            .webhook
            .as_deref()
            .or(target.channel_id.as_deref())
            .unwrap_or(&target.unique_id)
    }

    fn embeds_allowed(&self, target: &ChannelIdentity) -> bool {
        !self
            .no_embeds
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(Self::suppression_key(target))
    }

    fn suppress_embeds(&self, target: &ChannelIdentity) {
        self.no_embeds
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(Self::suppression_key(target).to_string());
    }

    async fn deliver(
        &self,
        target: &ChannelIdentity,
        message: &ChatMessage,
        with_embed: bool,
    ) -> Result<()> {
        let rendered = &message.message;
        let use_embed = with_embed && rendered.embed_description.is_some();

        if let Some(webhook) = target.webhook.as_deref() {
            let payload = if use_embed {
                WebhookPayload {
                    username: target.name.clone(),
                    avatar_url: target.icon.clone(),
                    content: None,
                    embed_title: rendered.embed_title.clone(),
                    embed_color: rendered.embed_color,
                    embed_description: rendered.embed_description.clone(),
                }
            } else {
                WebhookPayload {
                    username: target.name.clone(),
                    avatar_url: target.icon.clone(),
                    content: Some(rendered.discord_message.clone()),
                    embed_title: None,
                    embed_color: None,
                    embed_description: None,
                }
            };
            self.poster.post(webhook, &payload).await?;
            return Ok(());
        }

        let http = self.http.get().context("discord gateway not connected yet")?;
        let raw_id = target
            .channel_id
            .as_deref()
            .context("discord channel has no channel id")?;
        let channel_id = raw_id
            .parse::<u64>()
            .with_context(|| format!("discord channel id '{raw_id}' is not numeric"))?;

        let mut builder =
            CreateMessage::new().allowed_mentions(CreateAllowedMentions::new());
        if use_embed {
            let mut embed = CreateEmbed::new();
            if let Some(title) = &rendered.embed_title {
                embed = embed.title(title);
            }
            if let Some(color) = rendered.embed_color {
                embed = embed.colour(color);
            }
            if let Some(description) = &rendered.embed_description {
                embed = embed.description(description);
            }
            builder = builder.embed(embed);
        } else {
            builder = builder.content(&rendered.discord_message);
        }

        ChannelId::new(channel_id)
            .send_message(&http, builder)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ChannelAdapter for DiscordAdapter {
    fn id(&self) -> &str {
        "discord"
    }

    fn owns_channel(&self, identity: &ChannelIdentity) -> bool {
        identity.side == Side::Discord
    }

    async fn send(&self, target: &ChannelIdentity, message: &ChatMessage) -> anyhow::Result<()> {
        if let Some(side) = message.exclusive_to
            && side != Side::Discord
        {
            return Ok(());
        }

        let with_embed = self.embeds_allowed(target);
        match self.deliver(target, message, with_embed).await {
            Ok(()) => Ok(()),
            Err(e) if with_embed && e.to_string().contains("Missing Permissions") => {
                // Destination disallows embeds; remember that and retry
                // this one message as plain content.
                warn!(
                    target = %target.unique_id,
                    "embeds rejected, falling back to plain content"
                );
                self.suppress_embeds(target);
                Ok(self.deliver(target, message, false).await?)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn start(&self) -> anyhow::Result<()> {
        let listener = DiscordListener::new(Arc::clone(&self.router), Arc::clone(&self.http));
        let mut client = Client::builder(self.token.expose_secret(), gateway::intents())
            .event_handler(listener)
            .await?;
        info!("starting discord gateway client");
        tokio::spawn(async move {
            if let Err(e) = client.start().await {
                error!(error = %e, "discord gateway client stopped");
            }
        });
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use kolbridge_common::types::RenderedMessage;

    use super::*;

    fn identity(webhook: Option<&str>, channel_id: Option<&str>) -> ChannelIdentity {
        ChannelIdentity {
            owning_account: "discord".into(),
            name: Some("clan".into()),
            icon: None,
            side: Side::Discord,
            holder_id: "guild1".into(),
            channel_id: channel_id.map(str::to_string),
            flags: vec![],
            webhook: webhook.map(str::to_string),
            unique_id: "guild1/chan1".into(),
            listens_to: vec![],
        }
    }

    #[test]
    fn suppression_keyed_by_webhook_then_channel() {
        let hooked = identity(Some("https://discord.test/hook"), Some("chan1"));
        let direct = identity(None, Some("chan1"));
        let bare = identity(None, None);
        assert_eq!(
            DiscordAdapter::suppression_key(&hooked),
            "https://discord.test/hook"
        );
        assert_eq!(DiscordAdapter::suppression_key(&direct), "chan1");
        assert_eq!(DiscordAdapter::suppression_key(&bare), "guild1/chan1");
    }

    #[test]
    fn suppression_persists_per_destination() {
        let adapter = DiscordAdapter::new(
            Secret::new("token".into()),
            Arc::new(Router::new(vec![], vec![], vec![], vec![])),
        );
        let shared_hook = identity(Some("https://discord.test/hook"), Some("chan1"));
        let mut sibling = identity(Some("https://discord.test/hook"), Some("chan2"));
        sibling.unique_id = "guild1/chan2".into();
        let other = identity(Some("https://discord.test/other"), None);

        assert!(adapter.embeds_allowed(&shared_hook));
        adapter.suppress_embeds(&shared_hook);
        assert!(!adapter.embeds_allowed(&shared_hook));
        // Same webhook, different identity: shares the suppression.
        assert!(!adapter.embeds_allowed(&sibling));
        assert!(adapter.embeds_allowed(&other));
    }

    fn chat(target: &ChannelIdentity) -> ChatMessage {
        ChatMessage {
            from: Arc::new(target.clone()),
            sender: "Irrat".into(),
            message: RenderedMessage {
                discord_message: "hi".into(),
                ..RenderedMessage::default()
            },
            exclusive_to: None,
        }
    }

    #[tokio::test]
    async fn direct_send_requires_a_connected_gateway() {
        let adapter = DiscordAdapter::new(
            Secret::new("token".into()),
            Arc::new(Router::new(vec![], vec![], vec![], vec![])),
        );
        let target = identity(None, Some("chan1"));
        let error = adapter.deliver(&target, &chat(&target), false).await.unwrap_err();
        assert!(error.to_string().contains("not connected yet"));
    }

    #[tokio::test]
    async fn bad_channel_ids_are_named_in_the_error() {
        let adapter = DiscordAdapter::new(
            Secret::new("token".into()),
            Arc::new(Router::new(vec![], vec![], vec![], vec![])),
        );
        adapter.http.set(Arc::new(serenity::http::Http::new("token")));

        let target = identity(None, Some("not-a-number"));
        let error = adapter.deliver(&target, &chat(&target), false).await.unwrap_err();
        assert!(error.to_string().contains("'not-a-number'"));

        let bare = identity(None, None);
        let error = adapter.deliver(&bare, &chat(&bare), false).await.unwrap_err();
        assert!(error.to_string().contains("no channel id"));
    }

    #[test]
    fn owns_only_discord_side_channels() {
        let adapter = DiscordAdapter::new(
            Secret::new("token".into()),
            Arc::new(Router::new(vec![], vec![], vec![], vec![])),
        );
        let mut kol_side = identity(None, None);
        kol_side.side = Side::Kol;
        assert!(adapter.owns_channel(&identity(None, None)));
        assert!(!adapter.owns_channel(&kol_side));
    }
}
