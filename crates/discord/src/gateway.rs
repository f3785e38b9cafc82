//! Serenity gateway listener: receives guild messages and feeds them into
//! the router after inbound cleanup.

use std::sync::{Arc, Mutex};

use {
    once_cell::sync::Lazy,
    regex::Regex,
    serenity::{
        all::{Context, EventHandler, GatewayIntents, Message, Ready},
        async_trait,
        http::Http,
    },
    tracing::{debug, info},
};

use {
    kolbridge_common::types::ChatMessage,
    kolbridge_format::{MessageClass, format_message},
    kolbridge_router::Router,
};

static CUSTOM_EMOJI: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"<a?(:[A-Za-z0-9_]+:)\d+>").expect("custom emoji regex")
});

/// The HTTP client serenity hands us on `ready`, needed for direct channel
/// sends outside the event loop.
#[derive(Default)]
pub struct SharedHttp {
    inner: Mutex<Option<Arc<Http>>>,
}

impl SharedHttp {
    pub fn set(&self, http: Arc<Http>) {
        *self.inner.lock().unwrap_or_else(|e| e.into_inner()) = Some(http);
    }

    pub fn get(&self) -> Option<Arc<Http>> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Gateway intents the relay needs: guild messages with content, member
/// data for nicknames, and webhook/moderation events.
pub fn intents() -> GatewayIntents {
    GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::GUILD_MESSAGE_TYPING
        | GatewayIntents::GUILD_MEMBERS
        | GatewayIntents::GUILD_MODERATION
        | GatewayIntents::MESSAGE_CONTENT
        | GatewayIntents::GUILD_WEBHOOKS
        | GatewayIntents::DIRECT_MESSAGES
}

/// Normalize a raw Discord message body for relaying.
///
/// Italic-markup messages (`*waves*`, `_waves_`) become emotes with the
/// markers stripped. Smart quotes are folded to ASCII so the game's
/// encoder does not turn them into `?`, custom emoji references are
/// reduced to their `:name:` form, and doubled spaces are collapsed.
/// Returns `None` when nothing displayable remains.
pub fn clean_inbound(content: &str) -> Option<(String, Option<MessageClass>)> {
    let mut text = content.trim().to_string();
    if text.is_empty() {
        return None;
    }

    let mut class = None;
    let bytes = text.as_bytes();
    if bytes.len() >= 2
        && matches!(bytes[0], b'_' | b'*')
        && matches!(bytes[bytes.len() - 1], b'_' | b'*')
    {
        text = text[1..text.len() - 1].trim().to_string();
        class = Some(MessageClass::Emote);
    }

    text = text
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");
    text = CUSTOM_EMOJI.replace_all(&text, "$1").into_owned();
    while text.contains("  ") {
        text = text.replace("  ", " ");
    }

    if text.is_empty() {
        return None;
    }
    Some((text, class))
}

/// Serenity event handler bridging gateway traffic into the router.
pub struct DiscordListener {
    router: Arc<Router>,
    http: Arc<SharedHttp>,
}

impl DiscordListener {
    pub fn new(router: Arc<Router>, http: Arc<SharedHttp>) -> Self {
        Self { router, http }
    }
}

#[async_trait]
impl EventHandler for DiscordListener {
    async fn ready(&self, ctx: Context, ready: Ready) {
        self.http.set(ctx.http.clone());
        info!(user = %ready.user.name, "discord gateway connected");
    }

    async fn message(&self, _ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }
        let Some(guild_id) = msg.guild_id else {
            return;
        };
        let Some(identity) = self
            .router
            .identity_for(&guild_id.to_string(), Some(&msg.channel_id.to_string()))
        else {
            return;
        };

        let sender = msg
            .member
            .as_ref()
            .and_then(|member| member.nick.clone())
            .or_else(|| msg.author.global_name.clone())
            .unwrap_or_else(|| msg.author.name.clone());

        if self.router.is_ignored_relay(&sender) {
            return;
        }

        let Some((text, class)) = clean_inbound(&msg.content) else {
            return;
        };

        debug!(channel = %identity.unique_id, sender = %sender, "inbound discord message");

        let relayed = ChatMessage {
            from: identity,
            sender: sender.clone(),
            message: format_message(
                &sender,
                &text,
                class.or(Some(MessageClass::Normal)),
                true,
                kolbridge_common::types::Side::Discord,
            ),
            exclusive_to: None,
        };
        self.router.route(&relayed, true).await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn plain_message_passes_through() {
        let (text, class) = clean_inbound("hello there").unwrap();
        assert_eq!(text, "hello there");
        assert!(class.is_none());
    }

    #[test]
    fn italic_markup_becomes_emote() {
        let (text, class) = clean_inbound("*waves at the clan*").unwrap();
        assert_eq!(text, "waves at the clan");
        assert_eq!(class, Some(MessageClass::Emote));

        let (text, class) = clean_inbound("_lurks_").unwrap();
        assert_eq!(text, "lurks");
        assert_eq!(class, Some(MessageClass::Emote));
    }

    #[test]
    fn smart_quotes_folded_to_ascii() {
        let (text, _) = clean_inbound("\u{201C}sure\u{201D} it\u{2019}s fine").unwrap();
        assert_eq!(text, "\"sure\" it's fine");
    }

    #[test]
    fn custom_emoji_reduced_to_name() {
        let (text, _) = clean_inbound("nice one <:meat_stack:123456789> <a:spin:99>").unwrap();
        assert_eq!(text, "nice one :meat_stack: :spin:");
    }

    #[test]
    fn repeated_spaces_collapsed() {
        let (text, _) = clean_inbound("a    b  c").unwrap();
        assert_eq!(text, "a b c");
    }

    #[test]
    fn empty_and_marker_only_bodies_dropped() {
        assert!(clean_inbound("   ").is_none());
        assert!(clean_inbound("**").is_none());
    }
}
