//! Sequential consumer for polled chat messages.
//!
//! Everything the poller fetches lands in one queue and is processed
//! strictly in order, one message at a time. While the queue is empty the
//! processor doubles as the account's idle maintenance loop.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use {
    tokio::sync::mpsc::UnboundedReceiver,
    tokio::time::timeout,
    tracing::{debug, warn},
};

use {
    kolbridge_common::types::{ChannelIdentity, ChatMessage, ModeratorName, Side},
    kolbridge_format::{
        MessageClass, MessageType, format_message, is_rollover_notice, remove_emote_prefix,
        strip_html,
    },
    kolbridge_router::Router,
};

use crate::{
    client::{EffectCleanup, KolClient},
    wire::RawChatMessage,
};

const IDLE_POLL: Duration = Duration::from_secs(1);
const STATUS_CHECK_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Sender id the server uses for its broadcast radio. Never relayed.
const RADIO_SENTINEL_ID: &str = "-69";

/// Messages that arrive without a channel get filed under one of these
/// synthetic channels so operators can subscribe to them like any other.
pub const SYNTHETIC_CHANNELS: [&str; 2] = ["system", "rollover"];

fn kind_of(message: &RawChatMessage) -> Option<MessageType> {
    message.kind.as_deref().and_then(MessageType::parse)
}

/// Channel a channelless message belongs to, synthetic ones included.
pub(crate) fn resolve_channel(message: &RawChatMessage) -> Option<String> {
    if let Some(channel) = &message.channel {
        return Some(channel.clone());
    }
    if kind_of(message) == Some(MessageType::System) {
        let body = message.msg.as_deref().unwrap_or_default();
        return Some(
            if is_rollover_notice(body) { "rollover" } else { "system" }.to_string(),
        );
    }
    None
}

/// Format-code class for public messages; everything else renders with
/// the default template.
pub(crate) fn classify(message: &RawChatMessage) -> Option<MessageClass> {
    if kind_of(message) != Some(MessageType::Public) {
        return None;
    }
    MessageClass::from_format_code(message.format.as_deref())
}

pub(crate) fn is_radio_sentinel(message: &RawChatMessage) -> bool {
    message
        .who
        .as_ref()
        .and_then(|w| w.id.as_deref())
        .is_some_and(|id| id == RADIO_SENTINEL_ID)
}

pub struct KolProcessor {
    client: Arc<KolClient>,
    router: Arc<Router>,
    /// Channels this account relays, synthetic ones included.
    channels: Vec<Arc<ChannelIdentity>>,
    next_status_check: Option<Instant>,
}

impl KolProcessor {
    pub fn new(
        client: Arc<KolClient>,
        router: Arc<Router>,
        channels: Vec<Arc<ChannelIdentity>>,
    ) -> Self {
        Self {
            client,
            router,
            channels,
            next_status_check: None,
        }
    }

    /// Drain the queue until the sending half is dropped. An empty queue
    /// backs off for a second and gives idle maintenance a chance to run.
    pub async fn run(mut self, mut queue: UnboundedReceiver<RawChatMessage>) {
        loop {
            match timeout(IDLE_POLL, queue.recv()).await {
                Ok(Some(message)) => self.process(message).await,
                Ok(None) => break,
                Err(_) => self.idle_maintenance().await,
            }
        }
    }

    /// Hourly account upkeep, only while nothing is being processed and
    /// the server is up.
    async fn idle_maintenance(&mut self) {
        if self.client.is_down() {
            return;
        }
        if matches!(self.next_status_check, Some(at) if Instant::now() < at) {
            return;
        }
        self.next_status_check = Some(Instant::now() + STATUS_CHECK_INTERVAL);

        match self.client.remove_bad_effects().await {
            Ok(Some(cleanup)) => self.announce_cleanup(cleanup).await,
            Ok(None) => {}
            Err(error) => debug!(user = %self.client.username(), %error, "effect sweep failed"),
        }
        if let Err(error) = self.client.check_fortune_teller().await {
            debug!(user = %self.client.username(), %error, "fortune teller check failed");
        }
    }

    async fn announce_cleanup(&self, cleanup: EffectCleanup) {
        let text = match cleanup {
            EffectCleanup::Removed { removed, total } => format!(
                "Removed {removed} of {total} bad chat effects from {}",
                self.client.player_name()
            ),
            EffectCleanup::OutOfAntidotes => format!(
                "Oh no! A bot is out of Soft green echo eyedrop antidote! Could someone send some to `{}`?",
                self.client.player_name()
            ),
        };
        self.send_bot_notice(&text).await;
    }

    /// Post a notice as the bot itself through the account's home channel.
    async fn send_bot_notice(&self, text: &str) {
        let Some(home) = self
            .channels
            .iter()
            .find(|c| c.holder_id == self.client.main_channel())
        else {
            warn!(user = %self.client.username(), text, "no home channel for bot notice");
            return;
        };
        let sender = self.client.player_name();
        let rendered = format_message(&sender, text, Some(MessageClass::Bot), false, Side::Internal);
        let notice = ChatMessage {
            from: Arc::clone(home),
            sender,
            message: rendered,
            exclusive_to: None,
        };
        self.router.route(&notice, true).await;
    }

    async fn process(&mut self, message: RawChatMessage) {
        if is_radio_sentinel(&message) {
            return;
        }

        // Event side effects run even for messages that are then dropped.
        if kind_of(&message) == Some(MessageType::Event) {
            let body = message.msg.as_deref().unwrap_or_default();
            if body.contains("<!--refresh-->") {
                self.send_bot_notice(&strip_html(body)).await;
                match self.client.remove_bad_effects().await {
                    Ok(Some(cleanup)) => self.announce_cleanup(cleanup).await,
                    Ok(None) => {}
                    Err(error) => {
                        debug!(user = %self.client.username(), %error, "effect sweep failed");
                    }
                }
            }
            if body.contains("href='clan_viplounge.php?preaction") {
                if let Err(error) = self.client.check_fortune_teller().await {
                    debug!(user = %self.client.username(), %error, "fortune teller check failed");
                }
            }
        }

        let Some(channel_name) = resolve_channel(&message) else {
            return;
        };
        let (Some(who), Some(body)) = (&message.who, &message.msg) else {
            return;
        };
        let who_name = who.name.clone().unwrap_or_default();
        if who_name.eq_ignore_ascii_case(&self.client.player_name()) {
            return;
        }

        let Some(identity) = self
            .channels
            .iter()
            .find(|c| c.holder_id == channel_name)
        else {
            return;
        };

        let mut sender = strip_html(&who_name);
        if self.router.is_ignored_relay(&sender) {
            return;
        }

        let class = classify(&message);
        if class == Some(MessageClass::Event) {
            return;
        }

        // Moderator posts carry an id but an unhelpful generic name.
        if matches!(
            class,
            Some(MessageClass::ModWarning | MessageClass::ModAnnouncement)
        ) {
            if let Some(id) = who.id.as_deref() {
                sender = self.resolve_moderator(id).await;
            }
        }

        let mut body = body.clone();
        if class == Some(MessageClass::Emote) {
            body = remove_emote_prefix(&sender, &body);
        }

        let rendered = format_message(&sender, &body, class, false, Side::Kol);
        let relayed = ChatMessage {
            from: Arc::clone(identity),
            sender,
            message: rendered,
            exclusive_to: None,
        };
        self.router.route(&relayed, true).await;
    }

    /// "Name (#id)" when the id resolves, "#id" otherwise. Lookups hit
    /// the server once and are cached for the process lifetime.
    async fn resolve_moderator(&self, id: &str) -> String {
        if let Some(known) = self.router.moderator_name(id) {
            return format!("{} (#{})", known.name, known.id);
        }
        if id.chars().all(|c| c.is_ascii_digit()) {
            if let Some(name) = self.client.lookup_player_name(id).await {
                self.router.cache_moderator_name(ModeratorName {
                    id: id.to_string(),
                    name: name.clone(),
                });
                return format!("{name} (#{id})");
            }
        }
        format!("#{id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::ChatUser;

    fn raw(kind: &str, channel: Option<&str>, msg: &str) -> RawChatMessage {
        RawChatMessage {
            kind: Some(kind.to_string()),
            channel: channel.map(str::to_string),
            msg: Some(msg.to_string()),
            ..RawChatMessage::default()
        }
    }

    #[test]
    fn channelless_system_messages_get_synthetic_channels() {
        let maintenance = raw(
            "system",
            None,
            "The system will go down for nightly maintenance in 5 minutes.",
        );
        assert_eq!(resolve_channel(&maintenance).as_deref(), Some("rollover"));

        let notice = raw("system", None, "Server three is back online.");
        assert_eq!(resolve_channel(&notice).as_deref(), Some("system"));

        let public = raw("public", Some("clan"), "hello");
        assert_eq!(resolve_channel(&public).as_deref(), Some("clan"));

        let event = raw("event", None, "something happened");
        assert_eq!(resolve_channel(&event), None);
    }

    #[test]
    fn only_public_messages_classify() {
        let mut message = raw("public", Some("clan"), "hi");
        message.format = Some("1".to_string());
        assert_eq!(classify(&message), Some(MessageClass::Emote));

        let mut system = raw("system", None, "hi");
        system.format = Some("1".to_string());
        assert_eq!(classify(&system), None);
    }

    #[test]
    fn radio_sentinel_detected() {
        let mut message = raw("public", None, "gizmofinch just thwarted wardeath11!");
        message.who = Some(ChatUser {
            name: Some("HMC Radio".to_string()),
            id: Some("-69".to_string()),
        });
        assert!(is_radio_sentinel(&message));

        message.who = Some(ChatUser {
            name: Some("Irrat".to_string()),
            id: Some("3469406".to_string()),
        });
        assert!(!is_radio_sentinel(&message));
        assert!(!is_radio_sentinel(&raw("public", None, "x")));
    }
}
