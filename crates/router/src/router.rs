use std::sync::{Arc, RwLock};

use {
    futures::future::{BoxFuture, FutureExt, join_all},
    rand::Rng,
    tracing::{debug, warn},
};

use {
    kolbridge_common::types::{
        ChannelFlag, ChannelIdentity, ChatMessage, ModeratorName, Side,
    },
    kolbridge_format::{MessageClass, format_message},
};

use crate::adapter::ChannelAdapter;

/// One canned-response rule. Trigger matching is case-insensitive substring
/// search; rule order is significant (first match wins).
#[derive(Debug, Clone)]
pub struct ResponseTrigger {
    pub trigger: String,
    pub replies: Vec<String>,
}

/// Owns the channel identity set, the listens-to graph, and the static
/// response/ignore tables. Adapters register themselves after construction,
/// which is what breaks the router ⇄ account-client reference cycle.
pub struct Router {
    identities: Vec<Arc<ChannelIdentity>>,
    adapters: RwLock<Vec<Arc<dyn ChannelAdapter>>>,
    responses: Vec<ResponseTrigger>,
    /// Lowercased sender names whose messages are never relayed.
    ignored_relays: Vec<String>,
    moderator_names: RwLock<Vec<ModeratorName>>,
}

impl Router {
    pub fn new(
        identities: Vec<Arc<ChannelIdentity>>,
        responses: Vec<ResponseTrigger>,
        ignored_relays: Vec<String>,
        moderator_names: Vec<ModeratorName>,
    ) -> Self {
        Self {
            identities,
            adapters: RwLock::new(Vec::new()),
            responses,
            ignored_relays: ignored_relays
                .into_iter()
                .map(|s| s.to_lowercase())
                .collect(),
            moderator_names: RwLock::new(moderator_names),
        }
    }

    pub fn register_adapter(&self, adapter: Arc<dyn ChannelAdapter>) {
        self.adapters
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(adapter);
    }

    pub fn identities(&self) -> &[Arc<ChannelIdentity>] {
        &self.identities
    }

    /// Look an identity up by its holder/channel pair (how the Discord
    /// handler maps guild+channel ids back to configuration).
    pub fn identity_for(
        &self,
        holder_id: &str,
        channel_id: Option<&str>,
    ) -> Option<Arc<ChannelIdentity>> {
        self.identities
            .iter()
            .find(|identity| {
                identity.holder_id == holder_id
                    && identity.channel_id.as_deref() == channel_id
            })
            .cloned()
    }

    pub fn is_ignored_relay(&self, sender: &str) -> bool {
        self.ignored_relays.contains(&sender.to_lowercase())
    }

    pub fn moderator_name(&self, id: &str) -> Option<ModeratorName> {
        self.moderator_names
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|m| m.id == id)
            .cloned()
    }

    pub fn cache_moderator_name(&self, entry: ModeratorName) {
        let mut names = self
            .moderator_names
            .write()
            .unwrap_or_else(|e| e.into_inner());
        if !names.iter().any(|m| m.id == entry.id) {
            names.push(entry);
        }
    }

    /// The sole gate against self-routing and unauthorized fan-out: a
    /// channel never listens to itself, even when misconfiguration puts
    /// its own id in its listens-to set.
    pub fn is_listening_to(receiver: &ChannelIdentity, sender: &ChannelIdentity) -> bool {
        if receiver == sender {
            return false;
        }
        receiver.listens_to.iter().any(|id| *id == sender.unique_id)
    }

    /// Case-insensitive first-match trigger lookup; one reply is picked
    /// uniformly at random and `{name}` is substituted with the sender.
    pub fn lookup_response(&self, text: &str, sender_name: &str) -> Option<String> {
        let haystack = text.to_lowercase();
        for rule in &self.responses {
            if !haystack.contains(&rule.trigger.to_lowercase()) {
                continue;
            }
            if rule.replies.is_empty() {
                return None;
            }
            let pick = rand::rng().random_range(0..rule.replies.len());
            return Some(rule.replies[pick].replace("{name}", sender_name));
        }
        None
    }

    fn resolve_adapter(&self, target: &ChannelIdentity) -> Option<Arc<dyn ChannelAdapter>> {
        self.adapters
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|adapter| adapter.owns_channel(target))
            .cloned()
    }

    /// Best-effort delivery to a single target. Failures are logged, never
    /// escalated; one bad destination must not block the rest.
    async fn send_to(&self, target: &ChannelIdentity, message: &ChatMessage) {
        let Some(adapter) = self.resolve_adapter(target) else {
            warn!(target = %target.unique_id, "no adapter owns channel, skipping delivery");
            return;
        };

        if let Err(e) = adapter.send(target, message).await {
            warn!(
                target = %target.unique_id,
                adapter = adapter.id(),
                error = %e,
                "failed to deliver message"
            );
        }
    }

    /// Fan a message out to every identity listening to its origin, then
    /// optionally apply an auto-response.
    ///
    /// The response step waits for every fan-out attempt to settle
    /// (success or failure alike) before firing, and re-routes the
    /// response with `allow_responses = false` — responses never trigger
    /// further responses.
    pub fn route<'a>(
        &'a self,
        message: &'a ChatMessage,
        allow_responses: bool,
    ) -> BoxFuture<'a, ()> {
        async move {
            let targets: Vec<&Arc<ChannelIdentity>> = self
                .identities
                .iter()
                .filter(|identity| Self::is_listening_to(identity, &message.from))
                .collect();

            debug!(
                from = %message.from.unique_id,
                targets = targets.len(),
                "routing message"
            );

            // All-settled barrier: send_to never errors out.
            join_all(
                targets
                    .iter()
                    .map(|target| self.send_to(target, message)),
            )
            .await;

            if !allow_responses || !message.from.has_flag(ChannelFlag::Responses) {
                return;
            }

            let text = &message.message.kol_message;
            let Some(reply) = self.lookup_response(text, &message.sender) else {
                return;
            };

            let response = ChatMessage {
                from: Arc::clone(&message.from),
                sender: message.from.owning_account.clone(),
                message: format_message(
                    &message.from.owning_account,
                    &reply,
                    Some(MessageClass::Normal),
                    false,
                    Side::Internal,
                ),
                exclusive_to: None,
            };

            // Echo to the originating channel, then to everyone listening
            // to it.
            self.send_to(&message.from, &response).await;
            self.route(&response, false).await;
        }
        .boxed()
    }
}
