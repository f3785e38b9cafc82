//! Listen-only backend for a relay service that re-serves game chat as
//! JSON. No login, no session: one cursor-driven poll loop feeding the
//! same sequential drain the direct client uses.

use std::{
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};

use {
    anyhow::Result,
    async_trait::async_trait,
    reqwest::{StatusCode, header},
    tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    tokio::time::MissedTickBehavior,
    tracing::{debug, info, warn},
};

use {
    kolbridge_common::types::{ChannelIdentity, ChatMessage, Side},
    kolbridge_format::{MessageClass, format_message, remove_emote_prefix, strip_html},
    kolbridge_router::{ChannelAdapter, Router},
};

use crate::{
    error::{self, Context},
    processor::{classify, is_radio_sentinel, resolve_channel},
    wire::{ChatPoll, RawChatMessage},
};

const POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Fetch side: holds the cursor and builds the `/messages` query.
struct RemotePoller {
    http: reqwest::Client,
    base_url: String,
    /// Comma-joined channel names the relay is asked to filter on.
    channel_query: String,
    cursor: StdMutex<Option<String>>,
}

impl RemotePoller {
    async fn fetch_new_messages(&self) -> error::Result<Vec<RawChatMessage>> {
        let mid = self
            .cursor
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let mut request = self
            .http
            .get(format!("{}/messages", self.base_url))
            .header(header::ACCEPT, "application/json")
            .query(&[("channel", self.channel_query.as_str())]);
        if let Some(mid) = &mid {
            request = request.query(&[("mid", mid.as_str())]);
        }
        let response = request.send().await?;
        if response.status() != StatusCode::OK {
            return Ok(Vec::new());
        }
        let poll: ChatPoll = response
            .json()
            .await
            .context("remote relay returned a malformed poll body")?;
        if let Some(last) = &poll.last {
            *self.cursor.lock().unwrap_or_else(|e| e.into_inner()) = Some(last.clone());
        }
        Ok(poll.msgs)
    }
}

/// Drain side: the direct client's relay path minus everything that needs
/// a logged-in account (no self echo to skip, no whois lookups, no event
/// side effects).
struct RemoteProcessor {
    router: Arc<Router>,
    channels: Vec<Arc<ChannelIdentity>>,
}

impl RemoteProcessor {
    async fn run(self, mut queue: UnboundedReceiver<RawChatMessage>) {
        while let Some(message) = queue.recv().await {
            self.process(message).await;
        }
    }

    async fn process(&self, message: RawChatMessage) {
        if is_radio_sentinel(&message) {
            return;
        }
        let Some(channel_name) = resolve_channel(&message) else {
            return;
        };
        let (Some(who), Some(body)) = (&message.who, &message.msg) else {
            return;
        };
        let Some(identity) = self
            .channels
            .iter()
            .find(|c| c.holder_id == channel_name)
        else {
            return;
        };

        let mut sender = strip_html(&who.name.clone().unwrap_or_default());
        if self.router.is_ignored_relay(&sender) {
            return;
        }

        let class = classify(&message);
        if class == Some(MessageClass::Event) {
            return;
        }

        // No account behind this feed, so mod ids resolve from the
        // router's cache or fall back to "#id".
        if matches!(
            class,
            Some(MessageClass::ModWarning | MessageClass::ModAnnouncement)
        ) {
            if let Some(id) = who.id.as_deref() {
                sender = match self.router.moderator_name(id) {
                    Some(known) => format!("{} (#{})", known.name, known.id),
                    None => format!("#{id}"),
                };
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
}

/// Channel adapter over one remote relay feed. Owns the `Side::Remote`
/// channels configured against it; outbound messages are dropped.
pub struct RemoteChatAdapter {
    name: String,
    poller: Arc<RemotePoller>,
    router: Arc<Router>,
    channels: Vec<Arc<ChannelIdentity>>,
    queue_tx: UnboundedSender<RawChatMessage>,
    queue_rx: StdMutex<Option<UnboundedReceiver<RawChatMessage>>>,
}

impl RemoteChatAdapter {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        router: Arc<Router>,
        channels: Vec<Arc<ChannelIdentity>>,
    ) -> error::Result<Arc<Self>> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        let mut names: Vec<&str> = channels
            .iter()
            .filter(|c| c.side == Side::Remote)
            .map(|c| c.holder_id.as_str())
            .collect();
        names.dedup();
        let poller = Arc::new(RemotePoller {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            channel_query: names.join(","),
            cursor: StdMutex::new(None),
        });
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Ok(Arc::new(Self {
            name: name.into(),
            poller,
            router,
            channels,
            queue_tx,
            queue_rx: StdMutex::new(Some(queue_rx)),
        }))
    }
}

#[async_trait]
impl ChannelAdapter for RemoteChatAdapter {
    fn id(&self) -> &str {
        &self.name
    }

    fn owns_channel(&self, identity: &ChannelIdentity) -> bool {
        self.channels.iter().any(|c| c.as_ref() == identity)
    }

    async fn send(&self, target: &ChannelIdentity, _message: &ChatMessage) -> Result<()> {
        debug!(
            remote = %self.name,
            target = %target.unique_id,
            "read-only relay feed, dropping outbound message"
        );
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        let Some(queue_rx) = self
            .queue_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        else {
            return Ok(());
        };

        let processor = RemoteProcessor {
            router: Arc::clone(&self.router),
            channels: self.channels.clone(),
        };
        tokio::spawn(processor.run(queue_rx));

        let poller = Arc::clone(&self.poller);
        let queue_tx = self.queue_tx.clone();
        let name = self.name.clone();
        tokio::spawn(async move {
            info!(remote = %name, url = %poller.base_url, "starting remote relay poll");
            // The first fetch only advances the cursor; history before
            // startup is not replayed.
            if let Err(error) = poller.fetch_new_messages().await {
                warn!(remote = %name, %error, "initial cursor fetch failed");
            }
            let mut ticker = tokio::time::interval(POLL_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match poller.fetch_new_messages().await {
                    Ok(messages) => {
                        for message in messages {
                            if queue_tx.send(message).is_err() {
                                return;
                            }
                        }
                    }
                    Err(error) => warn!(remote = %name, %error, "remote poll failed"),
                }
            }
        });

        Ok(())
    }
}
