//! Channel adapter for one game account: wires the client, the poll loop,
//! and the sequential processor into the router.

use std::{sync::Arc, time::Duration};

use {
    anyhow::Result,
    async_trait::async_trait,
    tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    tokio::time::MissedTickBehavior,
    tracing::{info, warn},
};

use {
    kolbridge_common::types::{AccountMode, ChannelIdentity, ChatMessage, Side},
    kolbridge_router::{ChannelAdapter, Router},
};

use crate::{
    client::{KolClient, human_readable_time},
    processor::{KolProcessor, SYNTHETIC_CHANNELS},
    wire::RawChatMessage,
};

const POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Channels that gate who can speak in them; outbound relay is allowed
/// only into these.
const PRIVATE_CHANNELS: [&str; 4] = ["clan", "hobopolis", "dread", "slimetube"];

pub struct KolChatAdapter {
    client: Arc<KolClient>,
    router: Arc<Router>,
    channels: Vec<Arc<ChannelIdentity>>,
    mode: AccountMode,
    queue_tx: UnboundedSender<RawChatMessage>,
    queue_rx: std::sync::Mutex<Option<UnboundedReceiver<RawChatMessage>>>,
}

impl KolChatAdapter {
    pub fn new(
        client: Arc<KolClient>,
        router: Arc<Router>,
        channels: Vec<Arc<ChannelIdentity>>,
        mode: AccountMode,
    ) -> Arc<Self> {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            client,
            router,
            channels,
            mode,
            queue_tx,
            queue_rx: std::sync::Mutex::new(Some(queue_rx)),
        })
    }

    /// Game channels this account should listen to server-side. Synthetic
    /// channels exist only inside the bridge and are never joined.
    fn configured_channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self
            .channels
            .iter()
            .filter(|c| c.side == Side::Kol && !SYNTHETIC_CHANNELS.contains(&c.holder_id.as_str()))
            .map(|c| c.holder_id.clone())
            .collect();
        channels.dedup();
        channels
    }

    fn sendable(&self, target: &ChannelIdentity, message: &ChatMessage) -> bool {
        if matches!(message.exclusive_to, Some(side) if side != Side::Kol) {
            return false;
        }
        if self.mode != AccountMode::Clan {
            info!(
                user = self.client.username(),
                target = %target.unique_id,
                "listen-only account, dropping outbound message"
            );
            return false;
        }
        if !PRIVATE_CHANNELS.contains(&target.holder_id.as_str()) {
            warn!(
                user = self.client.username(),
                channel = %target.holder_id,
                "refusing to relay into a public channel"
            );
            return false;
        }
        true
    }
}

#[async_trait]
impl ChannelAdapter for KolChatAdapter {
    fn id(&self) -> &str {
        self.client.username()
    }

    fn owns_channel(&self, identity: &ChannelIdentity) -> bool {
        self.channels.iter().any(|c| c.as_ref() == identity)
    }

    async fn send(&self, target: &ChannelIdentity, message: &ChatMessage) -> Result<()> {
        if !self.sendable(target, message) {
            return Ok(());
        }
        self.client
            .send_channel_message(
                &target.holder_id,
                &message.message.kol_prefix,
                &message.message.kol_message,
            )
            .await;
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

        let processor = KolProcessor::new(
            Arc::clone(&self.client),
            Arc::clone(&self.router),
            self.channels.clone(),
        );
        tokio::spawn(processor.run(queue_rx));

        let client = Arc::clone(&self.client);
        let queue_tx = self.queue_tx.clone();
        let mode = self.mode;
        let configured = self.configured_channels();
        tokio::spawn(async move {
            info!(user = client.username(), "starting account");
            client.log_in().await;

            // Public accounts listen to everything they can join; clan
            // accounts reconcile to their configured set.
            let desired = if mode == AccountMode::Public {
                client.get_channels().await.unwrap_or_default()
            } else {
                configured
            };
            if let Err(error) = client.sync_channel_listens(&desired).await {
                warn!(user = client.username(), %error, "channel sync failed");
            }

            let rollover = client.seconds_to_rollover().await;
            info!(
                user = client.username(),
                "next rollover is in {}",
                human_readable_time(rollover)
            );
            info!(user = client.username(), "initial setup complete, polling messages");

            let mut ticker = tokio::time::interval(POLL_INTERVAL);
            // A slow fetch delays the next tick instead of stacking polls.
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                for message in client.fetch_new_messages().await {
                    if queue_tx.send(message).is_err() {
                        return;
                    }
                }
            }
        });

        Ok(())
    }
}
