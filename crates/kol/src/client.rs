//! HTTP client for the game server: login and session upkeep, chat
//! submission, polling, and the account-maintenance endpoints.

use std::{
    sync::{Mutex as StdMutex, RwLock},
    time::{Duration, Instant},
};

use {
    once_cell::sync::Lazy,
    regex::Regex,
    reqwest::{StatusCode, header, redirect::Policy},
    secrecy::{ExposeSecret, Secret},
    serde_json::Value,
    tokio::sync::Mutex,
    tracing::{debug, info, warn},
};

use kolbridge_format::{
    DEFAULT_MESSAGE_LIMIT, encode_to_kol, normalize_outbound, split_message, strip_zero_width,
};

use crate::{
    error::{Error, Result},
    session::{MaintenanceState, Session},
    wire::{ChatPoll, RawChatMessage, StatusSnapshot, inventory_count},
};

pub const DEFAULT_BASE_URL: &str = "https://www.kingdomofloathing.com";

/// `for` parameter sent with API requests, identifying the client.
const CLIENT_IDENT: &str = "kolbridge";
const MAINTENANCE_MARKER: &str = "The system is currently down for nightly maintenance";
const LOGIN_RETRY_DELAY: Duration = Duration::from_secs(60);
const SEND_RETRY_DELAY: Duration = Duration::from_secs(5);
const ANTIDOTE_BEG_COOLDOWN: Duration = Duration::from_secs(12 * 60 * 60);

/// Soft green echo eyedrop antidote, the item that cures chat effects.
const ANTIDOTE_ITEM_ID: &str = "588";

/// Effects that garble outgoing chat, matched by lowercased name.
const BAD_EFFECTS: [&str; 6] = [
    "wanged",
    "emotion sickness",
    "bruised jaw",
    "so much holiday fun!",
    "on safari",
    "harpooned and marooned",
];

static WHOIS_CHANNELS: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r" channel <b>([a-z]+)</b>(?: and listening to <b>(.*?)</b>)?")
        .expect("whois channels regex")
});

static AVAILABLE_CHANNELS: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"<br>&nbsp;&nbsp;([a-z]+)").expect("available channels regex")
});

static WHOIS_NAME: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"<b[^>]*>([^<(]+?)\s*\(#\d+\)</b>").expect("whois name regex")
});

static TESTLOVE_LINK: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"clan_viplounge\.php\?preaction=testlove&testlove=(\d+)")
        .expect("testlove link regex")
});

/// Whether the clan's fortune teller is known to exist. Consulting her is
/// only attempted while the answer is not a confirmed no.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FortuneTeller {
    Untested,
    Exists,
    Missing,
}

/// Outcome of a bad-effect sweep that the caller should announce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectCleanup {
    Removed { removed: usize, total: usize },
    OutOfAntidotes,
}

/// One logged-in game account.
///
/// All mutable state sits behind its own lock: the session under a sync
/// `RwLock` (never held across an await), login and chat submission each
/// under an async mutex so concurrent callers serialize instead of racing
/// the single server-side session.
pub struct KolClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: Secret<String>,
    /// Channel the account parks in; macros are issued through it.
    main_channel: String,
    session: RwLock<Session>,
    maintenance: RwLock<MaintenanceState>,
    fortune_teller: RwLock<FortuneTeller>,
    cursor: RwLock<String>,
    login_lock: Mutex<()>,
    send_lock: Mutex<()>,
    next_login_attempt: StdMutex<Option<Instant>>,
    next_antidote_beg: StdMutex<Option<Instant>>,
}

fn read_lock<'a, T>(lock: &'a RwLock<T>) -> std::sync::RwLockReadGuard<'a, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write_lock<'a, T>(lock: &'a RwLock<T>) -> std::sync::RwLockWriteGuard<'a, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

impl KolClient {
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: Secret<String>,
        main_channel: impl Into<String>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .redirect(Policy::none())
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            username: username.into(),
            password,
            main_channel: main_channel.into(),
            session: RwLock::new(Session::default()),
            maintenance: RwLock::new(MaintenanceState::Unknown),
            fortune_teller: RwLock::new(FortuneTeller::Untested),
            cursor: RwLock::new("0".to_string()),
            login_lock: Mutex::new(()),
            send_lock: Mutex::new(()),
            next_login_attempt: StdMutex::new(None),
            next_antidote_beg: StdMutex::new(None),
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn main_channel(&self) -> &str {
        &self.main_channel
    }

    /// Display name as the server reports it; the configured login name
    /// until the first status probe.
    pub fn player_name(&self) -> String {
        read_lock(&self.session)
            .player_name
            .clone()
            .unwrap_or_else(|| self.username.clone())
    }

    pub fn player_id(&self) -> Option<String> {
        read_lock(&self.session).player_id.clone()
    }

    pub fn is_down(&self) -> bool {
        *read_lock(&self.maintenance) == MaintenanceState::Down
    }

    fn set_maintenance(&self, state: MaintenanceState) {
        *write_lock(&self.maintenance) = state;
    }

    /// Seconds until the next known maintenance window; 0 while down or
    /// when the clock has never been observed.
    pub async fn seconds_to_rollover(&self) -> i64 {
        if self.is_down() {
            return 0;
        }
        let known = read_lock(&self.session).seconds_to_rollover();
        match known {
            Some(s) if s > 0 => s,
            _ => {
                // Clock missing or expired; a status probe refreshes it.
                self.probe_status().await;
                read_lock(&self.session)
                    .seconds_to_rollover()
                    .filter(|s| *s > 0)
                    .unwrap_or(0)
            }
        }
    }

    // ── Session ─────────────────────────────────────────────────────────

    /// Hit the status endpoint with the current cookies. On success the
    /// session's pwd hash, player info, and rollover clock are refreshed.
    async fn probe_status(&self) -> Option<StatusSnapshot> {
        let cookie = read_lock(&self.session).cookie_header()?;
        let url = format!("{}/api.php?what=status&for={CLIENT_IDENT}", self.base_url);
        let response = match self.http.get(&url).header(header::COOKIE, cookie).send().await {
            Ok(r) => r,
            Err(error) => {
                warn!(user = %self.username, %error, "status probe failed");
                return None;
            }
        };
        if response.status() != StatusCode::OK {
            return None;
        }
        let data: Value = response.json().await.ok()?;
        if data.get("pwd").is_none() {
            return None;
        }
        let snapshot = StatusSnapshot::from_value(&data);
        {
            let mut session = write_lock(&self.session);
            session.pwd = snapshot.pwd.clone();
            session.player_id = snapshot.player_id.clone();
            session.player_name = snapshot.player_name.clone();
            if snapshot.rollover.is_some() {
                session.rollover = snapshot.rollover;
            }
        }
        Some(snapshot)
    }

    fn defer_login(&self) {
        *self
            .next_login_attempt
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(Instant::now() + LOGIN_RETRY_DELAY);
    }

    fn login_deferred(&self) -> bool {
        matches!(
            *self
                .next_login_attempt
                .lock()
                .unwrap_or_else(|e| e.into_inner()),
            Some(at) if Instant::now() < at
        )
    }

    /// Ensure the account is logged in. Serialized so concurrent callers
    /// cannot race the server-side session; a cheap status probe short-
    /// circuits the common already-logged-in case. Failures defer the next
    /// attempt by a minute rather than hammering a down server.
    pub async fn log_in(&self) -> bool {
        let _guard = self.login_lock.lock().await;

        if read_lock(&self.session).has_cookies() && !self.is_down() {
            if self.probe_status().await.is_some() {
                self.set_maintenance(MaintenanceState::Up);
                return true;
            }
        }

        if self.login_deferred() {
            return false;
        }

        write_lock(&self.session).clear();

        // The landing page says outright when maintenance is running; an
        // unreachable server is treated the same way.
        let down = match self.http.get(&self.base_url).send().await {
            Ok(response) => response
                .text()
                .await
                .map(|body| body.contains(MAINTENANCE_MARKER))
                .unwrap_or(true),
            Err(error) => {
                warn!(user = %self.username, %error, "landing page unreachable");
                true
            }
        };
        if down {
            info!(user = %self.username, "maintenance in progress, retrying in a minute");
            self.set_maintenance(MaintenanceState::Down);
            self.defer_login();
            return false;
        }
        self.set_maintenance(MaintenanceState::Up);

        info!(user = %self.username, "not logged in, logging in");
        let form = [
            ("loggingin", "Yup."),
            ("loginname", self.username.as_str()),
            ("password", self.password.expose_secret().as_str()),
            ("secure", "0"),
            ("submitbutton", "Log In"),
        ];
        let response = match self
            .http
            .post(format!("{}/login.php", self.base_url))
            .form(&form)
            .send()
            .await
        {
            Ok(r) => r,
            Err(error) => {
                warn!(user = %self.username, %error, "login request failed, retrying in a minute");
                self.set_maintenance(MaintenanceState::Down);
                self.defer_login();
                return false;
            }
        };

        let cookies: Vec<String> = response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok().map(str::to_string))
            .collect();
        if response.status() != StatusCode::FOUND || cookies.is_empty() {
            warn!(user = %self.username, status = %response.status(), "login rejected");
            self.defer_login();
            return false;
        }
        write_lock(&self.session).merge_cookies(cookies.iter().map(String::as_str));

        if self.probe_status().await.is_none() {
            warn!(user = %self.username, "post-login status probe failed");
            self.defer_login();
            return false;
        }

        info!(user = %self.username, "login success");
        true
    }

    // ── Requests ────────────────────────────────────────────────────────

    /// POST a pre-assembled path and query. Response cookies fold back
    /// into the session so the server can rotate them mid-session.
    async fn request(&self, path_and_query: &str) -> Result<reqwest::Response> {
        let url = format!("{}/{path_and_query}", self.base_url);
        let cookie = read_lock(&self.session).cookie_header();
        let mut request = self.http.post(&url);
        if let Some(cookie) = cookie {
            request = request.header(header::COOKIE, cookie);
        }
        let response = request.send().await?;
        let cookies: Vec<String> = response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok().map(str::to_string))
            .collect();
        if !cookies.is_empty() {
            write_lock(&self.session).merge_cookies(cookies.iter().map(String::as_str));
        }
        Ok(response)
    }

    fn build_query(&self, params: &[(&str, &str)], with_pwd: bool) -> String {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        if with_pwd {
            if let Some(pwd) = read_lock(&self.session).pwd.as_deref() {
                serializer.append_pair("pwd", pwd);
            }
        }
        for (key, value) in params {
            serializer.append_pair(key, value);
        }
        serializer.finish()
    }

    fn guard_rollover(&self) -> Result<()> {
        if self.is_down() || read_lock(&self.session).close_to_rollover() {
            return Err(Error::Maintenance);
        }
        Ok(())
    }

    /// Fetch a game page as text.
    pub async fn visit_url(
        &self,
        page: &str,
        params: &[(&str, &str)],
        with_pwd: bool,
    ) -> Result<String> {
        self.guard_rollover()?;
        let query = self.build_query(params, with_pwd);
        let response = self.request(&format!("{page}?{query}")).await?;
        Ok(response.text().await?)
    }

    /// Fetch a game page and parse it as JSON.
    pub async fn visit_url_json(
        &self,
        page: &str,
        params: &[(&str, &str)],
        with_pwd: bool,
    ) -> Result<Value> {
        let body = self.visit_url(page, params, with_pwd).await?;
        Ok(serde_json::from_str(&body)?)
    }

    // ── Chat ────────────────────────────────────────────────────────────

    /// Submit one raw chat line. The endpoint takes its own hand-rolled
    /// encoding for `graf`, so the query is assembled by hand instead of
    /// letting the HTTP client percent-encode it.
    async fn submit_chat(&self, graf: &str) -> Result<Value> {
        self.guard_rollover()?;
        let pwd = read_lock(&self.session).pwd.clone().ok_or(Error::NotLoggedIn)?;
        let _guard = self.send_lock.lock().await;
        let path = format!(
            "submitnewchat.php?pwd={pwd}&j=1&graf={}",
            encode_to_kol(graf)
        );
        let response = self.request(&path).await?;
        Ok(response.json().await.unwrap_or(Value::Null))
    }

    /// Run a chat macro through the account's main channel and return the
    /// server's `output` text.
    pub async fn chat_macro(&self, macro_text: &str) -> Result<String> {
        let result = self
            .submit_chat(&format!("/{} {macro_text}", self.main_channel))
            .await?;
        Ok(result
            .get("output")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    async fn submit_chat_with_retry(&self, graf: &str) {
        if let Err(error) = self.submit_chat(graf).await {
            warn!(user = %self.username, %error, "chat send failed, retrying in 5s");
            tokio::time::sleep(SEND_RETRY_DELAY).await;
            if let Err(error) = self.submit_chat(graf).await {
                warn!(user = %self.username, %error, graf, "chat send failed twice, dropping");
            }
        }
    }

    /// Deliver one relayed message to a chat channel: flatten to a single
    /// line, split into chunks that fit the encoded budget with the prefix
    /// re-applied, and submit each chunk through the channel directive.
    pub async fn send_channel_message(&self, channel: &str, prefix: &str, body: &str) {
        let normalized = normalize_outbound(body);
        let chunk_prefix = if prefix.is_empty() {
            String::new()
        } else {
            format!("{prefix} ")
        };
        for chunk in split_message(&chunk_prefix, &normalized, DEFAULT_MESSAGE_LIMIT) {
            let graf = if channel == self.main_channel {
                chunk
            } else {
                format!("/{channel} {chunk}")
            };
            self.submit_chat_with_retry(&graf).await;
        }
    }

    /// Poll for new chat messages. Ensures the session first; during
    /// maintenance this settles into the one-probe-a-minute login path.
    pub async fn fetch_new_messages(&self) -> Vec<RawChatMessage> {
        if !self.log_in().await {
            return Vec::new();
        }
        let cursor = read_lock(&self.cursor).clone();
        let poll: ChatPoll = match self
            .visit_url_json("newchatmessages.php", &[("j", "1"), ("lasttime", &cursor)], true)
            .await
            .and_then(|v| Ok(serde_json::from_value(v)?))
        {
            Ok(poll) => poll,
            Err(Error::Maintenance) => return Vec::new(),
            Err(error) => {
                warn!(user = %self.username, %error, "chat poll failed");
                return Vec::new();
            }
        };
        if let Some(last) = poll.last {
            *write_lock(&self.cursor) = last;
        }
        poll.msgs
            .into_iter()
            .map(|mut msg| {
                if let Some(body) = msg.msg.take() {
                    msg.msg = Some(strip_zero_width(&body));
                }
                msg
            })
            .collect()
    }

    // ── Channel membership ──────────────────────────────────────────────

    /// Channels the account can join, from the `/channels` listing.
    pub async fn get_channels(&self) -> Result<Vec<String>> {
        let output = self.chat_macro("/channels").await?;
        Ok(parse_available_channels(&output))
    }

    /// Current channel plus everything listened to, current first.
    pub async fn get_channels_listening(&self) -> Result<Vec<String>> {
        let output = self
            .chat_macro(&format!("/whois {}", self.player_name()))
            .await?;
        Ok(parse_whois_channels(&output))
    }

    /// Reconcile server-side listens against the configured channel set.
    /// `/listen` toggles, so one command per difference in either
    /// direction. The channel the account parks in is left alone.
    pub async fn sync_channel_listens(&self, desired: &[String]) -> Result<()> {
        self.chat_macro(&format!("/channel {}", self.main_channel)).await?;

        let available = self.get_channels().await?;
        let listening = self.get_channels_listening().await?;
        let current = listening.first().cloned();

        for channel in listening.iter().skip(1) {
            if !desired.contains(channel) {
                info!(user = %self.username, channel, "dropping listen");
                self.chat_macro(&format!("/listen {channel}")).await?;
            }
        }
        for channel in desired {
            if Some(channel) == current.as_ref()
                || listening.contains(channel)
                || !available.contains(channel)
            {
                continue;
            }
            info!(user = %self.username, channel, "adding listen");
            self.chat_macro(&format!("/listen {channel}")).await?;
        }
        Ok(())
    }

    /// Resolve a player id to a display name via `/whois`.
    pub async fn lookup_player_name(&self, id: &str) -> Option<String> {
        let output = self.chat_macro(&format!("/whois {id}")).await.ok()?;
        parse_whois_name(&output)
    }

    // ── Account upkeep ──────────────────────────────────────────────────

    async fn bad_effects(&self) -> Vec<crate::wire::ActiveEffect> {
        let Some(snapshot) = self.probe_status().await else {
            return Vec::new();
        };
        snapshot
            .effects
            .into_iter()
            .filter(|e| BAD_EFFECTS.contains(&e.name.to_lowercase().as_str()))
            .collect()
    }

    /// Shrug off chat-garbling effects with antidotes from inventory.
    /// Returns what happened when the caller should announce it; begging
    /// for antidotes is throttled to once per half day.
    pub async fn remove_bad_effects(&self) -> Result<Option<EffectCleanup>> {
        let effects = self.bad_effects().await;
        if effects.is_empty() {
            return Ok(None);
        }

        let inventory = self
            .visit_url_json("api.php", &[("what", "inventory"), ("for", CLIENT_IDENT)], true)
            .await?;
        if inventory_count(&inventory, ANTIDOTE_ITEM_ID) < effects.len() as u64 {
            let mut next_beg = self
                .next_antidote_beg
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if matches!(*next_beg, Some(at) if Instant::now() < at) {
                return Ok(None);
            }
            *next_beg = Some(Instant::now() + ANTIDOTE_BEG_COOLDOWN);
            return Ok(Some(EffectCleanup::OutOfAntidotes));
        }

        let total = effects.len();
        for effect in &effects {
            self.visit_url(
                "uneffect.php",
                &[("using", "Yep."), ("whicheffect", &effect.effect_id)],
                true,
            )
            .await?;
        }
        let remaining = self.bad_effects().await.len();
        Ok(Some(EffectCleanup::Removed {
            removed: total.saturating_sub(remaining),
            total,
        }))
    }

    /// Answer any pending clan fortune-teller consultations. Whether the
    /// teller exists at all is probed once and remembered; a confirmed
    /// absence disables the check for the process lifetime.
    pub async fn check_fortune_teller(&self) -> Result<()> {
        if *read_lock(&self.fortune_teller) == FortuneTeller::Missing {
            return Ok(());
        }

        let lounge = self
            .visit_url("clan_viplounge.php", &[("preaction", "lovetester")], true)
            .await?;
        if *read_lock(&self.fortune_teller) == FortuneTeller::Untested
            && lounge.contains("You attempt to sneak into the VIP Lounge")
        {
            *write_lock(&self.fortune_teller) = FortuneTeller::Missing;
            return Ok(());
        }

        let choice = self
            .visit_url("choice.php", &[("forceoption", "0")], true)
            .await?;
        if *read_lock(&self.fortune_teller) == FortuneTeller::Untested
            && choice.contains("Madame Zatara")
        {
            *write_lock(&self.fortune_teller) = FortuneTeller::Exists;
        }

        let consultations = TESTLOVE_LINK
            .captures_iter(&choice)
            .map(|c| c[1].to_string())
            .collect::<Vec<_>>();
        let visits = consultations.iter().map(|user_id| async move {
            self.visit_url(
                "clan_viplounge.php",
                &[
                    ("q1", "beer"),
                    ("q2", "robin"),
                    ("q3", "thin"),
                    ("preaction", "dotestlove"),
                    ("testlove", user_id),
                ],
                true,
            )
            .await
        });
        for result in futures::future::join_all(visits).await {
            if let Err(error) = result {
                debug!(user = %self.username, %error, "fortune teller consultation failed");
            }
        }
        Ok(())
    }
}

fn parse_available_channels(output: &str) -> Vec<String> {
    AVAILABLE_CHANNELS
        .captures_iter(output)
        .map(|c| c[1].to_string())
        .collect()
}

fn parse_whois_channels(output: &str) -> Vec<String> {
    let Some(captures) = WHOIS_CHANNELS.captures(output) else {
        return Vec::new();
    };
    let mut channels = vec![captures[1].to_string()];
    if let Some(listening) = captures.get(2) {
        for channel in listening.as_str().split(", ") {
            for channel in channel.split(" and ") {
                channels.push(channel.to_string());
            }
        }
    }
    channels
}

fn parse_whois_name(output: &str) -> Option<String> {
    WHOIS_NAME
        .captures(output)
        .map(|c| c[1].trim().to_string())
}

/// "H:MM:SS" for startup logs.
pub fn human_readable_time(seconds: i64) -> String {
    let seconds = seconds.max(0);
    format!(
        "{}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}
