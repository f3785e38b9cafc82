//! Rate-limited webhook delivery.
//!
//! Every distinct endpoint gets its own strictly-ordered FIFO queue. A 429
//! response parks the request in the queue and schedules a drain for the
//! provider's `retry_after`; the drain retries queued requests in order.
//! A second 429 on a forced retry is a hard error for that caller rather
//! than another wait, so a persistently over-limit sender hears about it.
//! At most one request per endpoint is in flight at any time.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    async_trait::async_trait,
    reqwest::StatusCode,
    serde_json::{Value, json},
    tokio::sync::oneshot,
    tracing::{debug, warn},
};

use crate::error::{Context, Error, Result};

/// One webhook message: either plain content or a single embed, posted
/// under a per-message username and avatar.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebhookPayload {
    pub username: Option<String>,
    pub avatar_url: Option<String>,
    pub content: Option<String>,
    pub embed_title: Option<String>,
    pub embed_color: Option<u32>,
    pub embed_description: Option<String>,
}

impl WebhookPayload {
    pub fn has_embed(&self) -> bool {
        self.embed_title.is_some() || self.embed_description.is_some()
    }

    fn to_json(&self) -> String {
        let mut body = serde_json::Map::new();
        if let Some(username) = &self.username {
            body.insert("username".into(), json!(username));
        }
        if let Some(avatar) = &self.avatar_url {
            body.insert("avatar_url".into(), json!(avatar));
        }
        if let Some(content) = &self.content {
            body.insert("content".into(), json!(content));
        }
        if self.has_embed() {
            let mut embed = serde_json::Map::new();
            if let Some(title) = &self.embed_title {
                embed.insert("title".into(), json!(title));
            }
            if let Some(description) = &self.embed_description {
                embed.insert("description".into(), json!(description));
            }
            if let Some(color) = self.embed_color {
                embed.insert("color".into(), json!(color));
            }
            body.insert("embeds".into(), json!([embed]));
        }
        // Relayed text must never ping anyone on the destination side.
        body.insert("allowed_mentions".into(), json!({}));
        Value::Object(body).to_string()
    }
}

/// The raw HTTP leg, separated so queue behavior is testable without a
/// server.
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    /// Deliver one payload; `Err(RateLimited)` on a 429.
    async fn deliver(&self, url: &str, payload_json: &str) -> Result<String>;
}

struct HttpTransport {
    http: reqwest::Client,
}

#[async_trait]
impl WebhookTransport for HttpTransport {
    async fn deliver(&self, url: &str, payload_json: &str) -> Result<String> {
        let response = self
            .http
            .post(format!("{url}?wait=true"))
            .form(&[("payload_json", payload_json)])
            .send()
            .await?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            let body: Value = response.json().await.unwrap_or(Value::Null);
            let seconds = body
                .get("retry_after")
                .and_then(Value::as_f64)
                .unwrap_or(1.0);
            return Err(Error::RateLimited(Duration::from_secs_f64(seconds)));
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::message(format!("webhook returned {status}: {body}")));
        }

        let body: Value = response.json().await?;
        Ok(body
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }
}

struct Queued {
    payload_json: String,
    reply: oneshot::Sender<Result<String>>,
}

#[derive(Default)]
struct QueueState {
    items: VecDeque<Queued>,
    /// A drain is scheduled or running for this endpoint.
    scheduled: bool,
}

struct PosterInner {
    transport: Box<dyn WebhookTransport>,
    queues: Mutex<HashMap<String, QueueState>>,
}

/// Shared webhook poster; cheap to clone.
#[derive(Clone)]
pub struct WebhookPoster {
    inner: Arc<PosterInner>,
}

impl Default for WebhookPoster {
    fn default() -> Self {
        Self::new()
    }
}

impl WebhookPoster {
    pub fn new() -> Self {
        Self::with_transport(Box::new(HttpTransport {
            http: reqwest::Client::new(),
        }))
    }

    pub fn with_transport(transport: Box<dyn WebhookTransport>) -> Self {
        Self {
            inner: Arc::new(PosterInner {
                transport,
                queues: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Post one payload, waiting out a rate limit if the endpoint is
    /// throttled. Returns the provider-assigned message id. Non-429
    /// failures surface immediately.
    pub async fn post(&self, url: &str, payload: &WebhookPayload) -> Result<String> {
        let payload_json = payload.to_json();
        match self.inner.transport.deliver(url, &payload_json).await {
            Err(Error::RateLimited(delay)) => {
                debug!(url, ?delay, "webhook rate limited, queueing");
                self.enqueue(url, payload_json, delay).await
            }
            other => other,
        }
    }

    async fn enqueue(&self, url: &str, payload_json: String, delay: Duration) -> Result<String> {
        let (reply, settled) = oneshot::channel();
        let schedule_drain = {
            let mut queues = self.inner.queues.lock().unwrap_or_else(|e| e.into_inner());
            let state = queues.entry(url.to_string()).or_default();
            state.items.push_back(Queued { payload_json, reply });
            !std::mem::replace(&mut state.scheduled, true)
        };

        if schedule_drain {
            let poster = self.clone();
            let url = url.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                poster.drain(&url).await;
            });
        }

        settled.await.context("delivery queue dropped the request")?
    }

    /// Retry queued requests for one endpoint in order. Each is a forced
    /// retry: another 429 becomes a hard error for that caller.
    async fn drain(&self, url: &str) {
        loop {
            let next = {
                let mut queues = self.inner.queues.lock().unwrap_or_else(|e| e.into_inner());
                let Some(state) = queues.get_mut(url) else {
                    return;
                };
                match state.items.pop_front() {
                    Some(item) => Some(item),
                    None => {
                        state.scheduled = false;
                        None
                    }
                }
            };
            let Some(item) = next else {
                return;
            };

            let result = match self.inner.transport.deliver(url, &item.payload_json).await {
                Err(Error::RateLimited(_)) => {
                    warn!(url, "rate limited twice on forced retry");
                    Err(Error::message(
                        "rate limited twice; try to keep the send rate below the limit",
                    ))
                }
                other => other,
            };
            let _ = item.reply.send(result);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use tokio::time::Instant;

    use super::*;

    /// Plays back a per-URL script of responses, then succeeds forever.
    struct ScriptedTransport {
        script: StdMutex<HashMap<String, VecDeque<Result<String>>>>,
        delivered: Arc<StdMutex<Vec<String>>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<(&str, Vec<Result<String>>)>) -> Box<Self> {
            Self::with_log(script, Arc::new(StdMutex::new(Vec::new())))
        }

        fn with_log(
            script: Vec<(&str, Vec<Result<String>>)>,
            log: Arc<StdMutex<Vec<String>>>,
        ) -> Box<Self> {
            Box::new(Self {
                script: StdMutex::new(
                    script
                        .into_iter()
                        .map(|(url, responses)| (url.to_string(), responses.into()))
                        .collect(),
                ),
                delivered: log,
            })
        }
    }

    #[async_trait]
    impl WebhookTransport for ScriptedTransport {
        async fn deliver(&self, url: &str, payload_json: &str) -> Result<String> {
            self.delivered.lock().unwrap().push(payload_json.to_string());
            self.script
                .lock()
                .unwrap()
                .get_mut(url)
                .and_then(VecDeque::pop_front)
                .unwrap_or(Ok("ok".to_string()))
        }
    }

    fn payload(content: &str) -> WebhookPayload {
        WebhookPayload {
            content: Some(content.to_string()),
            ..WebhookPayload::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_request_retries_after_the_advertised_delay() {
        let transport = ScriptedTransport::new(vec![(
            "https://hook/a",
            vec![
                Err(Error::RateLimited(Duration::from_secs(2))),
                Ok("42".to_string()),
            ],
        )]);
        let poster = WebhookPoster::with_transport(transport);

        let started = Instant::now();
        let id = poster.post("https://hook/a", &payload("hello")).await.unwrap();
        assert_eq!(id, "42");
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn other_endpoints_unaffected_by_a_throttled_one() {
        let transport = ScriptedTransport::new(vec![(
            "https://hook/a",
            vec![Err(Error::RateLimited(Duration::from_secs(2)))],
        )]);
        let poster = WebhookPoster::with_transport(transport);

        let slow_payload = payload("slow");
        let slow = poster.post("https://hook/a", &slow_payload);
        let fast = async {
            let started = Instant::now();
            let result = poster.post("https://hook/b", &payload("fast")).await;
            (result, started.elapsed())
        };
        let (slow_result, (fast_result, fast_elapsed)) = tokio::join!(slow, fast);

        assert!(slow_result.is_ok());
        assert!(fast_result.is_ok());
        assert!(fast_elapsed < Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn queued_requests_drain_in_order() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let transport = ScriptedTransport::with_log(
            vec![(
                "https://hook/a",
                vec![
                    Err(Error::RateLimited(Duration::from_secs(1))),
                    Err(Error::RateLimited(Duration::from_secs(1))),
                ],
            )],
            Arc::clone(&log),
        );
        let poster = WebhookPoster::with_transport(transport);

        let first_payload = payload("first");
        let second_payload = payload("second");
        let (first, second) = tokio::join!(
            poster.post("https://hook/a", &first_payload),
            poster.post("https://hook/a", &second_payload),
        );
        assert!(first.is_ok());
        assert!(second.is_ok());

        // Two throttled direct attempts, then one ordered drain pass.
        let deliveries = log.lock().unwrap().clone();
        assert_eq!(deliveries.len(), 4);
        assert!(deliveries[2].contains("first"));
        assert!(deliveries[3].contains("second"));
    }

    #[tokio::test(start_paused = true)]
    async fn second_rate_limit_on_forced_retry_is_a_hard_error() {
        let transport = ScriptedTransport::new(vec![(
            "https://hook/a",
            vec![
                Err(Error::RateLimited(Duration::from_secs(1))),
                Err(Error::RateLimited(Duration::from_secs(1))),
                Ok("never".to_string()),
            ],
        )]);
        let poster = WebhookPoster::with_transport(transport);

        let result = poster.post("https://hook/a", &payload("hello")).await;
        let error = result.unwrap_err().to_string();
        assert!(error.contains("rate limited twice"), "got: {error}");
    }

    #[tokio::test]
    async fn http_transport_parses_ids_and_rate_limits() {
        let mut server = mockito::Server::new_async().await;
        let _ok = server
            .mock("POST", "/hooks/ok")
            .match_query(mockito::Matcher::UrlEncoded("wait".into(), "true".into()))
            .with_body(r#"{"id":"123456"}"#)
            .create_async()
            .await;
        let _throttled = server
            .mock("POST", "/hooks/throttled")
            .match_query(mockito::Matcher::Any)
            .with_status(429)
            .with_body(r#"{"message":"You are being rate limited.","retry_after":2.5}"#)
            .create_async()
            .await;

        let transport = HttpTransport {
            http: reqwest::Client::new(),
        };
        let id = transport
            .deliver(&format!("{}/hooks/ok", server.url()), "{}")
            .await
            .unwrap();
        assert_eq!(id, "123456");

        let error = transport
            .deliver(&format!("{}/hooks/throttled", server.url()), "{}")
            .await
            .unwrap_err();
        assert!(
            matches!(error, Error::RateLimited(d) if d == Duration::from_secs_f64(2.5)),
            "got: {error}"
        );
    }

    #[test]
    fn payload_serialization() {
        let json: Value = serde_json::from_str(
            &WebhookPayload {
                username: Some("Irrat".into()),
                avatar_url: Some("https://img/icon.png".into()),
                content: Some("[Irrat] hi".into()),
                ..WebhookPayload::default()
            }
            .to_json(),
        )
        .unwrap();
        assert_eq!(json["username"], "Irrat");
        assert_eq!(json["content"], "[Irrat] hi");
        assert_eq!(json["allowed_mentions"], json!({}));
        assert!(json.get("embeds").is_none());

        let embed: Value = serde_json::from_str(
            &WebhookPayload {
                embed_title: Some("Mod Warning".into()),
                embed_color: Some(0xE74C3C),
                embed_description: Some("be nice".into()),
                ..WebhookPayload::default()
            }
            .to_json(),
        )
        .unwrap();
        assert_eq!(embed["embeds"][0]["title"], "Mod Warning");
        assert_eq!(embed["embeds"][0]["color"], 0x00E7_4C3C);
        assert!(embed.get("content").is_none());
    }
}
