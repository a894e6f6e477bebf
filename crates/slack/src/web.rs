//! Slack Web API client.
//!
//! Every call goes through [`SlackWebClient::call`], which applies one retry policy:
//! HTTP 429 and `ratelimited` responses honour `Retry-After` (capped), 5xx and
//! connect/timeout failures back off exponentially, and everything else is returned
//! to the caller as a [`ChatError`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use mockops_core::chat::{ChatError, ChatHistory};
use mockops_core::config::{RetryConfig, SlackConfig};
use mockops_core::domain::message::{ChatMessage, MessageTs, UserProfile};

use crate::blocks::MessageTemplate;

const THREAD_PAGE_SIZE: u32 = 200;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 4, base_delay_ms: 500, max_delay_ms: 60_000 }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry that follows `attempt` (1-based).
    pub fn delay(&self, attempt: u32, retry_after_secs: Option<u64>) -> Duration {
        let delay_ms = match retry_after_secs {
            Some(seconds) => seconds.saturating_mul(1_000),
            None => {
                let exponent = attempt.saturating_sub(1).min(16);
                self.base_delay_ms.saturating_mul(1_u64 << exponent)
            }
        };
        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PostedMessage {
    pub channel_id: String,
    pub ts: String,
}

/// Outbound side of the chat backend.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    async fn post_message(
        &self,
        channel_id: &str,
        thread_ts: Option<&str>,
        message: &MessageTemplate,
    ) -> Result<PostedMessage, ChatError>;

    async fn update_message(
        &self,
        channel_id: &str,
        ts: &str,
        message: &MessageTemplate,
    ) -> Result<PostedMessage, ChatError>;
}

enum Payload<'a> {
    Query(&'a [(&'a str, String)]),
    Json(&'a Value),
}

enum AttemptOutcome {
    Done(Value),
    Fatal(ChatError),
    Retry { error: ChatError, retry_after_secs: Option<u64> },
}

pub struct SlackWebClient {
    http: reqwest::Client,
    api_base: String,
    bot_token: SecretString,
    app_token: SecretString,
    retry: RetryPolicy,
}

impl SlackWebClient {
    pub fn new(config: &SlackConfig) -> Result<Self, ChatError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("mockops/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()
            .map_err(|error| ChatError::Transport(error.to_string()))?;

        Ok(Self {
            http,
            api_base: config.api_base_url.trim_end_matches('/').to_owned(),
            bot_token: config.bot_token.clone(),
            app_token: config.app_token.clone(),
            retry: RetryPolicy::from(&config.retry),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Asks Slack for a fresh Socket Mode WebSocket URL (`apps.connections.open`).
    pub async fn open_socket_url(&self) -> Result<String, ChatError> {
        let body = json!({});
        let response =
            self.call("apps.connections.open", &self.app_token, Payload::Json(&body)).await?;
        response
            .get("url")
            .and_then(Value::as_str)
            .filter(|url| !url.trim().is_empty())
            .map(str::to_owned)
            .ok_or_else(|| ChatError::Decode("apps.connections.open returned no url".to_owned()))
    }

    async fn call(
        &self,
        method: &str,
        token: &SecretString,
        payload: Payload<'_>,
    ) -> Result<Value, ChatError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0_u32;
        loop {
            attempt += 1;
            let (error, retry_after_secs) = match self.attempt(method, token, &payload).await {
                AttemptOutcome::Done(value) => return Ok(value),
                AttemptOutcome::Fatal(error) => return Err(error),
                AttemptOutcome::Retry { error, retry_after_secs } => (error, retry_after_secs),
            };

            if attempt >= max_attempts {
                warn!(
                    event_name = "egress.slack.retries_exhausted",
                    method,
                    attempts = attempt,
                    error = %error,
                    "slack api call gave up"
                );
                return Err(error);
            }

            let delay = self.retry.delay(attempt, retry_after_secs);
            warn!(
                event_name = "egress.slack.retry_scheduled",
                method,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "retrying slack api call"
            );
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }

    async fn attempt(
        &self,
        method: &str,
        token: &SecretString,
        payload: &Payload<'_>,
    ) -> AttemptOutcome {
        let url = format!("{}/{method}", self.api_base);
        let request = match payload {
            Payload::Query(params) => self.http.get(&url).query(params),
            Payload::Json(body) => self.http.post(&url).json(body),
        }
        .bearer_auth(token.expose_secret());

        let response = match request.send().await {
            Ok(response) => response,
            Err(error) => {
                let chat_error = ChatError::Transport(error.to_string());
                if error.is_timeout() || error.is_connect() {
                    return AttemptOutcome::Retry { error: chat_error, retry_after_secs: None };
                }
                return AttemptOutcome::Fatal(chat_error);
            }
        };

        let status = response.status();
        let retry_after_secs = parse_retry_after(response.headers());
        if status == StatusCode::TOO_MANY_REQUESTS {
            return AttemptOutcome::Retry {
                error: ChatError::RateLimited { retry_after_secs: retry_after_secs.unwrap_or(0) },
                retry_after_secs,
            };
        }
        if status.is_server_error() {
            return AttemptOutcome::Retry {
                error: ChatError::api(method, format!("http {}", status.as_u16())),
                retry_after_secs,
            };
        }
        if !status.is_success() {
            return AttemptOutcome::Fatal(ChatError::api(
                method,
                format!("http {}", status.as_u16()),
            ));
        }

        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(error) => return AttemptOutcome::Fatal(ChatError::Decode(error.to_string())),
        };
        if body.get("ok").and_then(Value::as_bool) == Some(true) {
            debug!(event_name = "egress.slack.call_succeeded", method, "slack api call succeeded");
            return AttemptOutcome::Done(body);
        }

        let error = body.get("error").and_then(Value::as_str).unwrap_or("unknown_error");
        if error == "ratelimited" {
            return AttemptOutcome::Retry {
                error: ChatError::RateLimited { retry_after_secs: retry_after_secs.unwrap_or(0) },
                retry_after_secs,
            };
        }
        AttemptOutcome::Fatal(ChatError::api(method, error))
    }

    async fn conversations_history_single(
        &self,
        channel_id: &str,
        ts: &MessageTs,
    ) -> Result<Option<ChatMessage>, ChatError> {
        let params = [
            ("channel", channel_id.to_owned()),
            ("latest", ts.to_string()),
            ("oldest", ts.to_string()),
            ("inclusive", "true".to_owned()),
            ("limit", "1".to_owned()),
        ];
        let body =
            self.call("conversations.history", &self.bot_token, Payload::Query(&params)).await?;
        let page: MessagePage = decode("conversations.history", body)?;
        Ok(page.messages.into_iter().map(ApiMessage::into_message).find(|message| message.ts == *ts))
    }

    async fn replies_page(
        &self,
        channel_id: &str,
        root_ts: &MessageTs,
        cursor: Option<&str>,
    ) -> Result<MessagePage, ChatError> {
        let mut params = vec![
            ("channel", channel_id.to_owned()),
            ("ts", root_ts.to_string()),
            ("inclusive", "true".to_owned()),
            ("limit", THREAD_PAGE_SIZE.to_string()),
        ];
        if let Some(cursor) = cursor {
            params.push(("cursor", cursor.to_owned()));
        }
        let body =
            self.call("conversations.replies", &self.bot_token, Payload::Query(&params)).await?;
        decode("conversations.replies", body)
    }
}

#[async_trait]
impl ChatHistory for SlackWebClient {
    async fn fetch_message(
        &self,
        channel_id: &str,
        ts: &MessageTs,
    ) -> Result<Option<ChatMessage>, ChatError> {
        if let Some(message) = self.conversations_history_single(channel_id, ts).await? {
            return Ok(Some(message));
        }

        // Thread replies are not part of channel history unless broadcast.
        match self.replies_page(channel_id, ts, None).await {
            Ok(page) => Ok(page
                .messages
                .into_iter()
                .map(ApiMessage::into_message)
                .find(|message| message.ts == *ts)),
            Err(ChatError::Api { error, .. }) if error == "thread_not_found" => Ok(None),
            Err(error) => Err(error),
        }
    }

    async fn fetch_thread(
        &self,
        channel_id: &str,
        root_ts: &MessageTs,
    ) -> Result<Vec<ChatMessage>, ChatError> {
        let mut messages = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self.replies_page(channel_id, root_ts, cursor.as_deref()).await?;
            messages.extend(page.messages.into_iter().map(ApiMessage::into_message));

            cursor = page
                .response_metadata
                .and_then(|metadata| metadata.next_cursor)
                .filter(|cursor| !cursor.is_empty());
            if cursor.is_none() {
                break;
            }
        }

        messages.sort_by(|left, right| left.ts.cmp(&right.ts));
        messages.dedup_by(|left, right| left.ts == right.ts);
        Ok(messages)
    }

    async fn fetch_user(&self, user_id: &str) -> Result<Option<UserProfile>, ChatError> {
        let params = [("user", user_id.to_owned())];
        let body = match self.call("users.info", &self.bot_token, Payload::Query(&params)).await {
            Ok(body) => body,
            Err(ChatError::Api { error, .. }) if error == "user_not_found" => return Ok(None),
            Err(error) => return Err(error),
        };
        let info: UserInfoResponse = decode("users.info", body)?;
        Ok(Some(info.user.into_profile()))
    }

    async fn bot_user_id(&self) -> Result<String, ChatError> {
        let body = json!({});
        let response = self.call("auth.test", &self.bot_token, Payload::Json(&body)).await?;
        response
            .get("user_id")
            .and_then(Value::as_str)
            .filter(|id| !id.trim().is_empty())
            .map(str::to_owned)
            .ok_or_else(|| ChatError::Decode("auth.test returned no user_id".to_owned()))
    }
}

#[async_trait]
impl MessagePublisher for SlackWebClient {
    async fn post_message(
        &self,
        channel_id: &str,
        thread_ts: Option<&str>,
        message: &MessageTemplate,
    ) -> Result<PostedMessage, ChatError> {
        let mut body = json!({
            "channel": channel_id,
            "text": message.fallback_text,
            "blocks": message.blocks,
            "unfurl_links": false,
            "unfurl_media": false,
        });
        if let Some(thread_ts) = thread_ts {
            body["thread_ts"] = Value::String(thread_ts.to_owned());
        }
        let response = self.call("chat.postMessage", &self.bot_token, Payload::Json(&body)).await?;
        posted("chat.postMessage", &response, channel_id, None)
    }

    async fn update_message(
        &self,
        channel_id: &str,
        ts: &str,
        message: &MessageTemplate,
    ) -> Result<PostedMessage, ChatError> {
        let body = json!({
            "channel": channel_id,
            "ts": ts,
            "text": message.fallback_text,
            "blocks": message.blocks,
        });
        let response = self.call("chat.update", &self.bot_token, Payload::Json(&body)).await?;
        posted("chat.update", &response, channel_id, Some(ts))
    }
}

fn posted(
    method: &str,
    response: &Value,
    channel_id: &str,
    fallback_ts: Option<&str>,
) -> Result<PostedMessage, ChatError> {
    let ts = response
        .get("ts")
        .and_then(Value::as_str)
        .or(fallback_ts)
        .ok_or_else(|| ChatError::Decode(format!("{method} response missing ts")))?;
    let channel_id = response.get("channel").and_then(Value::as_str).unwrap_or(channel_id);
    Ok(PostedMessage { channel_id: channel_id.to_owned(), ts: ts.to_owned() })
}

fn decode<T: serde::de::DeserializeOwned>(method: &str, body: Value) -> Result<T, ChatError> {
    serde_json::from_value(body).map_err(|error| ChatError::Decode(format!("{method}: {error}")))
}

fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
}

#[derive(Debug, Deserialize)]
struct MessagePage {
    #[serde(default)]
    messages: Vec<ApiMessage>,
    #[serde(default)]
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Deserialize)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    ts: String,
    #[serde(default)]
    thread_ts: Option<String>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    bot_id: Option<String>,
    #[serde(default)]
    text: String,
}

impl ApiMessage {
    fn into_message(self) -> ChatMessage {
        ChatMessage {
            ts: MessageTs::from(self.ts),
            thread_ts: self.thread_ts.map(MessageTs::from),
            user_id: self.user,
            bot_id: self.bot_id,
            text: self.text,
        }
    }
}

#[derive(Debug, Deserialize)]
struct UserInfoResponse {
    user: ApiUser,
}

#[derive(Debug, Deserialize)]
struct ApiUser {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    real_name: Option<String>,
    #[serde(default)]
    profile: Option<ApiUserProfile>,
}

#[derive(Debug, Deserialize)]
struct ApiUserProfile {
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    real_name: Option<String>,
}

impl ApiUser {
    fn into_profile(self) -> UserProfile {
        let (display_name, profile_real_name) = match self.profile {
            Some(profile) => (profile.display_name, profile.real_name),
            None => (None, None),
        };
        UserProfile {
            id: self.id,
            name: self.name,
            real_name: self.real_name.or(profile_real_name),
            display_name,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use mockops_core::chat::{ChatError, ChatHistory};
    use mockops_core::config::AppConfig;
    use mockops_core::domain::message::MessageTs;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::{MessagePublisher, RetryPolicy, SlackWebClient};
    use crate::blocks::notice_message;

    fn client(server: &MockServer) -> SlackWebClient {
        let mut config = AppConfig::default().slack;
        config.api_base_url = server.uri();
        config.bot_token = "xoxb-test".to_owned().into();
        config.app_token = "xapp-test".to_owned().into();
        SlackWebClient::new(&config)
            .expect("client")
            .with_retry(RetryPolicy { max_attempts: 3, base_delay_ms: 1, max_delay_ms: 5 })
    }

    #[test]
    fn retry_delay_grows_and_is_capped() {
        let policy = RetryPolicy { max_attempts: 4, base_delay_ms: 500, max_delay_ms: 60_000 };
        assert_eq!(policy.delay(1, None), Duration::from_millis(500));
        assert_eq!(policy.delay(3, None), Duration::from_millis(2_000));
        assert_eq!(policy.delay(1, Some(7)), Duration::from_secs(7));
        assert_eq!(policy.delay(1, Some(600)), Duration::from_secs(60));
        assert_eq!(policy.delay(40, None), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn retries_rate_limit_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth.test"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth.test"))
            .and(header("authorization", "Bearer xoxb-test"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"ok": true, "user_id": "U-BOT"})),
            )
            .mount(&server)
            .await;

        let bot = client(&server).bot_user_id().await.expect("auth.test after retry");
        assert_eq!(bot, "U-BOT");
    }

    #[tokio::test]
    async fn ratelimited_body_is_retried_until_exhausted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth.test"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"ok": false, "error": "ratelimited"})),
            )
            .expect(3)
            .mount(&server)
            .await;

        let error = client(&server).bot_user_id().await.expect_err("should give up");
        assert_eq!(error, ChatError::RateLimited { retry_after_secs: 0 });
    }

    #[tokio::test]
    async fn api_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat.update"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"ok": false, "error": "message_not_found"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let error = client(&server)
            .update_message("C1", "1.0", &notice_message("n.v1", "hi"))
            .await
            .expect_err("update should fail");
        assert_eq!(error, ChatError::api("chat.update", "message_not_found"));
    }

    #[tokio::test]
    async fn server_errors_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat.postMessage"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat.postMessage"))
            .and(body_partial_json(json!({
                "channel": "C1",
                "thread_ts": "1000.000000",
                "text": "hello",
                "unfurl_links": false
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"ok": true, "channel": "C1", "ts": "1001.000000"})),
            )
            .mount(&server)
            .await;

        let posted = client(&server)
            .post_message("C1", Some("1000.000000"), &notice_message("n.v1", "hello"))
            .await
            .expect("post after retry");
        assert_eq!(posted.ts, "1001.000000");
    }

    #[tokio::test]
    async fn fetch_message_falls_back_to_thread_replies() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/conversations.history"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"ok": true, "messages": []})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/conversations.replies"))
            .and(query_param("ts", "1001.000000"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "messages": [
                    {"ts": "1000.000000", "thread_ts": "1000.000000", "user": "U1", "text": "root"},
                    {"ts": "1001.000000", "thread_ts": "1000.000000", "user": "U2", "text": "reply"}
                ]
            })))
            .mount(&server)
            .await;

        let message = client(&server)
            .fetch_message("C1", &MessageTs::from("1001.000000"))
            .await
            .expect("fetch")
            .expect("reply should be found");
        assert_eq!(message.thread_ts, Some(MessageTs::from("1000.000000")));
        assert!(!message.is_thread_root());
    }

    #[tokio::test]
    async fn fetch_thread_follows_cursor() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/conversations.replies"))
            .and(query_param("cursor", "page-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "messages": [{"ts": "1002.000000", "thread_ts": "1000.000000", "bot_id": "B1", "text": "bot"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/conversations.replies"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "messages": [
                    {"ts": "1000.000000", "thread_ts": "1000.000000", "user": "U1", "text": "root"},
                    {"ts": "1001.000000", "thread_ts": "1000.000000", "user": "U2", "text": "reply"}
                ],
                "response_metadata": {"next_cursor": "page-2"}
            })))
            .mount(&server)
            .await;

        let thread = client(&server)
            .fetch_thread("C1", &MessageTs::from("1000.000000"))
            .await
            .expect("thread");
        let stamps: Vec<&str> = thread.iter().map(|message| message.ts.as_str()).collect();
        assert_eq!(stamps, vec!["1000.000000", "1001.000000", "1002.000000"]);
        assert_eq!(thread[2].bot_id.as_deref(), Some("B1"));
    }

    #[tokio::test]
    async fn users_info_maps_profile_and_missing_user() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users.info"))
            .and(query_param("user", "U1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "user": {"id": "U1", "name": "ann", "profile": {"display_name": "ann.lee", "real_name": "Ann Lee"}}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/users.info"))
            .and(query_param("user", "U404"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"ok": false, "error": "user_not_found"})),
            )
            .mount(&server)
            .await;

        let client = client(&server);
        let profile = client.fetch_user("U1").await.expect("users.info").expect("profile");
        assert_eq!(profile.preferred_name(), Some("ann.lee"));
        assert_eq!(profile.real_name.as_deref(), Some("Ann Lee"));
        assert_eq!(client.fetch_user("U404").await.expect("users.info"), None);
    }

    #[tokio::test]
    async fn socket_url_uses_app_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/apps.connections.open"))
            .and(header("authorization", "Bearer xapp-test"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"ok": true, "url": "wss://example.test/link"})),
            )
            .mount(&server)
            .await;

        let url = client(&server).open_socket_url().await.expect("socket url");
        assert_eq!(url, "wss://example.test/link");
    }
}
