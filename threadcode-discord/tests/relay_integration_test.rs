//! Integration tests for the message relay.
//!
//! A mock opencode server stands in for the remote service and an in-memory
//! platform records every reply and typing indicator.

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use threadcode_discord::relay::{ACTIVATED_REPLY, ACTIVATION_FAILED_REPLY, RELAY_ERROR_REPLY};
use threadcode_discord::{
    ChannelError, ChannelResult, InboundMessage, MessageRelay, OpencodeClient, OpencodeError,
    ParentChannel, RelayOutcome, SessionError, ThreadChannel, ThreadReplies,
};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const BOT_ID: &str = "123";

/// In-memory platform with a fixed set of threads.
#[derive(Default)]
struct FakePlatform {
    threads: HashMap<String, ThreadChannel>,
    replies: Mutex<Vec<String>>,
    typing: Mutex<Vec<String>>,
}

impl FakePlatform {
    fn with_thread(thread_id: &str, name: &str, parent: Option<&str>) -> Self {
        let mut threads = HashMap::new();
        threads.insert(
            thread_id.to_string(),
            ThreadChannel {
                id: thread_id.to_string(),
                name: name.to_string(),
                parent: parent.map(|p| ParentChannel {
                    id: format!("parent-{p}"),
                    name: p.to_string(),
                }),
            },
        );
        Self {
            threads,
            ..Default::default()
        }
    }

    fn replies(&self) -> Vec<String> {
        self.replies.lock().unwrap().clone()
    }

    fn typing(&self) -> Vec<String> {
        self.typing.lock().unwrap().clone()
    }
}

#[async_trait]
impl ThreadReplies for FakePlatform {
    async fn resolve_thread(&self, channel_id: &str) -> ChannelResult<Option<ThreadChannel>> {
        if channel_id == "broken" {
            return Err(ChannelError::Connection("lookup failed".into()));
        }
        Ok(self.threads.get(channel_id).cloned())
    }

    async fn reply(&self, _message: &InboundMessage, text: &str) -> ChannelResult<()> {
        self.replies.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn send_typing(&self, channel_id: &str) -> ChannelResult<()> {
        self.typing.lock().unwrap().push(channel_id.to_string());
        Ok(())
    }
}

fn message(channel_id: &str, content: &str) -> InboundMessage {
    InboundMessage {
        id: format!("msg-{}", content.len()),
        channel_id: channel_id.to_string(),
        author_id: "human".into(),
        author_is_bot: false,
        content: content.to_string(),
    }
}

fn relay_for(server: &MockServer) -> MessageRelay {
    MessageRelay::new(Arc::new(OpencodeClient::new(Some(&server.uri()))), BOT_ID)
}

fn prompt_reply(text: &str) -> serde_json::Value {
    json!({
        "info": {"id": "msg_a", "sessionID": "ses_1", "role": "assistant"},
        "parts": [{"type": "step-start"}, {"type": "text", "text": text}]
    })
}

async fn mount_create_session(server: &MockServer, title: &str, directory: &str, times: u64) {
    Mock::given(method("POST"))
        .and(path("/session"))
        .and(header("x-opencode-directory", directory))
        .and(body_json(json!({"title": title, "directory": directory})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "ses_1",
            "title": title,
            "directory": directory
        })))
        .expect(times)
        .mount(server)
        .await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Activation
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_end_to_end_activation_and_reply() {
    let server = MockServer::start().await;
    mount_create_session(&server, "write tests", "/svc/api", 1).await;

    Mock::given(method("POST"))
        .and(path("/session/ses_1/message"))
        .and(header("x-opencode-directory", "/svc/api"))
        .and(body_json(json!({"parts": [{"type": "text", "text": "add a test"}]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(prompt_reply("Done.")))
        .expect(1)
        .mount(&server)
        .await;

    let platform = FakePlatform::with_thread("t1", "write tests", Some("svc-api"));
    let relay = relay_for(&server);

    let outcome = relay
        .handle(&platform, &message("t1", "<@123> add a test"))
        .await;

    assert_eq!(outcome, RelayOutcome::Replied { chunks: 1 });
    assert_eq!(platform.replies(), vec![ACTIVATED_REPLY.to_string(), "Done.".to_string()]);
    assert_eq!(platform.typing(), vec!["t1".to_string()]);

    let session = relay.registry().get("t1").unwrap();
    assert_eq!(session.session_id, "ses_1");
    assert_eq!(session.directory, "/svc/api");
    assert!(session.active);
}

#[tokio::test]
async fn test_follow_up_message_reuses_session_without_mention() {
    let server = MockServer::start().await;
    mount_create_session(&server, "work", "/svc/api", 1).await;

    Mock::given(method("POST"))
        .and(path("/session/ses_1/message"))
        .respond_with(ResponseTemplate::new(200).set_body_json(prompt_reply("ok")))
        .expect(2)
        .mount(&server)
        .await;

    let platform = FakePlatform::with_thread("t1", "work", Some("#svc-api"));
    let relay = relay_for(&server);

    let first = relay.handle(&platform, &message("t1", "<@123> hi")).await;
    let second = relay.handle(&platform, &message("t1", "and again")).await;

    assert_eq!(first, RelayOutcome::Replied { chunks: 1 });
    assert_eq!(second, RelayOutcome::Replied { chunks: 1 });
    assert_eq!(platform.replies(), vec![ACTIVATED_REPLY, "ok", "ok"]);
    assert_eq!(relay.registry().len(), 1);
}

#[tokio::test]
async fn test_create_failure_reports_and_leaves_registry_empty() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/session"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let platform = FakePlatform::with_thread("t1", "work", Some("svc-api"));
    let relay = relay_for(&server);

    let outcome = relay.handle(&platform, &message("t1", "<@123> go")).await;

    assert_eq!(outcome, RelayOutcome::ActivationFailed);
    assert_eq!(platform.replies(), vec![ACTIVATION_FAILED_REPLY]);
    assert!(platform.typing().is_empty());
    assert!(relay.registry().get("t1").is_none());
}

#[tokio::test]
async fn test_activation_retries_after_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/session"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    mount_create_session(&server, "work", "/svc/api", 1).await;
    Mock::given(method("POST"))
        .and(path("/session/ses_1/message"))
        .respond_with(ResponseTemplate::new(200).set_body_json(prompt_reply("back")))
        .mount(&server)
        .await;

    let platform = FakePlatform::with_thread("t1", "work", Some("svc-api"));
    let relay = relay_for(&server);

    let first = relay.handle(&platform, &message("t1", "<@123> go")).await;
    let second = relay.handle(&platform, &message("t1", "<@123> go")).await;

    assert_eq!(first, RelayOutcome::ActivationFailed);
    assert_eq!(second, RelayOutcome::Replied { chunks: 1 });
    assert_eq!(
        platform.replies(),
        vec![ACTIVATION_FAILED_REPLY, ACTIVATED_REPLY, "back"]
    );
}

#[tokio::test]
async fn test_thread_without_parent_cannot_activate() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/session"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "ses_x"})))
        .expect(0)
        .mount(&server)
        .await;

    let platform = FakePlatform::with_thread("t1", "orphan", None);
    let relay = relay_for(&server);

    let outcome = relay.handle(&platform, &message("t1", "<@123> go")).await;

    assert_eq!(outcome, RelayOutcome::ActivationFailed);
    assert_eq!(platform.replies(), vec![ACTIVATION_FAILED_REPLY]);
    assert!(relay.registry().is_empty());
}

#[tokio::test]
async fn test_mention_only_activates_then_drops() {
    let server = MockServer::start().await;
    mount_create_session(&server, "work", "/svc/api", 1).await;
    Mock::given(method("POST"))
        .and(path("/session/ses_1/message"))
        .respond_with(ResponseTemplate::new(200).set_body_json(prompt_reply("never")))
        .expect(0)
        .mount(&server)
        .await;

    let platform = FakePlatform::with_thread("t1", "work", Some("svc-api"));
    let relay = relay_for(&server);

    let outcome = relay.handle(&platform, &message("t1", "  <@!123> <@123> ")).await;

    // The nickname form alone does not activate, but the plain mention does.
    assert_eq!(outcome, RelayOutcome::Dropped);
    assert_eq!(platform.replies(), vec![ACTIVATED_REPLY]);
    assert_eq!(platform.typing(), vec!["t1".to_string()]);
}

// ─────────────────────────────────────────────────────────────────────────────
// Ignored messages
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_ignored_messages_make_no_calls() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let platform = FakePlatform::with_thread("t1", "work", Some("svc-api"));
    let relay = relay_for(&server);

    // Not mentioned in an unactivated thread
    assert_eq!(
        relay.handle(&platform, &message("t1", "hello there")).await,
        RelayOutcome::Ignored
    );

    // Nickname mention alone does not activate
    assert_eq!(
        relay.handle(&platform, &message("t1", "<@!123> hello")).await,
        RelayOutcome::Ignored
    );

    // Bot author
    let mut from_bot = message("t1", "<@123> hello");
    from_bot.author_is_bot = true;
    assert_eq!(relay.handle(&platform, &from_bot).await, RelayOutcome::Ignored);

    // Not a thread
    assert_eq!(
        relay.handle(&platform, &message("general", "<@123> hello")).await,
        RelayOutcome::Ignored
    );

    // Channel lookup failure
    assert_eq!(
        relay.handle(&platform, &message("broken", "<@123> hello")).await,
        RelayOutcome::Ignored
    );

    assert!(platform.replies().is_empty());
    assert!(platform.typing().is_empty());
    assert!(relay.registry().is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// Prompt failures and chunking
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_prompt_failure_keeps_session_for_retry() {
    let server = MockServer::start().await;
    mount_create_session(&server, "work", "/svc/api", 1).await;
    Mock::given(method("POST"))
        .and(path("/session/ses_1/message"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/session/ses_1/message"))
        .respond_with(ResponseTemplate::new(200).set_body_json(prompt_reply("recovered")))
        .mount(&server)
        .await;

    let platform = FakePlatform::with_thread("t1", "work", Some("svc-api"));
    let relay = relay_for(&server);

    let first = relay.handle(&platform, &message("t1", "<@123> try")).await;
    assert_eq!(first, RelayOutcome::Failed);
    assert!(relay.registry().get("t1").is_some());

    let second = relay.handle(&platform, &message("t1", "try again")).await;
    assert_eq!(second, RelayOutcome::Replied { chunks: 1 });

    assert_eq!(
        platform.replies(),
        vec![ACTIVATED_REPLY, RELAY_ERROR_REPLY, "recovered"]
    );
}

#[tokio::test]
async fn test_undecodable_response_is_reported() {
    let server = MockServer::start().await;
    mount_create_session(&server, "work", "/svc/api", 1).await;
    Mock::given(method("POST"))
        .and(path("/session/ses_1/message"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy error</html>"))
        .mount(&server)
        .await;

    let platform = FakePlatform::with_thread("t1", "work", Some("svc-api"));
    let relay = relay_for(&server);

    let outcome = relay.handle(&platform, &message("t1", "<@123> hi")).await;

    assert_eq!(outcome, RelayOutcome::Failed);
    assert_eq!(platform.replies(), vec![ACTIVATED_REPLY, RELAY_ERROR_REPLY]);
}

#[tokio::test]
async fn test_long_reply_is_split_in_order() {
    let server = MockServer::start().await;
    mount_create_session(&server, "work", "/svc/api", 1).await;

    let long = format!("{}{}{}", "a".repeat(2000), "b".repeat(2000), "c".repeat(500));
    Mock::given(method("POST"))
        .and(path("/session/ses_1/message"))
        .respond_with(ResponseTemplate::new(200).set_body_json(prompt_reply(&long)))
        .mount(&server)
        .await;

    let platform = FakePlatform::with_thread("t1", "work", Some("svc-api"));
    let relay = relay_for(&server);

    let outcome = relay.handle(&platform, &message("t1", "<@123> essay")).await;
    assert_eq!(outcome, RelayOutcome::Replied { chunks: 3 });

    let replies = platform.replies();
    assert_eq!(replies.len(), 4);
    assert_eq!(replies[1], "a".repeat(2000));
    assert_eq!(replies[2], "b".repeat(2000));
    assert_eq!(replies[3], "c".repeat(500));
    assert_eq!(replies[1..].concat(), long);
}

#[tokio::test]
async fn test_spawned_handle_resolves_outcome() {
    let server = MockServer::start().await;
    mount_create_session(&server, "work", "/svc/api", 1).await;
    Mock::given(method("POST"))
        .and(path("/session/ses_1/message"))
        .respond_with(ResponseTemplate::new(200).set_body_json(prompt_reply("spawned")))
        .mount(&server)
        .await;

    let platform = Arc::new(FakePlatform::with_thread("t1", "work", Some("svc-api")));
    let relay = Arc::new(relay_for(&server));

    let outcome = relay
        .spawn_handle(platform.clone(), message("t1", "<@123> go"))
        .await
        .unwrap();

    assert_eq!(outcome, RelayOutcome::Replied { chunks: 1 });
    assert_eq!(platform.replies(), vec![ACTIVATED_REPLY, "spawned"]);
}

// ─────────────────────────────────────────────────────────────────────────────
// Session registry
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_registry_is_idempotent() {
    let server = MockServer::start().await;
    mount_create_session(&server, "work", "/svc/api", 1).await;

    let relay = relay_for(&server);
    let platform = FakePlatform::with_thread("t1", "work", Some("svc-api"));
    let thread = platform.threads.get("t1").unwrap();

    let first = relay.registry().get_or_create(thread).await.unwrap();
    let second = relay.registry().get_or_create(thread).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_concurrent_activation_creates_one_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/session"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"id": "ses_1"}))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let relay = relay_for(&server);
    let platform = FakePlatform::with_thread("t1", "work", Some("svc-api"));
    let thread = platform.threads.get("t1").unwrap();

    let (a, b, c) = tokio::join!(
        relay.registry().get_or_create(thread),
        relay.registry().get_or_create(thread),
        relay.registry().get_or_create(thread),
    );

    let a = a.unwrap();
    assert_eq!(a, b.unwrap());
    assert_eq!(a, c.unwrap());
    assert_eq!(relay.registry().len(), 1);
}

#[tokio::test]
async fn test_concurrent_mentions_confirm_activation_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/session"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"id": "ses_1"}))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/session/ses_1/message"))
        .respond_with(ResponseTemplate::new(200).set_body_json(prompt_reply("ok")))
        .expect(2)
        .mount(&server)
        .await;

    let platform = FakePlatform::with_thread("t1", "work", Some("svc-api"));
    let relay = relay_for(&server);

    let first = message("t1", "<@123> first");
    let second = message("t1", "<@123> second one");
    let (a, b) = tokio::join!(
        relay.handle(&platform, &first),
        relay.handle(&platform, &second),
    );

    assert_eq!(a, RelayOutcome::Replied { chunks: 1 });
    assert_eq!(b, RelayOutcome::Replied { chunks: 1 });
    let replies = platform.replies();
    assert_eq!(replies.iter().filter(|r| *r == ACTIVATED_REPLY).count(), 1);
    assert_eq!(replies.iter().filter(|r| *r == "ok").count(), 2);
}

#[tokio::test]
async fn test_registry_activation_reports_creator() {
    let server = MockServer::start().await;
    mount_create_session(&server, "work", "/svc/api", 1).await;

    let relay = relay_for(&server);
    let platform = FakePlatform::with_thread("t1", "work", Some("svc-api"));
    let thread = platform.threads.get("t1").unwrap();

    let first = relay.registry().activate(thread).await.unwrap();
    let second = relay.registry().activate(thread).await.unwrap();

    assert!(first.created);
    assert!(!second.created);
    assert_eq!(first.session, second.session);
}

#[tokio::test]
async fn test_registry_remote_error_carries_directory() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/session"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let relay = relay_for(&server);
    let platform = FakePlatform::with_thread("t1", "work", Some("no-such-dir"));
    let thread = platform.threads.get("t1").unwrap();

    match relay.registry().get_or_create(thread).await {
        Err(SessionError::Remote { directory, source }) => {
            assert_eq!(directory, "/no/such/dir");
            assert!(matches!(source, OpencodeError::CreateSession { status: 404, .. }));
        }
        other => panic!("expected remote error, got {other:?}"),
    }
}
