//! Integration tests for the LINE webhook.
//!
//! Each test spins up an Axum server on a random port with an in-memory
//! database, posts signed webhook bodies with reqwest, and checks the replies
//! captured by a recording sender.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;

use registration_bot::channels::{LineSignatureVerifier, MessageSender, ReplyChannel};
use registration_bot::error::{ChannelError, DatabaseError};
use registration_bot::registration::replies;
use registration_bot::registration::{ConversationEngine, ConversationState, SessionStore};
use registration_bot::store::{
    Database, InsertOutcome, LibSqlBackend, NewRegistration, RegistrationRecord,
};
use registration_bot::webhook::{AppState, webhook_routes};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

const SECRET: &str = "integration-test-secret";

/// Captures replies instead of calling LINE. Can be told to fail every send.
#[derive(Default)]
struct RecordingSender {
    sent: Mutex<Vec<(String, String)>>,
    fail: bool,
}

impl RecordingSender {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    /// Reply texts addressed to one reply token.
    fn replies_to(&self, token: &str) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|(t, _)| t == token)
            .map(|(_, text)| text)
            .collect()
    }
}

#[async_trait]
impl MessageSender for RecordingSender {
    async fn send(&self, channel: &ReplyChannel, text: &str) -> Result<(), ChannelError> {
        self.sent
            .lock()
            .unwrap()
            .push((channel.as_str().to_string(), text.to_string()));
        if self.fail {
            return Err(ChannelError::SendFailed {
                name: "line".into(),
                reason: "reply token expired".into(),
            });
        }
        Ok(())
    }
}

/// A database whose every call fails.
struct BrokenDb;

#[async_trait]
impl Database for BrokenDb {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        Ok(())
    }
    async fn find_user_by_line_id(
        &self,
        _line_user_id: &str,
    ) -> Result<Option<RegistrationRecord>, DatabaseError> {
        Err(DatabaseError::Query("find_user_by_line_id: disk I/O error".into()))
    }
    async fn find_user_by_phone(
        &self,
        _phone: &str,
    ) -> Result<Option<RegistrationRecord>, DatabaseError> {
        Err(DatabaseError::Query("find_user_by_phone: disk I/O error".into()))
    }
    async fn insert_user(&self, _new: &NewRegistration) -> Result<InsertOutcome, DatabaseError> {
        Err(DatabaseError::Query("insert_user: disk I/O error".into()))
    }
}

/// Crashes on the registration lookup for one user, empty for everyone else.
struct CrashingDb {
    crash_for: &'static str,
}

#[async_trait]
impl Database for CrashingDb {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        Ok(())
    }
    async fn find_user_by_line_id(
        &self,
        line_user_id: &str,
    ) -> Result<Option<RegistrationRecord>, DatabaseError> {
        if line_user_id == self.crash_for {
            panic!("corrupt row for {line_user_id}");
        }
        Ok(None)
    }
    async fn find_user_by_phone(
        &self,
        _phone: &str,
    ) -> Result<Option<RegistrationRecord>, DatabaseError> {
        Ok(None)
    }
    async fn insert_user(&self, _new: &NewRegistration) -> Result<InsertOutcome, DatabaseError> {
        Err(DatabaseError::Query("insert_user: read-only".into()))
    }
}

struct TestServer {
    base: String,
    engine: Arc<ConversationEngine>,
    sender: Arc<RecordingSender>,
    client: reqwest::Client,
}

/// Start an Axum server on a random port.
async fn start_server(db: Arc<dyn Database>, sender: RecordingSender) -> TestServer {
    let engine = Arc::new(ConversationEngine::new(SessionStore::new(), db));
    let sender = Arc::new(sender);
    let state = AppState {
        engine: Arc::clone(&engine),
        verifier: Arc::new(LineSignatureVerifier::new(SecretString::from(SECRET))),
        sender: sender.clone(),
    };
    let app = webhook_routes(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    TestServer {
        base: format!("http://127.0.0.1:{port}"),
        engine,
        sender,
        client: reqwest::Client::new(),
    }
}

async fn memory_db() -> Arc<LibSqlBackend> {
    Arc::new(LibSqlBackend::new_memory().await.unwrap())
}

/// A webhook body with one text event per `(user, text, reply_token)`.
fn webhook_body(messages: &[(&str, &str, &str)]) -> Vec<u8> {
    let events: Vec<Value> = messages
        .iter()
        .map(|(user, text, token)| {
            json!({
                "type": "message",
                "mode": "active",
                "timestamp": 1_700_000_000_000_i64,
                "replyToken": token,
                "source": { "type": "user", "userId": user },
                "message": { "type": "text", "id": "1", "text": text }
            })
        })
        .collect();
    serde_json::to_vec(&json!({ "destination": "Ubot", "events": events })).unwrap()
}

fn sign(body: &[u8]) -> String {
    LineSignatureVerifier::new(SecretString::from(SECRET)).sign(body)
}

impl TestServer {
    async fn post_signed(&self, body: Vec<u8>) -> reqwest::Response {
        let signature = sign(&body);
        self.client
            .post(format!("{}/callback", self.base))
            .header("X-Line-Signature", signature)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .unwrap()
    }

    /// Send one message and return the reply it produced.
    async fn say(&self, user: &str, text: &str, token: &str) -> String {
        let resp = self.post_signed(webhook_body(&[(user, text, token)])).await;
        assert_eq!(resp.status(), 200);
        let replies = self.sender.replies_to(token);
        assert_eq!(replies.len(), 1, "expected one reply to {token}");
        replies.into_iter().next().unwrap()
    }

    async fn state_of(&self, user: &str) -> ConversationState {
        self.engine.sessions().get(user).await.state()
    }
}

// ── Liveness ────────────────────────────────────────────────────────────

#[tokio::test]
async fn root_and_health_respond() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(memory_db().await, RecordingSender::default()).await;

        let root: Value = server
            .client
            .get(format!("{}/", server.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(root["message"], "Server is running");

        let health: Value = server
            .client
            .get(format!("{}/health", server.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["status"], "ok");
    })
    .await
    .expect("test timed out");
}

// ── Signature / body checks ─────────────────────────────────────────────

#[tokio::test]
async fn missing_signature_is_rejected() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(memory_db().await, RecordingSender::default()).await;

        let resp = server
            .client
            .post(format!("{}/callback", server.base))
            .body(webhook_body(&[("U1", "註冊", "r1")]))
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), 400);
        assert_eq!(resp.text().await.unwrap(), "Invalid signature");
        assert!(server.sender.sent().is_empty());
        assert_eq!(server.engine.sessions().active_count(), 0);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn wrong_signature_is_rejected_before_the_engine() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(memory_db().await, RecordingSender::default()).await;

        let body = webhook_body(&[("U1", "註冊", "r1")]);
        let forged = LineSignatureVerifier::new(SecretString::from("not-the-secret")).sign(&body);
        let resp = server
            .client
            .post(format!("{}/callback", server.base))
            .header("X-Line-Signature", forged)
            .body(body)
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), 400);
        assert!(server.sender.sent().is_empty());
        assert_eq!(server.state_of("U1").await, ConversationState::Idle);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn malformed_body_is_rejected() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(memory_db().await, RecordingSender::default()).await;

        let resp = server.post_signed(b"{\"events\": [".to_vec()).await;
        assert_eq!(resp.status(), 400);
        assert!(server.sender.sent().is_empty());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn non_text_events_are_acknowledged_silently() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(memory_db().await, RecordingSender::default()).await;

        let body = serde_json::to_vec(&json!({
            "destination": "Ubot",
            "events": [
                { "type": "follow", "replyToken": "r1",
                  "source": { "type": "user", "userId": "U1" } },
                { "type": "message", "replyToken": "r2",
                  "source": { "type": "user", "userId": "U1" },
                  "message": { "type": "image", "id": "2" } }
            ]
        }))
        .unwrap();

        let resp = server.post_signed(body).await;
        assert_eq!(resp.status(), 200);
        assert!(server.sender.sent().is_empty());
    })
    .await
    .expect("test timed out");
}

// ── Dialogue over HTTP ──────────────────────────────────────────────────

#[tokio::test]
async fn full_registration_over_webhook() {
    timeout(TEST_TIMEOUT, async {
        let db = memory_db().await;
        let server = start_server(db.clone(), RecordingSender::default()).await;

        assert_eq!(server.say("U1", "註冊", "r1").await, replies::NAME_PROMPT);
        assert_eq!(server.say("U1", "123", "r2").await, replies::NAME_FORMAT_ERROR);
        assert_eq!(
            server.say("U1", "Alice", "r3").await,
            replies::phone_prompt("Alice")
        );
        assert_eq!(server.say("U1", "555123", "r4").await, replies::PHONE_FORMAT_ERROR);
        assert_eq!(
            server.say("U1", "5551234", "r5").await,
            replies::registration_complete("Alice", "5551234")
        );

        assert_eq!(server.state_of("U1").await, ConversationState::Idle);
        let record = db.find_user_by_line_id("U1").await.unwrap().unwrap();
        assert_eq!(record.name, "Alice");
        assert_eq!(record.phone, "5551234");

        assert_eq!(server.say("U1", "註冊", "r6").await, replies::ALREADY_REGISTERED);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn events_in_one_request_are_handled_in_order() {
    timeout(TEST_TIMEOUT, async {
        let db = memory_db().await;
        let server = start_server(db.clone(), RecordingSender::default()).await;

        let resp = server
            .post_signed(webhook_body(&[
                ("U1", "註冊", "r1"),
                ("U1", "Alice", "r2"),
                ("U1", "5551234", "r3"),
            ]))
            .await;
        assert_eq!(resp.status(), 200);

        let texts: Vec<String> = server.sender.sent().into_iter().map(|(_, t)| t).collect();
        assert_eq!(
            texts,
            vec![
                replies::NAME_PROMPT.to_string(),
                replies::phone_prompt("Alice"),
                replies::registration_complete("Alice", "5551234"),
            ]
        );
        assert!(db.find_user_by_phone("5551234").await.unwrap().is_some());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn failed_reply_does_not_undo_registration() {
    timeout(TEST_TIMEOUT, async {
        let db = memory_db().await;
        let server = start_server(db.clone(), RecordingSender::failing()).await;

        for (text, token) in [("註冊", "r1"), ("Alice", "r2"), ("5551234", "r3")] {
            let resp = server.post_signed(webhook_body(&[("U1", text, token)])).await;
            assert_eq!(resp.status(), 200);
        }

        // Every send was attempted once and none retried.
        assert_eq!(server.sender.sent().len(), 3);
        assert!(db.find_user_by_line_id("U1").await.unwrap().is_some());
        assert_eq!(server.state_of("U1").await, ConversationState::Idle);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn store_outage_gets_fallback_reply() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(Arc::new(BrokenDb), RecordingSender::default()).await;

        assert_eq!(server.say("U1", "註冊", "r1").await, replies::INTERNAL_ERROR);
        assert_eq!(server.state_of("U1").await, ConversationState::Idle);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn panicking_message_gets_fallback_and_batch_continues() {
    timeout(TEST_TIMEOUT, async {
        let db = Arc::new(CrashingDb { crash_for: "U1" });
        let server = start_server(db, RecordingSender::default()).await;

        let resp = server
            .post_signed(webhook_body(&[("U1", "註冊", "r1"), ("U2", "註冊", "r2")]))
            .await;
        assert_eq!(resp.status(), 200);

        assert_eq!(server.sender.replies_to("r1"), vec![replies::INTERNAL_ERROR.to_string()]);
        assert_eq!(server.sender.replies_to("r2"), vec![replies::NAME_PROMPT.to_string()]);
        assert_eq!(server.state_of("U2").await, ConversationState::AwaitingName);

        // The crashed user's session lock was released.
        assert_eq!(server.say("U1", "取消", "r3").await, replies::CANCELLED);
        assert_eq!(server.state_of("U1").await, ConversationState::Idle);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn racing_users_on_one_phone_register_once() {
    timeout(TEST_TIMEOUT, async {
        let db = memory_db().await;
        let server = Arc::new(start_server(db.clone(), RecordingSender::default()).await);

        for user in ["U1", "U2"] {
            server.say(user, "註冊", &format!("{user}-start")).await;
            server.say(user, "Alice", &format!("{user}-name")).await;
        }

        let mut tasks = Vec::new();
        for user in ["U1", "U2"] {
            let server = Arc::clone(&server);
            tasks.push(tokio::spawn(async move {
                let token = format!("{user}-phone");
                server
                    .post_signed(webhook_body(&[(user, "5551234", &token)]))
                    .await
                    .status()
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap(), 200);
        }

        let answers: Vec<String> = ["U1", "U2"]
            .iter()
            .flat_map(|user| server.sender.replies_to(&format!("{user}-phone")))
            .collect();
        let done = replies::registration_complete("Alice", "5551234");
        assert_eq!(answers.iter().filter(|a| **a == done).count(), 1);
        assert_eq!(
            answers.iter().filter(|a| *a == replies::PHONE_TAKEN).count(),
            1
        );

        let owner = db.find_user_by_phone("5551234").await.unwrap().unwrap();
        let loser = if owner.line_user_id == "U1" { "U2" } else { "U1" };
        assert_eq!(server.state_of(loser).await, ConversationState::AwaitingPhone);
    })
    .await
    .expect("test timed out");
}
