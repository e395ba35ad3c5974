//! LINE Messaging API — webhook decoding, signature check, reply sender.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::Sha256;

use crate::channels::{InboundMessage, MessageSender, ReplyChannel, SignatureVerifier};
use crate::error::ChannelError;

/// Production endpoint of the Messaging API.
pub const LINE_API_BASE: &str = "https://api.line.me";

/// Header carrying the webhook signature.
pub const SIGNATURE_HEADER: &str = "x-line-signature";

// ── Webhook payload ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct WebhookBody {
    #[serde(default)]
    destination: String,
    #[serde(default)]
    events: Vec<LineEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LineEvent {
    #[serde(rename = "type")]
    kind: String,
    reply_token: Option<String>,
    source: Option<EventSource>,
    message: Option<EventMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventSource {
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventMessage {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

impl LineEvent {
    /// A text message with a user source and a reply token, or nothing.
    fn into_inbound(self) -> Option<InboundMessage> {
        if self.kind != "message" {
            return None;
        }
        let message = self.message?;
        if message.kind != "text" {
            return None;
        }
        Some(InboundMessage {
            sender: self.source?.user_id?,
            text: message.text?,
            reply_channel: ReplyChannel::new(self.reply_token?),
        })
    }
}

/// Decode a webhook body into the text messages it carries, in order.
///
/// Follows, stickers, images and other event kinds are skipped.
pub fn parse_webhook(body: &[u8]) -> Result<Vec<InboundMessage>, ChannelError> {
    let body: WebhookBody = serde_json::from_slice(body)
        .map_err(|e| ChannelError::InvalidMessage(format!("LINE webhook body: {e}")))?;

    let total = body.events.len();
    tracing::trace!(destination = %body.destination, events = total, "LINE webhook decoded");
    let messages: Vec<InboundMessage> = body
        .events
        .into_iter()
        .filter_map(LineEvent::into_inbound)
        .collect();

    if messages.len() < total {
        tracing::debug!(
            skipped = total - messages.len(),
            "Ignoring non-text LINE events"
        );
    }
    Ok(messages)
}

// ── Signature verification ──────────────────────────────────────────

/// HMAC-SHA256 of the raw body keyed by the channel secret, base64 encoded.
pub struct LineSignatureVerifier {
    channel_secret: SecretString,
}

impl LineSignatureVerifier {
    pub fn new(channel_secret: SecretString) -> Self {
        Self { channel_secret }
    }

    fn mac(&self) -> Option<Hmac<Sha256>> {
        Hmac::<Sha256>::new_from_slice(self.channel_secret.expose_secret().as_bytes()).ok()
    }

    /// The signature LINE would send for `body`.
    pub fn sign(&self, body: &[u8]) -> String {
        match self.mac() {
            Some(mut mac) => {
                mac.update(body);
                STANDARD.encode(mac.finalize().into_bytes())
            }
            None => String::new(),
        }
    }
}

impl SignatureVerifier for LineSignatureVerifier {
    fn verify(&self, body: &[u8], signature: &str) -> bool {
        let Ok(expected) = STANDARD.decode(signature.trim()) else {
            return false;
        };
        let Some(mut mac) = self.mac() else {
            return false;
        };
        mac.update(body);
        // verify_slice compares in constant time
        mac.verify_slice(&expected).is_ok()
    }
}

// ── Reply sender ────────────────────────────────────────────────────

/// Sends text replies through the reply endpoint.
pub struct LineMessenger {
    access_token: SecretString,
    api_base: String,
    client: reqwest::Client,
}

impl LineMessenger {
    pub fn new(access_token: SecretString) -> Self {
        Self::with_api_base(access_token, LINE_API_BASE)
    }

    /// Point the sender at a different host (a local stand-in in tests).
    pub fn with_api_base(access_token: SecretString, api_base: impl Into<String>) -> Self {
        Self {
            access_token,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn reply_url(&self) -> String {
        format!("{}/v2/bot/message/reply", self.api_base)
    }
}

#[async_trait]
impl MessageSender for LineMessenger {
    async fn send(&self, channel: &ReplyChannel, text: &str) -> Result<(), ChannelError> {
        let body = serde_json::json!({
            "replyToken": channel.as_str(),
            "messages": [{ "type": "text", "text": text }],
        });

        let resp = self
            .client
            .post(self.reply_url())
            .bearer_auth(self.access_token.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: "line".into(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ChannelError::AuthFailed {
                name: "line".into(),
                reason: "reply API rejected the access token".into(),
            });
        }
        if !status.is_success() {
            let err = resp.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed {
                name: "line".into(),
                reason: format!("reply returned {status}: {err}"),
            });
        }

        tracing::debug!(chars = text.chars().count(), "LINE reply sent");
        Ok(())
    }
}
