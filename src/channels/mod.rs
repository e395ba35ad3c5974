//! Chat transport seams: inbound messages, signature checks, and replies.

pub mod line;

use async_trait::async_trait;

use crate::error::ChannelError;

pub use line::{LineMessenger, LineSignatureVerifier, parse_webhook};

/// Opaque handle for answering one inbound message.
///
/// For LINE this is the event's reply token, which is single-use and
/// short-lived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyChannel(String);

impl ReplyChannel {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A text message decoded from a transport event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Stable identity of the sender on the chat platform.
    pub sender: String,
    pub text: String,
    pub reply_channel: ReplyChannel,
}

/// Checks that a webhook body really came from the platform.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, body: &[u8], signature: &str) -> bool;
}

/// Delivers a reply to the user.
///
/// Delivery is best effort. Callers log failures and move on.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, channel: &ReplyChannel, text: &str) -> Result<(), ChannelError>;
}
