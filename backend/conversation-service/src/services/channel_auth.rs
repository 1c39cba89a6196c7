//! Private channel authorization for the real-time transport
//!
//! A client that wants to subscribe to `private-user-{id}` or
//! `private-conversation-{id}` first asks this gateway. On success the
//! gateway returns `"{app_key}:{hex hmac}"` where the HMAC is computed over
//! `"{socket_id}:{channel_name}"` with the transport's shared secret; the
//! transport verifies it independently.
//!
//! Membership failures and unknown conversations both yield `Forbidden`.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::services::bounded;
use crate::services::realtime::TransportCredentials;
use crate::store::{ConversationStore, StoreError};

pub const USER_CHANNEL_PREFIX: &str = "private-user-";
pub const CONVERSATION_CHANNEL_PREFIX: &str = "private-conversation-";

pub fn user_channel(user_id: Uuid) -> String {
    format!("{USER_CHANNEL_PREFIX}{user_id}")
}

pub fn conversation_channel(conversation_id: Uuid) -> String {
    format!("{CONVERSATION_CHANNEL_PREFIX}{conversation_id}")
}

/// Parsed channel name. The embedded id is kept as text; user channels are
/// compared verbatim, conversation channels are parsed when authorized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Channel<'a> {
    User(&'a str),
    Conversation(&'a str),
    Unrecognized,
}

impl<'a> Channel<'a> {
    pub fn parse(name: &'a str) -> Self {
        if let Some(id) = name.strip_prefix(USER_CHANNEL_PREFIX) {
            if !id.is_empty() {
                return Channel::User(id);
            }
        } else if let Some(id) = name.strip_prefix(CONVERSATION_CHANNEL_PREFIX) {
            if !id.is_empty() {
                return Channel::Conversation(id);
            }
        }
        Channel::Unrecognized
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Channel::User(_) => "user",
            Channel::Conversation(_) => "conversation",
            Channel::Unrecognized => "unrecognized",
        }
    }
}

/// Signed artifact handed back to the transport client library
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelAuthorization {
    pub auth: String,
}

pub struct ChannelAuthGateway {
    conversations: Arc<dyn ConversationStore>,
    credentials: TransportCredentials,
    store_timeout: Duration,
}

impl ChannelAuthGateway {
    pub fn new(
        conversations: Arc<dyn ConversationStore>,
        credentials: TransportCredentials,
        store_timeout: Duration,
    ) -> Self {
        Self {
            conversations,
            credentials,
            store_timeout,
        }
    }

    pub async fn authorize(
        &self,
        requester: Option<Uuid>,
        socket_id: &str,
        channel_name: &str,
    ) -> AppResult<ChannelAuthorization> {
        let channel = Channel::parse(channel_name);
        let kind = channel.kind();

        let result = self
            .decide(requester, socket_id, channel_name, &channel)
            .await;

        let outcome = match &result {
            Ok(_) => "granted",
            Err(AppError::Unauthorized) => "unauthenticated",
            Err(AppError::Forbidden) => "forbidden",
            Err(AppError::BadRequest(_)) => "bad_request",
            Err(_) => "error",
        };
        metrics::record_channel_auth(kind, outcome);
        tracing::debug!(
            user_id = ?requester,
            channel_kind = kind,
            channel = %channel_name,
            outcome,
            "channel authorization decided"
        );

        result
    }

    async fn decide(
        &self,
        requester: Option<Uuid>,
        socket_id: &str,
        channel_name: &str,
        channel: &Channel<'_>,
    ) -> AppResult<ChannelAuthorization> {
        let requester = requester.ok_or(AppError::Unauthorized)?;
        if channel_name.is_empty() {
            return Err(AppError::bad_request("channel_name is required"));
        }
        validate_socket_id(socket_id)?;

        match channel {
            Channel::Unrecognized => return Err(AppError::Forbidden),
            Channel::User(id) => {
                if *id != requester.to_string() {
                    return Err(AppError::Forbidden);
                }
            }
            Channel::Conversation(raw) => {
                let conversation_id = Uuid::parse_str(raw)
                    .map_err(|_| AppError::bad_request("invalid conversation id in channel name"))?;
                if !self.is_member(conversation_id, requester).await? {
                    return Err(AppError::Forbidden);
                }
            }
        }

        Ok(ChannelAuthorization {
            auth: sign(&self.credentials, socket_id, channel_name),
        })
    }

    async fn is_member(&self, conversation_id: Uuid, user_id: Uuid) -> AppResult<bool> {
        let lookup = self.conversations.is_participant(conversation_id, user_id);
        match bounded(self.store_timeout, lookup).await {
            Ok(member) => Ok(member),
            Err(StoreError::NotFound) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

fn validate_socket_id(socket_id: &str) -> AppResult<()> {
    if socket_id.is_empty() {
        return Err(AppError::bad_request("socket_id is required"));
    }
    if socket_id.contains(':') || socket_id.chars().any(char::is_whitespace) {
        return Err(AppError::bad_request("socket_id is malformed"));
    }
    Ok(())
}

/// `"{app_key}:{hex(hmac_sha256(secret, "{socket_id}:{channel_name}"))}"`
pub fn sign(credentials: &TransportCredentials, socket_id: &str, channel_name: &str) -> String {
    let payload = format!("{socket_id}:{channel_name}");
    let signature =
        crypto_core::hmac_sha256_hex(credentials.app_secret.as_bytes(), payload.as_bytes());
    format!("{}:{}", credentials.app_key, signature)
}
