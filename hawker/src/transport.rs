//! Primary transport: the message-box read/write API.
//!
//! This is the authoritative path for reading conversations and the
//! preferred path for sending plain text. The [`MessageBox`] trait is the
//! seam the executors consume; [`MessageBoxClient`] is the bundled
//! reqwest implementation.

use crate::configuration::Configuration;
use crate::conversation::{
    Attachment, ConversationSnapshot, ConversationSummary, Direction, Message, OfferPayload,
    ProxyServer,
};
use crate::error::{classify_error, Fault, FaultKind, HawkerError, HawkerResult};
use async_trait::async_trait;
use serde::Deserialize;
use smallvec::SmallVec;

/// Authenticated API identity for one account.
#[derive(Debug, Clone)]
pub struct AuthSession {
    /// Marketplace user id.
    pub user_id: String,
    /// Bearer token exchanged from the stored cookies.
    pub token: String,
    /// Epoch millis when the token expires, when reported.
    pub expiry_epoch_ms: Option<u64>,
}

/// One page of conversation summaries.
#[derive(Debug, Clone, Default)]
pub struct ConversationPage {
    /// Summaries in list order.
    pub conversations: Vec<ConversationSummary>,
    /// Total conversations reported by the backend.
    pub total: usize,
}

/// The message-box read/write API.
#[async_trait]
pub trait MessageBox: Send + Sync {
    /// Exchange stored session cookies for an API identity.
    /// Fails `AUTH_REQUIRED` when the cookies are stale.
    async fn exchange_session_for_token(&self, cookie_str: &str) -> HawkerResult<AuthSession>;

    /// List one page of the account's conversations.
    async fn list_conversations(
        &self,
        auth: &AuthSession,
        page: usize,
        size: usize,
    ) -> HawkerResult<ConversationPage>;

    /// Fetch the full message list of one conversation.
    async fn conversation_detail(
        &self,
        auth: &AuthSession,
        conversation_id: &str,
    ) -> HawkerResult<ConversationSnapshot>;

    /// Post a plain text message into a conversation.
    async fn post_message(
        &self,
        auth: &AuthSession,
        conversation_id: &str,
        text: &str,
    ) -> HawkerResult<()>;
}

/// Derive the marketplace user id directly from stored cookies, when the
/// session carries it as its own cookie.
pub fn user_id_from_cookies(cookie_str: &str) -> Option<String> {
    for pair in cookie_str.split(';') {
        let mut parts = pair.trim().splitn(2, '=');
        let name = parts.next()?.trim();
        if name.eq_ignore_ascii_case("userId") || name.eq_ignore_ascii_case("uid") {
            let value = parts.next()?.trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

// Wire types. The backend speaks camelCase JSON.

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTokenResponse {
    access_token: String,
    user_id: Option<String>,
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireConversationList {
    #[serde(default)]
    conversations: Vec<WireConversationSummary>,
    #[serde(default)]
    num_found: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireConversationSummary {
    id: Option<String>,
    #[serde(default)]
    counter_party_name: String,
    #[serde(default)]
    ad_title: String,
    ad_image_url: Option<String>,
    #[serde(default)]
    latest_message_preview: String,
    #[serde(default)]
    received_date: String,
    unread_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireConversationDetail {
    id: String,
    #[serde(default)]
    counter_party_name: String,
    #[serde(default)]
    ad_title: String,
    ad_image_url: Option<String>,
    #[serde(default)]
    messages: Vec<WireMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    #[serde(default)]
    message_id: String,
    #[serde(default)]
    text_short: String,
    boundness: Option<String>,
    sender_user_id: Option<String>,
    #[serde(default)]
    sender_name: String,
    #[serde(default)]
    received_date: String,
    #[serde(default)]
    attachments: Vec<WireAttachment>,
    offer: Option<WireOffer>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireAttachment {
    #[serde(alias = "location")]
    url: String,
    title: Option<String>,
    mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireOffer {
    offer_id: Option<String>,
    negotiation_id: Option<String>,
    #[serde(default)]
    actions: Vec<WireOfferAction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireOfferAction {
    #[serde(alias = "title")]
    label: String,
}

impl WireMessage {
    fn into_message(self, own_user_id: &str) -> Message {
        let sender_is_self = self
            .sender_user_id
            .as_deref()
            .map(|s| s == own_user_id);
        let direction = Direction::from_flags(self.boundness.as_deref(), sender_is_self);

        Message {
            id: self.message_id,
            text: self.text_short,
            direction,
            sender: self.sender_name,
            timestamp: self.received_date,
            attachments: self
                .attachments
                .into_iter()
                .map(|a| Attachment {
                    url: a.url,
                    title: a.title,
                    content_type: a.mime_type,
                })
                .collect::<SmallVec<[Attachment; 2]>>(),
            offer: self.offer.map(|o| OfferPayload {
                offer_id: o.offer_id,
                negotiation_id: o.negotiation_id,
                actions: o.actions.into_iter().map(|a| a.label).collect(),
            }),
        }
    }
}

/// Builds one transport per invocation, routed through that invocation's
/// proxy.
pub trait MessageBoxFactory: Send + Sync {
    /// Create a transport bound to the proxy.
    fn create(
        &self,
        config: &Configuration,
        proxy: Option<&ProxyServer>,
    ) -> HawkerResult<Box<dyn MessageBox>>;
}

/// Default factory producing [`MessageBoxClient`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReqwestMessageBox;

impl MessageBoxFactory for ReqwestMessageBox {
    fn create(
        &self,
        config: &Configuration,
        proxy: Option<&ProxyServer>,
    ) -> HawkerResult<Box<dyn MessageBox>> {
        Ok(Box::new(MessageBoxClient::new(config, proxy)?))
    }
}

/// Reqwest-backed implementation of [`MessageBox`].
pub struct MessageBoxClient {
    base_url: String,
    client: reqwest::Client,
}

impl MessageBoxClient {
    /// Build a client for one invocation, routed through the account's
    /// proxy when one is pinned.
    pub fn new(config: &Configuration, proxy: Option<&ProxyServer>) -> HawkerResult<Self> {
        let mut builder = reqwest::Client::builder().cookie_store(true).timeout(
            config
                .request_timeout
                .as_deref()
                .copied()
                .unwrap_or(std::time::Duration::from_secs(30)),
        );

        if let Some(agent) = config.user_agent.as_deref() {
            builder = builder.user_agent(agent.as_str());
        }

        if let Some(proxy) = proxy {
            let mut p = reqwest::Proxy::all(proxy.address())
                .map_err(|e| HawkerError::from_fault(classify_error("configure proxy", &e)))?;
            if let (Some(user), Some(pass)) = (proxy.username.as_deref(), proxy.password.as_deref())
            {
                p = p.basic_auth(user, pass);
            }
            builder = builder.proxy(p);
        }

        let client = builder
            .build()
            .map_err(|e| HawkerError::from_fault(classify_error("build transport client", &e)))?;

        Ok(MessageBoxClient {
            base_url: config.messagebox_base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Map a non-success status to the taxonomy.
    fn status_error(context: &str, status: reqwest::StatusCode, body: &str) -> HawkerError {
        let code = status.as_u16();
        if code == 401 || code == 403 {
            HawkerError::AuthRequired(Fault::new(
                FaultKind::AuthRequired,
                context,
                &format!("message-box api answered {code}"),
                Some(body),
            ))
        } else {
            HawkerError::MessageBoxApi {
                status: code,
                fault: Fault::new(
                    FaultKind::Unknown,
                    context,
                    &format!("message-box api answered {code}"),
                    Some(body),
                ),
            }
        }
    }

    async fn read_body(response: reqwest::Response) -> (reqwest::StatusCode, String) {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        (status, body)
    }

    fn parse<T: serde::de::DeserializeOwned>(context: &str, body: &str) -> HawkerResult<T> {
        serde_json::from_str::<T>(body)
            .map_err(|e| HawkerError::from_fault(classify_error(context, &e)))
    }
}

#[async_trait]
impl MessageBox for MessageBoxClient {
    async fn exchange_session_for_token(&self, cookie_str: &str) -> HawkerResult<AuthSession> {
        let context = "exchange session for token";
        let response = self
            .client
            .post(format!("{}/auth/token", self.base_url))
            .header(reqwest::header::COOKIE, cookie_str)
            .send()
            .await
            .map_err(|e| HawkerError::from_fault(classify_error(context, &e)))?;

        let (status, body) = Self::read_body(response).await;
        if !status.is_success() {
            return Err(Self::status_error(context, status, &body));
        }

        let wire: WireTokenResponse = Self::parse(context, &body)?;
        let user_id = match wire.user_id.or_else(|| user_id_from_cookies(cookie_str)) {
            Some(id) => id,
            None => {
                return Err(HawkerError::AuthRequired(Fault::new(
                    FaultKind::AuthRequired,
                    context,
                    "no user identity in token response or stored cookies",
                    None,
                )))
            }
        };

        Ok(AuthSession {
            user_id,
            token: wire.access_token,
            expiry_epoch_ms: wire.expires_in.map(|s| s.saturating_mul(1_000)),
        })
    }

    async fn list_conversations(
        &self,
        auth: &AuthSession,
        page: usize,
        size: usize,
    ) -> HawkerResult<ConversationPage> {
        let context = "list conversations";
        let response = self
            .client
            .get(format!(
                "{}/users/{}/conversations",
                self.base_url, auth.user_id
            ))
            .query(&[("page", page), ("size", size)])
            .bearer_auth(&auth.token)
            .send()
            .await
            .map_err(|e| HawkerError::from_fault(classify_error(context, &e)))?;

        let (status, body) = Self::read_body(response).await;
        if !status.is_success() {
            return Err(Self::status_error(context, status, &body));
        }

        let wire: WireConversationList = Self::parse(context, &body)?;
        Ok(ConversationPage {
            total: wire.num_found,
            conversations: wire
                .conversations
                .into_iter()
                .map(|c| ConversationSummary {
                    conversation_id: c.id,
                    participant: c.counter_party_name,
                    ad_title: c.ad_title,
                    ad_image: c.ad_image_url,
                    last_message: c.latest_message_preview,
                    time_text: c.received_date,
                    unread_count: c.unread_count,
                })
                .collect(),
        })
    }

    async fn conversation_detail(
        &self,
        auth: &AuthSession,
        conversation_id: &str,
    ) -> HawkerResult<ConversationSnapshot> {
        let context = "fetch conversation detail";
        let response = self
            .client
            .get(format!(
                "{}/users/{}/conversations/{}",
                self.base_url, auth.user_id, conversation_id
            ))
            .bearer_auth(&auth.token)
            .send()
            .await
            .map_err(|e| HawkerError::from_fault(classify_error(context, &e)))?;

        let (status, body) = Self::read_body(response).await;
        if !status.is_success() {
            return Err(Self::status_error(context, status, &body));
        }

        let wire: WireConversationDetail = Self::parse(context, &body)?;
        Ok(ConversationSnapshot {
            conversation_id: wire.id,
            participant: wire.counter_party_name,
            ad_title: wire.ad_title,
            ad_image: wire.ad_image_url,
            messages: wire
                .messages
                .into_iter()
                .map(|m| m.into_message(&auth.user_id))
                .collect(),
        })
    }

    async fn post_message(
        &self,
        auth: &AuthSession,
        conversation_id: &str,
        text: &str,
    ) -> HawkerResult<()> {
        let context = "post message";
        let response = self
            .client
            .post(format!(
                "{}/users/{}/conversations/{}",
                self.base_url, auth.user_id, conversation_id
            ))
            .bearer_auth(&auth.token)
            .json(&serde_json::json!({ "message": text }))
            .send()
            .await
            .map_err(|e| HawkerError::from_fault(classify_error(context, &e)))?;

        let (status, body) = Self::read_body(response).await;
        if !status.is_success() {
            return Err(Self::status_error(context, status, &body));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_is_scraped_from_cookie_pairs() {
        assert_eq!(
            user_id_from_cookies("session=abc; userId=991; theme=dark").as_deref(),
            Some("991")
        );
        assert_eq!(user_id_from_cookies("session=abc"), None);
        assert_eq!(user_id_from_cookies("userId="), None);
    }

    #[test]
    fn status_mapping_follows_the_taxonomy() {
        let auth = MessageBoxClient::status_error(
            "list",
            reqwest::StatusCode::UNAUTHORIZED,
            "denied",
        );
        assert!(matches!(auth, HawkerError::AuthRequired(_)));

        let api = MessageBoxClient::status_error(
            "list",
            reqwest::StatusCode::BAD_GATEWAY,
            "upstream",
        );
        match api {
            HawkerError::MessageBoxApi { status, .. } => assert_eq!(status, 502),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn detail_wire_parses_offers_and_directions() {
        let body = r#"{
            "id": "conv-1",
            "counterPartyName": "Anna",
            "adTitle": "City Bike",
            "messages": [
                {
                    "messageId": "m1",
                    "textShort": "is it available?",
                    "boundness": "INBOUND",
                    "senderName": "Anna",
                    "receivedDate": "2026-02-01T09:00:00Z"
                },
                {
                    "messageId": "m2",
                    "textShort": "offer",
                    "boundness": "INBOUND",
                    "senderName": "Anna",
                    "receivedDate": "2026-02-01T09:05:00Z",
                    "attachments": [{"location": "https://img.test/1.jpg"}],
                    "offer": {
                        "offerId": "o-9",
                        "negotiationId": "n-3",
                        "actions": [{"label": "Decline"}, {"label": "Accept"}]
                    }
                }
            ]
        }"#;

        let wire: WireConversationDetail = serde_json::from_str(body).unwrap();
        let messages: Vec<Message> = wire
            .messages
            .into_iter()
            .map(|m| m.into_message("my-id"))
            .collect();

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].direction, Direction::Incoming);
        let offer = messages[1].offer.as_ref().unwrap();
        assert_eq!(offer.actions, vec!["Decline".to_string(), "Accept".to_string()]);
        assert_eq!(messages[1].attachments.len(), 1);
    }
}
