//! Conversation read model.
//!
//! Snapshots are point-in-time reads from the authoritative transport,
//! compared by value across time and never by identity. Nothing here is
//! cached between invocations.

use crate::error::{Fault, FaultKind, HawkerError, HawkerResult};
use crate::utils::{conversation_id_from_href, fill_url_template, normalize_text};
use case_insensitive_string::CaseInsensitiveString;
use smallvec::SmallVec;

/// A managed marketplace account. Externally owned and read-only here.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Account {
    /// Opaque account identifier.
    pub id: String,
    /// Stored session credentials as a cookie header string.
    pub cookie_str: String,
    /// Optional device emulation parameters captured at login time.
    pub device: Option<DeviceProfile>,
    /// Optional reference to the proxy this account is pinned to.
    pub proxy_ref: Option<String>,
}

/// Device emulation profile attached to an account.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct DeviceProfile {
    /// User agent the account's sessions were established with.
    pub user_agent: Option<String>,
    /// Viewport width in px.
    pub viewport_width: Option<u32>,
    /// Viewport height in px.
    pub viewport_height: Option<u32>,
    /// BCP-47 locale, e.g. `de-DE`.
    pub locale: Option<String>,
    /// IANA timezone, e.g. `Europe/Berlin`.
    pub timezone_id: Option<String>,
}

/// Upstream proxy endpoint. Read-only.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ProxyServer {
    /// Proxy host.
    pub host: String,
    /// Proxy port.
    pub port: u16,
    /// Optional basic credentials.
    pub username: Option<String>,
    /// Optional basic credentials.
    pub password: Option<String>,
    /// Transport scheme.
    pub scheme: ProxyScheme,
}

/// Supported proxy transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display, strum::EnumString, serde::Serialize, serde::Deserialize)]
pub enum ProxyScheme {
    /// Plain HTTP CONNECT proxy.
    #[default]
    #[strum(serialize = "http")]
    Http,
    /// TLS proxy endpoint.
    #[strum(serialize = "https")]
    Https,
    /// SOCKS5 with remote DNS.
    #[strum(serialize = "socks5")]
    Socks5,
}

impl ProxyServer {
    /// The proxy address without credentials, e.g. `http://10.0.0.2:3128`.
    pub fn address(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }
}

/// Reference to one conversation: id, url, or both.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ConversationRef {
    /// Conversation id as reported by the message-box API.
    pub conversation_id: Option<String>,
    /// Direct conversation URL.
    pub conversation_url: Option<String>,
}

impl ConversationRef {
    /// Build a reference from an id.
    pub fn from_id(id: impl Into<String>) -> Self {
        ConversationRef {
            conversation_id: Some(id.into()),
            conversation_url: None,
        }
    }

    /// Build a reference from a URL.
    pub fn from_url(url: impl Into<String>) -> Self {
        ConversationRef {
            conversation_id: None,
            conversation_url: Some(url.into()),
        }
    }

    /// Resolve both sides of the reference via the canonical URL template.
    ///
    /// Fails `CONVERSATION_ID_REQUIRED` when neither side is resolvable.
    pub fn resolve(&self, url_template: &str) -> HawkerResult<(String, String)> {
        if let Some(id) = self.conversation_id.as_deref().filter(|i| !i.is_empty()) {
            let url = match self.conversation_url.as_deref().filter(|u| !u.is_empty()) {
                Some(u) => u.to_string(),
                None => fill_url_template(url_template, id),
            };
            return Ok((id.to_string(), url));
        }

        if let Some(url) = self.conversation_url.as_deref().filter(|u| !u.is_empty()) {
            if let Some(id) = conversation_id_from_href(url) {
                return Ok((id, url.to_string()));
            }
        }

        Err(HawkerError::ConversationIdRequired(Fault::new(
            FaultKind::Unknown,
            "resolve conversation reference",
            "neither conversation id nor a parsable conversation url was provided",
            None,
        )))
    }
}

/// Case-insensitive participant / ad-title criteria used to locate a
/// conversation when no direct reference exists.
#[derive(Debug, Clone, Default)]
pub struct MatchCriteria {
    /// Counterparty display name, matched as a substring.
    pub participant: Option<CaseInsensitiveString>,
    /// Ad title, matched as a substring.
    pub ad_title: Option<CaseInsensitiveString>,
}

impl MatchCriteria {
    /// Whether any criterion is present.
    pub fn is_empty(&self) -> bool {
        self.participant.is_none() && self.ad_title.is_none()
    }

    /// Case-insensitive substring match against a summary row.
    pub fn matches(&self, participant: &str, ad_title: &str) -> bool {
        if self.is_empty() {
            return false;
        }
        let participant = participant.to_lowercase();
        let ad_title = ad_title.to_lowercase();

        let p_ok = self
            .participant
            .as_ref()
            .map(|p| participant.contains(&*p.inner().to_lowercase()))
            .unwrap_or(true);
        let t_ok = self
            .ad_title
            .as_ref()
            .map(|t| ad_title.contains(&*t.inner().to_lowercase()))
            .unwrap_or(true);

        p_ok && t_ok
    }
}

/// Message direction, derived once from transport flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, serde::Serialize, serde::Deserialize)]
pub enum Direction {
    /// Sent by the counterparty.
    #[strum(serialize = "incoming")]
    Incoming,
    /// Sent by the managed account.
    #[strum(serialize = "outgoing")]
    Outgoing,
}

impl Direction {
    /// Derive the direction from the transport's boundness flag, falling
    /// back to a sender comparison when the flag is missing.
    pub fn from_flags(boundness: Option<&str>, sender_is_self: Option<bool>) -> Self {
        match boundness.map(|b| b.trim().to_ascii_uppercase()) {
            Some(b) if b == "OUTBOUND" || b == "RIGHT" => Direction::Outgoing,
            Some(b) if b == "INBOUND" || b == "LEFT" => Direction::Incoming,
            _ => {
                if sender_is_self.unwrap_or(false) {
                    Direction::Outgoing
                } else {
                    Direction::Incoming
                }
            }
        }
    }
}

/// One image or file attached to a message.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Attachment {
    /// Resolved attachment URL.
    pub url: String,
    /// Optional display title.
    pub title: Option<String>,
    /// Optional mime type.
    pub content_type: Option<String>,
}

/// Payment/offer proposal payload embedded in a message, together with the
/// response actions the UI offers for it.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct OfferPayload {
    /// Offer id when the transport reports one.
    pub offer_id: Option<String>,
    /// Negotiation id when the transport reports one.
    pub negotiation_id: Option<String>,
    /// Action labels, e.g. "Decline", "Counter-offer".
    pub actions: Vec<String>,
}

/// One message inside a conversation.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Message {
    /// Message id from the transport.
    pub id: String,
    /// Plain message text.
    pub text: String,
    /// Derived direction; never re-derived after construction.
    pub direction: Direction,
    /// Sender display name or id.
    pub sender: String,
    /// Timestamp as reported by the transport.
    pub timestamp: String,
    /// Attachments, usually empty.
    pub attachments: SmallVec<[Attachment; 2]>,
    /// Offer-action payload when this message is a payment proposal.
    pub offer: Option<OfferPayload>,
}

impl Message {
    /// Whether this message carries an offer-action block.
    pub fn is_offer_block(&self) -> bool {
        self.offer
            .as_ref()
            .map(|o| !o.actions.is_empty() || o.offer_id.is_some() || o.negotiation_id.is_some())
            .unwrap_or(false)
    }
}

/// Fingerprint of one offer-action block, position-qualified so identical
/// payloads at different indices stay distinct.
pub fn offer_fingerprint(index: usize, message: &Message) -> Option<String> {
    let offer = message.offer.as_ref()?;

    let mut labels: Vec<String> = offer.actions.iter().map(|a| normalize_text(a)).collect();
    labels.sort();

    Some(format!(
        "{}|{}|{}|{} :: {}",
        offer.offer_id.as_deref().unwrap_or("-"),
        offer.negotiation_id.as_deref().unwrap_or("-"),
        message.id,
        index,
        labels.join(",")
    ))
}

/// Point-in-time read of one conversation. Immutable once captured.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ConversationSnapshot {
    /// Conversation id.
    pub conversation_id: String,
    /// Counterparty display name.
    pub participant: String,
    /// Ad title the conversation belongs to.
    pub ad_title: String,
    /// Ad thumbnail URL when resolved.
    pub ad_image: Option<String>,
    /// Messages in transport order.
    pub messages: Vec<Message>,
}

impl ConversationSnapshot {
    /// Count outgoing messages whose normalized text equals or contains the
    /// normalized needle.
    pub fn outgoing_matching(&self, normalized_needle: &str) -> usize {
        if normalized_needle.is_empty() {
            return 0;
        }
        self.messages
            .iter()
            .filter(|m| m.direction == Direction::Outgoing)
            .filter(|m| {
                let text = normalize_text(&m.text);
                text == normalized_needle || text.contains(normalized_needle)
            })
            .count()
    }

    /// Sum of attachment units across outgoing messages.
    pub fn outgoing_attachment_units(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.direction == Direction::Outgoing)
            .map(|m| m.attachments.len())
            .sum()
    }

    /// Fingerprints of every offer-action block, as a multiset in order.
    pub fn offer_fingerprints(&self) -> Vec<String> {
        self.messages
            .iter()
            .enumerate()
            .filter_map(|(i, m)| offer_fingerprint(i, m))
            .collect()
    }

    /// Whether any offer-action block remains.
    pub fn has_offer_blocks(&self) -> bool {
        self.messages.iter().any(|m| m.is_offer_block())
    }
}

/// One row of the conversation overview list.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ConversationSummary {
    /// Conversation id when the source exposed one.
    pub conversation_id: Option<String>,
    /// Counterparty display name.
    pub participant: String,
    /// Ad title.
    pub ad_title: String,
    /// Ad thumbnail URL when resolved.
    pub ad_image: Option<String>,
    /// Last message preview text.
    pub last_message: String,
    /// Human-readable relative time from the list view.
    pub time_text: String,
    /// Unread marker count when exposed.
    pub unread_count: Option<u32>,
}

impl ConversationSummary {
    /// Stable dedup key: the conversation id, or a composite of the visible
    /// row fields when the source exposed none.
    pub fn dedup_key(&self) -> String {
        match self.conversation_id.as_deref().filter(|i| !i.is_empty()) {
            Some(id) => id.to_string(),
            None => format!(
                "{}|{}|{}|{}",
                normalize_text(&self.participant),
                normalize_text(&self.ad_title),
                normalize_text(&self.last_message),
                normalize_text(&self.time_text)
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: &str, direction: Direction, text: &str) -> Message {
        Message {
            id: id.into(),
            text: text.into(),
            direction,
            sender: "tester".into(),
            timestamp: "2026-01-01T10:00:00Z".into(),
            attachments: SmallVec::new(),
            offer: None,
        }
    }

    #[test]
    fn resolve_requires_some_reference() {
        let template = "https://m.example.com/t/{id}";
        let err = ConversationRef::default().resolve(template).unwrap_err();
        assert!(matches!(err, HawkerError::ConversationIdRequired(_)));

        let (id, url) = ConversationRef::from_id("abc123").resolve(template).unwrap();
        assert_eq!(id, "abc123");
        assert_eq!(url, "https://m.example.com/t/abc123");

        let (id, url) = ConversationRef::from_url("https://m.example.com/t/xyz9")
            .resolve(template)
            .unwrap();
        assert_eq!(id, "xyz9");
        assert!(url.ends_with("/t/xyz9"));
    }

    #[test]
    fn direction_is_derived_from_boundness_first() {
        assert_eq!(
            Direction::from_flags(Some("OUTBOUND"), Some(false)),
            Direction::Outgoing
        );
        assert_eq!(
            Direction::from_flags(Some("left"), Some(true)),
            Direction::Incoming
        );
        assert_eq!(Direction::from_flags(None, Some(true)), Direction::Outgoing);
        assert_eq!(Direction::from_flags(None, None), Direction::Incoming);
    }

    #[test]
    fn fingerprints_distinguish_action_label_sets() {
        let mut a = message("m1", Direction::Incoming, "offer");
        a.offer = Some(OfferPayload {
            offer_id: Some("o1".into()),
            negotiation_id: Some("n1".into()),
            actions: vec!["Decline".into(), "Accept".into()],
        });

        let mut b = a.clone();
        b.offer = Some(OfferPayload {
            offer_id: Some("o1".into()),
            negotiation_id: Some("n1".into()),
            actions: vec!["Decline".into()],
        });

        let fa = offer_fingerprint(0, &a).unwrap();
        let fb = offer_fingerprint(0, &b).unwrap();
        assert_ne!(fa, fb);
        // Label order does not matter.
        let mut c = a.clone();
        c.offer.as_mut().unwrap().actions = vec!["accept".into(), "DECLINE".into()];
        assert_eq!(offer_fingerprint(0, &c).unwrap(), fa);
    }

    #[test]
    fn outgoing_matching_uses_normalized_containment() {
        let snapshot = ConversationSnapshot {
            conversation_id: "c1".into(),
            participant: "Anna".into(),
            ad_title: "Bike".into(),
            ad_image: None,
            messages: vec![
                message("m1", Direction::Outgoing, "Hello   World"),
                message("m2", Direction::Incoming, "hello world"),
                message("m3", Direction::Outgoing, "prefix hello world suffix"),
            ],
        };
        assert_eq!(snapshot.outgoing_matching("hello world"), 2);
        assert_eq!(snapshot.outgoing_matching(""), 0);
    }

    #[test]
    fn summary_dedup_key_falls_back_to_composite() {
        let mut summary = ConversationSummary {
            conversation_id: None,
            participant: "Anna B".into(),
            ad_title: "City Bike".into(),
            ad_image: None,
            last_message: "Is it available?".into(),
            time_text: "2 days ago".into(),
            unread_count: None,
        };
        assert!(summary.dedup_key().contains("anna b|city bike"));
        summary.conversation_id = Some("k77".into());
        assert_eq!(summary.dedup_key(), "k77");
    }

    #[test]
    fn match_criteria_is_case_insensitive_substring() {
        let criteria = MatchCriteria {
            participant: Some("anna".into()),
            ad_title: None,
        };
        assert!(criteria.matches("Anna Bertram", "City Bike"));
        assert!(!criteria.matches("Bernd", "City Bike"));
        assert!(!MatchCriteria::default().matches("Anna", "Bike"));
    }
}
