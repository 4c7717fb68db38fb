//! Error taxonomy and fault classification.
//!
//! Every failure surfaced by a public operation is exactly one
//! [`HawkerError`] carrying a normalized [`Fault`]. Raw transport and
//! navigation errors are classified once, at the boundary where they are
//! caught, never again inside recovery logic.

use crate::utils::truncate_chars;
use aho_corasick::AhoCorasick;
use thiserror::Error;

/// Convenience result type used throughout the crate.
pub type HawkerResult<T> = Result<T, HawkerError>;

/// Hard cap for the diagnostic details attached to a fault.
pub const MAX_FAULT_DETAILS: usize = 800;

/// Closed classification of a raw failure.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumString, strum::Display, strum::AsRefStr,
    serde::Serialize, serde::Deserialize,
)]
pub enum FaultKind {
    /// The proxy tunnel could not be established or dropped mid-flight.
    #[strum(serialize = "proxy-tunnel")]
    ProxyTunnel,
    /// The browser session, target, or execution context went away.
    #[strum(serialize = "detached-session")]
    DetachedSession,
    /// The remote requires (re-)authentication.
    #[strum(serialize = "auth-required")]
    AuthRequired,
    /// The page never exposed the controls the action needs.
    #[strum(serialize = "ui-not-ready")]
    UiNotReady,
    /// The invocation deadline or a derived step timeout elapsed.
    #[strum(serialize = "action-timeout")]
    ActionTimeout,
    /// Anything that matched no curated pattern.
    #[strum(serialize = "unknown")]
    Unknown,
}

/// Normalized failure payload attached to every surfaced error.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Fault {
    /// Classified kind.
    pub kind: FaultKind,
    /// The original, unclassified message.
    pub message: String,
    /// Bounded diagnostic string: context, message, and cause concatenated.
    pub details: String,
}

impl Fault {
    /// Build a fault with classified kind and bounded details.
    pub fn new(kind: FaultKind, context: &str, message: &str, cause: Option<&str>) -> Self {
        let mut details = String::with_capacity(context.len() + message.len() + 8);
        details.push_str(context);
        if !message.is_empty() {
            details.push_str(" :: ");
            details.push_str(message);
        }
        if let Some(cause) = cause {
            if !cause.is_empty() {
                details.push_str(" :: ");
                details.push_str(cause);
            }
        }

        Fault {
            kind,
            message: message.to_string(),
            details: truncate_chars(&details, MAX_FAULT_DETAILS).to_string(),
        }
    }

    /// Classify and wrap a raw failure in one step.
    pub fn classified(context: &str, message: &str, cause: Option<&str>, code: Option<&str>) -> Self {
        let kind = classify(message, cause, code);
        Fault::new(kind, context, message, cause)
    }
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind, self.details)
    }
}

/// Errors produced by the public operations.
///
/// Each variant corresponds to one code of the closed taxonomy; the
/// embedded [`Fault`] carries the classification and bounded diagnostics.
#[derive(Debug, Error)]
pub enum HawkerError {
    /// No usable stored credential, or the remote demanded a login.
    #[error("AUTH_REQUIRED: {0}")]
    AuthRequired(Fault),
    /// Neither a conversation id, url, nor match criteria identified a target.
    #[error("CONVERSATION_ID_REQUIRED: {0}")]
    ConversationIdRequired(Fault),
    /// A consent interstitial could not be cleared.
    #[error("CONSENT_REQUIRED: {0}")]
    ConsentRequired(Fault),
    /// The message input control never became available.
    #[error("MESSAGE_INPUT_NOT_FOUND: {0}")]
    MessageInputNotFound(Fault),
    /// No file input or upload affordance could be located.
    #[error("MESSAGE_FILE_INPUT_NOT_FOUND: {0}")]
    MessageFileInputNotFound(Fault),
    /// No decline control could be located in any scope.
    #[error("DECLINE_BUTTON_NOT_FOUND: {0}")]
    DeclineButtonNotFound(Fault),
    /// The readiness state machine exhausted its timeout.
    #[error("CONVERSATION_NOT_READY: {0}")]
    ConversationNotReady(Fault),
    /// The invocation deadline elapsed.
    #[error("MESSAGE_ACTION_TIMEOUT: {0}")]
    ActionTimeout(Fault),
    /// A text send produced neither snapshot nor interaction evidence.
    #[error("MESSAGE_SEND_NOT_CONFIRMED: {0}")]
    SendNotConfirmed(Fault),
    /// A media send produced neither snapshot nor interaction evidence.
    #[error("MESSAGE_MEDIA_SEND_NOT_CONFIRMED: {0}")]
    MediaSendNotConfirmed(Fault),
    /// A decline produced neither snapshot nor interaction evidence.
    #[error("DECLINE_NOT_APPLIED: {0}")]
    DeclineNotApplied(Fault),
    /// The proxy tunnel failed while driving the action.
    #[error("PROXY_TUNNEL_CONNECTION_FAILED: {0}")]
    ProxyTunnel(Fault),
    /// The message-box API answered with a non-auth 4xx/5xx.
    #[error("MESSAGEBOX_API_ERROR_{status}: {fault}")]
    MessageBoxApi {
        /// HTTP status reported by the endpoint.
        status: u16,
        /// Normalized failure payload.
        fault: Fault,
    },
    /// A classified session/transport failure outside the named codes.
    #[error("SESSION_ERROR: {0}")]
    Session(Fault),
}

impl HawkerError {
    /// The fault payload shared by every variant.
    pub fn fault(&self) -> &Fault {
        match self {
            HawkerError::AuthRequired(f)
            | HawkerError::ConversationIdRequired(f)
            | HawkerError::ConsentRequired(f)
            | HawkerError::MessageInputNotFound(f)
            | HawkerError::MessageFileInputNotFound(f)
            | HawkerError::DeclineButtonNotFound(f)
            | HawkerError::ConversationNotReady(f)
            | HawkerError::ActionTimeout(f)
            | HawkerError::SendNotConfirmed(f)
            | HawkerError::MediaSendNotConfirmed(f)
            | HawkerError::DeclineNotApplied(f)
            | HawkerError::ProxyTunnel(f)
            | HawkerError::Session(f) => f,
            HawkerError::MessageBoxApi { fault, .. } => fault,
        }
    }

    /// Classified kind of the underlying fault.
    pub fn kind(&self) -> FaultKind {
        self.fault().kind
    }

    /// Whether a caller may retry the invocation against fresh infrastructure.
    pub fn retryable(&self) -> bool {
        matches!(
            self.kind(),
            FaultKind::ProxyTunnel | FaultKind::DetachedSession | FaultKind::UiNotReady
        )
    }

    /// Route a classified fault to the matching taxonomy variant.
    pub fn from_fault(fault: Fault) -> Self {
        match fault.kind {
            FaultKind::ProxyTunnel => HawkerError::ProxyTunnel(fault),
            FaultKind::AuthRequired => HawkerError::AuthRequired(fault),
            FaultKind::ActionTimeout => HawkerError::ActionTimeout(fault),
            _ => HawkerError::Session(fault),
        }
    }
}

/// Transport error codes mapped straight to a kind, checked before any
/// message pattern.
const CODE_ALLOW_LIST: &[(&str, FaultKind)] = &[
    ("ECONNREFUSED", FaultKind::ProxyTunnel),
    ("ECONNRESET", FaultKind::ProxyTunnel),
    ("ETIMEDOUT", FaultKind::ProxyTunnel),
    ("EPIPE", FaultKind::ProxyTunnel),
    ("EPROTO", FaultKind::ProxyTunnel),
    ("EHOSTUNREACH", FaultKind::ProxyTunnel),
    ("ERR_TUNNEL_CONNECTION_FAILED", FaultKind::ProxyTunnel),
    ("ERR_PROXY_CONNECTION_FAILED", FaultKind::ProxyTunnel),
    ("ERR_SOCKS_CONNECTION_FAILED", FaultKind::ProxyTunnel),
    ("407", FaultKind::ProxyTunnel),
    ("401", FaultKind::AuthRequired),
    ("403", FaultKind::AuthRequired),
    ("ERR_TIMED_OUT", FaultKind::ActionTimeout),
];

lazy_static! {
    static ref PROXY_PATTERNS: AhoCorasick = AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build([
            "tunneling socket could not be established",
            "econnrefused",
            "econnreset",
            "etimedout",
            "ehostunreach",
            "connection refused",
            "connection reset by peer",
            "error trying to connect",
            "proxy connection failed",
            "socks connection failed",
            "err_tunnel_connection_failed",
            "err_proxy_connection_failed",
            "proxy authentication required",
            "http 407",
        ])
        .expect("static proxy pattern set");
    static ref DETACHED_PATTERNS: AhoCorasick = AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build([
            "execution context was destroyed",
            "session closed",
            "session with given id not found",
            "target closed",
            "target crashed",
            "browser has disconnected",
            "websocket connection closed",
            "connection closed before message completed",
            "detached frame",
            "page crashed",
            "inspected target navigated or closed",
        ])
        .expect("static detached pattern set");
    static ref AUTH_PATTERNS: AhoCorasick = AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build([
            "authentication required",
            "not logged in",
            "login required",
            "unauthorized",
            "http 401",
            "http 403",
        ])
        .expect("static auth pattern set");
    static ref TIMEOUT_PATTERNS: AhoCorasick = AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build([
            "timed out",
            "timeout exceeded",
            "deadline has elapsed",
            "navigation timeout",
            "request timed out",
        ])
        .expect("static timeout pattern set");
    static ref UI_PATTERNS: AhoCorasick = AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build([
            "node is either not clickable",
            "could not find node",
            "element not found",
            "no node found for selector",
            "not visible",
            "waiting for selector",
            "node is detached from document",
        ])
        .expect("static ui pattern set");
    /// Chromium net-stack error names for proxy failures, e.g.
    /// `net::ERR_TUNNEL_CONNECTION_FAILED`.
    static ref NET_PROXY_RE: regex::Regex =
        regex::Regex::new(r"net::ERR_[A-Z_]*(TUNNEL|PROXY|SOCKS)[A-Z_]*").expect("static net regex");
    /// Step-timeout phrasing produced by budgeted waits.
    static ref TIMED_OUT_AFTER_RE: regex::Regex =
        regex::Regex::new(r"(?i)timed?\s?out after \d+\s?ms").expect("static timeout regex");
}

/// Deterministic, side-effect-free classification of a raw failure.
///
/// The transport-reported `code` wins over message content; message and
/// cause substrings are then checked against the curated pattern lists in
/// fixed precedence: proxy, detached session, auth, timeout, ui.
pub fn classify(message: &str, cause: Option<&str>, code: Option<&str>) -> FaultKind {
    if let Some(code) = code {
        let code = code.trim();
        for (known, kind) in CODE_ALLOW_LIST {
            if code.eq_ignore_ascii_case(known) {
                return *kind;
            }
        }
    }

    let mut haystack = String::with_capacity(message.len() + cause.map_or(0, |c| c.len() + 1));
    haystack.push_str(message);
    if let Some(cause) = cause {
        haystack.push('\n');
        haystack.push_str(cause);
    }

    if PROXY_PATTERNS.is_match(&haystack) || NET_PROXY_RE.is_match(&haystack) {
        FaultKind::ProxyTunnel
    } else if DETACHED_PATTERNS.is_match(&haystack) {
        FaultKind::DetachedSession
    } else if AUTH_PATTERNS.is_match(&haystack) {
        FaultKind::AuthRequired
    } else if TIMEOUT_PATTERNS.is_match(&haystack) || TIMED_OUT_AFTER_RE.is_match(&haystack) {
        FaultKind::ActionTimeout
    } else if UI_PATTERNS.is_match(&haystack) {
        FaultKind::UiNotReady
    } else {
        FaultKind::Unknown
    }
}

/// Classify an error object by walking its source chain into a cause string.
pub fn classify_error(context: &str, err: &(dyn std::error::Error + 'static)) -> Fault {
    let message = err.to_string();
    let mut cause = String::new();
    let mut source = err.source();

    while let Some(inner) = source {
        if !cause.is_empty() {
            cause.push_str(" <- ");
        }
        cause.push_str(&inner.to_string());
        source = inner.source();
    }

    let cause = if cause.is_empty() {
        None
    } else {
        Some(cause.as_str())
    };

    Fault::classified(context, &message, cause, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxy_failures_never_classify_unknown() {
        for raw in [
            "connect ECONNREFUSED 10.0.0.2:3128",
            "socket hang up ETIMEDOUT",
            "tunneling socket could not be established, statusCode=502",
        ] {
            assert_eq!(classify(raw, None, None), FaultKind::ProxyTunnel, "{raw}");
        }
        assert_eq!(classify("request failed", None, Some("407")), FaultKind::ProxyTunnel);
        assert_eq!(
            classify("request failed", None, Some("ECONNREFUSED")),
            FaultKind::ProxyTunnel
        );
    }

    #[test]
    fn detached_session_beats_timeout() {
        let kind = classify(
            "Protocol error: Execution context was destroyed, most likely because of a navigation",
            None,
            None,
        );
        assert_eq!(kind, FaultKind::DetachedSession);
    }

    #[test]
    fn cause_participates_in_classification() {
        let kind = classify("navigation failed", Some("net error: ECONNRESET"), None);
        assert_eq!(kind, FaultKind::ProxyTunnel);
    }

    #[test]
    fn unmatched_is_unknown() {
        assert_eq!(classify("the moon is full", None, None), FaultKind::Unknown);
    }

    #[test]
    fn details_are_bounded() {
        let long = "x".repeat(4_000);
        let fault = Fault::classified("ctx", &long, Some(&long), None);
        assert!(fault.details.len() <= MAX_FAULT_DETAILS);
        assert_eq!(fault.message.len(), 4_000);
    }

    #[test]
    fn error_codes_render_taxonomy_names() {
        let fault = Fault::new(FaultKind::ProxyTunnel, "send", "tunnel down", None);
        let err = HawkerError::from_fault(fault);
        assert!(err.to_string().starts_with("PROXY_TUNNEL_CONNECTION_FAILED"));
        assert!(err.retryable());

        let api = HawkerError::MessageBoxApi {
            status: 502,
            fault: Fault::new(FaultKind::Unknown, "post", "bad gateway", None),
        };
        assert!(api.to_string().starts_with("MESSAGEBOX_API_ERROR_502"));
    }
}
