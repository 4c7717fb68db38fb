//! Configuration for message-box automation.
//!
//! Plain public fields with `with_*` builder methods. The DOM-locator
//! catalog used to find composer controls, offer boxes, and loading
//! indicators is configuration, not code: callers targeting a different
//! marketplace skin swap the catalog without touching the executors.

use std::time::Duration;

lazy_static! {
    /// Default action deadline override.
    static ref DEFAULT_DEADLINE_MS: u64 = std::env::var("HAWKER_ACTION_DEADLINE_MS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(90_000);
    /// Default UI poll cadence override.
    static ref DEFAULT_POLL_INTERVAL_MS: u64 = std::env::var("HAWKER_POLL_INTERVAL_MS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(450);
    /// Default pipeline concurrency override.
    static ref DEFAULT_CONCURRENCY: usize = std::env::var("HAWKER_FETCH_CONCURRENCY")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(2);
}

/// Selector lists for every control family the executors interact with.
///
/// Each list is tried in order; the first selector that matches wins.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SelectorCatalog {
    /// Message reply input.
    pub reply_box: Vec<String>,
    /// Direct file inputs.
    pub file_input: Vec<String>,
    /// Camera/upload buttons that open a file chooser.
    pub upload_button: Vec<String>,
    /// Send controls.
    pub send_button: Vec<String>,
    /// Payment / offer boxes.
    pub payment_box: Vec<String>,
    /// Decline controls.
    pub decline_control: Vec<String>,
    /// Rendered message bubbles.
    pub message_content: Vec<String>,
    /// Loading / skeleton indicators.
    pub loading_indicator: Vec<String>,
    /// Conversation rows in the overview list.
    pub conversation_list_item: Vec<String>,
    /// Interstitial continue/confirm buttons inside dialogs.
    pub continue_button: Vec<String>,
    /// Dialog scopes used to prioritize decline clicks.
    pub dialog_scope: Vec<String>,
    /// Login-wall markers; any visible match means `AUTH_REQUIRED`.
    pub login_wall: Vec<String>,
    /// Attachment preview chips shown once files are staged.
    pub attachment_preview: Vec<String>,
    /// Selector template for a conversation link, `{id}` substituted.
    pub conversation_link_template: String,
}

impl Default for SelectorCatalog {
    fn default() -> Self {
        SelectorCatalog {
            reply_box: vec![
                r#"textarea[name="message"]"#.into(),
                r#"[data-testid="message-input"]"#.into(),
                r#"[contenteditable="true"][role="textbox"]"#.into(),
            ],
            file_input: vec![
                r#"input[type="file"]"#.into(),
                r#"[data-testid="attachment-input"] input"#.into(),
            ],
            upload_button: vec![
                r#"[data-testid="camera-button"]"#.into(),
                r#"button[aria-label*="attach" i]"#.into(),
                r#"button[aria-label*="photo" i]"#.into(),
            ],
            send_button: vec![
                r#"button[type="submit"]:not([disabled])"#.into(),
                r#"[data-testid="send-button"]:not([disabled])"#.into(),
                r#"button[aria-label*="send" i]:not([disabled])"#.into(),
            ],
            payment_box: vec![
                r#"[data-testid="payment-box"]"#.into(),
                r#"[class*="paymentAndShipping"]"#.into(),
                r#"[class*="offer-box"]"#.into(),
            ],
            decline_control: vec![
                r#"button[data-testid="decline-offer"]"#.into(),
                r#"button[aria-label*="decline" i]"#.into(),
                r#"[class*="offer"] button[class*="secondary"]"#.into(),
            ],
            message_content: vec![
                r#"[data-testid="message-bubble"]"#.into(),
                r#"[class*="messageBubble"]"#.into(),
                r#"[class*="message-list"] li"#.into(),
            ],
            loading_indicator: vec![
                r#"[data-testid="loading"]"#.into(),
                r#"[class*="skeleton"]"#.into(),
                r#"[class*="spinner"]"#.into(),
            ],
            conversation_list_item: vec![
                r#"[data-testid="conversation-list"] li"#.into(),
                r#"[class*="conversationList"] a"#.into(),
            ],
            continue_button: vec![
                r#"button[data-testid="continue-button"]"#.into(),
                r#"button[aria-label*="continue" i]"#.into(),
                r#"button[class*="primary"][type="submit"]"#.into(),
            ],
            dialog_scope: vec![
                r#"[role="dialog"]"#.into(),
                r#"[class*="modal"]"#.into(),
            ],
            login_wall: vec![
                r#"form[action*="login"]"#.into(),
                r#"input[type="password"]"#.into(),
                r#"[data-testid="login-form"]"#.into(),
            ],
            attachment_preview: vec![
                r#"[data-testid="attachment-preview"]"#.into(),
                r#"[class*="attachmentPreview"]"#.into(),
                r#"[class*="thumbnail"][class*="upload"]"#.into(),
            ],
            conversation_link_template: r#"a[href*="{id}"]"#.into(),
        }
    }
}

impl SelectorCatalog {
    /// Selector matching the list entry for one conversation id.
    pub fn conversation_link(&self, conversation_id: &str) -> String {
        self.conversation_link_template
            .replacen("{id}", conversation_id, 1)
    }
}

/// Structure to configure message-box automation.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Configuration {
    /// Marketplace home page, navigated first so cookies apply to the
    /// right origin.
    pub home_url: String,
    /// Conversation overview URL.
    pub list_url: String,
    /// Canonical conversation URL template with an `{id}` placeholder.
    pub conversation_url_template: String,
    /// Base URL of the message-box read/write API.
    pub messagebox_base_url: String,
    /// URL marker identifying the messaging backend in observed requests.
    pub backend_marker: String,
    /// URL substrings that indicate a login redirect.
    pub login_url_markers: Vec<String>,
    /// JS expression exposing the app's client-side render hook, when the
    /// hosting page has one.
    pub render_hook: Option<String>,
    /// Hard action deadline applied when the caller passes none.
    pub action_deadline: Duration,
    /// Cadence of UI state polls.
    pub poll_interval: Duration,
    /// Share of the action deadline granted to readiness.
    pub readiness_share: f64,
    /// Per-navigation request timeout.
    pub request_timeout: Option<Box<Duration>>,
    /// Pipeline worker count, clamped to `[1, 4]` at run time.
    pub concurrency: usize,
    /// Conversation list page size requested from the API.
    pub page_size: usize,
    /// Fallback user agent when the account carries no device profile.
    pub user_agent: Option<Box<String>>,
    /// DOM-locator catalog.
    pub selectors: SelectorCatalog,
    /// Override for the browser executable, passed to the session factory.
    pub chrome_executable: Option<String>,
    /// Connect to a remote browser instead of launching one.
    pub chrome_connection_url: Option<String>,
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration {
            home_url: "https://www.marketplace-example.com/".into(),
            list_url: "https://www.marketplace-example.com/m-nachrichten.html".into(),
            conversation_url_template:
                "https://www.marketplace-example.com/m-nachrichten.html#?conversationId={id}".into(),
            messagebox_base_url: "https://gateway.marketplace-example.com/messagebox/api".into(),
            backend_marker: "/messagebox/".into(),
            login_url_markers: vec!["/m-einloggen".into(), "/login".into()],
            render_hook: None,
            action_deadline: Duration::from_millis(*DEFAULT_DEADLINE_MS),
            poll_interval: Duration::from_millis(*DEFAULT_POLL_INTERVAL_MS),
            readiness_share: 0.6,
            request_timeout: Some(Box::new(Duration::from_secs(30))),
            concurrency: *DEFAULT_CONCURRENCY,
            page_size: 30,
            user_agent: None,
            selectors: SelectorCatalog::default(),
            chrome_executable: None,
            chrome_connection_url: None,
        }
    }
}

impl Configuration {
    /// Represents the configuration for the message-box automation core.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the marketplace base URLs from one origin.
    pub fn with_origin(&mut self, origin: &str) -> &mut Self {
        let origin = origin.trim_end_matches('/');
        self.home_url = format!("{origin}/");
        self.list_url = format!("{origin}/m-nachrichten.html");
        self.conversation_url_template =
            format!("{origin}/m-nachrichten.html#?conversationId={{id}}");
        self
    }

    /// Set the message-box API base URL.
    pub fn with_messagebox_base(&mut self, base: &str) -> &mut Self {
        self.messagebox_base_url = base.trim_end_matches('/').to_string();
        self
    }

    /// Set the action deadline used when the caller passes none.
    pub fn with_action_deadline(&mut self, deadline: Duration) -> &mut Self {
        self.action_deadline = deadline;
        self
    }

    /// Set the UI poll cadence.
    pub fn with_poll_interval(&mut self, interval: Duration) -> &mut Self {
        self.poll_interval = interval;
        self
    }

    /// Set the pipeline worker count (clamped to `[1, 4]` when running).
    pub fn with_concurrency(&mut self, concurrency: usize) -> &mut Self {
        self.concurrency = concurrency;
        self
    }

    /// Replace the selector catalog.
    pub fn with_selectors(&mut self, selectors: SelectorCatalog) -> &mut Self {
        self.selectors = selectors;
        self
    }

    /// Set the client-side render hook expression.
    pub fn with_render_hook(&mut self, hook: Option<String>) -> &mut Self {
        self.render_hook = hook;
        self
    }

    /// Set the fallback user agent.
    pub fn with_user_agent(&mut self, user_agent: Option<&str>) -> &mut Self {
        match user_agent {
            Some(agent) => self.user_agent = Some(Box::new(agent.into())),
            _ => self.user_agent = None,
        };
        self
    }

    /// The effective concurrency after clamping.
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.clamp(1, 4)
    }

    /// Whether a URL looks like a login redirect.
    pub fn is_login_url(&self, url: &str) -> bool {
        self.login_url_markers.iter().any(|m| url.contains(m.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_builder_rewrites_urls() {
        let mut config = Configuration::new();
        config.with_origin("https://market.test");
        assert_eq!(config.home_url, "https://market.test/");
        assert!(config.conversation_url_template.contains("{id}"));
    }

    #[test]
    fn concurrency_is_clamped() {
        let mut config = Configuration::new();
        config.with_concurrency(9);
        assert_eq!(config.effective_concurrency(), 4);
        config.with_concurrency(0);
        assert_eq!(config.effective_concurrency(), 1);
    }

    #[test]
    fn login_urls_are_detected() {
        let config = Configuration::new();
        assert!(config.is_login_url("https://www.marketplace-example.com/m-einloggen.html?rt=1"));
        assert!(!config.is_login_url("https://www.marketplace-example.com/m-nachrichten.html"));
    }

    #[test]
    fn conversation_link_selector_substitutes_id() {
        let catalog = SelectorCatalog::default();
        assert_eq!(catalog.conversation_link("abc"), r#"a[href*="abc"]"#);
    }
}
