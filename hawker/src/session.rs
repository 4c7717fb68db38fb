//! Browser session seam.
//!
//! The core never talks to a concrete browser: every interaction flows
//! through [`BrowserSession`], acquired per invocation from a
//! [`SessionFactory`] and released on every exit path. The `chrome`
//! feature ships an adapter over a real browser; tests use in-memory
//! fakes.

use crate::budget::DeadlineBudget;
use crate::conversation::{Account, ProxyServer};
use crate::error::HawkerResult;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

/// Depth cap for breadth-first traversal into nested documents and
/// shadow-attached subtrees during element searches.
pub const MAX_PIERCE_DEPTH: usize = 4;

/// What the navigation should wait for before returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitUntil {
    /// DOMContentLoaded fired.
    #[default]
    DomContentLoaded,
    /// The load event fired.
    Load,
    /// The network went mostly idle after load.
    NetworkIdle,
}

/// Per-navigation options, always derived from the deadline budget.
#[derive(Debug, Clone, Copy)]
pub struct NavigateOptions {
    /// Readiness event to wait for.
    pub wait_until: WaitUntil,
    /// Hard cap for this navigation step.
    pub timeout: Duration,
}

impl Default for NavigateOptions {
    fn default() -> Self {
        NavigateOptions {
            wait_until: WaitUntil::DomContentLoaded,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Options for element searches.
#[derive(Debug, Clone, Copy)]
pub struct FindOptions {
    /// Only return elements with a non-empty layout box.
    pub require_visible: bool,
    /// Descend into nested documents and open shadow roots, breadth-first,
    /// capped at [`MAX_PIERCE_DEPTH`].
    pub pierce: bool,
}

impl Default for FindOptions {
    fn default() -> Self {
        FindOptions {
            require_visible: true,
            pierce: false,
        }
    }
}

/// Opaque handle to one located element. Handles are positional: the
/// session re-resolves `selector` + `index` on interaction, so a handle
/// must not outlive the page state it was found in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementHandle {
    /// Selector that located the element.
    pub selector: String,
    /// Match index within that selector's result list.
    pub index: usize,
    /// Whether the element had a visible layout box when found.
    pub visible: bool,
    /// Trimmed inner text when cheaply available.
    pub text: Option<String>,
}

impl ElementHandle {
    /// Handle for the first match of a selector.
    pub fn first(selector: impl Into<String>) -> Self {
        ElementHandle {
            selector: selector.into(),
            index: 0,
            visible: true,
            text: None,
        }
    }
}

/// Page-level events drained from the session's subscription buffers.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A console entry.
    Console(String),
    /// An uncaught page error.
    PageError(String),
    /// A request that failed at the network layer.
    RequestFailed {
        /// Request URL.
        url: String,
        /// Network error text.
        error: String,
    },
    /// A request that was sent, with its method.
    Request {
        /// Request URL.
        url: String,
        /// HTTP method.
        method: String,
    },
    /// A response that arrived.
    Response {
        /// Response URL.
        url: String,
        /// HTTP status.
        status: u16,
    },
    /// A main-frame navigation committed.
    Navigation(String),
}

impl SessionEvent {
    /// Whether this event is a mutation-shaped request against the
    /// messaging backend: a write-method request whose URL carries the
    /// backend marker.
    pub fn is_mutation_signal(&self, backend_marker: &str) -> bool {
        match self {
            SessionEvent::Request { url, method } => {
                (method.eq_ignore_ascii_case("post")
                    || method.eq_ignore_ascii_case("put")
                    || method.eq_ignore_ascii_case("patch"))
                    && url.contains(backend_marker)
            }
            _ => false,
        }
    }
}

/// Transient view of what the rendered page currently exposes.
///
/// Recomputed on every poll, never persisted across polls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UiState {
    /// A reply/message input is present.
    pub has_reply_box: bool,
    /// A file input is present.
    pub has_file_input: bool,
    /// The send control is present and enabled.
    pub has_send_button_enabled: bool,
    /// A payment/offer box is present.
    pub has_payment_box: bool,
    /// A decline control is present.
    pub has_decline_control: bool,
    /// Message content has rendered.
    pub has_message_content: bool,
    /// A loading/skeleton indicator is blocking the view.
    pub is_loading_blocking: bool,
    /// The conversation list shows an entry matching the target.
    pub has_matching_conversation_link: bool,
}

impl UiState {
    /// Progress signature over the boolean feature vector. Any flip in any
    /// feature yields a different signature.
    pub fn signature(&self) -> u8 {
        (self.has_reply_box as u8)
            | (self.has_file_input as u8) << 1
            | (self.has_send_button_enabled as u8) << 2
            | (self.has_payment_box as u8) << 3
            | (self.has_decline_control as u8) << 4
            | (self.has_message_content as u8) << 5
            | (self.is_loading_blocking as u8) << 6
            | (self.has_matching_conversation_link as u8) << 7
    }

    /// Readiness predicate for sending text or media: any composer
    /// affordance present and nothing blocking.
    pub fn ready_for_send(&self) -> bool {
        (self.has_reply_box || self.has_file_input || self.has_send_button_enabled)
            && !self.is_loading_blocking
    }

    /// Readiness predicate for declining an offer.
    pub fn ready_for_decline(&self) -> bool {
        self.has_decline_control
            || self.has_payment_box
            || (self.has_message_content && self.has_reply_box)
    }
}

/// One live browser page plus its profile, owned by one invocation.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Navigate the page. Fails classified on transport/navigation errors.
    async fn navigate(&self, url: &str, opts: &NavigateOptions) -> HawkerResult<()>;

    /// The page's current URL, when resolvable.
    async fn current_url(&self) -> Option<String>;

    /// Evaluate a script in the page. Non-throwing: query failures yield
    /// `None` so poll loops can treat them as "not there yet".
    async fn evaluate_in_page(&self, script: &str) -> Option<serde_json::Value>;

    /// Locate elements for the given selectors, tried in order; the first
    /// selector with any match wins and its matches are returned.
    async fn find_elements(&self, selectors: &[String], opts: &FindOptions) -> Vec<ElementHandle>;

    /// Dispatch a trusted click on a previously located element. Returns
    /// whether the click actually fired.
    async fn dispatch_click(&self, handle: &ElementHandle) -> bool;

    /// Focus an element and type text with humanized timing.
    async fn type_text(&self, handle: &ElementHandle, text: &str) -> HawkerResult<()>;

    /// Press a key on the focused element. Returns whether it dispatched.
    async fn press_key(&self, key: &str) -> bool;

    /// Stage local files into a file input.
    async fn set_files(&self, handle: &ElementHandle, files: &[PathBuf]) -> HawkerResult<()>;

    /// Inject stored cookies for the given origin.
    async fn set_cookies(&self, cookie_str: &str, url: &str) -> HawkerResult<()>;

    /// Capture a screenshot of the current viewport, when possible.
    async fn capture_screenshot(&self) -> Option<bytes::Bytes>;

    /// Drain buffered console / error / network / navigation events.
    async fn drain_events(&self) -> Vec<SessionEvent>;

    /// Whether the underlying target is gone.
    fn is_closed(&self) -> bool;

    /// Tear the session down: graceful close with a bounded wait, then
    /// forced termination. Releases the ephemeral profile.
    async fn close(&self);
}

/// Acquires one session per invocation, scoped to one ephemeral profile.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Launch or connect a session for the account behind its proxy.
    async fn acquire(
        &self,
        account: &Account,
        proxy: Option<&ProxyServer>,
        budget: &DeadlineBudget,
    ) -> HawkerResult<Box<dyn BrowserSession>>;
}
