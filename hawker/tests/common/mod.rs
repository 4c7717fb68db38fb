//! In-memory fakes for the collaborator seams.
#![allow(dead_code)]

use async_trait::async_trait;
use hawker::budget::DeadlineBudget;
use hawker::configuration::Configuration;
use hawker::conversation::{
    Account, ConversationSnapshot, ConversationSummary, ProxyServer,
};
use hawker::error::{Fault, FaultKind, HawkerError, HawkerResult};
use hawker::session::{
    BrowserSession, ElementHandle, FindOptions, NavigateOptions, SessionEvent, SessionFactory,
};
use hawker::transport::{AuthSession, ConversationPage, MessageBox, MessageBoxFactory};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Tuned-down configuration so the fakes turn around fast.
pub fn test_configuration() -> Configuration {
    let mut config = Configuration::new();
    config
        .with_poll_interval(std::time::Duration::from_millis(25))
        .with_action_deadline(std::time::Duration::from_secs(30));
    config
}

pub fn account(id: &str) -> Account {
    Account {
        id: id.into(),
        cookie_str: format!("session=s-{id}; userId={id}"),
        device: None,
        proxy_ref: None,
    }
}

// ---------------------------------------------------------------------
// Browser session fake
// ---------------------------------------------------------------------

type ClickHook = Box<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
pub struct FakeSessionState {
    /// Selector string -> how many elements it currently matches.
    pub present: Mutex<HashMap<String, usize>>,
    pub clicks: Mutex<Vec<String>>,
    pub typed: Mutex<Vec<(String, String)>>,
    pub staged_files: Mutex<Vec<usize>>,
    pub navigations: Mutex<Vec<String>>,
    pub events: Mutex<Vec<SessionEvent>>,
    pub current_url: Mutex<String>,
    /// Canned result for the composer-settled probe.
    pub composer: Mutex<(String, u64)>,
    /// Canned rows for the list-scrape script.
    pub list_rows: Mutex<serde_json::Value>,
    /// Canned payload for the thread-scrape script.
    pub thread_rows: Mutex<serde_json::Value>,
    pub on_click: Mutex<Option<ClickHook>>,
    pub closed: AtomicBool,
}

#[derive(Clone, Default)]
pub struct FakeSession(pub Arc<FakeSessionState>);

impl FakeSession {
    pub fn show(&self, selector: &str, count: usize) {
        self.0
            .present
            .lock()
            .unwrap()
            .insert(selector.to_string(), count);
    }

    pub fn hide(&self, selector: &str) {
        self.0.present.lock().unwrap().remove(selector);
    }

    pub fn push_event(&self, event: SessionEvent) {
        self.0.events.lock().unwrap().push(event);
    }

    pub fn set_on_click(&self, hook: ClickHook) {
        *self.0.on_click.lock().unwrap() = Some(hook);
    }
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn navigate(&self, url: &str, _opts: &NavigateOptions) -> HawkerResult<()> {
        self.0.navigations.lock().unwrap().push(url.to_string());
        *self.0.current_url.lock().unwrap() = url.to_string();
        Ok(())
    }

    async fn current_url(&self) -> Option<String> {
        Some(self.0.current_url.lock().unwrap().clone())
    }

    async fn evaluate_in_page(&self, script: &str) -> Option<serde_json::Value> {
        if script.contains("previews") && script.contains("text") {
            let (text, previews) = self.0.composer.lock().unwrap().clone();
            return Some(serde_json::json!({ "text": text, "previews": previews }));
        }
        if script.contains("location.reload") {
            return Some(serde_json::Value::Bool(true));
        }
        if script.contains("href:") {
            return Some(self.0.list_rows.lock().unwrap().clone());
        }
        if script.contains("outgoing:") {
            return Some(self.0.thread_rows.lock().unwrap().clone());
        }
        None
    }

    async fn find_elements(&self, selectors: &[String], opts: &FindOptions) -> Vec<ElementHandle> {
        let present = self.0.present.lock().unwrap();
        for selector in selectors {
            if let Some(count) = present.get(selector.as_str()).copied().filter(|c| *c > 0) {
                let _ = opts;
                return (0..count)
                    .map(|index| ElementHandle {
                        selector: selector.clone(),
                        index,
                        visible: true,
                        text: None,
                    })
                    .collect();
            }
        }
        Vec::new()
    }

    async fn dispatch_click(&self, handle: &ElementHandle) -> bool {
        self.0.clicks.lock().unwrap().push(handle.selector.clone());
        if let Some(hook) = self.0.on_click.lock().unwrap().as_ref() {
            hook(&handle.selector);
        }
        true
    }

    async fn type_text(&self, handle: &ElementHandle, text: &str) -> HawkerResult<()> {
        self.0
            .typed
            .lock()
            .unwrap()
            .push((handle.selector.clone(), text.to_string()));
        Ok(())
    }

    async fn press_key(&self, _key: &str) -> bool {
        true
    }

    async fn set_files(&self, _handle: &ElementHandle, files: &[PathBuf]) -> HawkerResult<()> {
        self.0.staged_files.lock().unwrap().push(files.len());
        Ok(())
    }

    async fn set_cookies(&self, _cookie_str: &str, _url: &str) -> HawkerResult<()> {
        Ok(())
    }

    async fn capture_screenshot(&self) -> Option<bytes::Bytes> {
        None
    }

    async fn drain_events(&self) -> Vec<SessionEvent> {
        std::mem::take(&mut *self.0.events.lock().unwrap())
    }

    fn is_closed(&self) -> bool {
        self.0.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.0.closed.store(true, Ordering::SeqCst);
    }
}

/// Hands out clones of one scripted session and counts acquisitions.
pub struct FakeSessionFactory {
    pub session: FakeSession,
    pub acquired: AtomicUsize,
}

impl FakeSessionFactory {
    pub fn new(session: FakeSession) -> Self {
        FakeSessionFactory {
            session,
            acquired: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SessionFactory for FakeSessionFactory {
    async fn acquire(
        &self,
        _account: &Account,
        _proxy: Option<&ProxyServer>,
        _budget: &DeadlineBudget,
    ) -> HawkerResult<Box<dyn BrowserSession>> {
        self.acquired.fetch_add(1, Ordering::SeqCst);
        // A real factory hands back a fresh, live session on every acquire.
        // The fake reuses one scripted session, so reset its per-lifecycle
        // closed flag (set by the previous round's close()) to emulate that.
        self.session.0.closed.store(false, Ordering::SeqCst);
        Ok(Box::new(self.session.clone()))
    }
}

// ---------------------------------------------------------------------
// Message-box fake
// ---------------------------------------------------------------------

#[derive(Default)]
pub struct FakeMessageBoxState {
    /// user id -> listed summaries.
    pub listings: Mutex<HashMap<String, Vec<ConversationSummary>>>,
    /// conversation id -> current snapshot; mutate from click hooks to
    /// simulate the backend applying the action.
    pub details: Mutex<HashMap<String, ConversationSnapshot>>,
    /// user ids whose token exchange fails with AUTH_REQUIRED.
    pub auth_failures: Mutex<Vec<String>>,
    pub post_fails: AtomicBool,
    pub posts: Mutex<Vec<(String, String)>>,
    pub detail_calls: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct FakeMessageBox(pub Arc<FakeMessageBoxState>);

impl FakeMessageBox {
    pub fn put_detail(&self, snapshot: ConversationSnapshot) {
        self.0
            .details
            .lock()
            .unwrap()
            .insert(snapshot.conversation_id.clone(), snapshot);
    }

    pub fn put_listing(&self, user_id: &str, summaries: Vec<ConversationSummary>) {
        self.0
            .listings
            .lock()
            .unwrap()
            .insert(user_id.to_string(), summaries);
    }
}

#[async_trait]
impl MessageBox for FakeMessageBox {
    async fn exchange_session_for_token(&self, cookie_str: &str) -> HawkerResult<AuthSession> {
        let user_id = hawker::transport::user_id_from_cookies(cookie_str).unwrap_or_default();
        if self.0.auth_failures.lock().unwrap().contains(&user_id) {
            return Err(HawkerError::AuthRequired(Fault::new(
                FaultKind::AuthRequired,
                "fake token exchange",
                "stale cookies",
                None,
            )));
        }
        Ok(AuthSession {
            user_id,
            token: "tok".into(),
            expiry_epoch_ms: None,
        })
    }

    async fn list_conversations(
        &self,
        auth: &AuthSession,
        page: usize,
        _size: usize,
    ) -> HawkerResult<ConversationPage> {
        let listings = self.0.listings.lock().unwrap();
        let all = listings.get(&auth.user_id).cloned().unwrap_or_default();
        Ok(ConversationPage {
            total: all.len(),
            conversations: if page == 0 { all } else { Vec::new() },
        })
    }

    async fn conversation_detail(
        &self,
        _auth: &AuthSession,
        conversation_id: &str,
    ) -> HawkerResult<ConversationSnapshot> {
        self.0.detail_calls.fetch_add(1, Ordering::SeqCst);
        self.0
            .details
            .lock()
            .unwrap()
            .get(conversation_id)
            .cloned()
            .ok_or_else(|| HawkerError::MessageBoxApi {
                status: 404,
                fault: Fault::new(
                    FaultKind::Unknown,
                    "fake detail",
                    &format!("unknown conversation {conversation_id}"),
                    None,
                ),
            })
    }

    async fn post_message(
        &self,
        _auth: &AuthSession,
        conversation_id: &str,
        text: &str,
    ) -> HawkerResult<()> {
        if self.0.post_fails.load(Ordering::SeqCst) {
            return Err(HawkerError::MessageBoxApi {
                status: 503,
                fault: Fault::new(FaultKind::Unknown, "fake post", "backend unavailable", None),
            });
        }
        self.0
            .posts
            .lock()
            .unwrap()
            .push((conversation_id.to_string(), text.to_string()));

        // Reflect the write in the read model like the real backend does.
        if let Some(snapshot) = self
            .0
            .details
            .lock()
            .unwrap()
            .get_mut(conversation_id)
        {
            snapshot.messages.push(outgoing_message(
                &format!("m-post-{}", snapshot.messages.len()),
                text,
            ));
        }
        Ok(())
    }
}

pub struct FakeMessageBoxFactory(pub FakeMessageBox);

impl MessageBoxFactory for FakeMessageBoxFactory {
    fn create(
        &self,
        _config: &Configuration,
        _proxy: Option<&ProxyServer>,
    ) -> HawkerResult<Box<dyn MessageBox>> {
        Ok(Box::new(self.0.clone()))
    }
}

// ---------------------------------------------------------------------
// Model helpers
// ---------------------------------------------------------------------

pub fn outgoing_message(id: &str, text: &str) -> hawker::conversation::Message {
    hawker::conversation::Message {
        id: id.into(),
        text: text.into(),
        direction: hawker::conversation::Direction::Outgoing,
        sender: "me".into(),
        timestamp: "2026-03-01T10:00:00Z".into(),
        attachments: Default::default(),
        offer: None,
    }
}

pub fn incoming_offer_message(id: &str, actions: &[&str]) -> hawker::conversation::Message {
    hawker::conversation::Message {
        id: id.into(),
        text: "offer".into(),
        direction: hawker::conversation::Direction::Incoming,
        sender: "anna".into(),
        timestamp: "2026-03-01T09:00:00Z".into(),
        attachments: Default::default(),
        offer: Some(hawker::conversation::OfferPayload {
            offer_id: Some("o1".into()),
            negotiation_id: Some("n1".into()),
            actions: actions.iter().map(|a| a.to_string()).collect(),
        }),
    }
}

pub fn snapshot(conversation_id: &str, messages: Vec<hawker::conversation::Message>) -> ConversationSnapshot {
    ConversationSnapshot {
        conversation_id: conversation_id.into(),
        participant: "Anna".into(),
        ad_title: "City Bike".into(),
        ad_image: None,
        messages,
    }
}

pub fn summary(id: &str, participant: &str) -> ConversationSummary {
    ConversationSummary {
        conversation_id: Some(id.into()),
        participant: participant.into(),
        ad_title: "City Bike".into(),
        ad_image: None,
        last_message: "hi".into(),
        time_text: "today".into(),
        unread_count: None,
    }
}
