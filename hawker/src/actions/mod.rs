//! Action executors.
//!
//! All three mutating actions share one template: validate the target,
//! derive session parameters, optionally try the primary transport,
//! acquire a browser session scoped to one ephemeral profile, bootstrap
//! the page, drive readiness, run the mode-specific interaction, and hand
//! off to snapshot confirmation. The session is released on every exit
//! path.

pub mod decline;
pub mod send_media;
pub mod send_text;

use crate::abort::AbortSignal;
use crate::budget::DeadlineBudget;
use crate::configuration::Configuration;
use crate::consent::ConsentHandler;
use crate::conversation::{
    Account, ConversationRef, ConversationSnapshot, ConversationSummary, MatchCriteria,
    ProxyServer,
};
use crate::error::{Fault, FaultKind, HawkerError, HawkerResult};
use crate::pipeline::{self, FetchOptions};
use crate::session::{BrowserSession, FindOptions, NavigateOptions, SessionFactory, WaitUntil};
use crate::transport::{MessageBox, MessageBoxFactory};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Injected monotonic debug-id generator; one per [`Messenger`], never a
/// process-global.
#[derive(Debug, Default)]
pub struct DebugIds {
    counter: AtomicU64,
}

impl DebugIds {
    /// Next id for the given route, e.g. `send-text#7`.
    pub fn next(&self, route: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{route}#{n}")
    }
}

/// Identifiers and deadline threaded through one execution, discarded on
/// return.
#[derive(Debug, Clone)]
pub struct ActionContext {
    /// Which operation is running.
    pub route: &'static str,
    /// Monotonic id for correlating logs of one invocation.
    pub debug_id: String,
    /// Account the action runs for.
    pub account_id: String,
    /// Resolved conversation id.
    pub conversation_id: String,
    /// Resolved conversation URL.
    pub conversation_url: String,
    /// The invocation's hard ceiling.
    pub deadline: Duration,
}

impl ActionContext {
    /// Short label for log lines and fault contexts.
    pub fn label(&self) -> String {
        format!("{} {} conv={}", self.debug_id, self.account_id, self.conversation_id)
    }
}

/// Target of a text send: a direct reference, match criteria, or both.
#[derive(Debug, Clone, Default)]
pub struct ConversationTarget {
    /// Direct reference when known.
    pub reference: ConversationRef,
    /// Participant / ad-title criteria when no direct reference exists.
    pub criteria: MatchCriteria,
}

impl ConversationTarget {
    /// Build a target from a direct reference.
    pub fn from_ref(reference: ConversationRef) -> Self {
        ConversationTarget {
            reference,
            criteria: MatchCriteria::default(),
        }
    }

    /// Whether anything identifies a conversation at all.
    pub fn identifies_anything(&self) -> bool {
        self.reference.conversation_id.as_deref().is_some_and(|s| !s.is_empty())
            || self.reference.conversation_url.as_deref().is_some_and(|s| !s.is_empty())
            || !self.criteria.is_empty()
    }
}

/// Message-box automation facade: owns the configuration and the three
/// collaborator seams, exposes the public operations.
pub struct Messenger {
    /// Configuration shared by every invocation.
    pub configuration: Box<Configuration>,
    pub(crate) transport: Arc<dyn MessageBoxFactory>,
    pub(crate) sessions: Arc<dyn SessionFactory>,
    pub(crate) consent: Arc<dyn ConsentHandler>,
    pub(crate) debug_ids: Arc<DebugIds>,
}

impl Clone for Messenger {
    fn clone(&self) -> Self {
        Messenger {
            configuration: self.configuration.clone(),
            transport: Arc::clone(&self.transport),
            sessions: Arc::clone(&self.sessions),
            consent: Arc::clone(&self.consent),
            debug_ids: Arc::clone(&self.debug_ids),
        }
    }
}

impl Messenger {
    /// Wire a messenger from its collaborators.
    pub fn new(
        configuration: Configuration,
        transport: Arc<dyn MessageBoxFactory>,
        sessions: Arc<dyn SessionFactory>,
        consent: Arc<dyn ConsentHandler>,
    ) -> Self {
        Messenger {
            configuration: Box::new(configuration),
            transport,
            sessions,
            consent,
            debug_ids: Arc::new(DebugIds::default()),
        }
    }

    /// Send a plain text message, preferring the primary transport and
    /// falling back to a driven browser session.
    pub async fn send_conversation_message(
        &self,
        account: &Account,
        proxy: Option<&ProxyServer>,
        target: &ConversationTarget,
        text: &str,
    ) -> HawkerResult<ConversationSnapshot> {
        send_text::run(self, account, proxy, target, text).await
    }

    /// Send a text message with image attachments through the browser.
    pub async fn send_conversation_media(
        &self,
        account: &Account,
        proxy: Option<&ProxyServer>,
        conversation: &ConversationRef,
        text: &str,
        files: &[std::path::PathBuf],
        abort: AbortSignal,
        hard_deadline: Option<Duration>,
    ) -> HawkerResult<ConversationSnapshot> {
        send_media::run(self, account, proxy, conversation, text, files, abort, hard_deadline)
            .await
    }

    /// Decline a payment/offer proposal through the browser.
    pub async fn decline_conversation_offer(
        &self,
        account: &Account,
        proxy: Option<&ProxyServer>,
        conversation: &ConversationRef,
        abort: AbortSignal,
        hard_deadline: Option<Duration>,
    ) -> HawkerResult<ConversationSnapshot> {
        decline::run(self, account, proxy, conversation, abort, hard_deadline).await
    }

    /// List one account's conversations through the primary transport,
    /// falling back to browser scraping.
    pub async fn fetch_account_conversations(
        &self,
        account: &Account,
        proxy: Option<&ProxyServer>,
        options: &FetchOptions,
    ) -> HawkerResult<Vec<ConversationSummary>> {
        pipeline::fetch_account_conversations(self, account, proxy, options).await
    }

    /// Fetch one thread's full message list.
    pub async fn fetch_thread_messages(
        &self,
        account: &Account,
        proxy: Option<&ProxyServer>,
        conversation: &ConversationRef,
    ) -> HawkerResult<ConversationSnapshot> {
        pipeline::fetch_thread_messages(self, account, proxy, conversation).await
    }

    /// Fetch conversations for many accounts with bounded concurrency.
    pub async fn fetch_messages(
        &self,
        accounts: &[Account],
        proxies: &[ProxyServer],
        options: &FetchOptions,
    ) -> Vec<ConversationSummary> {
        pipeline::fetch_messages(self, accounts, proxies, options).await
    }

    // ----------------------------------------------------------------
    // Shared template steps
    // ----------------------------------------------------------------

    /// Step 2 of the template: the account must carry usable credentials.
    pub(crate) fn require_credentials(&self, account: &Account, context: &str) -> HawkerResult<()> {
        if account.cookie_str.trim().is_empty() {
            return Err(HawkerError::AuthRequired(Fault::new(
                FaultKind::AuthRequired,
                context,
                &format!("account {} has no stored session credentials", account.id),
                None,
            )));
        }
        Ok(())
    }

    /// Build the per-invocation transport for the account's proxy.
    pub(crate) fn build_transport(
        &self,
        proxy: Option<&ProxyServer>,
    ) -> HawkerResult<Box<dyn MessageBox>> {
        self.transport.create(&self.configuration, proxy)
    }

    /// Steps 4–5 of the template: acquire a session and bootstrap the
    /// page up to the conversation URL. On any bootstrap failure the
    /// session is closed before the error propagates.
    pub(crate) async fn prepare_browser(
        &self,
        account: &Account,
        proxy: Option<&ProxyServer>,
        ctx: &ActionContext,
        budget: &DeadlineBudget,
        abort: &AbortSignal,
    ) -> HawkerResult<Box<dyn BrowserSession>> {
        let session = self.sessions.acquire(account, proxy, budget).await?;

        match self.bootstrap_page(&*session, account, ctx, budget, abort).await {
            Ok(()) => Ok(session),
            Err(e) => {
                session.close().await;
                Err(e)
            }
        }
    }

    async fn bootstrap_page(
        &self,
        session: &dyn BrowserSession,
        account: &Account,
        ctx: &ActionContext,
        budget: &DeadlineBudget,
        abort: &AbortSignal,
    ) -> HawkerResult<()> {
        let config = &self.configuration;
        let consent_timeout = Duration::from_millis(1_500);

        ensure_live(session, abort, &ctx.label())?;

        let nav = NavigateOptions {
            wait_until: WaitUntil::DomContentLoaded,
            timeout: budget.step_timeout(
                Duration::from_secs(20),
                Duration::from_secs(1),
                Duration::from_secs(8),
                "navigate home",
            )?,
        };
        session.navigate(&config.home_url, &nav).await?;

        self.dismiss_consent(session, consent_timeout).await;

        session.set_cookies(&account.cookie_str, &config.home_url).await?;

        ensure_live(session, abort, &ctx.label())?;

        let nav = NavigateOptions {
            wait_until: WaitUntil::DomContentLoaded,
            timeout: budget.step_timeout(
                Duration::from_secs(20),
                Duration::from_secs(1),
                Duration::from_secs(5),
                "navigate conversation",
            )?,
        };
        session.navigate(&ctx.conversation_url, &nav).await?;

        self.dismiss_consent(session, consent_timeout).await;

        self.fail_on_login_wall(session, ctx).await
    }

    /// Best-effort consent hooks around navigations.
    pub(crate) async fn dismiss_consent(&self, session: &dyn BrowserSession, timeout: Duration) {
        if let Err(e) = self.consent.dismiss_cookie_banner(session, timeout).await {
            log::warn!("cookie banner hook failed: {e}");
        }
        if let Err(e) = self.consent.dismiss_regional_consent(session, timeout).await {
            log::warn!("regional consent hook failed: {e}");
        }
    }

    /// `AUTH_REQUIRED` when the page bounced to a login wall.
    pub(crate) async fn fail_on_login_wall(
        &self,
        session: &dyn BrowserSession,
        ctx: &ActionContext,
    ) -> HawkerResult<()> {
        if let Some(url) = session.current_url().await {
            if self.consent.is_consent_interruption_page(&url) {
                return Err(HawkerError::ConsentRequired(Fault::new(
                    FaultKind::UiNotReady,
                    &ctx.label(),
                    &format!("consent interruption page {url} could not be cleared"),
                    None,
                )));
            }
            if self.configuration.is_login_url(&url) {
                return Err(HawkerError::AuthRequired(Fault::new(
                    FaultKind::AuthRequired,
                    &ctx.label(),
                    &format!("page redirected to {url}"),
                    None,
                )));
            }
        }

        let walls = session
            .find_elements(&self.configuration.selectors.login_wall, &FindOptions::default())
            .await;
        if !walls.is_empty() {
            return Err(HawkerError::AuthRequired(Fault::new(
                FaultKind::AuthRequired,
                &ctx.label(),
                "page shows a login wall",
                None,
            )));
        }

        Ok(())
    }

    /// Clear a located input the way the page scripts expect: select the
    /// element again in-page and empty its value.
    pub(crate) async fn clear_input(&self, session: &dyn BrowserSession, selector: &str) {
        let script = format!(
            r#"(() => {{
                const el = document.querySelector({sel});
                if (!el) return false;
                if ('value' in el) el.value = '';
                else el.textContent = '';
                el.dispatchEvent(new Event('input', {{ bubbles: true }}));
                return true;
            }})()"#,
            sel = serde_json::to_string(selector).unwrap_or_else(|_| "\"\"".into()),
        );
        let _ = session.evaluate_in_page(&script).await;
    }

    /// Whether the composer visibly settled: empty text and no attachment
    /// previews left.
    pub(crate) async fn composer_settled(&self, session: &dyn BrowserSession) -> bool {
        let catalog = &self.configuration.selectors;
        let script = format!(
            r#"(() => {{
                const replySels = {reply};
                const previewSels = {previews};
                let text = null;
                for (const s of replySels) {{
                    const el = document.querySelector(s);
                    if (el) {{
                        text = ('value' in el ? el.value : el.textContent) || '';
                        break;
                    }}
                }}
                let previews = 0;
                for (const s of previewSels) {{
                    previews += document.querySelectorAll(s).length;
                }}
                return {{ text: (text || '').trim(), previews }};
            }})()"#,
            reply = serde_json::to_string(&catalog.reply_box).unwrap_or_else(|_| "[]".into()),
            previews =
                serde_json::to_string(&catalog.attachment_preview).unwrap_or_else(|_| "[]".into()),
        );

        match session.evaluate_in_page(&script).await {
            Some(value) => {
                let text_empty = value
                    .get("text")
                    .and_then(|t| t.as_str())
                    .map(|t| t.is_empty())
                    .unwrap_or(false);
                let previews = value.get("previews").and_then(|p| p.as_u64()).unwrap_or(0);
                text_empty && previews == 0
            }
            None => false,
        }
    }

    /// Whether a mutation-shaped request to the messaging backend was
    /// observed since the last drain.
    pub(crate) async fn saw_mutation_request(&self, session: &dyn BrowserSession) -> bool {
        let marker = self.configuration.backend_marker.as_str();
        session
            .drain_events()
            .await
            .iter()
            .any(|e| e.is_mutation_signal(marker))
    }

    /// Poll for the composer to settle after a click, bounded by `max`.
    pub(crate) async fn await_composer_settle(
        &self,
        session: &dyn BrowserSession,
        budget: &DeadlineBudget,
        max: Duration,
    ) -> bool {
        let poll = Duration::from_millis(300);
        let deadline = max.min(budget.remaining());
        let started = std::time::Instant::now();

        loop {
            if self.composer_settled(session).await {
                return true;
            }
            if started.elapsed() + poll > deadline {
                return false;
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Click the send control; fall back to the submission key.
    pub(crate) async fn click_send(&self, session: &dyn BrowserSession) -> bool {
        let found = session
            .find_elements(
                &self.configuration.selectors.send_button,
                &FindOptions::default(),
            )
            .await;
        if let Some(handle) = found.first() {
            if session.dispatch_click(handle).await {
                return true;
            }
            log::debug!("send control click did not dispatch, trying submission key");
        }
        session.press_key("Enter").await
    }
}

/// Fail fast when the abort signal fired or the session died.
pub(crate) fn ensure_live(
    session: &dyn BrowserSession,
    abort: &AbortSignal,
    context: &str,
) -> HawkerResult<()> {
    if abort.is_aborted() {
        return Err(HawkerError::ActionTimeout(Fault::new(
            FaultKind::ActionTimeout,
            context,
            "aborted by caller",
            None,
        )));
    }
    if session.is_closed() {
        return Err(HawkerError::Session(Fault::new(
            FaultKind::DetachedSession,
            context,
            "browser session closed",
            None,
        )));
    }
    Ok(())
}
