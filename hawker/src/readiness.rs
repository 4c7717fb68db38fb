//! Conversation readiness state machine.
//!
//! Drives a browser session through navigation and recovery until the
//! rendered page exposes the controls a requested action needs:
//! `RESOLVING → POLLING → (READY | RECOVERING) → READY | TIMEOUT | ABORTED`.
//!
//! Recovery failures never escalate; they are logged and the loop keeps
//! polling. Only the final timeout or an abort leaves the machine.

use crate::abort::AbortSignal;
use crate::budget::DeadlineBudget;
use crate::configuration::{Configuration, SelectorCatalog};
use crate::consent::ConsentHandler;
use crate::error::{Fault, FaultKind, HawkerError, HawkerResult};
use crate::session::{BrowserSession, FindOptions, NavigateOptions, UiState, WaitUntil};
use std::time::{Duration, Instant};

/// Stagnation window: no signature change for longer than this counts as
/// "stuck".
pub const STAGNATION_WINDOW: Duration = Duration::from_millis(4_500);
/// Recovery grace: share of the readiness timeout to wait before the
/// first recovery attempt.
pub const RECOVERY_GRACE_SHARE: f64 = 0.55;
/// Lower bound of the recovery grace.
pub const RECOVERY_GRACE_MIN: Duration = Duration::from_secs(7);
/// Upper bound of the recovery grace.
pub const RECOVERY_GRACE_MAX: Duration = Duration::from_secs(12);
/// Minimum readiness budget left for a recovery attempt to be worth it.
const RECOVERY_MIN_REMAINING: Duration = Duration::from_secs(3);
/// Minimum spacing between render-hook / reload attempts.
const RELOAD_INTERVAL: Duration = Duration::from_millis(5_500);

/// What the caller wants the page ready for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ReadinessMode {
    /// Composer affordances: reply box, file input, or upload control.
    #[strum(serialize = "send-media")]
    SendMedia,
    /// Offer affordances: decline control, payment box, or rendered
    /// conversation with a composer.
    #[strum(serialize = "offer-decline")]
    OfferDecline,
}

impl ReadinessMode {
    /// Minimum feature predicate for this mode.
    pub fn satisfied(&self, ui: &UiState) -> bool {
        match self {
            ReadinessMode::SendMedia => ui.ready_for_send(),
            ReadinessMode::OfferDecline => ui.ready_for_decline(),
        }
    }
}

/// Machine states, exposed for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ReadinessState {
    /// Resolving the target and first paint.
    #[strum(serialize = "resolving")]
    Resolving,
    /// Polling the UI state.
    #[strum(serialize = "polling")]
    Polling,
    /// Running one recovery strategy.
    #[strum(serialize = "recovering")]
    Recovering,
    /// The mode predicate was satisfied.
    #[strum(serialize = "ready")]
    Ready,
    /// The readiness timeout elapsed.
    #[strum(serialize = "timeout")]
    Timeout,
    /// The abort signal fired.
    #[strum(serialize = "aborted")]
    Aborted,
}

/// Ordered recovery strategies. Each consumes at most one attempt per
/// recovery round before falling through to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecoveryStrategy {
    /// Click the conversation's entry in a visible list view.
    ClickConversationLink,
    /// Re-navigate straight to the canonical conversation URL.
    Renavigate,
    /// Navigate to the list, then back to the conversation.
    ListThenBack,
    /// Invoke the client-side render hook, else reload the page script.
    RenderHookReload,
}

impl RecoveryStrategy {
    const ORDER: [RecoveryStrategy; 4] = [
        RecoveryStrategy::ClickConversationLink,
        RecoveryStrategy::Renavigate,
        RecoveryStrategy::ListThenBack,
        RecoveryStrategy::RenderHookReload,
    ];

    fn max_attempts(&self) -> usize {
        match self {
            RecoveryStrategy::ClickConversationLink => 2,
            RecoveryStrategy::Renavigate => 2,
            RecoveryStrategy::ListThenBack => 1,
            RecoveryStrategy::RenderHookReload => 2,
        }
    }

    fn index(&self) -> usize {
        Self::ORDER.iter().position(|s| s == self).unwrap_or(0)
    }
}

/// Outcome of one strategy attempt, recorded for diagnostics only.
#[derive(Debug)]
enum RecoveryOutcome {
    /// The strategy ran; polling will tell whether it helped.
    Attempted,
    /// Preconditions missing, nothing was tried.
    Skipped,
    /// The attempt itself failed; swallowed.
    Failed(String),
}

/// Observe the transient UI state once. Queries are non-throwing: a failed
/// lookup reads as "not present".
pub async fn observe_ui_state(
    session: &dyn BrowserSession,
    catalog: &SelectorCatalog,
    conversation_id: &str,
) -> UiState {
    let visible = FindOptions {
        require_visible: true,
        pierce: true,
    };
    // File inputs are routinely display:none behind styled buttons.
    let hidden_ok = FindOptions {
        require_visible: false,
        pierce: true,
    };

    let has_reply_box = !session.find_elements(&catalog.reply_box, &visible).await.is_empty();
    let has_file_input = !session
        .find_elements(&catalog.file_input, &hidden_ok)
        .await
        .is_empty();
    let has_send_button_enabled = !session
        .find_elements(&catalog.send_button, &visible)
        .await
        .is_empty();
    let has_payment_box = !session
        .find_elements(&catalog.payment_box, &visible)
        .await
        .is_empty();
    let has_decline_control = !session
        .find_elements(&catalog.decline_control, &visible)
        .await
        .is_empty();
    let has_message_content = !session
        .find_elements(&catalog.message_content, &visible)
        .await
        .is_empty();
    let loading_visible = !session
        .find_elements(&catalog.loading_indicator, &visible)
        .await
        .is_empty();
    let has_matching_conversation_link = !conversation_id.is_empty()
        && !session
            .find_elements(&[catalog.conversation_link(conversation_id)], &visible)
            .await
            .is_empty();

    let any_control = has_reply_box
        || has_file_input
        || has_send_button_enabled
        || has_payment_box
        || has_decline_control
        || has_message_content;

    UiState {
        has_reply_box,
        has_file_input,
        has_send_button_enabled,
        has_payment_box,
        has_decline_control,
        has_message_content,
        is_loading_blocking: loading_visible && !any_control,
        has_matching_conversation_link,
    }
}

/// One readiness run over one session.
pub struct ConversationReadiness<'a> {
    session: &'a dyn BrowserSession,
    consent: &'a dyn ConsentHandler,
    config: &'a Configuration,
    mode: ReadinessMode,
    conversation_id: String,
    conversation_url: String,
    abort: AbortSignal,
}

impl<'a> ConversationReadiness<'a> {
    /// Prepare a readiness run. Nothing happens until
    /// [`wait_until_ready`](Self::wait_until_ready).
    pub fn new(
        session: &'a dyn BrowserSession,
        consent: &'a dyn ConsentHandler,
        config: &'a Configuration,
        mode: ReadinessMode,
        conversation_id: impl Into<String>,
        conversation_url: impl Into<String>,
        abort: AbortSignal,
    ) -> Self {
        ConversationReadiness {
            session,
            consent,
            config,
            mode,
            conversation_id: conversation_id.into(),
            conversation_url: conversation_url.into(),
            abort,
        }
    }

    /// The recovery grace for a given readiness timeout.
    pub fn recovery_grace(ready_timeout: Duration) -> Duration {
        let grace = ready_timeout.mul_f64(RECOVERY_GRACE_SHARE);
        grace.clamp(RECOVERY_GRACE_MIN, RECOVERY_GRACE_MAX)
    }

    /// Poll until the mode predicate holds, recovering when stuck.
    ///
    /// Returns the satisfying [`UiState`], or `CONVERSATION_NOT_READY`
    /// carrying the last observed state once `ready_timeout` elapses.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
    pub async fn wait_until_ready(
        &self,
        budget: &DeadlineBudget,
        ready_timeout: Duration,
    ) -> HawkerResult<UiState> {
        let started = Instant::now();
        let grace = Self::recovery_grace(ready_timeout);
        let mut state = ReadinessState::Resolving;
        let mut last_ui = UiState::default();
        let mut last_signature: Option<u8> = None;
        let mut last_progress_at = Instant::now();
        let mut attempts_used = [0usize; 4];
        let mut last_reload_at: Option<Instant> = None;
        let mut diagnostics: Vec<String> = Vec::new();

        loop {
            // Abort and closed-session checks come first on every turn.
            if self.abort.is_aborted() {
                log::debug!(
                    "readiness {} -> aborted for {}",
                    state,
                    self.conversation_id
                );
                return Err(self.aborted_error());
            }
            if self.session.is_closed() {
                return Err(HawkerError::Session(Fault::new(
                    FaultKind::DetachedSession,
                    "conversation readiness",
                    "browser session closed while waiting for readiness",
                    None,
                )));
            }
            budget.ensure_not_expired("conversation readiness")?;

            if started.elapsed() >= ready_timeout {
                state = ReadinessState::Timeout;
                log::debug!(
                    "readiness {} after {}ms for {}",
                    state,
                    started.elapsed().as_millis(),
                    self.conversation_id
                );
                return Err(self.timeout_error(&last_ui, &diagnostics).await);
            }

            // Best-effort consent hooks; failures read as "nothing to do".
            let consent_timeout = self.config.poll_interval.max(Duration::from_millis(250));
            if let Err(e) = self
                .consent
                .dismiss_cookie_banner(self.session, consent_timeout)
                .await
            {
                log::warn!("cookie banner hook failed: {e}");
            }
            if let Err(e) = self
                .consent
                .dismiss_regional_consent(self.session, consent_timeout)
                .await
            {
                log::warn!("regional consent hook failed: {e}");
            }

            let ui = observe_ui_state(self.session, &self.config.selectors, &self.conversation_id)
                .await;
            last_ui = ui;

            if self.mode.satisfied(&ui) {
                log::debug!(
                    "readiness ready for {} in {}ms (mode {})",
                    self.conversation_id,
                    started.elapsed().as_millis(),
                    self.mode
                );
                return Ok(ui);
            }
            state = ReadinessState::Polling;

            let signature = ui.signature();
            if last_signature != Some(signature) {
                last_signature = Some(signature);
                last_progress_at = Instant::now();
            }

            let stuck = last_progress_at.elapsed() > STAGNATION_WINDOW;
            let grace_over = started.elapsed() >= grace;
            let time_left = ready_timeout.saturating_sub(started.elapsed());

            if grace_over && stuck && time_left >= RECOVERY_MIN_REMAINING {
                state = ReadinessState::Recovering;
                self.run_recovery(
                    &ui,
                    budget,
                    &mut attempts_used,
                    &mut last_reload_at,
                    &mut diagnostics,
                )
                .await;
                // A recovery attempt counts as progress for pacing purposes.
                last_progress_at = Instant::now();
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = self.abort.cancelled() => {}
            }
        }
    }

    /// Try the ordered strategies; the first one with attempts left and
    /// satisfied preconditions runs, all failures are swallowed.
    async fn run_recovery(
        &self,
        ui: &UiState,
        budget: &DeadlineBudget,
        attempts_used: &mut [usize; 4],
        last_reload_at: &mut Option<Instant>,
        diagnostics: &mut Vec<String>,
    ) {
        for strategy in RecoveryStrategy::ORDER {
            let slot = strategy.index();
            if attempts_used[slot] >= strategy.max_attempts() {
                continue;
            }

            let outcome = match strategy {
                RecoveryStrategy::ClickConversationLink => {
                    self.try_click_conversation_link(ui).await
                }
                RecoveryStrategy::Renavigate => self.try_navigate(&self.conversation_url, budget).await,
                RecoveryStrategy::ListThenBack => {
                    let first = self.try_navigate(&self.config.list_url, budget).await;
                    match first {
                        RecoveryOutcome::Attempted => {
                            self.try_navigate(&self.conversation_url, budget).await
                        }
                        other => other,
                    }
                }
                RecoveryStrategy::RenderHookReload => {
                    self.try_render_hook_reload(ui, last_reload_at).await
                }
            };

            match outcome {
                RecoveryOutcome::Attempted => {
                    attempts_used[slot] += 1;
                    log::debug!(
                        "recovery {:?} attempted ({}/{}) for {}",
                        strategy,
                        attempts_used[slot],
                        strategy.max_attempts(),
                        self.conversation_id
                    );
                    diagnostics.push(format!("recovery {strategy:?} attempted"));
                    return;
                }
                RecoveryOutcome::Failed(reason) => {
                    attempts_used[slot] += 1;
                    log::warn!(
                        "recovery {:?} failed for {}: {}",
                        strategy,
                        self.conversation_id,
                        reason
                    );
                    diagnostics.push(format!("recovery {strategy:?} failed: {reason}"));
                    return;
                }
                RecoveryOutcome::Skipped => continue,
            }
        }
    }

    async fn try_click_conversation_link(&self, ui: &UiState) -> RecoveryOutcome {
        if !ui.has_matching_conversation_link {
            return RecoveryOutcome::Skipped;
        }
        let selector = self.config.selectors.conversation_link(&self.conversation_id);
        let found = self
            .session
            .find_elements(&[selector], &FindOptions::default())
            .await;
        match found.first() {
            Some(handle) => {
                if self.session.dispatch_click(handle).await {
                    RecoveryOutcome::Attempted
                } else {
                    RecoveryOutcome::Failed("conversation link click did not dispatch".into())
                }
            }
            None => RecoveryOutcome::Skipped,
        }
    }

    async fn try_navigate(&self, url: &str, budget: &DeadlineBudget) -> RecoveryOutcome {
        let timeout = match budget.step_timeout(
            Duration::from_secs(15),
            Duration::from_millis(750),
            Duration::from_secs(2),
            "readiness recovery navigation",
        ) {
            Ok(t) => t,
            Err(e) => return RecoveryOutcome::Failed(e.to_string()),
        };

        let opts = NavigateOptions {
            wait_until: WaitUntil::DomContentLoaded,
            timeout,
        };
        match self.session.navigate(url, &opts).await {
            Ok(()) => RecoveryOutcome::Attempted,
            Err(e) => RecoveryOutcome::Failed(e.to_string()),
        }
    }

    async fn try_render_hook_reload(
        &self,
        ui: &UiState,
        last_reload_at: &mut Option<Instant>,
    ) -> RecoveryOutcome {
        if let Some(at) = last_reload_at {
            if at.elapsed() < RELOAD_INTERVAL {
                return RecoveryOutcome::Skipped;
            }
        }

        *last_reload_at = Some(Instant::now());

        if ui.is_loading_blocking {
            if let Some(hook) = self.config.render_hook.as_deref() {
                if self.session.evaluate_in_page(hook).await.is_some() {
                    return RecoveryOutcome::Attempted;
                }
            }
        }

        match self
            .session
            .evaluate_in_page("window.location.reload(); true")
            .await
        {
            Some(_) => RecoveryOutcome::Attempted,
            None => RecoveryOutcome::Failed("page reload evaluation failed".into()),
        }
    }

    fn aborted_error(&self) -> HawkerError {
        HawkerError::ActionTimeout(Fault::new(
            FaultKind::ActionTimeout,
            "conversation readiness",
            &format!(
                "aborted while waiting for {} readiness on {}",
                self.mode, self.conversation_id
            ),
            None,
        ))
    }

    /// Build the `CONVERSATION_NOT_READY` error with the last observed UI
    /// state and a bootstrap diagnostic snapshot.
    async fn timeout_error(&self, last_ui: &UiState, diagnostics: &[String]) -> HawkerError {
        let url = self.session.current_url().await.unwrap_or_default();
        let screenshot_len = self
            .session
            .capture_screenshot()
            .await
            .map(|b| b.len())
            .unwrap_or(0);

        let mut cause = format!(
            "last ui state {:?}; url {}; screenshot {} bytes",
            last_ui, url, screenshot_len
        );
        if !diagnostics.is_empty() {
            cause.push_str("; ");
            cause.push_str(&diagnostics.join("; "));
        }

        HawkerError::ConversationNotReady(Fault::new(
            FaultKind::UiNotReady,
            "conversation readiness",
            &format!(
                "page never satisfied the {} predicate for {}",
                self.mode, self.conversation_id
            ),
            Some(&cause),
        ))
    }
}
