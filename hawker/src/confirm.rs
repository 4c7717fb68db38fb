//! Snapshot confirmation.
//!
//! After every interaction the executors re-read the conversation through
//! the primary transport and diff it against the pre-interaction
//! baseline. A failed baseline fetch is "no baseline", never an abort.
//!
//! Decision policy: when the snapshot comparison is inconclusive but
//! interaction evidence exists, the action still returns success — a
//! caller retrying a falsely-failed send risks duplicate messages, so
//! false success is preferred over false failure. Only with neither kind
//! of evidence does confirmation raise `*_NOT_CONFIRMED`.

use crate::budget::DeadlineBudget;
use crate::conversation::ConversationSnapshot;
use crate::error::{Fault, FaultKind, HawkerError, HawkerResult};
use crate::transport::{AuthSession, MessageBox};
use crate::utils::normalize_text;
use hashbrown::HashMap;
use std::time::Duration;

/// Short pause before the bounded second after-snapshot fetch.
const RECHECK_DELAY: Duration = Duration::from_millis(1_500);
/// Minimum budget to spend on any snapshot fetch at all.
const MIN_SNAPSHOT_BUDGET: Duration = Duration::from_millis(1_000);

/// Evidence gathered while driving the page, independent of the read model.
#[derive(Debug, Clone, Copy, Default)]
pub struct InteractionEvidence {
    /// The action's click sequence definitely fired.
    pub click_fired: bool,
    /// A mutation-shaped request to the messaging backend was observed
    /// after the click.
    pub network_signal: bool,
    /// The composer visibly cleared its text/attachment state after the
    /// click.
    pub composer_settled: bool,
}

impl InteractionEvidence {
    /// Whether any evidence exists at all.
    pub fn any(&self) -> bool {
        self.click_fired || self.network_signal || self.composer_settled
    }
}

/// Which action is being confirmed; selects the comparison rule and the
/// error raised when nothing confirms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfirmFlavor {
    Text,
    Media,
    Decline,
}

/// Confirmation driver bound to one invocation's transport identity.
pub struct SnapshotConfirmation<'a> {
    transport: &'a dyn MessageBox,
    auth: Option<&'a AuthSession>,
    budget: &'a DeadlineBudget,
}

impl<'a> SnapshotConfirmation<'a> {
    /// Bind a confirmation driver. `auth` may be absent when the token
    /// exchange failed; every fetch then reads as "no snapshot".
    pub fn new(
        transport: &'a dyn MessageBox,
        auth: Option<&'a AuthSession>,
        budget: &'a DeadlineBudget,
    ) -> Self {
        SnapshotConfirmation {
            transport,
            auth,
            budget,
        }
    }

    /// Fetch the pre-interaction baseline, subject to remaining budget.
    pub async fn baseline(&self, conversation_id: &str) -> Option<ConversationSnapshot> {
        self.fetch(conversation_id, "baseline snapshot").await
    }

    async fn fetch(&self, conversation_id: &str, what: &str) -> Option<ConversationSnapshot> {
        let auth = self.auth?;
        if self.budget.remaining() < MIN_SNAPSHOT_BUDGET {
            log::debug!("{what} skipped, budget nearly exhausted");
            return None;
        }

        match self.transport.conversation_detail(auth, conversation_id).await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                log::warn!("{what} fetch failed for {conversation_id}: {e}");
                None
            }
        }
    }

    /// Confirm a plain text send.
    pub async fn confirm_text(
        &self,
        conversation_id: &str,
        before: Option<&ConversationSnapshot>,
        sent_text: &str,
        evidence: InteractionEvidence,
    ) -> HawkerResult<ConversationSnapshot> {
        let needle = normalize_text(sent_text);
        let before_count = before.map(|s| s.outgoing_matching(&needle)).unwrap_or(0);

        let check = |after: &ConversationSnapshot| {
            let after_count = after.outgoing_matching(&needle);
            after_count > before_count || (before_count == 0 && after_count > 0)
        };

        self.run(conversation_id, before, evidence, ConfirmFlavor::Text, check)
            .await
    }

    /// Confirm a media send.
    pub async fn confirm_media(
        &self,
        conversation_id: &str,
        before: Option<&ConversationSnapshot>,
        evidence: InteractionEvidence,
    ) -> HawkerResult<ConversationSnapshot> {
        let before_units = before.map(|s| s.outgoing_attachment_units()).unwrap_or(0);

        let check = move |after: &ConversationSnapshot| {
            after.outgoing_attachment_units() > before_units
                || evidence.network_signal
                || evidence.composer_settled
        };

        self.run(conversation_id, before, evidence, ConfirmFlavor::Media, check)
            .await
    }

    /// Confirm an offer decline.
    pub async fn confirm_decline(
        &self,
        conversation_id: &str,
        before: Option<&ConversationSnapshot>,
        evidence: InteractionEvidence,
    ) -> HawkerResult<ConversationSnapshot> {
        let before_prints = before.map(|s| s.offer_fingerprints()).unwrap_or_default();

        let check = move |after: &ConversationSnapshot| {
            decline_applied(&before_prints, &after.offer_fingerprints())
        };

        self.run(conversation_id, before, evidence, ConfirmFlavor::Decline, check)
            .await
    }

    /// Shared fetch / compare / retry / decide loop.
    async fn run(
        &self,
        conversation_id: &str,
        before: Option<&ConversationSnapshot>,
        evidence: InteractionEvidence,
        flavor: ConfirmFlavor,
        check: impl Fn(&ConversationSnapshot) -> bool,
    ) -> HawkerResult<ConversationSnapshot> {
        let mut after = self.fetch(conversation_id, "after snapshot").await;
        let mut confirmed = after.as_ref().map(&check).unwrap_or(false);

        if !confirmed && self.budget.remaining() > RECHECK_DELAY + MIN_SNAPSHOT_BUDGET {
            tokio::time::sleep(RECHECK_DELAY).await;
            if let Some(second) = self.fetch(conversation_id, "after snapshot recheck").await {
                confirmed = check(&second);
                after = Some(second);
            }
        }

        if confirmed {
            log::debug!("{flavor:?} confirmed by snapshot diff for {conversation_id}");
            return Ok(self.settle(conversation_id, after, before));
        }

        if evidence.any() {
            log::debug!(
                "{flavor:?} presumed successful for {conversation_id}: {evidence:?}, snapshot inconclusive"
            );
            return Ok(self.settle(conversation_id, after, before));
        }

        let fault = Fault::new(
            FaultKind::Unknown,
            "snapshot confirmation",
            &format!("no snapshot change and no interaction evidence for {conversation_id}"),
            None,
        );
        Err(match flavor {
            ConfirmFlavor::Text => HawkerError::SendNotConfirmed(fault),
            ConfirmFlavor::Media => HawkerError::MediaSendNotConfirmed(fault),
            ConfirmFlavor::Decline => HawkerError::DeclineNotApplied(fault),
        })
    }

    /// Pick the freshest well-formed snapshot to hand back.
    fn settle(
        &self,
        conversation_id: &str,
        after: Option<ConversationSnapshot>,
        before: Option<&ConversationSnapshot>,
    ) -> ConversationSnapshot {
        after
            .or_else(|| before.cloned())
            .unwrap_or_else(|| ConversationSnapshot {
                conversation_id: conversation_id.to_string(),
                participant: String::new(),
                ad_title: String::new(),
                ad_image: None,
                messages: Vec::new(),
            })
    }
}

/// Decline detection over fingerprint multisets: applied when no offer
/// block remains, or at least one before-fingerprint is gone.
pub fn decline_applied(before: &[String], after: &[String]) -> bool {
    if after.is_empty() {
        return true;
    }

    let mut remaining: HashMap<&str, usize> = HashMap::new();
    for print in after {
        *remaining.entry(print.as_str()).or_insert(0) += 1;
    }

    for print in before {
        match remaining.get_mut(print.as_str()) {
            Some(count) if *count > 0 => *count -= 1,
            _ => return true,
        }
    }

    false
}
