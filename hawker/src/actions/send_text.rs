//! SendText executor: primary transport first, browser fallback.

use super::{ensure_live, ActionContext, ConversationTarget, Messenger};
use crate::abort::AbortSignal;
use crate::budget::DeadlineBudget;
use crate::confirm::{InteractionEvidence, SnapshotConfirmation};
use crate::conversation::{Account, ConversationSnapshot, ProxyServer};
use crate::error::{Fault, FaultKind, HawkerError, HawkerResult};
use crate::readiness::{ConversationReadiness, ReadinessMode};
use crate::session::{BrowserSession, FindOptions};
use crate::transport::MessageBox;
use std::time::Duration;

/// Run the full send-text template.
#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
pub(crate) async fn run(
    messenger: &Messenger,
    account: &Account,
    proxy: Option<&ProxyServer>,
    target: &ConversationTarget,
    text: &str,
) -> HawkerResult<ConversationSnapshot> {
    let config = &messenger.configuration;

    if !target.identifies_anything() {
        return Err(HawkerError::ConversationIdRequired(Fault::new(
            FaultKind::Unknown,
            "send conversation message",
            "no conversation id, url, participant, or ad title was provided",
            None,
        )));
    }
    messenger.require_credentials(account, "send conversation message")?;

    let budget = DeadlineBudget::new(config.action_deadline);
    let transport = messenger.build_transport(proxy)?;

    // The transport path is authoritative and cheap; any failure there
    // falls through to the browser without propagating.
    match try_transport(&*transport, account, target, text).await {
        Ok(snapshot) => {
            log::debug!(
                "send-text confirmed via primary transport for {}",
                snapshot.conversation_id
            );
            return Ok(snapshot);
        }
        Err(e) => {
            log::debug!("primary transport send failed, driving browser: {e}");
        }
    }

    let (conversation_id, conversation_url) =
        target.reference.resolve(&config.conversation_url_template)?;

    let ctx = ActionContext {
        route: "send-text",
        debug_id: messenger.debug_ids.next("send-text"),
        account_id: account.id.clone(),
        conversation_id,
        conversation_url,
        deadline: config.action_deadline,
    };
    let abort = AbortSignal::new();

    let session = messenger
        .prepare_browser(account, proxy, &ctx, &budget, &abort)
        .await?;
    let result = drive(messenger, &*session, &*transport, account, &ctx, &budget, &abort, text)
        .await;
    session.close().await;
    result
}

/// Resolve the conversation and post through the message-box API.
async fn try_transport(
    transport: &dyn MessageBox,
    account: &Account,
    target: &ConversationTarget,
    text: &str,
) -> HawkerResult<ConversationSnapshot> {
    let auth = transport
        .exchange_session_for_token(&account.cookie_str)
        .await?;

    let conversation_id = match target
        .reference
        .conversation_id
        .as_deref()
        .filter(|i| !i.is_empty())
    {
        Some(id) => id.to_string(),
        None => {
            if let Some(url) = target.reference.conversation_url.as_deref() {
                if let Some(id) = crate::utils::conversation_id_from_href(url) {
                    id
                } else {
                    resolve_by_criteria(transport, &auth, target).await?
                }
            } else {
                resolve_by_criteria(transport, &auth, target).await?
            }
        }
    };

    transport.post_message(&auth, &conversation_id, text).await?;
    transport.conversation_detail(&auth, &conversation_id).await
}

/// Match participant / ad title against the first page of conversations.
async fn resolve_by_criteria(
    transport: &dyn MessageBox,
    auth: &crate::transport::AuthSession,
    target: &ConversationTarget,
) -> HawkerResult<String> {
    if target.criteria.is_empty() {
        return Err(HawkerError::ConversationIdRequired(Fault::new(
            FaultKind::Unknown,
            "resolve conversation via transport",
            "no conversation reference and no match criteria",
            None,
        )));
    }

    let page = transport.list_conversations(auth, 0, 30).await?;
    for summary in &page.conversations {
        if target.criteria.matches(&summary.participant, &summary.ad_title) {
            if let Some(id) = summary.conversation_id.as_deref().filter(|i| !i.is_empty()) {
                return Ok(id.to_string());
            }
        }
    }

    Err(HawkerError::ConversationIdRequired(Fault::new(
        FaultKind::Unknown,
        "resolve conversation via transport",
        "no listed conversation matched the participant/ad-title criteria",
        None,
    )))
}

/// Browser fallback: readiness, type, click send, confirm.
#[allow(clippy::too_many_arguments)]
async fn drive(
    messenger: &Messenger,
    session: &dyn BrowserSession,
    transport: &dyn MessageBox,
    account: &Account,
    ctx: &ActionContext,
    budget: &DeadlineBudget,
    abort: &AbortSignal,
    text: &str,
) -> HawkerResult<ConversationSnapshot> {
    let config = &messenger.configuration;

    let ready_timeout = budget.step_timeout(
        budget.slice(config.readiness_share),
        Duration::from_secs(2),
        Duration::from_secs(6),
        "send-text readiness",
    )?;
    let readiness = ConversationReadiness::new(
        session,
        &*messenger.consent,
        config,
        ReadinessMode::SendMedia,
        ctx.conversation_id.clone(),
        ctx.conversation_url.clone(),
        abort.clone(),
    );
    readiness.wait_until_ready(budget, ready_timeout).await?;

    // Confirmation identity is best effort; without it the diff reads as
    // "no snapshot" and interaction evidence decides.
    let auth = transport
        .exchange_session_for_token(&account.cookie_str)
        .await
        .map_err(|e| log::debug!("token exchange for confirmation failed: {e}"))
        .ok();
    let confirm = SnapshotConfirmation::new(transport, auth.as_ref(), budget);
    let before = confirm.baseline(&ctx.conversation_id).await;

    ensure_live(session, abort, &ctx.label())?;

    let reply = session
        .find_elements(
            &config.selectors.reply_box,
            &FindOptions {
                require_visible: true,
                pierce: true,
            },
        )
        .await;
    let input = reply.first().ok_or_else(|| {
        HawkerError::MessageInputNotFound(Fault::new(
            FaultKind::UiNotReady,
            &ctx.label(),
            "no reply box present after readiness",
            None,
        ))
    })?;

    messenger.clear_input(session, &input.selector).await;
    session.type_text(input, text).await?;

    ensure_live(session, abort, &ctx.label())?;

    // Discard pre-click traffic so the mutation signal is unambiguous.
    let _ = session.drain_events().await;

    let clicked = messenger.click_send(session).await;
    let settled = messenger
        .await_composer_settle(session, budget, Duration::from_secs(4))
        .await;
    let network = messenger.saw_mutation_request(session).await;

    let evidence = InteractionEvidence {
        click_fired: clicked,
        network_signal: network,
        composer_settled: settled,
    };
    log::debug!("{} interaction evidence {:?}", ctx.label(), evidence);

    confirm
        .confirm_text(&ctx.conversation_id, before.as_ref(), text, evidence)
        .await
}
