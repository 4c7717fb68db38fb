//! DeclineOffer executor: browser only.
//!
//! Offer proposals render as a payment box with action buttons, often
//! behind interstitial "continue" dialogs. The click priority is
//! dialog-scoped, then payment-box-scoped, then generic, and a pass of
//! confirmation clicks clears whatever the flow re-opens.

use super::{ensure_live, ActionContext, Messenger};
use crate::abort::AbortSignal;
use crate::budget::DeadlineBudget;
use crate::confirm::{InteractionEvidence, SnapshotConfirmation};
use crate::conversation::{Account, ConversationRef, ConversationSnapshot, ProxyServer};
use crate::error::{Fault, FaultKind, HawkerError, HawkerResult};
use crate::readiness::{ConversationReadiness, ReadinessMode};
use crate::session::{BrowserSession, FindOptions};
use std::time::Duration;

/// Interstitial dismissal passes before the decline click.
const DISMISS_PASSES: usize = 3;
/// Confirmation passes after the decline click.
const CONFIRM_PASSES: usize = 5;

/// Run the full decline-offer template.
#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
pub(crate) async fn run(
    messenger: &Messenger,
    account: &Account,
    proxy: Option<&ProxyServer>,
    conversation: &ConversationRef,
    abort: AbortSignal,
    hard_deadline: Option<Duration>,
) -> HawkerResult<ConversationSnapshot> {
    let config = &messenger.configuration;

    messenger.require_credentials(account, "decline conversation offer")?;
    let (conversation_id, conversation_url) =
        conversation.resolve(&config.conversation_url_template)?;

    let deadline = hard_deadline.unwrap_or(config.action_deadline);
    let budget = DeadlineBudget::new(deadline);

    let ctx = ActionContext {
        route: "decline-offer",
        debug_id: messenger.debug_ids.next("decline-offer"),
        account_id: account.id.clone(),
        conversation_id,
        conversation_url,
        deadline,
    };

    let transport = messenger.build_transport(proxy)?;
    let session = messenger
        .prepare_browser(account, proxy, &ctx, &budget, &abort)
        .await?;
    let result = drive(messenger, &*session, &*transport, account, &ctx, &budget, &abort).await;
    session.close().await;
    result
}

#[allow(clippy::too_many_arguments)]
async fn drive(
    messenger: &Messenger,
    session: &dyn BrowserSession,
    transport: &dyn crate::transport::MessageBox,
    account: &Account,
    ctx: &ActionContext,
    budget: &DeadlineBudget,
    abort: &AbortSignal,
) -> HawkerResult<ConversationSnapshot> {
    let config = &messenger.configuration;

    let ready_timeout = budget.step_timeout(
        budget.slice(config.readiness_share),
        Duration::from_secs(2),
        Duration::from_secs(8),
        "decline readiness",
    )?;
    let readiness = ConversationReadiness::new(
        session,
        &*messenger.consent,
        config,
        ReadinessMode::OfferDecline,
        ctx.conversation_id.clone(),
        ctx.conversation_url.clone(),
        abort.clone(),
    );
    readiness.wait_until_ready(budget, ready_timeout).await?;

    let auth = transport
        .exchange_session_for_token(&account.cookie_str)
        .await
        .map_err(|e| log::debug!("token exchange for confirmation failed: {e}"))
        .ok();
    let confirm = SnapshotConfirmation::new(transport, auth.as_ref(), budget);
    let before = confirm.baseline(&ctx.conversation_id).await;

    ensure_live(session, abort, &ctx.label())?;
    let _ = session.drain_events().await;

    // Clear interstitial "continue" dialogs that sit over the offer box.
    for pass in 0..DISMISS_PASSES {
        ensure_live(session, abort, &ctx.label())?;
        if !click_first(session, &scoped_continue_selectors(messenger)).await {
            break;
        }
        log::debug!("{} dismissed interstitial dialog (pass {pass})", ctx.label());
        tokio::time::sleep(Duration::from_millis(500).min(budget.remaining())).await;
    }

    let clicked = match click_decline(messenger, session).await {
        DeclineClick::Clicked => true,
        DeclineClick::FoundButFailed => false,
        DeclineClick::NotFound => {
            // No control anywhere. An already-settled offer still counts
            // as success; only a conversation that provably still carries
            // offer blocks reports the missing button.
            return match confirm
                .confirm_decline(&ctx.conversation_id, before.as_ref(), InteractionEvidence::default())
                .await
            {
                Ok(snapshot) => Ok(snapshot),
                Err(HawkerError::DeclineNotApplied(_)) => {
                    Err(HawkerError::DeclineButtonNotFound(Fault::new(
                        FaultKind::UiNotReady,
                        &ctx.label(),
                        "offer blocks remain but no decline control could be found",
                        None,
                    )))
                }
                Err(other) => Err(other),
            };
        }
    };

    // Confirmation passes: the flow may re-open dialogs asking to confirm
    // the decline, or surface the decline control again.
    for pass in 0..CONFIRM_PASSES {
        ensure_live(session, abort, &ctx.label())?;
        tokio::time::sleep(Duration::from_millis(600).min(budget.remaining())).await;

        let mut selectors = scoped_continue_selectors(messenger);
        selectors.extend(scoped_decline_selectors(messenger));
        if !click_first(session, &selectors).await {
            break;
        }
        log::debug!("{} clicked follow-up control (pass {pass})", ctx.label());
    }

    let network = messenger.saw_mutation_request(session).await;
    let evidence = InteractionEvidence {
        click_fired: clicked,
        network_signal: network,
        // An empty composer is meaningless for declines.
        composer_settled: false,
    };
    log::debug!("{} interaction evidence {:?}", ctx.label(), evidence);

    confirm
        .confirm_decline(&ctx.conversation_id, before.as_ref(), evidence)
        .await
}

/// Outcome of the prioritized decline click.
enum DeclineClick {
    Clicked,
    FoundButFailed,
    NotFound,
}

/// Try dialog-scoped, payment-box-scoped, then generic decline controls.
async fn click_decline(messenger: &Messenger, session: &dyn BrowserSession) -> DeclineClick {
    let catalog = &messenger.configuration.selectors;
    let opts = FindOptions {
        require_visible: true,
        pierce: true,
    };

    let tiers: [Vec<String>; 3] = [
        compose(&catalog.dialog_scope, &catalog.decline_control),
        compose(&catalog.payment_box, &catalog.decline_control),
        catalog.decline_control.clone(),
    ];

    let mut found_any = false;
    for tier in &tiers {
        let found = session.find_elements(tier, &opts).await;
        if let Some(handle) = found.first() {
            found_any = true;
            if session.dispatch_click(handle).await {
                return DeclineClick::Clicked;
            }
            log::debug!("decline control found but click did not dispatch: {}", handle.selector);
        }
    }

    if found_any {
        DeclineClick::FoundButFailed
    } else {
        DeclineClick::NotFound
    }
}

/// Click the first matching control. Returns whether anything was clicked.
async fn click_first(session: &dyn BrowserSession, selectors: &[String]) -> bool {
    let found = session
        .find_elements(
            selectors,
            &FindOptions {
                require_visible: true,
                pierce: true,
            },
        )
        .await;
    match found.first() {
        Some(handle) => session.dispatch_click(handle).await,
        None => false,
    }
}

/// Continue buttons, dialog-scoped first, then bare.
fn scoped_continue_selectors(messenger: &Messenger) -> Vec<String> {
    let catalog = &messenger.configuration.selectors;
    let mut selectors = compose(&catalog.dialog_scope, &catalog.continue_button);
    selectors.extend(catalog.continue_button.iter().cloned());
    selectors
}

/// Decline controls, dialog-scoped first, then bare.
fn scoped_decline_selectors(messenger: &Messenger) -> Vec<String> {
    let catalog = &messenger.configuration.selectors;
    let mut selectors = compose(&catalog.dialog_scope, &catalog.decline_control);
    selectors.extend(catalog.decline_control.iter().cloned());
    selectors
}

/// Cartesian descendant composition of scope and control selectors.
fn compose(scopes: &[String], controls: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(scopes.len() * controls.len());
    for scope in scopes {
        for control in controls {
            out.push(format!("{scope} {control}"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compose_builds_descendant_selectors() {
        let scopes = vec!["[role=\"dialog\"]".to_string()];
        let controls = vec!["button.decline".to_string(), "button.no".to_string()];
        let composed = compose(&scopes, &controls);
        assert_eq!(
            composed,
            vec![
                "[role=\"dialog\"] button.decline".to_string(),
                "[role=\"dialog\"] button.no".to_string(),
            ]
        );
    }
}
