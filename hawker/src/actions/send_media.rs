//! SendMedia executor: browser only, no write endpoint exists for
//! attachments.

use super::{ensure_live, ActionContext, Messenger};
use crate::abort::AbortSignal;
use crate::budget::DeadlineBudget;
use crate::confirm::{InteractionEvidence, SnapshotConfirmation};
use crate::conversation::{Account, ConversationRef, ConversationSnapshot, ProxyServer};
use crate::error::{Fault, FaultKind, HawkerError, HawkerResult};
use crate::readiness::{ConversationReadiness, ReadinessMode};
use crate::session::{BrowserSession, ElementHandle, FindOptions};
use std::path::PathBuf;
use std::time::Duration;

/// Attempts to locate a usable file input before giving up.
const UPLOAD_CONTROL_ATTEMPTS: usize = 3;

/// Run the full send-media template.
#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
#[allow(clippy::too_many_arguments)]
pub(crate) async fn run(
    messenger: &Messenger,
    account: &Account,
    proxy: Option<&ProxyServer>,
    conversation: &ConversationRef,
    text: &str,
    files: &[PathBuf],
    abort: AbortSignal,
    hard_deadline: Option<Duration>,
) -> HawkerResult<ConversationSnapshot> {
    let config = &messenger.configuration;

    messenger.require_credentials(account, "send conversation media")?;
    let (conversation_id, conversation_url) =
        conversation.resolve(&config.conversation_url_template)?;

    let deadline = hard_deadline.unwrap_or(config.action_deadline);
    let budget = DeadlineBudget::new(deadline);

    let ctx = ActionContext {
        route: "send-media",
        debug_id: messenger.debug_ids.next("send-media"),
        account_id: account.id.clone(),
        conversation_id,
        conversation_url,
        deadline,
    };

    let transport = messenger.build_transport(proxy)?;
    let session = messenger
        .prepare_browser(account, proxy, &ctx, &budget, &abort)
        .await?;
    let result = drive(
        messenger, &*session, &*transport, account, &ctx, &budget, &abort, text, files,
    )
    .await;
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
    text: &str,
    files: &[PathBuf],
) -> HawkerResult<ConversationSnapshot> {
    let config = &messenger.configuration;

    let ready_timeout = budget.step_timeout(
        budget.slice(config.readiness_share),
        Duration::from_secs(2),
        Duration::from_secs(8),
        "send-media readiness",
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

    let auth = transport
        .exchange_session_for_token(&account.cookie_str)
        .await
        .map_err(|e| log::debug!("token exchange for confirmation failed: {e}"))
        .ok();
    let confirm = SnapshotConfirmation::new(transport, auth.as_ref(), budget);
    let before = confirm.baseline(&ctx.conversation_id).await;

    ensure_live(session, abort, &ctx.label())?;

    if !files.is_empty() {
        let input = locate_file_input(messenger, session, ctx, budget, abort).await?;
        session.set_files(&input, files).await?;
        let staged = await_attachments_ready(messenger, session, budget, files.len()).await;
        if !staged {
            log::warn!(
                "{} attachment previews never settled for {} file(s)",
                ctx.label(),
                files.len()
            );
        }
    }

    if !text.is_empty() {
        let reply = session
            .find_elements(
                &config.selectors.reply_box,
                &FindOptions {
                    require_visible: true,
                    pierce: true,
                },
            )
            .await;
        if let Some(input) = reply.first() {
            messenger.clear_input(session, &input.selector).await;
            session.type_text(input, text).await?;
        } else {
            log::debug!("{} no reply box for accompanying text", ctx.label());
        }
    }

    ensure_live(session, abort, &ctx.label())?;
    let _ = session.drain_events().await;

    let mut clicked = messenger.click_send(session).await;
    let mut settled = messenger
        .await_composer_settle(session, budget, Duration::from_secs(4))
        .await;
    let mut network = messenger.saw_mutation_request(session).await;

    // One retry when the first click was inconclusive.
    if !settled && !network {
        ensure_live(session, abort, &ctx.label())?;
        log::debug!("{} first send click inconclusive, retrying once", ctx.label());
        clicked = messenger.click_send(session).await || clicked;
        settled = messenger
            .await_composer_settle(session, budget, Duration::from_secs(3))
            .await;
        network = messenger.saw_mutation_request(session).await || network;
    }

    let evidence = InteractionEvidence {
        click_fired: clicked,
        network_signal: network,
        composer_settled: settled,
    };
    log::debug!("{} interaction evidence {:?}", ctx.label(), evidence);

    confirm
        .confirm_media(&ctx.conversation_id, before.as_ref(), evidence)
        .await
}

/// Find a file input directly, or via a camera/upload button that opens a
/// chooser, across up to three attempts with one full-page reload between
/// the second and third.
async fn locate_file_input(
    messenger: &Messenger,
    session: &dyn BrowserSession,
    ctx: &ActionContext,
    budget: &DeadlineBudget,
    abort: &AbortSignal,
) -> HawkerResult<ElementHandle> {
    let catalog = &messenger.configuration.selectors;
    let hidden_ok = FindOptions {
        require_visible: false,
        pierce: true,
    };

    for attempt in 0..UPLOAD_CONTROL_ATTEMPTS {
        ensure_live(session, abort, &ctx.label())?;
        budget.ensure_not_expired("locate file input")?;

        if let Some(input) = session.find_elements(&catalog.file_input, &hidden_ok).await.first() {
            return Ok(input.clone());
        }

        let buttons = session
            .find_elements(&catalog.upload_button, &FindOptions::default())
            .await;
        if let Some(button) = buttons.first() {
            if session.dispatch_click(button).await {
                tokio::time::sleep(Duration::from_millis(600)).await;
                if let Some(input) =
                    session.find_elements(&catalog.file_input, &hidden_ok).await.first()
                {
                    return Ok(input.clone());
                }
            }
        }

        // Between the last two attempts a full reload sometimes surfaces
        // the composer the SPA failed to mount.
        if attempt == UPLOAD_CONTROL_ATTEMPTS - 2 {
            log::debug!("{} reloading page to recover the upload control", ctx.label());
            let _ = session.evaluate_in_page("window.location.reload(); true").await;
            tokio::time::sleep(Duration::from_millis(1_800).min(budget.remaining())).await;
            messenger
                .dismiss_consent(session, Duration::from_millis(1_000))
                .await;
        } else {
            tokio::time::sleep(Duration::from_millis(700).min(budget.remaining())).await;
        }
    }

    Err(HawkerError::MessageFileInputNotFound(Fault::new(
        FaultKind::UiNotReady,
        &ctx.label(),
        "no file input or upload control found after three attempts",
        None,
    )))
}

/// Wait for the attachment previews and an enabled send control.
async fn await_attachments_ready(
    messenger: &Messenger,
    session: &dyn BrowserSession,
    budget: &DeadlineBudget,
    expected: usize,
) -> bool {
    let catalog = &messenger.configuration.selectors;
    let max = Duration::from_secs(15).min(budget.remaining());
    let poll = Duration::from_millis(400);
    let started = std::time::Instant::now();

    loop {
        let previews = session
            .find_elements(&catalog.attachment_preview, &FindOptions::default())
            .await
            .len();
        let send_enabled = !session
            .find_elements(&catalog.send_button, &FindOptions::default())
            .await
            .is_empty();

        if previews >= expected && send_enabled {
            return true;
        }
        if started.elapsed() + poll > max {
            return false;
        }
        tokio::time::sleep(poll).await;
    }
}
