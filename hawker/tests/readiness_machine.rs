//! Readiness state machine behavior over a scripted session.

mod common;

use common::*;
use hawker::abort::AbortSignal;
use hawker::budget::DeadlineBudget;
use hawker::consent::NoConsent;
use hawker::error::HawkerError;
use hawker::readiness::{ConversationReadiness, ReadinessMode};
use std::time::{Duration, Instant};

#[tokio::test]
async fn a_page_that_never_readies_times_out_with_the_last_ui_state() {
    let session = FakeSession::default();
    let config = test_configuration();
    let budget = DeadlineBudget::new(Duration::from_secs(10));

    let readiness = ConversationReadiness::new(
        &session,
        &NoConsent,
        &config,
        ReadinessMode::SendMedia,
        "c1",
        "https://www.marketplace-example.com/m-nachrichten.html#?conversationId=c1",
        AbortSignal::new(),
    );

    let started = Instant::now();
    let err = readiness
        .wait_until_ready(&budget, Duration::from_millis(900))
        .await
        .unwrap_err();

    assert!(matches!(err, HawkerError::ConversationNotReady(_)), "{err:?}");
    assert!(started.elapsed() >= Duration::from_millis(900));
    assert!(started.elapsed() < Duration::from_secs(5));
    // The bootstrap diagnostic carries the final observed feature vector.
    assert!(err.fault().details.contains("last ui state"));
    assert!(err.fault().details.contains("has_reply_box: false"));
}

#[tokio::test]
async fn readiness_returns_the_satisfying_ui_state() {
    let session = FakeSession::default();
    let config = test_configuration();
    session.show(&config.selectors.reply_box[1], 1);
    let budget = DeadlineBudget::new(Duration::from_secs(10));

    let readiness = ConversationReadiness::new(
        &session,
        &NoConsent,
        &config,
        ReadinessMode::SendMedia,
        "c1",
        "https://www.marketplace-example.com/m-nachrichten.html#?conversationId=c1",
        AbortSignal::new(),
    );

    let ui = readiness
        .wait_until_ready(&budget, Duration::from_secs(5))
        .await
        .unwrap();
    assert!(ui.has_reply_box);
    assert!(!ui.is_loading_blocking);
}

#[tokio::test]
async fn a_loading_skeleton_blocks_the_send_predicate() {
    let session = FakeSession::default();
    let config = test_configuration();
    // Only a skeleton is mounted; the composer never arrives.
    session.show(&config.selectors.loading_indicator[0], 1);
    let budget = DeadlineBudget::new(Duration::from_secs(10));

    let readiness = ConversationReadiness::new(
        &session,
        &NoConsent,
        &config,
        ReadinessMode::SendMedia,
        "c1",
        "https://www.marketplace-example.com/m-nachrichten.html#?conversationId=c1",
        AbortSignal::new(),
    );

    let err = readiness
        .wait_until_ready(&budget, Duration::from_millis(700))
        .await
        .unwrap_err();
    assert!(matches!(err, HawkerError::ConversationNotReady(_)));
    assert!(err.fault().details.contains("is_loading_blocking: true"));
}

#[tokio::test]
async fn an_abort_mid_poll_exits_with_a_classified_timeout() {
    let session = FakeSession::default();
    let config = test_configuration();
    let budget = DeadlineBudget::new(Duration::from_secs(10));
    let abort = AbortSignal::new();

    let readiness = ConversationReadiness::new(
        &session,
        &NoConsent,
        &config,
        ReadinessMode::OfferDecline,
        "c1",
        "https://www.marketplace-example.com/m-nachrichten.html#?conversationId=c1",
        abort.clone(),
    );

    let stopper = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(120)).await;
        abort.abort();
    });

    let started = Instant::now();
    let err = readiness
        .wait_until_ready(&budget, Duration::from_secs(30))
        .await
        .unwrap_err();
    stopper.await.unwrap();

    assert!(matches!(err, HawkerError::ActionTimeout(_)), "{err:?}");
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn a_dead_session_fails_fast_as_detached() {
    let session = FakeSession::default();
    session
        .0
        .closed
        .store(true, std::sync::atomic::Ordering::SeqCst);
    let config = test_configuration();
    let budget = DeadlineBudget::new(Duration::from_secs(10));

    let readiness = ConversationReadiness::new(
        &session,
        &NoConsent,
        &config,
        ReadinessMode::SendMedia,
        "c1",
        "https://www.marketplace-example.com/m-nachrichten.html#?conversationId=c1",
        AbortSignal::new(),
    );

    let err = readiness
        .wait_until_ready(&budget, Duration::from_secs(30))
        .await
        .unwrap_err();
    assert!(matches!(err, HawkerError::Session(_)), "{err:?}");
    assert_eq!(err.kind(), hawker::error::FaultKind::DetachedSession);
}
