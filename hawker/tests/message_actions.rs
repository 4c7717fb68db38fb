//! End-to-end executor behavior over scripted fakes.

mod common;

use common::*;
use hawker::abort::AbortSignal;
use hawker::actions::{ConversationTarget, Messenger};
use hawker::conversation::ConversationRef;
use hawker::error::HawkerError;
use hawker::session::SessionEvent;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn messenger(
    messagebox: &FakeMessageBox,
    factory: Arc<FakeSessionFactory>,
) -> Messenger {
    Messenger::new(
        test_configuration(),
        Arc::new(FakeMessageBoxFactory(messagebox.clone())),
        factory,
        Arc::new(hawker::consent::NoConsent),
    )
}

#[tokio::test]
async fn send_text_via_transport_never_drives_a_browser() {
    let messagebox = FakeMessageBox::default();
    messagebox.put_detail(snapshot("c1", vec![]));

    let session = FakeSession::default();
    let factory = Arc::new(FakeSessionFactory::new(session));
    let messenger = messenger(&messagebox, Arc::clone(&factory));

    let result = messenger
        .send_conversation_message(
            &account("u1"),
            None,
            &ConversationTarget::from_ref(ConversationRef::from_id("c1")),
            "is the bike still available?",
        )
        .await
        .unwrap();

    assert_eq!(result.conversation_id, "c1");
    assert_eq!(result.outgoing_matching("is the bike still available?"), 1);
    assert_eq!(messagebox.0.posts.lock().unwrap().len(), 1);
    assert_eq!(factory.acquired.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn send_text_falls_back_to_the_browser_when_the_transport_fails() {
    let messagebox = FakeMessageBox::default();
    messagebox.0.post_fails.store(true, Ordering::SeqCst);
    messagebox.put_detail(snapshot("c1", vec![]));

    let session = FakeSession::default();
    let config = test_configuration();
    session.show(&config.selectors.reply_box[0], 1);
    session.show(&config.selectors.send_button[0], 1);
    session.show(&config.selectors.message_content[0], 3);

    // The click lands in the page; the backend applies it to the read
    // model shortly after.
    let hooked_box = messagebox.clone();
    session.set_on_click(Box::new(move |_| {
        let mut details = hooked_box.0.details.lock().unwrap();
        if let Some(snapshot) = details.get_mut("c1") {
            snapshot.messages.push(outgoing_message("m-ui-1", "hello again"));
        }
    }));

    let factory = Arc::new(FakeSessionFactory::new(session.clone()));
    let messenger = messenger(&messagebox, Arc::clone(&factory));

    let result = messenger
        .send_conversation_message(
            &account("u1"),
            None,
            &ConversationTarget::from_ref(ConversationRef::from_id("c1")),
            "hello again",
        )
        .await
        .unwrap();

    assert_eq!(result.outgoing_matching("hello again"), 1);
    assert_eq!(factory.acquired.load(Ordering::SeqCst), 1);
    assert!(session.0.closed.load(Ordering::SeqCst), "session must be released");

    let typed = session.0.typed.lock().unwrap();
    assert_eq!(typed.len(), 1);
    assert_eq!(typed[0].1, "hello again");
}

#[tokio::test]
async fn send_text_requires_some_target() {
    let messagebox = FakeMessageBox::default();
    let factory = Arc::new(FakeSessionFactory::new(FakeSession::default()));
    let messenger = messenger(&messagebox, factory);

    let err = messenger
        .send_conversation_message(&account("u1"), None, &ConversationTarget::default(), "hi")
        .await
        .unwrap_err();
    assert!(matches!(err, HawkerError::ConversationIdRequired(_)));
}

#[tokio::test]
async fn send_text_requires_credentials() {
    let messagebox = FakeMessageBox::default();
    let factory = Arc::new(FakeSessionFactory::new(FakeSession::default()));
    let messenger = messenger(&messagebox, Arc::clone(&factory));

    let mut broke = account("u1");
    broke.cookie_str = String::new();

    let err = messenger
        .send_conversation_message(
            &broke,
            None,
            &ConversationTarget::from_ref(ConversationRef::from_id("c1")),
            "hi",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, HawkerError::AuthRequired(_)));
    assert_eq!(factory.acquired.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn decline_is_idempotent_on_a_conversation_without_offers() {
    let messagebox = FakeMessageBox::default();
    messagebox.put_detail(snapshot("c3", vec![outgoing_message("m1", "fine, thanks")]));

    let session = FakeSession::default();
    let config = test_configuration();
    session.show(&config.selectors.message_content[0], 1);
    session.show(&config.selectors.reply_box[0], 1);

    let factory = Arc::new(FakeSessionFactory::new(session));
    let messenger = messenger(&messagebox, factory);

    for round in 0..2 {
        let result = messenger
            .decline_conversation_offer(
                &account("u1"),
                None,
                &ConversationRef::from_id("c3"),
                AbortSignal::new(),
                Some(Duration::from_secs(20)),
            )
            .await;
        assert!(result.is_ok(), "round {round}: {result:?}");
        assert!(!result.unwrap().has_offer_blocks());
    }
}

#[tokio::test]
async fn decline_applies_and_returns_the_after_snapshot() {
    let messagebox = FakeMessageBox::default();
    messagebox.put_detail(snapshot(
        "c4",
        vec![incoming_offer_message("m-offer", &["Decline"])],
    ));

    let session = FakeSession::default();
    let config = test_configuration();
    session.show(&config.selectors.payment_box[0], 1);
    session.show(&config.selectors.decline_control[0], 1);

    let hooked_box = messagebox.clone();
    let hooked_session = session.clone();
    let decline_selector = config.selectors.decline_control[0].clone();
    session.set_on_click(Box::new(move |selector| {
        if selector.contains(&decline_selector) {
            hooked_box.put_detail(snapshot("c4", vec![outgoing_message("m2", "declined")]));
            hooked_session.hide(&decline_selector);
            hooked_session.push_event(SessionEvent::Request {
                url: "https://gw.test/messagebox/api/users/u1/negotiations/n1".into(),
                method: "POST".into(),
            });
        }
    }));

    let factory = Arc::new(FakeSessionFactory::new(session.clone()));
    let messenger = messenger(&messagebox, factory);

    let result = messenger
        .decline_conversation_offer(
            &account("u1"),
            None,
            &ConversationRef::from_id("c4"),
            AbortSignal::new(),
            Some(Duration::from_secs(20)),
        )
        .await
        .unwrap();

    assert!(!result.has_offer_blocks());
    assert!(session
        .0
        .clicks
        .lock()
        .unwrap()
        .iter()
        .any(|c| c.contains("decline")));
}

#[tokio::test]
async fn decline_reports_missing_button_when_offers_remain() {
    let messagebox = FakeMessageBox::default();
    messagebox.put_detail(snapshot(
        "c5",
        vec![incoming_offer_message("m-offer", &["Decline"])],
    ));

    let session = FakeSession::default();
    let config = test_configuration();
    // Ready for decline via rendered content, but no decline control and
    // no payment box anywhere.
    session.show(&config.selectors.message_content[0], 1);
    session.show(&config.selectors.reply_box[0], 1);

    let factory = Arc::new(FakeSessionFactory::new(session));
    let messenger = messenger(&messagebox, factory);

    let err = messenger
        .decline_conversation_offer(
            &account("u1"),
            None,
            &ConversationRef::from_id("c5"),
            AbortSignal::new(),
            Some(Duration::from_secs(20)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, HawkerError::DeclineButtonNotFound(_)), "{err:?}");
}

#[tokio::test]
async fn media_send_trusts_the_network_signal_over_the_read_model() {
    let messagebox = FakeMessageBox::default();
    messagebox.put_detail(snapshot("c6", vec![]));

    let session = FakeSession::default();
    let config = test_configuration();
    session.show(&config.selectors.reply_box[0], 1);
    session.show(&config.selectors.file_input[0], 1);
    session.show(&config.selectors.send_button[0], 1);
    session.show(&config.selectors.attachment_preview[0], 2);

    let hooked = session.clone();
    session.set_on_click(Box::new(move |_| {
        hooked.push_event(SessionEvent::Request {
            url: "https://gw.test/messagebox/api/users/u1/conversations/c6".into(),
            method: "POST".into(),
        });
    }));

    let factory = Arc::new(FakeSessionFactory::new(session.clone()));
    let messenger = messenger(&messagebox, factory);

    let files = vec![
        std::path::PathBuf::from("/tmp/a.jpg"),
        std::path::PathBuf::from("/tmp/b.jpg"),
    ];
    let result = messenger
        .send_conversation_media(
            &account("u1"),
            None,
            &ConversationRef::from_id("c6"),
            "",
            &files,
            AbortSignal::new(),
            Some(Duration::from_secs(25)),
        )
        .await
        .unwrap();

    // The read model never changed, the observed mutation carried it.
    assert_eq!(result.outgoing_attachment_units(), 0);
    assert_eq!(*session.0.staged_files.lock().unwrap(), vec![2]);
}

#[tokio::test]
async fn media_send_without_an_upload_control_reports_file_input_not_found() {
    let messagebox = FakeMessageBox::default();
    messagebox.put_detail(snapshot("c7", vec![]));

    let session = FakeSession::default();
    let config = test_configuration();
    session.show(&config.selectors.reply_box[0], 1);

    let factory = Arc::new(FakeSessionFactory::new(session.clone()));
    let messenger = messenger(&messagebox, factory);

    let err = messenger
        .send_conversation_media(
            &account("u1"),
            None,
            &ConversationRef::from_id("c7"),
            "text",
            &[std::path::PathBuf::from("/tmp/a.jpg")],
            AbortSignal::new(),
            Some(Duration::from_secs(25)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, HawkerError::MessageFileInputNotFound(_)), "{err:?}");
    assert!(session.0.closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn the_hard_deadline_bounds_the_whole_invocation() {
    let messagebox = FakeMessageBox::default();
    let session = FakeSession::default();
    let factory = Arc::new(FakeSessionFactory::new(session.clone()));
    let messenger = messenger(&messagebox, Arc::clone(&factory));

    let started = Instant::now();
    let err = messenger
        .send_conversation_media(
            &account("u1"),
            None,
            &ConversationRef::from_id("c8"),
            "late",
            &[],
            AbortSignal::new(),
            Some(Duration::from_millis(300)),
        )
        .await
        .unwrap_err();

    // Bounded grace: the budget fails fast long before any per-step
    // constant would elapse.
    assert!(started.elapsed() < Duration::from_secs(5), "{:?}", started.elapsed());
    assert!(matches!(err, HawkerError::ActionTimeout(_)), "{err:?}");
    if factory.acquired.load(Ordering::SeqCst) > 0 {
        assert!(session.0.closed.load(Ordering::SeqCst), "session leaked");
    }
}

#[tokio::test]
async fn a_pre_set_abort_stops_before_any_interaction() {
    let messagebox = FakeMessageBox::default();
    messagebox.put_detail(snapshot("c9", vec![]));

    let session = FakeSession::default();
    let config = test_configuration();
    session.show(&config.selectors.reply_box[0], 1);

    let abort = AbortSignal::new();
    abort.abort();

    let factory = Arc::new(FakeSessionFactory::new(session.clone()));
    let messenger = messenger(&messagebox, factory);

    let err = messenger
        .send_conversation_media(
            &account("u1"),
            None,
            &ConversationRef::from_id("c9"),
            "never",
            &[],
            abort,
            Some(Duration::from_secs(20)),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, HawkerError::ActionTimeout(_)), "{err:?}");
    assert!(session.0.clicks.lock().unwrap().is_empty());
    assert!(session.0.typed.lock().unwrap().is_empty());
}
