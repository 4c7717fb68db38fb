//! Multi-account fetch pipeline behavior.

mod common;

use common::*;
use hawker::actions::Messenger;
use hawker::conversation::ConversationRef;
use hawker::error::HawkerError;
use hawker::pipeline::FetchOptions;
use std::sync::Arc;

fn messenger(messagebox: &FakeMessageBox, session: FakeSession) -> Messenger {
    Messenger::new(
        test_configuration(),
        Arc::new(FakeMessageBoxFactory(messagebox.clone())),
        Arc::new(FakeSessionFactory::new(session)),
        Arc::new(hawker::consent::NoConsent),
    )
}

#[tokio::test]
async fn fetch_merges_accounts_and_skips_failures() {
    let messagebox = FakeMessageBox::default();
    messagebox.put_listing("u1", vec![summary("k1", "Anna"), summary("k2", "Bernd")]);
    messagebox.put_listing("u2", vec![summary("k3", "Clara"), summary("k4", "Derya")]);
    // u3's cookies are stale; the account is skipped, not fatal.
    messagebox.0.auth_failures.lock().unwrap().push("u3".into());

    let messenger = messenger(&messagebox, FakeSession::default());

    let merged = messenger
        .fetch_messages(
            &[account("u1"), account("u2"), account("u3")],
            &[],
            &FetchOptions::default(),
        )
        .await;

    let mut ids: Vec<String> = merged
        .iter()
        .filter_map(|s| s.conversation_id.clone())
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["k1", "k2", "k3", "k4"]);
}

#[tokio::test]
async fn fetch_deduplicates_by_conversation_key() {
    let messagebox = FakeMessageBox::default();
    messagebox.put_listing(
        "u1",
        vec![summary("k1", "Anna"), summary("k1", "Anna"), summary("k2", "Bernd")],
    );

    let messenger = messenger(&messagebox, FakeSession::default());
    let merged = messenger
        .fetch_account_conversations(&account("u1"), None, &FetchOptions::default())
        .await
        .unwrap();

    assert_eq!(merged.len(), 2);
}

#[tokio::test]
async fn fetch_honors_the_per_account_limit() {
    let messagebox = FakeMessageBox::default();
    messagebox.put_listing(
        "u1",
        (0..9).map(|i| summary(&format!("k{i}"), "Anna")).collect(),
    );

    let messenger = messenger(&messagebox, FakeSession::default());
    let merged = messenger
        .fetch_account_conversations(
            &account("u1"),
            None,
            &FetchOptions {
                max_conversations: Some(4),
                enrich_images: false,
            },
        )
        .await
        .unwrap();

    assert_eq!(merged.len(), 4);
}

#[tokio::test]
async fn an_empty_transport_listing_falls_back_to_scraping() {
    let messagebox = FakeMessageBox::default();
    // No listing registered: the transport returns an empty page.

    let session = FakeSession::default();
    *session.0.list_rows.lock().unwrap() = serde_json::json!([
        {
            "href": "/m-nachrichten.html#?conversationId=k77",
            "name": "Anna",
            "title": "City Bike",
            "preview": "is it available?",
            "time": "today",
            "img": ""
        }
    ]);

    let messenger = messenger(&messagebox, session.clone());
    let merged = messenger
        .fetch_account_conversations(&account("u1"), None, &FetchOptions::default())
        .await
        .unwrap();

    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].conversation_id.as_deref(), Some("k77"));
    assert_eq!(merged[0].participant, "Anna");
    assert!(session.0.closed.load(std::sync::atomic::Ordering::SeqCst));
}

#[tokio::test]
async fn stale_cookies_propagate_auth_required_without_scraping() {
    let messagebox = FakeMessageBox::default();
    messagebox.0.auth_failures.lock().unwrap().push("u1".into());

    let session = FakeSession::default();
    let messenger = messenger(&messagebox, session.clone());

    let err = messenger
        .fetch_account_conversations(&account("u1"), None, &FetchOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, HawkerError::AuthRequired(_)));
    assert!(session.0.navigations.lock().unwrap().is_empty());
}

#[tokio::test]
async fn thread_fetch_prefers_the_transport() {
    let messagebox = FakeMessageBox::default();
    messagebox.put_detail(snapshot("c1", vec![outgoing_message("m1", "hello")]));

    let session = FakeSession::default();
    let messenger = messenger(&messagebox, session.clone());

    let thread = messenger
        .fetch_thread_messages(&account("u1"), None, &ConversationRef::from_id("c1"))
        .await
        .unwrap();

    assert_eq!(thread.messages.len(), 1);
    assert!(session.0.navigations.lock().unwrap().is_empty());
}

#[tokio::test]
async fn thread_fetch_scrapes_when_the_transport_cannot_serve() {
    let messagebox = FakeMessageBox::default();
    // No detail registered: the transport 404s.

    let session = FakeSession::default();
    let config = test_configuration();
    session.show(&config.selectors.message_content[0], 2);
    *session.0.thread_rows.lock().unwrap() = serde_json::json!({
        "title": "City Bike",
        "messages": [
            { "text": "is it available?", "outgoing": false, "imgs": [] },
            { "text": "yes it is", "outgoing": true, "imgs": ["https://img.test/1.jpg"] }
        ]
    });

    let messenger = messenger(&messagebox, session.clone());
    let thread = messenger
        .fetch_thread_messages(&account("u1"), None, &ConversationRef::from_id("c9"))
        .await
        .unwrap();

    assert_eq!(thread.conversation_id, "c9");
    assert_eq!(thread.messages.len(), 2);
    assert_eq!(
        thread.messages[1].direction,
        hawker::conversation::Direction::Outgoing
    );
    assert_eq!(thread.messages[1].attachments.len(), 1);
    assert!(session.0.closed.load(std::sync::atomic::Ordering::SeqCst));
}
