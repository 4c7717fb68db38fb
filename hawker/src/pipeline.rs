//! Multi-account fetch pipeline.
//!
//! A bounded set of workers pulls account indices from a shared atomic
//! cursor, fetches each account's conversations through the primary
//! transport (falling back to browser scraping), and merges everything
//! into one append-only collection. Per-account failures are logged and
//! skipped; they never abort the batch.

use crate::abort::AbortSignal;
use crate::actions::{ActionContext, Messenger};
use crate::budget::DeadlineBudget;
use crate::conversation::{
    Account, Attachment, ConversationRef, ConversationSnapshot, ConversationSummary, Direction,
    Message, ProxyServer,
};
use crate::error::{HawkerError, HawkerResult};
use crate::session::{BrowserSession, FindOptions};
use crate::transport::MessageBox;
use crate::utils::conversation_id_from_href;
use hashbrown::HashSet;
use smallvec::SmallVec;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::channel;

/// Hard cap on conversation list pages per account.
const PAGE_CAP: usize = 10;

/// Options for the fetch operations.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Stop after this many conversations per account.
    pub max_conversations: Option<usize>,
    /// Resolve missing ad thumbnails through detail fetches.
    pub enrich_images: bool,
}

/// Fetch one account's conversation list; transport first, browser
/// scraping as the fallback.
pub(crate) async fn fetch_account_conversations(
    messenger: &Messenger,
    account: &Account,
    proxy: Option<&ProxyServer>,
    options: &FetchOptions,
) -> HawkerResult<Vec<ConversationSummary>> {
    messenger.require_credentials(account, "fetch account conversations")?;

    let budget = DeadlineBudget::new(messenger.configuration.action_deadline);
    let transport = messenger.build_transport(proxy)?;

    let page_size = messenger.configuration.page_size;
    match fetch_via_transport(&*transport, account, options, &budget, page_size).await {
        Ok(list) if !list.is_empty() => Ok(list),
        Ok(_) => {
            log::debug!(
                "transport listed no conversations for {}, scraping browser",
                account.id
            );
            fetch_via_browser(messenger, account, proxy, options, &budget).await
        }
        // Stale cookies fail everywhere; the browser would only hit the
        // login wall slower.
        Err(e @ HawkerError::AuthRequired(_)) => Err(e),
        Err(e) => {
            log::warn!(
                "transport listing failed for {}, scraping browser: {e}",
                account.id
            );
            fetch_via_browser(messenger, account, proxy, options, &budget).await
        }
    }
}

/// Paginate the message-box API until the reported total, the page cap,
/// or the caller's limit is reached.
async fn fetch_via_transport(
    transport: &dyn MessageBox,
    account: &Account,
    options: &FetchOptions,
    budget: &DeadlineBudget,
    page_size: usize,
) -> HawkerResult<Vec<ConversationSummary>> {
    let auth = transport
        .exchange_session_for_token(&account.cookie_str)
        .await?;

    let mut out: Vec<ConversationSummary> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut page = 0;
    let limit = options.max_conversations.unwrap_or(usize::MAX);

    loop {
        budget.ensure_not_expired("list conversations")?;

        let listed = transport.list_conversations(&auth, page, page_size).await?;
        let empty = listed.conversations.is_empty();

        for summary in listed.conversations {
            if seen.insert(summary.dedup_key()) {
                out.push(summary);
            }
            if out.len() >= limit {
                break;
            }
        }

        page += 1;
        if empty || out.len() >= limit || out.len() >= listed.total || page >= PAGE_CAP {
            break;
        }
    }

    if options.enrich_images {
        for summary in out.iter_mut() {
            if summary.ad_image.is_some() {
                continue;
            }
            if budget.remaining() < Duration::from_secs(2) {
                log::debug!("image enrichment stopped, budget nearly exhausted");
                break;
            }
            let Some(id) = summary.conversation_id.as_deref() else {
                continue;
            };
            match transport.conversation_detail(&auth, id).await {
                Ok(detail) => summary.ad_image = detail.ad_image,
                Err(e) => log::debug!("image enrichment failed for {id}: {e}"),
            }
        }
    }

    out.truncate(limit.min(out.len()));
    Ok(out)
}

/// Browser fallback: drive the overview page and scrape the rows.
async fn fetch_via_browser(
    messenger: &Messenger,
    account: &Account,
    proxy: Option<&ProxyServer>,
    options: &FetchOptions,
    budget: &DeadlineBudget,
) -> HawkerResult<Vec<ConversationSummary>> {
    let config = &messenger.configuration;
    let ctx = ActionContext {
        route: "fetch",
        debug_id: messenger.debug_ids.next("fetch"),
        account_id: account.id.clone(),
        conversation_id: String::new(),
        conversation_url: config.list_url.clone(),
        deadline: budget.ceiling(),
    };
    let abort = AbortSignal::new();

    let session = messenger
        .prepare_browser(account, proxy, &ctx, budget, &abort)
        .await?;
    let result = scrape_conversation_list(messenger, &*session, options).await;
    session.close().await;
    result
}

/// Extract summary rows from the rendered overview list.
async fn scrape_conversation_list(
    messenger: &Messenger,
    session: &dyn BrowserSession,
    options: &FetchOptions,
) -> HawkerResult<Vec<ConversationSummary>> {
    let catalog = &messenger.configuration.selectors;

    // Give the SPA a moment to mount the list before the first scrape.
    let mut rows = serde_json::Value::Null;
    for _ in 0..8 {
        if let Some(value) = session.evaluate_in_page(&list_scrape_script(catalog)).await {
            if value.as_array().map(|a| !a.is_empty()).unwrap_or(false) {
                rows = value;
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(600)).await;
    }

    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::new();
    let limit = options.max_conversations.unwrap_or(usize::MAX);

    if let Some(rows) = rows.as_array() {
        for row in rows {
            let href = row.get("href").and_then(|v| v.as_str()).unwrap_or_default();
            let summary = ConversationSummary {
                conversation_id: conversation_id_from_href(href),
                participant: text_field(row, "name"),
                ad_title: text_field(row, "title"),
                ad_image: row
                    .get("img")
                    .and_then(|v| v.as_str())
                    .filter(|s| !s.is_empty())
                    .map(|s| s.to_string()),
                last_message: text_field(row, "preview"),
                time_text: text_field(row, "time"),
                unread_count: None,
            };
            if seen.insert(summary.dedup_key()) {
                out.push(summary);
            }
            if out.len() >= limit {
                break;
            }
        }
    }

    Ok(out)
}

fn text_field(row: &serde_json::Value, key: &str) -> String {
    row.get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .trim()
        .to_string()
}

fn list_scrape_script(catalog: &crate::configuration::SelectorCatalog) -> String {
    format!(
        r#"(() => {{
            const sels = {sels};
            const rows = [];
            for (const s of sels) {{
                for (const el of document.querySelectorAll(s)) {{
                    const link = el.matches('a') ? el : el.querySelector('a');
                    rows.push({{
                        href: link ? (link.getAttribute('href') || '') : '',
                        name: (el.querySelector('[class*="name" i], [class*="participant" i]')?.textContent || '').trim(),
                        title: (el.querySelector('[class*="title" i], [class*="subject" i]')?.textContent || '').trim(),
                        preview: (el.querySelector('[class*="preview" i], [class*="snippet" i], p')?.textContent || '').trim(),
                        time: (el.querySelector('time, [class*="time" i], [class*="date" i]')?.textContent || '').trim(),
                        img: el.querySelector('img')?.src || '',
                    }});
                }}
                if (rows.length) break;
            }}
            return rows;
        }})()"#,
        sels = serde_json::to_string(&catalog.conversation_list_item).unwrap_or_else(|_| "[]".into()),
    )
}

/// Fetch one thread's messages; transport first, browser scrape fallback.
pub(crate) async fn fetch_thread_messages(
    messenger: &Messenger,
    account: &Account,
    proxy: Option<&ProxyServer>,
    conversation: &ConversationRef,
) -> HawkerResult<ConversationSnapshot> {
    let config = &messenger.configuration;

    messenger.require_credentials(account, "fetch thread messages")?;
    let (conversation_id, conversation_url) =
        conversation.resolve(&config.conversation_url_template)?;

    let budget = DeadlineBudget::new(config.action_deadline);
    let transport = messenger.build_transport(proxy)?;

    match fetch_thread_via_transport(&*transport, account, &conversation_id).await {
        Ok(snapshot) => return Ok(snapshot),
        Err(e @ HawkerError::AuthRequired(_)) => return Err(e),
        Err(e) => {
            log::warn!("thread fetch via transport failed for {conversation_id}: {e}");
        }
    }

    let ctx = ActionContext {
        route: "fetch-thread",
        debug_id: messenger.debug_ids.next("fetch-thread"),
        account_id: account.id.clone(),
        conversation_id: conversation_id.clone(),
        conversation_url,
        deadline: budget.ceiling(),
    };
    let abort = AbortSignal::new();

    let session = messenger
        .prepare_browser(account, proxy, &ctx, &budget, &abort)
        .await?;
    let result = scrape_thread(messenger, &*session, &conversation_id).await;
    session.close().await;
    result
}

async fn fetch_thread_via_transport(
    transport: &dyn MessageBox,
    account: &Account,
    conversation_id: &str,
) -> HawkerResult<ConversationSnapshot> {
    let auth = transport
        .exchange_session_for_token(&account.cookie_str)
        .await?;
    transport.conversation_detail(&auth, conversation_id).await
}

/// Scrape a rendered thread into a snapshot. Shared by the thread fetch
/// and the pipeline's browser fallback.
pub(crate) async fn scrape_thread(
    messenger: &Messenger,
    session: &dyn BrowserSession,
    conversation_id: &str,
) -> HawkerResult<ConversationSnapshot> {
    let catalog = &messenger.configuration.selectors;

    // Wait for bubbles to mount.
    for _ in 0..8 {
        let found = session
            .find_elements(&catalog.message_content, &FindOptions::default())
            .await;
        if !found.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(600)).await;
    }

    let script = format!(
        r#"(() => {{
            const sels = {sels};
            const out = [];
            for (const s of sels) {{
                for (const el of document.querySelectorAll(s)) {{
                    const cls = (el.className || '') + ' ' + (el.parentElement?.className || '');
                    out.push({{
                        text: (el.textContent || '').trim(),
                        outgoing: /\b(out|right|own|sent)/i.test(cls),
                        imgs: Array.from(el.querySelectorAll('img')).map(i => i.src),
                    }});
                }}
                if (out.length) break;
            }}
            return {{
                title: (document.title || '').trim(),
                messages: out,
            }};
        }})()"#,
        sels = serde_json::to_string(&catalog.message_content).unwrap_or_else(|_| "[]".into()),
    );

    let scraped = session.evaluate_in_page(&script).await.unwrap_or_default();

    let messages = scraped
        .get("messages")
        .and_then(|m| m.as_array())
        .map(|rows| {
            rows.iter()
                .enumerate()
                .map(|(i, row)| {
                    let outgoing = row.get("outgoing").and_then(|v| v.as_bool()).unwrap_or(false);
                    Message {
                        id: format!("dom-{i}"),
                        text: text_field(row, "text"),
                        direction: if outgoing {
                            Direction::Outgoing
                        } else {
                            Direction::Incoming
                        },
                        sender: String::new(),
                        timestamp: String::new(),
                        attachments: row
                            .get("imgs")
                            .and_then(|v| v.as_array())
                            .map(|imgs| {
                                imgs.iter()
                                    .filter_map(|u| u.as_str())
                                    .map(|u| Attachment {
                                        url: u.to_string(),
                                        title: None,
                                        content_type: None,
                                    })
                                    .collect::<SmallVec<[Attachment; 2]>>()
                            })
                            .unwrap_or_default(),
                        offer: None,
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(ConversationSnapshot {
        conversation_id: conversation_id.to_string(),
        participant: String::new(),
        ad_title: scraped
            .get("title")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        ad_image: None,
        messages,
    })
}

/// Fetch conversations for many accounts with bounded worker concurrency.
///
/// Workers pull from a shared monotonic cursor; the increment and the
/// results merge are explicitly synchronized, so the pipeline is safe on
/// a preempting runtime.
pub(crate) async fn fetch_messages(
    messenger: &Messenger,
    accounts: &[Account],
    proxies: &[ProxyServer],
    options: &FetchOptions,
) -> Vec<ConversationSummary> {
    if accounts.is_empty() {
        return Vec::new();
    }

    let workers = messenger
        .configuration
        .effective_concurrency()
        .min(accounts.len());
    let accounts: Arc<Vec<Account>> = Arc::new(accounts.to_vec());
    let proxies: Arc<Vec<ProxyServer>> = Arc::new(proxies.to_vec());
    let cursor = Arc::new(AtomicUsize::new(0));
    let (tx, mut rx) = channel::<Vec<ConversationSummary>>(workers.max(1));

    for worker in 0..workers {
        let messenger = messenger.clone();
        let accounts = Arc::clone(&accounts);
        let proxies = Arc::clone(&proxies);
        let cursor = Arc::clone(&cursor);
        let options = options.clone();
        let tx = tx.clone();

        tokio::spawn(async move {
            loop {
                let index = cursor.fetch_add(1, Ordering::SeqCst);
                if index >= accounts.len() {
                    break;
                }
                let account = &accounts[index];
                let proxy = resolve_proxy(account, &proxies, index);

                match fetch_account_conversations(&messenger, account, proxy, &options).await {
                    Ok(summaries) => {
                        log::debug!(
                            "worker {worker} fetched {} conversations for {}",
                            summaries.len(),
                            account.id
                        );
                        if tx.send(summaries).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        log::warn!(
                            "worker {worker} skipping account {} after failure: {e}",
                            account.id
                        );
                    }
                }
            }
        });
    }
    drop(tx);

    let mut merged: Vec<ConversationSummary> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    while let Some(batch) = rx.recv().await {
        for summary in batch {
            if seen.insert(summary.dedup_key()) {
                merged.push(summary);
            }
        }
    }

    merged
}

/// Resolve the proxy for one account: a pinned reference wins, otherwise
/// proxies rotate over the account index.
fn resolve_proxy<'a>(
    account: &Account,
    proxies: &'a [ProxyServer],
    index: usize,
) -> Option<&'a ProxyServer> {
    if proxies.is_empty() {
        return None;
    }

    if let Some(wanted) = account.proxy_ref.as_deref() {
        if let Some(found) = proxies
            .iter()
            .find(|p| wanted == format!("{}:{}", p.host, p.port) || wanted == p.host)
        {
            return Some(found);
        }
        log::debug!("pinned proxy {wanted} not supplied, rotating instead");
    }

    Some(&proxies[index % proxies.len()])
}
