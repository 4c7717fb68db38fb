//! Chrome adapter for the [`BrowserSession`] seam.
//!
//! Launches one browser per invocation against an ephemeral profile
//! directory and drives it over CDP. Proxies are passed via
//! `--proxy-server`; credentialed upstreams are expected to sit behind a
//! local anonymizing forwarder, referenced through the account's proxy.
//!
//! Element handles are positional (`selector` + `index`). Interaction
//! first re-resolves natively for a trusted input event and falls back to
//! an in-page click for elements inside shadow roots or nested documents.

use crate::budget::DeadlineBudget;
use crate::configuration::Configuration;
use crate::conversation::{Account, ProxyServer};
use crate::error::{classify_error, Fault, FaultKind, HawkerError, HawkerResult};
use crate::session::{
    BrowserSession, ElementHandle, FindOptions, NavigateOptions, SessionEvent, SessionFactory,
    WaitUntil, MAX_PIERCE_DEPTH,
};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use chromiumoxide::cdp::browser_protocol::network::{
    CookieParam, EventLoadingFailed, EventRequestWillBeSent, EventResponseReceived,
};
use chromiumoxide::cdp::browser_protocol::page::EventFrameNavigated;
use chromiumoxide::cdp::js_protocol::runtime::EventExceptionThrown;
use chromiumoxide::error::CdpError;
use chromiumoxide::{Browser, BrowserConfig, Page};
use reqwest::cookie::{CookieStore, Jar};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use url::Url;

/// Baseline launch arguments shared by every profile.
const CHROME_ARGS: [&str; 7] = [
    "--no-first-run",
    "--no-default-browser-check",
    "--disable-background-networking",
    "--disable-sync",
    "--disable-features=Translate,OptimizationHints",
    "--mute-audio",
    "--disable-dev-shm-usage",
];

/// Cap on buffered session events between drains.
const EVENT_BUFFER_CAP: usize = 512;

/// Bounded wait for the graceful browser close before the forced kill.
const GRACEFUL_CLOSE_WAIT: Duration = Duration::from_secs(2);

/// Parse a cookie header string into CDP cookie params for the origin.
pub fn parse_cookies_with_jar(cookie_str: &str, url: &Url) -> Result<Vec<CookieParam>, String> {
    let jar = Jar::default();
    jar.add_cookie_str(cookie_str, url);

    let header_value = match jar.cookies(url) {
        Some(v) => v,
        None => return Err("no cookies found".to_string()),
    };
    let cookie_header_str = header_value.to_str().map_err(|e| e.to_string())?;

    let mut cookies = Vec::new();
    for pair in cookie_header_str.split(';') {
        let parts: Vec<&str> = pair.trim().splitn(2, '=').collect();
        if parts.len() != 2 {
            return Err(format!("invalid cookie pair: {pair}"));
        }

        let mut builder = CookieParam::builder()
            .name(parts[0].trim())
            .value(parts[1].trim())
            .url(url.as_str());

        if let Some(domain) = url.domain() {
            builder = builder.domain(domain.to_string());
        }
        let path = url.path();
        builder = builder.path(if path.is_empty() { "/" } else { path });

        match builder.build() {
            Ok(cookie) => cookies.push(cookie),
            Err(e) => return Err(e),
        }
    }

    Ok(cookies)
}

/// Launches one [`ChromeSession`] per invocation.
pub struct ChromeSessionFactory {
    config: Configuration,
}

impl ChromeSessionFactory {
    /// A factory bound to one configuration.
    pub fn new(config: &Configuration) -> Self {
        ChromeSessionFactory {
            config: config.clone(),
        }
    }

    fn browser_config(
        &self,
        account: &Account,
        proxy: Option<&ProxyServer>,
        profile_dir: &Path,
    ) -> Result<BrowserConfig, String> {
        let mut args: Vec<String> = CHROME_ARGS.iter().map(|a| a.to_string()).collect();
        if let Some(proxy) = proxy {
            args.push(format!("--proxy-server={}", proxy.address()));
        }

        let mut builder = BrowserConfig::builder()
            .request_timeout(
                self.config
                    .request_timeout
                    .as_deref()
                    .copied()
                    .unwrap_or(Duration::from_secs(30)),
            )
            .user_data_dir(profile_dir)
            .args(args);

        #[cfg(not(feature = "chrome_headed"))]
        {
            builder = builder.new_headless_mode();
        }
        #[cfg(feature = "chrome_headed")]
        {
            builder = builder.with_head();
        }

        if let Some(exe) = self.config.chrome_executable.as_deref() {
            builder = builder.chrome_executable(exe);
        }

        let viewport = account.device.as_ref().and_then(|d| {
            match (d.viewport_width, d.viewport_height) {
                (Some(width), Some(height)) => Some(chromiumoxide::handler::viewport::Viewport {
                    width,
                    height,
                    ..Default::default()
                }),
                _ => None,
            }
        });

        builder.viewport(viewport).build()
    }
}

#[async_trait]
impl SessionFactory for ChromeSessionFactory {
    async fn acquire(
        &self,
        account: &Account,
        proxy: Option<&ProxyServer>,
        budget: &DeadlineBudget,
    ) -> HawkerResult<Box<dyn BrowserSession>> {
        budget.ensure_not_expired("launch browser")?;

        let profile_dir = std::env::temp_dir().join(format!(
            "hawker-profile-{}-{:016x}",
            std::process::id(),
            fastrand::u64(..)
        ));
        std::fs::create_dir_all(&profile_dir)
            .map_err(|e| HawkerError::from_fault(classify_error("create profile dir", &e)))?;

        let browser_config = self
            .browser_config(account, proxy, &profile_dir)
            .map_err(|e| {
                let _ = std::fs::remove_dir_all(&profile_dir);
                HawkerError::Session(Fault::new(
                    FaultKind::Unknown,
                    "build browser config",
                    &e,
                    None,
                ))
            })?;

        let launched = match self.config.chrome_connection_url.as_deref() {
            Some(remote) => {
                Browser::connect_with_config(remote, Default::default()).await
            }
            None => Browser::launch(browser_config).await,
        };
        let (mut browser, mut handler) = match launched {
            Ok(pair) => pair,
            Err(e) => {
                let _ = std::fs::remove_dir_all(&profile_dir);
                return Err(HawkerError::from_fault(classify_error("launch browser", &e)));
            }
        };

        // Poll the handler until the connection drops; transport-level
        // failures end the session, protocol noise does not.
        let handler_task = tokio::task::spawn(async move {
            while let Some(item) = handler.next().await {
                if let Err(e) = item {
                    match e {
                        CdpError::Ws(_)
                        | CdpError::LaunchExit(_, _)
                        | CdpError::LaunchTimeout(_)
                        | CdpError::LaunchIo(_, _) => break,
                        _ => continue,
                    }
                }
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                let _ = browser.kill().await;
                handler_task.abort();
                let _ = std::fs::remove_dir_all(&profile_dir);
                return Err(HawkerError::from_fault(classify_error("open page", &e)));
            }
        };

        let user_agent = account
            .device
            .as_ref()
            .and_then(|d| d.user_agent.as_deref())
            .or(self.config.user_agent.as_deref().map(|a| a.as_str()));
        if let Some(agent) = user_agent {
            let _ = page.set_user_agent(agent).await;
        }
        if let Some(device) = account.device.as_ref() {
            if let Some(tz) = device.timezone_id.as_deref().filter(|t| !t.is_empty()) {
                let _ = page
                    .emulate_timezone(
                        chromiumoxide::cdp::browser_protocol::emulation::SetTimezoneOverrideParams::new(tz),
                    )
                    .await;
            }
            if let Some(locale) = device.locale.as_deref().filter(|l| !l.is_empty()) {
                let _ = page
                    .emulate_locale(
                        chromiumoxide::cdp::browser_protocol::emulation::SetLocaleOverrideParams {
                            locale: Some(locale.into()),
                        },
                    )
                    .await;
            }
        }

        let events = Arc::new(Mutex::new(Vec::new()));
        let event_tasks = spawn_event_pumps(&page, &events).await;

        Ok(Box::new(ChromeSession {
            browser: tokio::sync::Mutex::new(browser),
            page,
            handler_task,
            event_tasks,
            events,
            profile_dir,
            closed: AtomicBool::new(false),
        }))
    }
}

fn push_event(buffer: &Arc<Mutex<Vec<SessionEvent>>>, event: SessionEvent) {
    if let Ok(mut buffer) = buffer.lock() {
        if buffer.len() >= EVENT_BUFFER_CAP {
            buffer.remove(0);
        }
        buffer.push(event);
    }
}

/// Subscribe to the page event streams the confirmation layer cares
/// about.
async fn spawn_event_pumps(
    page: &Page,
    events: &Arc<Mutex<Vec<SessionEvent>>>,
) -> Vec<JoinHandle<()>> {
    let mut tasks = Vec::new();

    if let Ok(mut stream) = page.event_listener::<EventRequestWillBeSent>().await {
        let buffer = Arc::clone(events);
        tasks.push(tokio::task::spawn(async move {
            while let Some(event) = stream.next().await {
                push_event(
                    &buffer,
                    SessionEvent::Request {
                        url: event.request.url.clone(),
                        method: event.request.method.clone(),
                    },
                );
            }
        }));
    }

    if let Ok(mut stream) = page.event_listener::<EventResponseReceived>().await {
        let buffer = Arc::clone(events);
        tasks.push(tokio::task::spawn(async move {
            while let Some(event) = stream.next().await {
                push_event(
                    &buffer,
                    SessionEvent::Response {
                        url: event.response.url.clone(),
                        status: event.response.status as u16,
                    },
                );
            }
        }));
    }

    if let Ok(mut stream) = page.event_listener::<EventLoadingFailed>().await {
        let buffer = Arc::clone(events);
        tasks.push(tokio::task::spawn(async move {
            while let Some(event) = stream.next().await {
                push_event(
                    &buffer,
                    SessionEvent::RequestFailed {
                        url: String::new(),
                        error: event.error_text.clone(),
                    },
                );
            }
        }));
    }

    if let Ok(mut stream) = page.event_listener::<EventFrameNavigated>().await {
        let buffer = Arc::clone(events);
        tasks.push(tokio::task::spawn(async move {
            while let Some(event) = stream.next().await {
                push_event(&buffer, SessionEvent::Navigation(event.frame.url.clone()));
            }
        }));
    }

    if let Ok(mut stream) = page.event_listener::<EventExceptionThrown>().await {
        let buffer = Arc::clone(events);
        tasks.push(tokio::task::spawn(async move {
            while let Some(event) = stream.next().await {
                push_event(
                    &buffer,
                    SessionEvent::PageError(event.exception_details.text.clone()),
                );
            }
        }));
    }

    tasks
}

/// One launched browser page plus its ephemeral profile.
pub struct ChromeSession {
    browser: tokio::sync::Mutex<Browser>,
    page: Page,
    handler_task: JoinHandle<()>,
    event_tasks: Vec<JoinHandle<()>>,
    events: Arc<Mutex<Vec<SessionEvent>>>,
    profile_dir: PathBuf,
    closed: AtomicBool,
}

impl ChromeSession {
    /// Resolve a positional handle to a native element in the main
    /// document. Shadow-root matches resolve to `None`.
    async fn resolve_native(&self, handle: &ElementHandle) -> Option<chromiumoxide::Element> {
        match self.page.find_elements(handle.selector.as_str()).await {
            Ok(mut found) => {
                if handle.index < found.len() {
                    Some(found.swap_remove(handle.index))
                } else {
                    None
                }
            }
            Err(_) => None,
        }
    }

    fn pierce_script(selector: &str, depth: usize) -> String {
        format!(
            r#"(() => {{
                const sel = {sel};
                const queue = [{{ root: document, depth: 0 }}];
                const seen = new Set();
                const out = [];
                while (queue.length) {{
                    const {{ root, depth }} = queue.shift();
                    if (seen.has(root)) continue;
                    seen.add(root);
                    let nodes = [];
                    try {{ nodes = root.querySelectorAll(sel); }} catch (e) {{ return out; }}
                    for (const el of nodes) {{
                        const rect = el.getBoundingClientRect ? el.getBoundingClientRect() : null;
                        const view = el.ownerDocument?.defaultView;
                        const style = view ? view.getComputedStyle(el) : null;
                        const visible = !!rect && rect.width > 0 && rect.height > 0
                            && (!style || (style.visibility !== 'hidden' && style.display !== 'none'));
                        out.push({{ visible, text: (el.textContent || '').trim().slice(0, 160) }});
                    }}
                    if (depth < {depth}) {{
                        for (const el of root.querySelectorAll('*')) {{
                            if (el.shadowRoot) queue.push({{ root: el.shadowRoot, depth: depth + 1 }});
                        }}
                        for (const frame of root.querySelectorAll('iframe, frame')) {{
                            try {{
                                if (frame.contentDocument) queue.push({{ root: frame.contentDocument, depth: depth + 1 }});
                            }} catch (e) {{}}
                        }}
                    }}
                }}
                return out;
            }})()"#,
            sel = serde_json::to_string(selector).unwrap_or_else(|_| "\"\"".into()),
            depth = depth,
        )
    }

    fn click_script(selector: &str, index: usize, depth: usize) -> String {
        format!(
            r#"(() => {{
                const sel = {sel};
                const queue = [{{ root: document, depth: 0 }}];
                const seen = new Set();
                let at = 0;
                while (queue.length) {{
                    const {{ root, depth }} = queue.shift();
                    if (seen.has(root)) continue;
                    seen.add(root);
                    let nodes = [];
                    try {{ nodes = root.querySelectorAll(sel); }} catch (e) {{ return false; }}
                    for (const el of nodes) {{
                        if (at === {index}) {{
                            el.scrollIntoView({{ block: 'center' }});
                            el.click();
                            return true;
                        }}
                        at += 1;
                    }}
                    if (depth < {depth}) {{
                        for (const el of root.querySelectorAll('*')) {{
                            if (el.shadowRoot) queue.push({{ root: el.shadowRoot, depth: depth + 1 }});
                        }}
                        for (const frame of root.querySelectorAll('iframe, frame')) {{
                            try {{
                                if (frame.contentDocument) queue.push({{ root: frame.contentDocument, depth: depth + 1 }});
                            }} catch (e) {{}}
                        }}
                    }}
                }}
                return false;
            }})()"#,
            sel = serde_json::to_string(selector).unwrap_or_else(|_| "\"\"".into()),
            index = index,
            depth = depth,
        )
    }
}

#[async_trait]
impl BrowserSession for ChromeSession {
    async fn navigate(&self, url: &str, opts: &NavigateOptions) -> HawkerResult<()> {
        let wait_until = opts.wait_until;
        let run = async {
            self.page.goto(url).await?;
            match wait_until {
                WaitUntil::DomContentLoaded => {}
                WaitUntil::Load | WaitUntil::NetworkIdle => {
                    self.page.wait_for_navigation().await?;
                }
            }
            Ok::<(), CdpError>(())
        };

        match tokio::time::timeout(opts.timeout, run).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(HawkerError::from_fault(classify_error("navigate", &e))),
            Err(_) => Err(HawkerError::from_fault(Fault::new(
                FaultKind::ActionTimeout,
                "navigate",
                &format!(
                    "navigation to {url} timed out after {}ms",
                    opts.timeout.as_millis()
                ),
                None,
            ))),
        }
    }

    async fn current_url(&self) -> Option<String> {
        self.page.url().await.ok().flatten()
    }

    async fn evaluate_in_page(&self, script: &str) -> Option<serde_json::Value> {
        match self.page.evaluate(script).await {
            Ok(result) => result.value().cloned(),
            Err(_) => None,
        }
    }

    async fn find_elements(&self, selectors: &[String], opts: &FindOptions) -> Vec<ElementHandle> {
        let depth = if opts.pierce { MAX_PIERCE_DEPTH } else { 0 };

        for selector in selectors {
            let script = Self::pierce_script(selector, depth);
            let Some(value) = self.evaluate_in_page(&script).await else {
                continue;
            };
            let Some(rows) = value.as_array() else {
                continue;
            };

            let mut out = Vec::new();
            for (index, row) in rows.iter().enumerate() {
                let visible = row.get("visible").and_then(|v| v.as_bool()).unwrap_or(false);
                if opts.require_visible && !visible {
                    continue;
                }
                out.push(ElementHandle {
                    selector: selector.clone(),
                    index,
                    visible,
                    text: row
                        .get("text")
                        .and_then(|t| t.as_str())
                        .filter(|t| !t.is_empty())
                        .map(|t| t.to_string()),
                });
            }

            // First selector with matches wins.
            if !out.is_empty() {
                return out;
            }
        }

        Vec::new()
    }

    async fn dispatch_click(&self, handle: &ElementHandle) -> bool {
        if let Some(element) = self.resolve_native(handle).await {
            if element.click().await.is_ok() {
                return true;
            }
        }
        // Shadow-root and nested-document elements only resolve in-page.
        let script = Self::click_script(&handle.selector, handle.index, MAX_PIERCE_DEPTH);
        self.evaluate_in_page(&script)
            .await
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    async fn type_text(&self, handle: &ElementHandle, text: &str) -> HawkerResult<()> {
        let element = self.resolve_native(handle).await.ok_or_else(|| {
            HawkerError::Session(Fault::new(
                FaultKind::UiNotReady,
                "type text",
                &format!("element {}[{}] is gone", handle.selector, handle.index),
                None,
            ))
        })?;

        element
            .click()
            .await
            .map_err(|e| HawkerError::from_fault(classify_error("focus input", &e)))?;

        // Keystroke pacing keeps the input indistinguishable from a slow
        // human typist without stalling long messages.
        for chunk in text.chars().collect::<Vec<_>>().chunks(3) {
            let part: String = chunk.iter().collect();
            element
                .type_str(&part)
                .await
                .map_err(|e| HawkerError::from_fault(classify_error("type text", &e)))?;
            tokio::time::sleep(Duration::from_millis(fastrand::u64(25..90))).await;
        }

        Ok(())
    }

    async fn press_key(&self, key: &str) -> bool {
        self.page.press_key(key).await.is_ok()
    }

    async fn set_files(&self, handle: &ElementHandle, files: &[PathBuf]) -> HawkerResult<()> {
        let element = self.resolve_native(handle).await.ok_or_else(|| {
            HawkerError::MessageFileInputNotFound(Fault::new(
                FaultKind::UiNotReady,
                "stage files",
                &format!("file input {}[{}] is gone", handle.selector, handle.index),
                None,
            ))
        })?;

        let paths: Vec<String> = files
            .iter()
            .map(|p| p.to_string_lossy().to_string())
            .collect();

        let params = SetFileInputFilesParams::builder()
            .files(paths)
            .backend_node_id(element.backend_node_id)
            .build()
            .map_err(|e| {
                HawkerError::Session(Fault::new(FaultKind::Unknown, "stage files", &e, None))
            })?;

        self.page
            .execute(params)
            .await
            .map_err(|e| HawkerError::from_fault(classify_error("stage files", &e)))?;

        Ok(())
    }

    async fn set_cookies(&self, cookie_str: &str, url: &str) -> HawkerResult<()> {
        let parsed = Url::parse(url)
            .map_err(|e| HawkerError::from_fault(classify_error("parse cookie origin", &e)))?;
        let cookies = parse_cookies_with_jar(cookie_str, &parsed).map_err(|e| {
            HawkerError::AuthRequired(Fault::new(
                FaultKind::AuthRequired,
                "inject session cookies",
                &e,
                None,
            ))
        })?;

        self.page
            .set_cookies(cookies)
            .await
            .map_err(|e| HawkerError::from_fault(classify_error("inject session cookies", &e)))?;
        Ok(())
    }

    async fn capture_screenshot(&self) -> Option<bytes::Bytes> {
        let params = chromiumoxide::page::ScreenshotParams::builder()
            .format(chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat::Png)
            .full_page(false)
            .build();
        self.page.screenshot(params).await.ok().map(bytes::Bytes::from)
    }

    async fn drain_events(&self) -> Vec<SessionEvent> {
        match self.events.lock() {
            Ok(mut buffer) => std::mem::take(&mut *buffer),
            Err(_) => Vec::new(),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.handler_task.is_finished()
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        {
            let mut browser = self.browser.lock().await;
            match tokio::time::timeout(GRACEFUL_CLOSE_WAIT, browser.close()).await {
                Ok(_) => {
                    // Reap the child so no zombie outlives the invocation.
                    let _ = tokio::time::timeout(GRACEFUL_CLOSE_WAIT, browser.wait()).await;
                }
                Err(_) => {
                    log::debug!("graceful browser close timed out, killing the process");
                    let _ = browser.kill().await;
                }
            }
        }

        for task in &self.event_tasks {
            task.abort();
        }
        if !self.handler_task.is_finished() {
            self.handler_task.abort();
        }

        if let Err(e) = std::fs::remove_dir_all(&self.profile_dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::debug!("profile cleanup failed for {:?}: {e}", self.profile_dir);
            }
        }
    }
}
