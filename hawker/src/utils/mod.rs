use log::{info, log_enabled, Level};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};

/// Log to console if configured with log level.
pub fn log(message: &'static str, data: impl AsRef<str>) {
    if log_enabled!(Level::Info) {
        info!("{message} - {}", data.as_ref());
    }
}

/// Normalize message text for comparisons: trim, lowercase, and collapse
/// internal whitespace runs to a single space.
pub fn normalize_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_space = true;

    for c in text.trim().chars() {
        if c.is_whitespace() {
            if !last_space {
                out.push(' ');
                last_space = true;
            }
        } else {
            for lc in c.to_lowercase() {
                out.push(lc);
            }
            last_space = false;
        }
    }

    if out.ends_with(' ') {
        out.pop();
    }

    out
}

/// Truncate a string to at most `max` bytes on a valid char boundary.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Fill the canonical conversation URL template, replacing the `{id}`
/// placeholder with the percent-encoded conversation id.
pub fn fill_url_template(template: &str, conversation_id: &str) -> String {
    let encoded = utf8_percent_encode(conversation_id, NON_ALPHANUMERIC).to_string();
    template.replacen("{id}", &encoded, 1)
}

/// Extract a conversation id from an href as scraped from a list row: a
/// `conversationId=` query/fragment parameter wins, else the last
/// non-empty path segment.
pub fn conversation_id_from_href(href: &str) -> Option<String> {
    if let Some(pos) = href.find("conversationId=") {
        let rest = &href[pos + "conversationId=".len()..];
        let end = rest.find(['&', '#']).unwrap_or(rest.len());
        let id = &rest[..end];
        if !id.is_empty() {
            return Some(id.to_string());
        }
    }
    conversation_id_from_url(href).or_else(|| {
        // Relative hrefs never parse as URLs; take the tail segment.
        href.rsplit('/')
            .find(|s| !s.is_empty() && !s.contains('='))
            .map(|s| s.to_string())
    })
}

/// Extract a conversation id from a conversation URL as the last non-empty
/// path segment, ignoring query and fragment.
pub fn conversation_id_from_url(conversation_url: &str) -> Option<String> {
    let parsed = url::Url::parse(conversation_url).ok()?;
    let segment = parsed
        .path_segments()?
        .filter(|s| !s.is_empty())
        .next_back()?;

    if segment.is_empty() {
        None
    } else {
        Some(segment.to_string())
    }
}
