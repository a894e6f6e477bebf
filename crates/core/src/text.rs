//! Slack markup cleanup for titles and comment bodies.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::directory::UserDirectory;

pub const UNTITLED: &str = "Untitled";

fn mention_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"<@([UW][A-Z0-9]+)(?:\|[^>]*)?>").expect("valid regex"))
}

fn channel_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"<#(C[A-Z0-9]+)(?:\|([^>]*))?>").expect("valid regex"))
}

fn special_mention_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"<!(here|channel|everyone)(?:\|[^>]*)?>").expect("valid regex"))
}

fn link_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"<((?:https?|mailto):[^|>]+)(?:\|([^>]*))?>").expect("valid regex")
    })
}

fn whitespace_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\s+").expect("valid regex"))
}

/// Rewrites Slack markup into readable text and collapses whitespace.
///
/// The result may be empty; callers decide what an empty body means.
pub async fn clean_message_text(text: &str, directory: &UserDirectory) -> String {
    let mut names = HashMap::new();
    for captures in mention_pattern().captures_iter(text) {
        let user_id = captures[1].to_owned();
        if !names.contains_key(&user_id) {
            let name = directory.display_name(&user_id).await;
            names.insert(user_id, name);
        }
    }

    let text = mention_pattern().replace_all(text, |captures: &Captures<'_>| {
        let user_id = &captures[1];
        let name = names.get(user_id).cloned().unwrap_or_else(|| UserDirectory::fallback_name(user_id));
        format!("@{name}")
    });
    let text = channel_pattern().replace_all(&text, |captures: &Captures<'_>| {
        match captures.get(2).map(|name| name.as_str()).filter(|name| !name.is_empty()) {
            Some(name) => format!("#{name}"),
            None => format!("#{}", &captures[1]),
        }
    });
    let text = special_mention_pattern().replace_all(&text, "@$1");
    let text = link_pattern().replace_all(&text, |captures: &Captures<'_>| {
        let url = &captures[1];
        match captures.get(2).map(|label| label.as_str().trim()).filter(|label| !label.is_empty()) {
            Some(label) if label != url => format!("{label} ({url})"),
            _ => url.to_owned(),
        }
    });
    let text = text.replace("&lt;", "<").replace("&gt;", ">").replace("&amp;", "&");

    whitespace_pattern().replace_all(text.trim(), " ").into_owned()
}

/// Shortens `text` to at most `max_chars` characters, ending in `...` when cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_owned();
    }
    let keep = max_chars.saturating_sub(3);
    let mut truncated: String = text.chars().take(keep).collect();
    truncated.push_str("...");
    truncated
}

/// Title for a new ticket: cleaned root text, `Untitled` when empty.
pub async fn ticket_title(text: &str, directory: &UserDirectory, max_chars: usize) -> String {
    let cleaned = clean_message_text(text, directory).await;
    if cleaned.is_empty() {
        return UNTITLED.to_owned();
    }
    truncate_chars(&cleaned, max_chars)
}
