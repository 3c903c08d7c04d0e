//! Canonical source name from page-header text.

use std::sync::LazyLock;

use regex::Regex;

pub const UNKNOWN_GROUP: &str = "Unknown Group";

/// Unread-notification counter browsers prepend to titles: "(3) Name".
static RE_COUNTER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\(\d+\+?\)\s*").unwrap());

/// "Name | Facebook", "Name - Instagram", "Name · Facebook" ...
static RE_SITE_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s*[|·\-–—]\s*(facebook|instagram|meta)\s*$").unwrap()
});

/// Navigation chrome that shows up in the header region.
const BOILERPLATE: &[&str] = &[
    "facebook",
    "instagram",
    "events",
    "upcoming events",
    "past events",
    "notifications",
    "home",
    "log in",
    "sign up",
    "create new account",
    "menu",
    "see all",
    "about",
    "discussion",
    "members",
];

fn clean_line(line: &str) -> String {
    let line = line.trim();
    let line = RE_COUNTER.replace(line, "");
    let line = RE_SITE_SUFFIX.replace(&line, "");
    line.trim().to_string()
}

fn is_trivial(line: &str) -> bool {
    if line.chars().count() < 2 {
        return true;
    }
    if !line.chars().any(char::is_alphabetic) {
        return true;
    }
    let lower = line.to_lowercase();
    BOILERPLATE.contains(&lower.as_str())
}

/// First non-trivial header line with site noise removed, or
/// [`UNKNOWN_GROUP`].
pub fn resolve(header_text: &str) -> String {
    header_text
        .lines()
        .map(clean_line)
        .find(|line| !is_trivial(line))
        .unwrap_or_else(|| UNKNOWN_GROUP.to_string())
}
