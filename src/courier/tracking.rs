//! Courier identifier recovery from stored tracking URLs.
//!
//! Tracking links embed the courier's delivery id either as a path segment
//! after a `track`/`tracking`/`deliveries` marker or as an `id`/`delivery_id`
//! query parameter.

use regex::Regex;
use std::sync::LazyLock;

static PATH_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)/(?:track|tracking|deliveries|delivery|orders)/([A-Za-z0-9_-]{4,})")
        .expect("tracking path pattern compiles")
});

static QUERY_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[?&](?:delivery_id|tracking_id|id)=([A-Za-z0-9_-]{4,})")
        .expect("tracking query pattern compiles")
});

/// Pull the courier's delivery id out of a tracking URL
pub fn extract_courier_id(tracking_url: &str) -> Option<String> {
    QUERY_ID
        .captures(tracking_url)
        .or_else(|| PATH_ID.captures(tracking_url))
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().to_string())
}
