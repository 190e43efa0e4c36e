//! Size limits applied to inbound beacons.
//!
//! URL-like fields over their limit reject the beacon. Free-text fields are
//! truncated instead, since a long title is not a reason to lose a pageview.

/// Maximum length of the page URL and of the referrer, in characters
pub const MAX_URL_LEN: usize = 2000;

/// Page titles are truncated to this many characters
pub const MAX_TITLE_LEN: usize = 500;

/// Custom event names are truncated to this many characters
pub const MAX_EVENT_NAME_LEN: usize = 50;

pub const MAX_TAG_LEN: usize = 50;

/// Serialized custom properties over this size reject the beacon (16KB)
pub const MAX_PROPERTIES_BYTES: usize = 16 * 1024;

/// Screen / language / distinct id fields are clipped to this length
pub const MAX_SHORT_FIELD_LEN: usize = 100;

/// Client timestamps further ahead of receipt time than this are ignored
pub const MAX_FUTURE_SKEW_SECS: i64 = 24 * 60 * 60;

/// Truncate to at most `max` characters without splitting a code point
pub fn truncate_chars(value: &str, max: usize) -> String {
    match value.char_indices().nth(max) {
        Some((idx, _)) => value[..idx].to_string(),
        None => value.to_string(),
    }
}

/// Trim, drop empty values, and clip to `max` characters
pub fn clean_field(value: Option<&str>, max: usize) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| truncate_chars(v, max))
}
