//! Mapping between incident channel names and ticket keys.

use chrono::{DateTime, Duration, Utc};

/// Derives the ticket key from an incident channel name.
///
/// The key is the channel name upper-cased, kept only when the name starts
/// with `prefix` (compared case-insensitively). Returns `None` for any other
/// channel.
///
/// # Examples
///
/// ```
/// use flarebot_core::incident_key;
///
/// assert_eq!(incident_key("flare-123", "flare-").as_deref(), Some("FLARE-123"));
/// assert_eq!(incident_key("general", "flare-"), None);
/// ```
pub fn incident_key(channel_name: &str, prefix: &str) -> Option<String> {
    let head = channel_name.get(..prefix.len())?;
    if !head.eq_ignore_ascii_case(prefix) {
        return None;
    }
    Some(channel_name.to_uppercase())
}

/// Returns the channel name to create for a ticket key (`FLARE-7` → `flare-7`).
pub fn channel_name_for_ticket(key: &str) -> String {
    key.to_lowercase()
}

/// Whether something created at `created_unix` (seconds) is strictly older
/// than `days` days as of `now`.
pub fn is_older_than(created_unix: i64, days: u32, now: DateTime<Utc>) -> bool {
    let Some(created) = DateTime::<Utc>::from_timestamp(created_unix, 0) else {
        return false;
    };
    now.signed_duration_since(created) > Duration::days(i64::from(days))
}
