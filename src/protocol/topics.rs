//! Topic addressing for Homie devices
//!
//! Every device-level topic lives under `{base_topic}{device}/`. Nothing here
//! normalizes or validates the relative part; callers pass well-formed
//! segments such as `$state` or `$stats/interval`.

use super::messages::BROADCAST_ATTRIBUTE;

/// Build a fully qualified device topic: `{base_topic}{device}/{part}`
pub fn device_topic(base_topic: &str, device_name: &str, part: &str) -> String {
    format!("{base_topic}{device_name}/{part}")
}

/// Broadcast subscription pattern: `{base_topic}$broadcast/+`
pub fn broadcast_filter(base_topic: &str) -> String {
    format!("{}+", broadcast_prefix(base_topic))
}

/// Prefix stripped from inbound broadcast topics: `{base_topic}$broadcast/`
pub fn broadcast_prefix(base_topic: &str) -> String {
    format!("{base_topic}{BROADCAST_ATTRIBUTE}/")
}

/// Extract the broadcast level from an inbound topic.
///
/// Topics outside the broadcast prefix are returned unchanged.
pub fn broadcast_level<'a>(base_topic: &str, topic: &'a str) -> &'a str {
    let prefix = broadcast_prefix(base_topic);
    topic.strip_prefix(prefix.as_str()).unwrap_or(topic)
}

/// Check whether an MQTT topic filter matches a concrete topic name.
///
/// Supports the single-level (`+`) and multi-level (`#`) wildcards.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}
