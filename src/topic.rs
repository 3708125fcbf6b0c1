//! Topic matching for bus updates.
//!
//! Subscription topics are matched against update topics either literally
//! or with MQTT-style wildcards: `+` matches exactly one level, `#` matches
//! the remainder of the topic and is only legal as the final segment.
//! Matching is segment-wise so `+` never crosses a level boundary.

/// Separator between topic levels.
pub const TOPIC_DELIMITER: char = '/';

/// Wildcard matching exactly one topic level.
pub const SINGLE_LEVEL_WILDCARD: &str = "+";

/// Wildcard matching the rest of the topic; final segment only.
pub const MULTI_LEVEL_WILDCARD: &str = "#";

/// Checks whether `topic` satisfies the subscription `pattern`.
///
/// A pattern without wildcards matches only by string equality. Server-key
/// scoping is the caller's responsibility; topics never cross servers.
///
/// # Examples
///
/// ```
/// use telepanel::topic::topics_match;
///
/// assert!(topics_match("sensors/+/temp", "sensors/kitchen/temp"));
/// assert!(!topics_match("sensors/+/temp", "sensors/kitchen/sub/temp"));
/// assert!(topics_match("sensors/#", "sensors/kitchen/sub/temp"));
/// ```
#[must_use]
pub fn topics_match(pattern: &str, topic: &str) -> bool {
    if !pattern.contains(SINGLE_LEVEL_WILDCARD) && !pattern.contains(MULTI_LEVEL_WILDCARD) {
        return pattern == topic;
    }

    let pattern_segments: Vec<&str> = pattern.split(TOPIC_DELIMITER).collect();
    let topic_segments: Vec<&str> = topic.split(TOPIC_DELIMITER).collect();

    for (i, segment) in pattern_segments.iter().enumerate() {
        match *segment {
            MULTI_LEVEL_WILDCARD => {
                // Legal only as the final segment; covers the matched level
                // and everything after it, so the topic may end at the
                // preceding level or extend arbitrarily deep.
                return i == pattern_segments.len() - 1 && topic_segments.len() >= i;
            }
            SINGLE_LEVEL_WILDCARD => {
                if i >= topic_segments.len() {
                    return false;
                }
            }
            literal => {
                if i >= topic_segments.len() || topic_segments[i] != literal {
                    return false;
                }
            }
        }
    }

    // Single-level wildcards require an exact segment count.
    pattern_segments.len() == topic_segments.len()
}
