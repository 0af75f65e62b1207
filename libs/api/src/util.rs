/// Match a pub/sub topic against a subscription filter.
///
/// Levels are separated by `/`. `+` matches exactly one level, `#` matches
/// the remaining levels (including none) and must be the last level.
/// - `"home/+/temp"` matches `"home/kitchen/temp"`
/// - `"home/#"` matches `"home"` and `"home/kitchen/temp"`
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut f = filter.split('/');
    let mut t = topic.split('/');
    loop {
        match (f.next(), t.next()) {
            (Some("#"), _) => return f.next().is_none(),
            (Some("+"), Some(_)) => {}
            (Some(a), Some(b)) if a == b => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// A topic level usable in a concrete topic name: non-empty, no separator,
/// no wildcard.
pub fn is_plain_level(level: &str) -> bool {
    !level.is_empty() && !level.contains(['/', '+', '#'])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_and_single_level() {
        assert!(topic_matches("home/kitchen/temp", "home/kitchen/temp"));
        assert!(topic_matches("home/+/temp", "home/kitchen/temp"));
        assert!(!topic_matches("home/+/temp", "home/kitchen/hum"));
        assert!(!topic_matches("home/+", "home/kitchen/temp"));
        assert!(!topic_matches("home/kitchen/temp", "home/kitchen"));
    }

    #[test]
    fn multi_level() {
        assert!(topic_matches("home/#", "home"));
        assert!(topic_matches("home/#", "home/kitchen/temp"));
        assert!(topic_matches("#", "anything/at/all"));
        assert!(!topic_matches("home/#/temp", "home/kitchen/temp"));
        assert!(!topic_matches("office/#", "home/kitchen"));
    }

    #[test]
    fn plain_levels() {
        assert!(is_plain_level("kitchen"));
        assert!(!is_plain_level(""));
        assert!(!is_plain_level("a/b"));
        assert!(!is_plain_level("+"));
        assert!(!is_plain_level("te#mp"));
    }
}
