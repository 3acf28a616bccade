//! `Retry-After` parsing for 429 responses.

/// Accepts a plain integer number of seconds; returns `None` otherwise
/// (an HTTP-date `Retry-After` is rare enough from this upstream that it's
/// treated the same as unparseable — the caller falls back to a default
/// backoff).
pub fn parse_retry_delay(header_value: &str) -> Option<std::time::Duration> {
    header_value
        .trim()
        .parse::<u64>()
        .ok()
        .map(std::time::Duration::from_secs)
}

/// Whether a response body looks like a quota-exhaustion error.
pub fn is_quota_exhausted(body: &str) -> bool {
    let lower = body.to_lowercase();
    lower.contains("quota") || lower.contains("exceeded")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_integer_seconds() {
        assert_eq!(
            parse_retry_delay("30"),
            Some(std::time::Duration::from_secs(30))
        );
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_retry_delay("not-a-duration-or-date"), None);
    }

    #[test]
    fn detects_quota_markers_case_insensitively() {
        assert!(is_quota_exhausted("Error: QUOTA_EXHAUSTED for project"));
        assert!(is_quota_exhausted("rate exceeded for this account"));
        assert!(!is_quota_exhausted("internal server error"));
    }
}
