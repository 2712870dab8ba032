// =============================================================================
// Webhook Token Authentication
// =============================================================================
//
// The webhook endpoint authenticates with the `X-API-Token` header compared
// against the `WEBHOOK_AUTH_TOKEN` environment variable. Comparison runs in
// constant time to prevent timing side-channels. The variable is read on
// every request so rotation does not require a restart.
// =============================================================================

use tracing::warn;

/// Compare two byte slices in constant time. The comparison examines every
/// byte even after a mismatch is found.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// Validate a presented webhook token. An empty configured token rejects
/// everything (the endpoint is effectively disabled until configured).
pub fn validate_webhook_token(presented: &str) -> bool {
    let expected = std::env::var("WEBHOOK_AUTH_TOKEN").unwrap_or_default();
    if expected.is_empty() {
        warn!("WEBHOOK_AUTH_TOKEN is not set — all webhook requests will be rejected");
        return false;
    }
    constant_time_eq(presented.as_bytes(), expected.as_bytes())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_identical() {
        assert!(constant_time_eq(b"hunter2", b"hunter2"));
    }

    #[test]
    fn constant_time_eq_different() {
        assert!(!constant_time_eq(b"hunter2", b"hunter3"));
    }

    #[test]
    fn constant_time_eq_different_lengths() {
        assert!(!constant_time_eq(b"short", b"longer_string"));
    }

    #[test]
    fn constant_time_eq_empty() {
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn constant_time_eq_single_bit_diff() {
        assert!(!constant_time_eq(b"\x00", b"\x01"));
    }
}
