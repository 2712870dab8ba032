// =============================================================================
// Ingress Throttle — fixed-window rate limit per webhook source
// =============================================================================
//
// Bounds how fast any single source can push signals into the pipeline. The
// window is one minute; the allowance is configuration-driven and read per
// request.
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::warn;

struct Window {
    start_minute: i64,
    count: u32,
}

/// Per-source fixed-window counter.
pub struct IngressThrottle {
    windows: Mutex<HashMap<String, Window>>,
}

impl IngressThrottle {
    pub fn new() -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Whether `source` is still inside its allowance of `limit_per_min`
    /// requests for the current minute. Counts the request when allowed.
    pub fn allow(&self, source: &str, limit_per_min: u32, now: DateTime<Utc>) -> bool {
        if limit_per_min == 0 {
            return true; // throttle disabled
        }

        let minute = now.timestamp() / 60;
        let mut windows = self.windows.lock();

        let window = windows.entry(source.to_string()).or_insert(Window {
            start_minute: minute,
            count: 0,
        });

        if window.start_minute != minute {
            window.start_minute = minute;
            window.count = 0;
        }

        if window.count >= limit_per_min {
            warn!(source, limit_per_min, "webhook source throttled");
            return false;
        }

        window.count += 1;
        true
    }
}

impl Default for IngressThrottle {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
