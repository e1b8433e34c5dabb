#![forbid(unsafe_code)]

//! Restore settings with environment overrides.
//!
//! | Variable | Effect |
//! |---|---|
//! | `PATCHWIRE_RESTORE_TTL_MS` | deadline for a record's dependencies, and for store readiness |
//! | `PATCHWIRE_RESTORE_WAIT_READY` | `1`/`true` to wait for a not-yet-ready store, anything else to fail fast |

use std::env;
use std::time::Duration;

pub const ENV_RESTORE_TTL_MS: &str = "PATCHWIRE_RESTORE_TTL_MS";
pub const ENV_RESTORE_WAIT_READY: &str = "PATCHWIRE_RESTORE_WAIT_READY";

pub const DEFAULT_RESTORE_TTL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreConfig {
    /// How long a connection may wait for its ports.
    pub ttl: Duration,
    /// Wait (up to `ttl`) for an unready store instead of failing.
    pub wait_for_ready: bool,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_RESTORE_TTL,
            wait_for_ready: true,
        }
    }
}

impl RestoreConfig {
    /// Defaults, overridden by `PATCHWIRE_RESTORE_*` variables.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|name| env::var(name).ok())
    }

    /// Apply overrides from `lookup`; unparsable values are ignored.
    #[must_use]
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(val) = lookup(ENV_RESTORE_TTL_MS)
            && let Ok(ms) = val.trim().parse::<u64>()
        {
            self.ttl = Duration::from_millis(ms);
        }
        if let Some(val) = lookup(ENV_RESTORE_WAIT_READY) {
            let val = val.trim();
            self.wait_for_ready = val == "1" || val.eq_ignore_ascii_case("true");
        }
        self
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_wait_for_ready(mut self, wait_for_ready: bool) -> Self {
        self.wait_for_ready = wait_for_ready;
        self
    }
}
