//! Tracing subscriber setup.
//!
//! One fmt layer with an `EnvFilter` read from `QUALIA_LOG` (falling back
//! to `info`). Safe to call more than once; later calls are no-ops.

use tracing_subscriber::EnvFilter;

/// Environment variable controlling the log filter.
pub const LOG_ENV_VAR: &str = "QUALIA_LOG";

/// Install the process-wide tracing subscriber.
///
/// Returns `true` if this call installed the subscriber, `false` if one
/// was already set (tests calling in parallel hit this path).
pub fn init_tracing() -> bool {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_does_not_panic() {
        let _ = init_tracing();
        // Second call loses the race against the first and reports so.
        assert!(!init_tracing());
    }
}
