//! Logging setup

use syncplayer_core::{PlayerError, PlayerResult};
use tracing_subscriber::EnvFilter;

/// Directive used when `RUST_LOG` is not set
pub const DEFAULT_LOG_DIRECTIVE: &str = "syncplayer=info,syncplayer_media=info";

/// Install a fmt subscriber filtered by `RUST_LOG`, or by [`DEFAULT_LOG_DIRECTIVE`].
///
/// Calling it again, or after another subscriber was installed, does nothing.
pub fn init_logging() -> PlayerResult<()> {
    init_logging_with(DEFAULT_LOG_DIRECTIVE)
}

/// Like [`init_logging`] with a custom fallback directive
pub fn init_logging_with(default_directive: &str) -> PlayerResult<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directive).map_err(|e| PlayerError::Configuration {
            reason: format!("Invalid log directive {:?}: {}", default_directive, e),
        })?,
    };
    // A subscriber is already installed; keep it.
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_is_idempotent() {
        assert!(init_logging().is_ok());
        assert!(init_logging().is_ok());
    }
}
