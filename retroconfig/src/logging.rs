//! Logging bootstrap.
//!
//! Installs a `tracing` subscriber whose level filter can be reloaded at
//! runtime. The initial level and the console layer come from the
//! `host.logger` section of the configuration.

use anyhow::{anyhow, Result};
use tracing::Level;
use tracing_subscriber::{
    filter::LevelFilter, layer::SubscriberExt, reload, util::SubscriberInitExt, Registry,
};

use crate::Config;

/// Handle on the installed subscriber, used to change the level at runtime.
#[derive(Clone)]
pub struct LogHandle {
    reload_handle: reload::Handle<LevelFilter, Registry>,
}

impl LogHandle {
    pub fn set_level(&self, level: Level) -> Result<()> {
        self.reload_handle
            .reload(LevelFilter::from_level(level))
            .map_err(|e| anyhow!("Failed to reload log level filter: {}", e))
    }

    pub fn current_level(&self) -> Option<LevelFilter> {
        self.reload_handle.clone_current()
    }
}

/// Parses a level name, case-insensitively.
pub fn string_to_level(value: &str) -> Option<Level> {
    match value.trim().to_ascii_uppercase().as_str() {
        "TRACE" => Some(Level::TRACE),
        "DEBUG" => Some(Level::DEBUG),
        "INFO" => Some(Level::INFO),
        "WARN" | "WARNING" => Some(Level::WARN),
        "ERROR" => Some(Level::ERROR),
        _ => None,
    }
}

/// Installs the global subscriber.
///
/// Fails if a global subscriber has already been set.
pub fn init_logging(config: &Config) -> Result<LogHandle> {
    let level = config
        .get_log_min_level()
        .ok()
        .and_then(|l| string_to_level(&l))
        .map(LevelFilter::from_level)
        .unwrap_or(LevelFilter::INFO);

    let (filter, reload_handle) = reload::Layer::new(level);
    let subscriber = Registry::default().with(filter);

    let enable_console = config.get_log_enable_console().unwrap_or(true);

    let installed = if enable_console {
        subscriber
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_ansi(true),
            )
            .try_init()
    } else {
        subscriber.try_init()
    };
    installed.map_err(|e| anyhow!("Failed to install tracing subscriber: {}", e))?;

    Ok(LogHandle { reload_handle })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_to_level() {
        assert_eq!(string_to_level("debug"), Some(Level::DEBUG));
        assert_eq!(string_to_level(" Warning "), Some(Level::WARN));
        assert_eq!(string_to_level("loud"), None);
    }
}
