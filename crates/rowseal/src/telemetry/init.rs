//! Tracing subscriber initialisation.

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Output format of the fmt layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per event.
    #[default]
    Json,
    /// Human-readable lines, for local development.
    Text,
}

/// Install the global tracing subscriber.
///
/// Hosts that already install their own subscriber should skip this; the
/// pipeline only emits `tracing` events and works with any subscriber.
///
/// # Errors
///
/// Returns an error if a global subscriber is already set.
pub fn init_tracing(log_level: &str, format: LogFormat) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let fmt_layer = match format {
        LogFormat::Json => tracing_subscriber::fmt::layer().json().boxed(),
        LogFormat::Text => tracing_subscriber::fmt::layer().boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .context("failed to initialise tracing subscriber")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_fails() {
        // Whichever call wins the race installs the subscriber; a repeat must fail.
        let _ = init_tracing("debug", LogFormat::Text);
        assert!(init_tracing("debug", LogFormat::Json).is_err());
    }

    #[test]
    fn format_parses_from_config_text() {
        let f: LogFormat = serde_json::from_str("\"text\"").unwrap();
        assert_eq!(f, LogFormat::Text);
        assert_eq!(LogFormat::default(), LogFormat::Json);
    }
}
