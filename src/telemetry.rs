// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Telemetry initialization and configuration.

use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Configuration for telemetry initialization.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Default log level if RUST_LOG is not set.
    pub default_level: Level,

    /// Whether to include target module path.
    pub include_target: bool,

    /// Whether to use ANSI colors in output.
    pub ansi_colors: bool,

    /// Custom filter directive (overrides default_level).
    pub filter_directive: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            default_level: Level::INFO,
            include_target: true,
            ansi_colors: true,
            filter_directive: None,
        }
    }
}

impl TelemetryConfig {
    /// Create a config suitable for development with verbose output.
    pub fn development() -> Self {
        Self {
            default_level: Level::DEBUG,
            ..Default::default()
        }
    }

    /// Set the default log level.
    pub fn with_level(mut self, level: Level) -> Self {
        self.default_level = level;
        self
    }

    /// Set a custom filter directive.
    pub fn with_filter(mut self, directive: impl Into<String>) -> Self {
        self.filter_directive = Some(directive.into());
        self
    }

    /// Build the env filter for this config.
    fn env_filter(&self) -> EnvFilter {
        if let Some(directive) = &self.filter_directive {
            return EnvFilter::new(directive.clone());
        }
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("fleet={}", self.default_level)))
    }
}

/// Initialize tracing for the process.
///
/// Safe to call once; subsequent calls return an error from the
/// subscriber registry which callers may ignore in tests.
pub fn init(config: &TelemetryConfig) -> Result<(), tracing_subscriber::util::TryInitError> {
    let fmt_layer = fmt::layer()
        .with_target(config.include_target)
        .with_ansi(config.ansi_colors);

    tracing_subscriber::registry()
        .with(config.env_filter())
        .with(fmt_layer)
        .try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TelemetryConfig::default();
        assert_eq!(config.default_level, Level::INFO);
        assert!(config.include_target);
    }

    #[test]
    fn test_development_config() {
        let config = TelemetryConfig::development();
        assert_eq!(config.default_level, Level::DEBUG);
    }

    #[test]
    fn test_builder_methods() {
        let config = TelemetryConfig::default()
            .with_level(Level::WARN)
            .with_filter("fleet=trace");
        assert_eq!(config.default_level, Level::WARN);
        assert_eq!(config.filter_directive.as_deref(), Some("fleet=trace"));
    }
}
