//! # logtail-telemetry
//!
//! Process-wide `tracing` setup and the metric names shared by every crate.

#![deny(unsafe_code)]

pub mod metrics;

use logtail_settings::LoggingSettings;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by `RUST_LOG`.
    pub log_level: Level,
    /// Per-module level overrides (e.g. `"logtail_bus"` => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// JSON lines on stdout instead of compact human output.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: true,
        }
    }
}

impl TelemetryConfig {
    /// Build from logging settings. Unknown level names fall back to INFO
    /// (or are dropped, for module overrides).
    pub fn from_settings(settings: &LoggingSettings) -> Self {
        let log_level = settings.level.parse().unwrap_or(Level::INFO);
        let module_levels = settings
            .module_levels
            .iter()
            .filter_map(|(module, level)| Some((module.clone(), level.parse().ok()?)))
            .collect();
        Self {
            log_level,
            module_levels,
            json: settings.json,
        }
    }

    /// `EnvFilter` directive string for this config.
    pub fn filter_directives(&self) -> String {
        let mut filter = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            filter.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
        }
        filter
    }
}

/// Result of [`init_telemetry`].
#[derive(Debug)]
pub struct TelemetryGuard {
    filter: String,
    installed: bool,
}

impl TelemetryGuard {
    /// The filter in effect (`RUST_LOG` if it was set).
    pub fn filter(&self) -> &str {
        &self.filter
    }

    /// False if another global subscriber was already installed.
    pub fn installed(&self) -> bool {
        self.installed
    }
}

/// Install the global subscriber. Call once at startup.
pub fn init_telemetry(config: &TelemetryConfig) -> TelemetryGuard {
    let directives = config.filter_directives();
    let (env_filter, filter) = match EnvFilter::try_from_default_env() {
        Ok(f) => {
            let shown = f.to_string();
            (f, shown)
        }
        Err(_) => (EnvFilter::new(&directives), directives),
    };

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_filter(env_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .compact()
            .with_target(true)
            .with_filter(env_filter)
            .boxed()
    };

    let installed = tracing_subscriber::registry().with(fmt_layer).try_init().is_ok();
    if !installed {
        eprintln!("logtail-telemetry: a global subscriber was already installed");
    }

    TelemetryGuard { filter, installed }
}
