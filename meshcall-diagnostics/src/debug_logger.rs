//! Structured debug logging system

use meshcall_core::{MeshCallError, MeshCallResult};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INSTALLED: AtomicBool = AtomicBool::new(false);

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub default_directive: String,
    /// Emit one JSON object per event
    pub json: bool,
    /// Colour human-readable output
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            default_directive: "info".to_string(),
            json: false,
            ansi: true,
        }
    }
}

impl LogConfig {
    /// Filter honouring `RUST_LOG`, falling back to the configured directive
    pub fn env_filter(&self) -> MeshCallResult<EnvFilter> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        EnvFilter::try_new(&self.default_directive).map_err(|e| {
            MeshCallError::InvalidConfiguration {
                field: "log.default_directive".to_string(),
                reason: e.to_string(),
            }
        })
    }
}

/// Debug logger for structured logging
#[derive(Debug, Default)]
pub struct DebugLogger {
    config: LogConfig,
}

impl DebugLogger {
    /// Create new debug logger
    pub fn new(config: LogConfig) -> Self {
        Self { config }
    }

    /// Logger configuration
    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Whether a subscriber was installed through this module
    pub fn is_installed() -> bool {
        INSTALLED.load(Ordering::SeqCst)
    }

    /// Install the global subscriber.
    ///
    /// Fails with [`MeshCallError::Initialization`] if a global subscriber
    /// is already installed, by this module or anyone else.
    pub fn init(&self) -> MeshCallResult<()> {
        init_logging(&self.config)
    }
}

/// Install a global `tracing` subscriber for `config`
pub fn init_logging(config: &LogConfig) -> MeshCallResult<()> {
    if INSTALLED.load(Ordering::SeqCst) {
        return Err(MeshCallError::Initialization {
            reason: "logging already initialized".to_string(),
        });
    }
    let filter = config.env_filter()?;
    let registry = tracing_subscriber::registry().with(filter);

    let result = if config.json {
        registry
            .with(fmt::layer().json().with_target(true).with_current_span(false))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(true).with_ansi(config.ansi))
            .try_init()
    };

    result.map_err(|e| MeshCallError::Initialization {
        reason: format!("failed to install tracing subscriber: {}", e),
    })?;
    INSTALLED.store(true, Ordering::SeqCst);
    tracing::debug!("Logging initialized (json: {})", config.json);
    Ok(())
}
