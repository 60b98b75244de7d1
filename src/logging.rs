//! Logging Module
//!
//! Installs the process-wide tracing subscriber: an `EnvFilter`, a compact
//! console layer on stderr and, when an application log directory is
//! configured, a daily rotating log file.

use crate::config::LoggingConfig;
use crate::{ChunkCacheError, Result};
use tracing::{debug, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// File name prefix of application log files
pub const APP_LOG_FILE_NAME: &str = "chunk-cache.log";

/// Logger manager for process logging
pub struct LoggerManager {
    pub config: LoggingConfig,
}

impl LoggerManager {
    /// Create a new logger manager
    pub fn new(config: LoggingConfig) -> Self {
        Self { config }
    }

    /// Initialize the logging system
    pub fn initialize(&self) -> Result<()> {
        if let Some(log_dir) = &self.config.app_log_dir {
            std::fs::create_dir_all(log_dir).map_err(|e| {
                ChunkCacheError::IoError(format!(
                    "Failed to create app log directory {:?}: {}",
                    log_dir, e
                ))
            })?;
        }

        let file_layer = self.config.app_log_dir.as_ref().map(|log_dir| {
            let file_appender =
                RollingFileAppender::new(Rotation::DAILY, log_dir, APP_LOG_FILE_NAME);
            tracing_subscriber::fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_level(true)
                .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
                .compact()
        });

        // stdout carries fetched bytes, so the console logs to stderr
        let console_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .with_target(false)
            .with_level(true)
            .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
            .compact();

        // RUST_LOG overrides the configured level
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&self.config.log_level));

        let result = tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .with(console_layer)
            .try_init();

        match result {
            Ok(_) => {
                info!("Logging initialized: level={}", self.config.log_level);
                if let Some(log_dir) = &self.config.app_log_dir {
                    info!("Application logs will be written to: {:?}", log_dir);
                }
            }
            Err(_) => {
                // Already initialized, likely in tests
                debug!("Tracing subscriber already initialized, skipping");
            }
        }

        Ok(())
    }
}
