use super::config::{LogFormat, LogLevel};
use super::initialization::{FallbackStrategy, InitializationError, LogDirective};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Dependencies that are noisy at the adapter's own level.
const QUIET_TARGETS: &[&str] = &["hyper", "hyper_util", "reqwest", "h2", "rustls", "bollard"];

pub struct LoggingSystem {
    directives: Arc<RwLock<Vec<LogDirective>>>,
    /// A bare level in the directive list, e.g. `RUST_LOG=debug`.
    level_override: RwLock<Option<LogLevel>>,
    fallback_level: LogLevel,
}

impl LoggingSystem {
    pub fn new() -> Self {
        Self {
            directives: Arc::new(RwLock::new(Vec::new())),
            level_override: RwLock::new(None),
            fallback_level: LogLevel::Info,
        }
    }

    pub fn add_directive(&self, directive_str: &str) -> Result<(), InitializationError> {
        if !directive_str.contains('=')
            && let Ok(level) = directive_str.trim().parse::<LogLevel>()
        {
            *self.level_override.write() = Some(level);
            return Ok(());
        }

        match LogDirective::parse(directive_str) {
            Ok(directive) => {
                self.directives.write().push(directive);
                Ok(())
            }
            Err(e) => match e.fallback_strategy() {
                FallbackStrategy::UseDefaultLevel => {
                    eprintln!("Warning: {}, using default level", e);
                    let target = directive_str.split('=').next().unwrap_or_default().trim();
                    self.directives
                        .write()
                        .push(LogDirective::new(target, self.fallback_level));
                    Ok(())
                }
                FallbackStrategy::SkipDirective => {
                    eprintln!("Warning: {}, skipping directive", e);
                    Ok(())
                }
                FallbackStrategy::AbortStartup => Err(e),
            },
        }
    }

    pub fn add_default_directives(&self) {
        let mut directives = self.directives.write();
        for target in QUIET_TARGETS {
            directives.push(LogDirective::new(*target, LogLevel::Warn));
        }
    }

    /// Comma-separated `target=level` entries, as in `RUST_LOG`.
    pub fn add_directives_from(&self, list: &str) -> Result<(), InitializationError> {
        for directive in list.split(',').filter(|d| !d.trim().is_empty()) {
            self.add_directive(directive)?;
        }
        Ok(())
    }

    pub fn initialize_tracing(
        &self,
        default_level: LogLevel,
        format: LogFormat,
    ) -> Result<(), InitializationError> {
        let filter_string = self.build_filter_string(default_level);

        let env_filter =
            EnvFilter::try_new(&filter_string).map_err(|e| InitializationError::LoggingInitFailed {
                details: format!("Failed to create EnvFilter with '{}'", filter_string),
                source: Box::new(e),
            })?;

        let result = match format {
            LogFormat::Compact => tracing::subscriber::set_global_default(
                tracing_subscriber::registry().with(env_filter).with(
                    fmt::layer()
                        .with_target(true)
                        .with_level(true)
                        .with_ansi(false)
                        .compact(),
                ),
            ),
            LogFormat::Json => tracing::subscriber::set_global_default(
                tracing_subscriber::registry().with(env_filter).with(
                    fmt::layer()
                        .json()
                        .with_target(true)
                        .with_current_span(false)
                        .flatten_event(true),
                ),
            ),
        };

        result.map_err(|e| InitializationError::LoggingInitFailed {
            details: "Failed to set global tracing subscriber".to_string(),
            source: Box::new(e),
        })
    }

    pub fn build_filter_string(&self, default_level: LogLevel) -> String {
        let directives = self.directives.read();
        let level = self.level_override.read().unwrap_or(default_level);

        let mut filter_parts = Vec::with_capacity(directives.len() + 1);
        filter_parts.push(level.as_str().to_string());
        filter_parts.extend(directives.iter().map(LogDirective::to_filter_string));

        filter_parts.join(",")
    }

    pub fn directive_count(&self) -> usize {
        self.directives.read().len()
    }
}

impl Default for LoggingSystem {
    fn default() -> Self {
        Self::new()
    }
}

/// Install the global subscriber once. Later calls report whether the first
/// one succeeded.
pub fn setup_logging_safe(level: LogLevel, format: LogFormat) -> Result<(), InitializationError> {
    use std::sync::OnceLock;

    static INIT_SUCCESS: OnceLock<bool> = OnceLock::new();

    let initialized = *INIT_SUCCESS.get_or_init(|| {
        let logging_system = LoggingSystem::new();
        logging_system.add_default_directives();

        let result = std::env::var("RUST_LOG")
            .map_or(Ok(()), |list| logging_system.add_directives_from(&list))
            .and_then(|()| logging_system.initialize_tracing(level, format));

        match result {
            Ok(()) => true,
            Err(e) => {
                eprintln!("Logging initialization failed: {}", e);
                false
            }
        }
    });

    if initialized {
        Ok(())
    } else {
        Err(InitializationError::LoggingInitFailed {
            details: "Logging system initialization failed".to_string(),
            source: Box::new(std::io::Error::other("Logging initialization error")),
        })
    }
}
