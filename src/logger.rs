use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Parse a log level from a string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

pub fn init_logger(log_level: Option<LogLevel>) {
    let filter = if let Ok(env_filter) = EnvFilter::try_from_default_env() {
        env_filter
    } else {
        let level = log_level.unwrap_or_default();
        EnvFilter::new(format!("xray_sync={}", level.as_str()))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_file(false)
                .with_line_number(true)
                .with_ansi(true)
                .compact(),
        )
        .init();
}

pub mod log {
    pub use tracing::{debug, error, info, warn};

    /// Record a synthesis event
    pub fn synthesis(inbounds: usize, clients: usize, bytes: usize) {
        info!(
            inbounds = inbounds,
            clients = clients,
            bytes = bytes,
            "Document synthesized"
        );
    }

    /// Record an apply event
    pub fn applied(path: &str, restarted: bool) {
        info!(path = path, restarted = restarted, "Configuration applied");
    }

    /// Record a rollback event
    pub fn rollback(path: &str, reason: &str) {
        warn!(path = path, reason = reason, "Configuration rolled back");
    }

    /// Record a reconciliation cycle failure
    pub fn cycle_failed(trigger: &str, error: &str) {
        warn!(trigger = trigger, error = error, "Reconcile cycle failed");
    }
}
