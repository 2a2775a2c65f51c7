use thiserror::Error;

/// The umbrella error type for the nobot host.
#[derive(Error, Debug)]
pub enum NobotError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("XMPP error: {0}")]
    Xmpp(String),

    #[error("Plugin error: {0}")]
    Plugin(String),

    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    #[error("Logging setup failed: {0}")]
    Telemetry(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized Result type for nobot operations.
pub type Result<T> = std::result::Result<T, NobotError>;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EventBusError {
    #[error("Invalid channel: {0}")]
    InvalidChannel(String),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Subscriber lagged: {0} events missed")]
    Lagged(u64),
}
