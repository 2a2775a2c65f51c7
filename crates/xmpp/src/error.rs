use thiserror::Error;

/// Failures reported by an [`XmppTransport`](crate::transport::XmppTransport)
/// or by the session while bringing the stream up.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("stream not established within {0}s")]
    Timeout(u64),

    #[error("transport error: {0}")]
    TransportError(String),
}

#[derive(Debug, Error)]
pub enum StanzaError {
    #[error("stanza parse failed: {0}")]
    ParseFailed(String),

    #[error("stanza serialization failed: {0}")]
    SerializeFailed(String),

    #[error("invalid address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },
}

/// Failure delivered to the continuation of an outstanding query.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IqError {
    #[error("no response to query {id} within {timeout_seconds}s")]
    Timeout { id: u64, timeout_seconds: u64 },

    #[error("session disconnected before query {id} was answered")]
    Disconnected { id: u64 },

    #[error("session is no longer running")]
    SessionClosed,
}

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("profile query failed: {0}")]
    Query(#[from] IqError),

    #[error("profile response has no vCard")]
    MissingVcard,

    #[error("profile vCard carries no display name")]
    MissingName,
}

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("Cannot find plugin '{0}'")]
    Unknown(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error(transparent)]
    Stanza(#[from] StanzaError),

    #[error(transparent)]
    Config(#[from] nobot_core::config::ConfigError),

    #[error("session is no longer running")]
    Closed,
}

impl From<SessionError> for nobot_core::NobotError {
    fn from(error: SessionError) -> Self {
        match error {
            SessionError::Plugin(error) => Self::Plugin(error.to_string()),
            SessionError::Config(error) => Self::Config(error),
            other => Self::Xmpp(other.to_string()),
        }
    }
}
