use std::time::Duration;

use minidom::Element;
use nobot_core::config::Config;

use crate::error::ConnectionError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub jid: String,
    pub password: String,
    pub server: Option<String>,
    pub port: Option<u16>,
    /// Upper bound on `connect`, enforced by the session.
    pub timeout_seconds: u64,
}

impl ConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl From<&Config> for ConnectionConfig {
    fn from(config: &Config) -> Self {
        let account = &config.account;
        Self {
            jid: account.jid.clone(),
            password: account.password.clone(),
            server: account.server.clone(),
            port: account.port,
            timeout_seconds: config.session.connect_timeout_seconds,
        }
    }
}

/// Stream-level XMPP transport.
///
/// The transport owns the socket, TLS, SASL and XML framing; the session only
/// ever sees whole stanzas. `connect` resolving `Ok` means the stream is
/// authenticated and bound ("online").
pub trait XmppTransport: Send + 'static {
    fn connect(
        &mut self,
        config: &ConnectionConfig,
    ) -> impl Future<Output = Result<(), ConnectionError>> + Send;

    fn send(&mut self, stanza: &Element)
    -> impl Future<Output = Result<(), ConnectionError>> + Send;

    /// Next inbound stanza, or `None` once the peer closed the stream.
    ///
    /// Must be cancel-safe: the session polls it inside `tokio::select!`.
    fn recv(&mut self) -> impl Future<Output = Result<Option<Element>, ConnectionError>> + Send;

    fn close(&mut self) -> impl Future<Output = Result<(), ConnectionError>> + Send;
}
