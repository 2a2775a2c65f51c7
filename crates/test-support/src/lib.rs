pub mod fixtures {
    use std::fs;
    use std::io;
    use std::path::{Path, PathBuf};
    use std::str::FromStr;

    use minidom::Element;

    pub fn root() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("..")
            .join("tests")
            .join("fixtures")
    }

    pub fn path(relative: impl AsRef<Path>) -> PathBuf {
        root().join(relative.as_ref())
    }

    pub fn read(relative: impl AsRef<Path>) -> io::Result<String> {
        fs::read_to_string(path(relative))
    }

    pub fn stanza(name: &str) -> String {
        read_or_panic(Path::new("stanzas").join(name))
    }

    /// A stanza fixture parsed into an element tree.
    pub fn stanza_element(name: &str) -> Element {
        let xml = stanza(name);
        Element::from_str(xml.trim())
            .unwrap_or_else(|error| panic!("fixture {name} is not a valid stanza: {error}"))
    }

    pub fn config(name: &str) -> String {
        read_or_panic(Path::new("config").join(name))
    }

    fn read_or_panic(relative: impl AsRef<Path>) -> String {
        let relative = relative.as_ref();
        read(relative).unwrap_or_else(|error| {
            panic!(
                "failed to read fixture {}: {error}",
                relative.to_string_lossy()
            )
        })
    }
}

pub mod transport {
    //! An [`XmppTransport`] backed by in-memory channels.
    //!
    //! The test drives the far end through [`MockPeer`]: it delivers inbound
    //! stanzas and inspects everything the session sent.

    use std::str::FromStr;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use minidom::Element;
    use nobot_xmpp::transport::{ConnectionConfig, XmppTransport};
    use nobot_xmpp::ConnectionError;
    use tokio::sync::mpsc;

    const SENT_TIMEOUT: Duration = Duration::from_secs(5);

    pub struct MockTransport {
        inbound: mpsc::UnboundedReceiver<Element>,
        outbound: mpsc::UnboundedSender<Element>,
        connect_error: Option<ConnectionError>,
        stall_connect: bool,
        connected: Arc<AtomicBool>,
        closed: Arc<AtomicBool>,
    }

    pub struct MockPeer {
        inbound: Option<mpsc::UnboundedSender<Element>>,
        outbound: mpsc::UnboundedReceiver<Element>,
        connected: Arc<AtomicBool>,
        closed: Arc<AtomicBool>,
    }

    pub fn mock_transport() -> (MockTransport, MockPeer) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));
        let closed = Arc::new(AtomicBool::new(false));

        let transport = MockTransport {
            inbound: inbound_rx,
            outbound: outbound_tx,
            connect_error: None,
            stall_connect: false,
            connected: Arc::clone(&connected),
            closed: Arc::clone(&closed),
        };
        let peer = MockPeer {
            inbound: Some(inbound_tx),
            outbound: outbound_rx,
            connected,
            closed,
        };
        (transport, peer)
    }

    impl MockTransport {
        /// Make the next `connect` fail with `error`.
        pub fn fail_connect(mut self, error: ConnectionError) -> Self {
            self.connect_error = Some(error);
            self
        }

        /// Make `connect` hang until the caller gives up.
        pub fn stall_connect(mut self) -> Self {
            self.stall_connect = true;
            self
        }
    }

    impl XmppTransport for MockTransport {
        async fn connect(&mut self, _config: &ConnectionConfig) -> Result<(), ConnectionError> {
            if self.stall_connect {
                std::future::pending::<()>().await;
            }
            if let Some(error) = self.connect_error.take() {
                return Err(error);
            }
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn send(&mut self, stanza: &Element) -> Result<(), ConnectionError> {
            self.outbound
                .send(stanza.clone())
                .map_err(|_| ConnectionError::TransportError("peer dropped".to_string()))
        }

        async fn recv(&mut self) -> Result<Option<Element>, ConnectionError> {
            Ok(self.inbound.recv().await)
        }

        async fn close(&mut self) -> Result<(), ConnectionError> {
            self.connected.store(false, Ordering::SeqCst);
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    impl MockPeer {
        pub fn deliver(&self, stanza: Element) {
            if let Some(inbound) = &self.inbound {
                let _ = inbound.send(stanza);
            }
        }

        pub fn deliver_xml(&self, xml: &str) {
            let stanza = Element::from_str(xml.trim())
                .unwrap_or_else(|error| panic!("invalid stanza xml: {error}"));
            self.deliver(stanza);
        }

        /// Close the stream from the server side.
        pub fn hang_up(&mut self) {
            self.inbound = None;
        }

        /// Next stanza the session sent; panics if none arrives in time.
        pub async fn next_sent(&mut self) -> Element {
            match tokio::time::timeout(SENT_TIMEOUT, self.outbound.recv()).await {
                Ok(Some(stanza)) => stanza,
                Ok(None) => panic!("transport dropped before sending another stanza"),
                Err(_) => panic!("no stanza sent within {SENT_TIMEOUT:?}"),
            }
        }

        /// Next sent stanza with the given element name, skipping others.
        pub async fn next_sent_named(&mut self, name: &str) -> Element {
            loop {
                let stanza = self.next_sent().await;
                if stanza.name() == name {
                    return stanza;
                }
            }
        }

        pub fn try_next_sent(&mut self) -> Option<Element> {
            self.outbound.try_recv().ok()
        }

        /// Everything sent so far without waiting.
        pub fn drain_sent(&mut self) -> Vec<Element> {
            let mut sent = Vec::new();
            while let Ok(stanza) = self.outbound.try_recv() {
                sent.push(stanza);
            }
            sent
        }

        pub fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        pub fn was_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures;
    use super::transport::mock_transport;
    use nobot_xmpp::transport::{ConnectionConfig, XmppTransport};
    use nobot_xmpp::ConnectionError;

    fn config() -> ConnectionConfig {
        ConnectionConfig {
            jid: "bot@example.com".to_string(),
            password: "secret".to_string(),
            server: None,
            port: None,
            timeout_seconds: 30,
        }
    }

    #[test]
    fn fixture_root_exists() {
        assert!(fixtures::root().is_dir());
    }

    #[test]
    fn loads_stanza_fixture() {
        let stanza = fixtures::stanza_element("message-groupchat.xml");
        assert_eq!(stanza.name(), "message");
        assert_eq!(stanza.attr("type"), Some("groupchat"));
    }

    #[test]
    fn loads_config_fixture() {
        let config = fixtures::config("minimal-config.toml");
        let toml: toml::Value =
            toml::from_str(&config).expect("minimal-config.toml should be valid toml");
        assert!(toml.get("account").is_some());
    }

    #[tokio::test]
    async fn peer_sees_sent_stanzas_and_delivers_inbound() {
        let (mut transport, mut peer) = mock_transport();
        transport.connect(&config()).await.unwrap();
        assert!(peer.is_connected());

        let stanza = fixtures::stanza_element("vcard-bot.xml");
        transport.send(&stanza).await.unwrap();
        assert_eq!(peer.next_sent().await, stanza);

        peer.deliver_xml("<presence xmlns='jabber:client'/>");
        let inbound = transport.recv().await.unwrap().unwrap();
        assert_eq!(inbound.name(), "presence");

        peer.hang_up();
        assert!(transport.recv().await.unwrap().is_none());

        transport.close().await.unwrap();
        assert!(peer.was_closed());
        assert!(!peer.is_connected());
    }

    #[tokio::test]
    async fn connect_failure_is_reported_once() {
        let (transport, peer) = mock_transport();
        let mut transport =
            transport.fail_connect(ConnectionError::AuthenticationFailed("bad".to_string()));

        assert!(matches!(
            transport.connect(&config()).await,
            Err(ConnectionError::AuthenticationFailed(_))
        ));
        assert!(!peer.is_connected());
        assert!(transport.connect(&config()).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_connect_never_resolves() {
        let (transport, peer) = mock_transport();
        let mut transport = transport.stall_connect();

        let attempt =
            tokio::time::timeout(std::time::Duration::from_secs(60), transport.connect(&config()))
                .await;
        assert!(attempt.is_err());
        assert!(!peer.is_connected());
    }
}
