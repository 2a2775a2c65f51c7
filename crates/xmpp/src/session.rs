//! Session lifecycle: connect, announce, identify, join, then serve.
//!
//! A [`Session`] runs as a single task that owns the transport, the query
//! correlator, the loaded plugins and the keepalive. Everything else talks
//! to it through cloneable [`SessionHandle`]s.

use std::sync::Arc;
use std::time::Duration;

use jid::Jid;
use minidom::Element;
use nobot_core::config::Config;
use nobot_core::event::{Channel, Event, EventBus, EventPayload, EventSource};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use xmpp_parsers::message::{Body, Message, MessageType};

use crate::error::{ConnectionError, IqError, ProfileError, SessionError};
use crate::iq::{IqCorrelator, Responder};
use crate::keepalive::{Keepalive, available_presence};
use crate::plugin::{PluginCatalog, PluginRegistry};
use crate::profile::{Profile, vcard_query};
use crate::rooms::{join_presence, list_rooms};
use crate::router::{Route, route};
use crate::stanza::parse_jid;
use crate::transport::{ConnectionConfig, XmppTransport};

const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Authenticated,
    /// Profile resolved; rooms are being (or have been) joined.
    Online,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub connection: ConnectionConfig,
    pub keepalive: Duration,
    /// `None` leaves unanswered queries pending until disconnect.
    pub iq_timeout: Option<Duration>,
    pub conference_domain: String,
    /// Plugin identifiers in dispatch order.
    pub plugins: Vec<String>,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Result<Self, SessionError> {
        let iq_timeout = config.session.iq_timeout_seconds;
        Ok(Self {
            connection: ConnectionConfig::from(config),
            keepalive: Duration::from_secs(config.session.keepalive_seconds),
            iq_timeout: (iq_timeout > 0).then(|| Duration::from_secs(iq_timeout)),
            conference_domain: config.conference_domain()?,
            plugins: config.plugins.enabled.clone(),
        })
    }
}

#[derive(Debug)]
pub(crate) enum SessionCommand {
    Send(Element),
    Query {
        stanza: Element,
        responder: Responder,
    },
    JoinRoom(Jid),
    ProfileResolved(String),
    ProfileFailed(String),
    Disconnect,
}

/// Cloneable entry point into a running session.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
    state: watch::Receiver<SessionState>,
    jid: Jid,
    conference_domain: String,
}

impl SessionHandle {
    pub fn jid(&self) -> &Jid {
        &self.jid
    }

    pub fn conference_domain(&self) -> &str {
        &self.conference_domain
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Queue a stanza for transmission as-is.
    pub fn send(&self, stanza: Element) -> Result<(), SessionError> {
        self.command(SessionCommand::Send(stanza))
    }

    /// Send an `<iq/>` and wait for the matching `result`.
    ///
    /// The `id` attribute is assigned by the session.
    pub async fn query(&self, stanza: Element) -> Result<Element, IqError> {
        let (responder, response) = oneshot::channel();
        self.command(SessionCommand::Query { stanza, responder })
            .map_err(|_| IqError::SessionClosed)?;
        response.await.map_err(|_| IqError::SessionClosed)?
    }

    /// Reply to a room or a person with plain text.
    pub fn send_message(&self, target: &Jid, text: &str) -> Result<(), SessionError> {
        self.send(outbound_message(
            &self.jid,
            &self.conference_domain,
            target,
            text,
        ))
    }

    pub fn join_room(&self, room: Jid) -> Result<(), SessionError> {
        self.command(SessionCommand::JoinRoom(room))
    }

    /// Ask the session to tear down. `run` returns once it has.
    pub fn disconnect(&self) -> Result<(), SessionError> {
        self.command(SessionCommand::Disconnect)
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    fn command(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .map_err(|_| SessionError::Closed)
    }

    #[cfg(test)]
    pub(crate) fn detached(jid: &str) -> (Self, mpsc::UnboundedReceiver<SessionCommand>) {
        let (commands, receiver) = mpsc::unbounded_channel();
        let (_, state) = watch::channel(SessionState::Disconnected);
        let handle = Self {
            commands,
            state,
            jid: parse_jid(jid).unwrap(),
            conference_domain: "conf.example.com".to_string(),
        };
        (handle, receiver)
    }
}

/// Text message to `target`.
///
/// Targets on the conference domain get a `groupchat` message addressed to
/// the bare room; anyone else gets a `chat` message from `own_jid`.
pub fn outbound_message(
    own_jid: &Jid,
    conference_domain: &str,
    target: &Jid,
    text: &str,
) -> Element {
    let mut message = if target.domain().as_str() == conference_domain {
        let mut message = Message::new(Some(Jid::from(target.to_bare())));
        message.type_ = MessageType::Groupchat;
        message
    } else {
        let mut message = Message::new(Some(target.clone()));
        message.type_ = MessageType::Chat;
        message.from = Some(own_jid.clone());
        message
    };
    message
        .bodies
        .insert(String::new(), Body(text.to_string()));
    message.into()
}

enum Flow {
    Continue,
    Stop,
}

pub struct Session<T: XmppTransport> {
    transport: T,
    settings: SessionSettings,
    event_bus: Arc<dyn EventBus>,
    handle: SessionHandle,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    state: watch::Sender<SessionState>,
    correlator: IqCorrelator,
    plugins: PluginRegistry,
    display_name: Option<String>,
    keepalive: Option<Keepalive>,
    startup: Option<JoinHandle<()>>,
}

impl<T: XmppTransport> Session<T> {
    pub fn new(
        transport: T,
        settings: SessionSettings,
        event_bus: Arc<dyn EventBus>,
    ) -> Result<Self, SessionError> {
        let jid = parse_jid(&settings.connection.jid)?;
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (state, state_rx) = watch::channel(SessionState::Disconnected);

        let handle = SessionHandle {
            commands: commands_tx,
            state: state_rx,
            jid,
            conference_domain: settings.conference_domain.clone(),
        };

        Ok(Self {
            transport,
            correlator: IqCorrelator::new(settings.iq_timeout),
            settings,
            event_bus,
            handle,
            commands,
            state,
            plugins: PluginRegistry::default(),
            display_name: None,
            keepalive: None,
            startup: None,
        })
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Build the configured plugins. Call before [`Session::run`].
    pub fn load_plugins(&mut self, catalog: &PluginCatalog) -> Result<(), SessionError> {
        self.plugins = PluginRegistry::load(
            &self.settings.plugins,
            catalog,
            &self.handle,
            self.event_bus.as_ref(),
        )?;
        Ok(())
    }

    pub fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    /// Connect and serve until disconnected.
    ///
    /// Returns `Ok` when the peer closes the stream or a handle asks to
    /// disconnect. Nothing is retried.
    pub async fn run(mut self) -> Result<(), SessionError> {
        self.set_state(SessionState::Connecting);
        info!(jid = %self.handle.jid, "connecting");

        let connection = &self.settings.connection;
        let connect = self.transport.connect(connection);
        let connected = match tokio::time::timeout(connection.connect_timeout(), connect).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::Timeout(connection.timeout_seconds)),
        };

        if let Err(error) = connected {
            warn!(%error, "connection failed");
            self.emit_event(
                "system.error.occurred",
                EventPayload::ErrorOccurred {
                    component: "connection".to_string(),
                    message: error.to_string(),
                    recoverable: false,
                },
            );
            self.set_state(SessionState::Disconnected);
            return Err(error.into());
        }

        let outcome = match self.on_authenticated().await {
            Ok(()) => self.serve().await,
            Err(error) => Err(error),
        };

        let reason = match &outcome {
            Ok(reason) => reason.clone(),
            Err(error) => error.to_string(),
        };
        self.teardown(&reason).await;

        outcome.map(|_| ()).map_err(SessionError::from)
    }

    async fn on_authenticated(&mut self) -> Result<(), ConnectionError> {
        self.set_state(SessionState::Authenticated);
        info!(jid = %self.handle.jid, "session authenticated");
        self.emit_event(
            "system.connection.established",
            EventPayload::ConnectionEstablished {
                jid: self.handle.jid.to_string(),
            },
        );

        self.transport.send(&available_presence()).await?;
        if !self.settings.keepalive.is_zero() {
            self.keepalive = Some(Keepalive::start(self.handle(), self.settings.keepalive));
        }

        self.startup = Some(tokio::spawn(startup(
            self.handle(),
            Arc::clone(&self.event_bus),
        )));
        Ok(())
    }

    /// Returns the disconnect reason on a clean stop.
    async fn serve(&mut self) -> Result<String, ConnectionError> {
        let sweep_enabled = self.settings.iq_timeout.is_some();
        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                inbound = self.transport.recv() => match inbound? {
                    Some(stanza) => self.handle_inbound(stanza),
                    None => return Ok("stream closed by server".to_string()),
                },
                Some(command) = self.commands.recv() => {
                    if let Flow::Stop = self.handle_command(command).await? {
                        return Ok("disconnect requested".to_string());
                    }
                }
                _ = sweep.tick(), if sweep_enabled => {
                    let expired = self.correlator.expire(Instant::now());
                    if expired > 0 {
                        debug!(expired, "expired stale queries");
                    }
                }
            }
        }
    }

    fn handle_inbound(&mut self, stanza: Element) {
        match route(&stanza, self.display_name.as_deref()) {
            Route::Dispatch { sender, body } => {
                let responded = self.plugins.dispatch(&sender, &body);
                debug!(%sender, responded, "message dispatched");
            }
            Route::IqResult => {
                self.correlator.on_response(stanza);
            }
            Route::Ignore(_) => {}
        }
    }

    async fn handle_command(&mut self, command: SessionCommand) -> Result<Flow, ConnectionError> {
        match command {
            SessionCommand::Send(stanza) => {
                self.transport.send(&stanza).await?;
            }
            SessionCommand::Query { stanza, responder } => {
                let (id, stanza) = self.correlator.register(stanza, responder);
                debug!(id, "sending query");
                self.transport.send(&stanza).await?;
            }
            SessionCommand::JoinRoom(room) => self.join(room).await?,
            SessionCommand::ProfileResolved(name) => {
                info!(display_name = %name, "profile resolved");
                self.display_name = Some(name.clone());
                self.set_state(SessionState::Online);
                self.emit_event(
                    "system.session.connected",
                    EventPayload::SessionConnected {
                        jid: self.handle.jid.to_string(),
                        display_name: name,
                    },
                );
            }
            SessionCommand::ProfileFailed(reason) => {
                warn!(%reason, "unable to get profile info");
                self.emit_event(
                    "system.error.occurred",
                    EventPayload::ErrorOccurred {
                        component: "profile".to_string(),
                        message: format!("Unable to get profile info: {reason}"),
                        recoverable: false,
                    },
                );
            }
            SessionCommand::Disconnect => return Ok(Flow::Stop),
        }
        Ok(Flow::Continue)
    }

    async fn join(&mut self, room: Jid) -> Result<(), ConnectionError> {
        let nick = self.nick();
        let presence = match join_presence(&room, &nick) {
            Ok(presence) => presence,
            Err(error) => {
                warn!(%error, %room, "cannot join room");
                return Ok(());
            }
        };

        self.transport.send(&presence).await?;
        info!(%room, %nick, "joining room");
        self.emit_event(
            "xmpp.muc.join.requested",
            EventPayload::MucJoinRequested {
                room: room.to_bare().to_string(),
                nick,
            },
        );
        Ok(())
    }

    /// Display name, or the account's local part before the profile resolves.
    fn nick(&self) -> String {
        match (&self.display_name, self.handle.jid.node()) {
            (Some(name), _) => name.clone(),
            (None, Some(node)) => node.to_string(),
            (None, None) => self.handle.jid.domain().to_string(),
        }
    }

    async fn teardown(&mut self, reason: &str) {
        if let Some(keepalive) = self.keepalive.take() {
            keepalive.cancel();
        }
        if let Some(startup) = self.startup.take() {
            startup.abort();
        }
        self.correlator.fail_all();

        if let Err(error) = self.transport.close().await {
            debug!(%error, "error while closing transport");
        }

        self.set_state(SessionState::Disconnected);
        info!(%reason, "session disconnected");
        self.emit_event(
            "system.connection.lost",
            EventPayload::ConnectionLost {
                reason: reason.to_string(),
                will_retry: false,
            },
        );
    }

    fn set_state(&self, state: SessionState) {
        self.state.send_replace(state);
    }

    fn emit_event(&self, channel_name: &str, payload: EventPayload) {
        emit_event(self.event_bus.as_ref(), channel_name, payload);
    }
}

fn emit_event(event_bus: &dyn EventBus, channel_name: &str, payload: EventPayload) {
    let Ok(channel) = Channel::new(channel_name) else {
        return;
    };

    let event = Event::new(channel, EventSource::Xmpp, payload);
    let _ = event_bus.publish(event);
}

/// Profile, then room listing, then one join per room.
async fn startup(handle: SessionHandle, event_bus: Arc<dyn EventBus>) {
    let resolved = fetch_profile(&handle)
        .await
        .and_then(|profile| profile.display_name().map(str::to_string));

    let sent = match resolved {
        Ok(name) => handle.command(SessionCommand::ProfileResolved(name)),
        Err(error) => {
            let _ = handle.command(SessionCommand::ProfileFailed(error.to_string()));
            return;
        }
    };
    if sent.is_err() {
        return;
    }

    let rooms = list_rooms(&handle, handle.conference_domain()).await;
    emit_event(
        event_bus.as_ref(),
        "xmpp.muc.rooms.listed",
        EventPayload::RoomsListed {
            rooms: rooms.iter().map(|room| room.jid.to_string()).collect(),
        },
    );

    for room in rooms {
        if handle.join_room(room.jid).is_err() {
            break;
        }
    }
}

pub async fn fetch_profile(handle: &SessionHandle) -> Result<Profile, ProfileError> {
    let response = handle.query(vcard_query()).await?;
    Profile::from_response(&response)
}
