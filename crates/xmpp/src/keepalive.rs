//! Periodic available-presence refresh.

use std::time::Duration;

use minidom::Element;
use tokio::task::JoinHandle;
use tracing::debug;
use xmpp_parsers::presence::{Presence, Show, Type as PresenceType};

use crate::session::SessionHandle;

/// `<presence><show>chat</show></presence>`: available and chatty.
pub fn available_presence() -> Element {
    Presence {
        from: None,
        to: None,
        id: None,
        type_: PresenceType::None,
        show: Some(Show::Chat),
        statuses: Default::default(),
        priority: 0i8,
        payloads: vec![],
    }
    .into()
}

/// Periodic presence refresh owned by a session.
///
/// The first refresh goes out one full period after start. The task stops on
/// [`Keepalive::cancel`], on drop, or once the session stops accepting
/// commands.
pub struct Keepalive {
    task: JoinHandle<()>,
}

impl Keepalive {
    pub fn start(handle: SessionHandle, period: Duration) -> Self {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                if handle.send(available_presence()).is_err() {
                    debug!("keepalive stopping: session closed");
                    break;
                }
            }
        });

        Self { task }
    }

    pub fn cancel(self) {
        self.task.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for Keepalive {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionCommand;
    use crate::stanza::StanzaExt;

    #[test]
    fn presence_announces_chat_availability() {
        let presence = available_presence();
        assert_eq!(presence.name(), "presence");
        assert!(presence.attr("type").is_none());
        assert_eq!(presence.child_text("show").as_deref(), Some("chat"));
        assert!(presence.attr("to").is_none());
    }

    fn is_presence(command: SessionCommand) -> bool {
        matches!(command, SessionCommand::Send(stanza) if stanza == available_presence())
    }

    #[tokio::test(start_paused = true)]
    async fn refreshes_once_per_period() {
        let (handle, mut commands) = SessionHandle::detached("bot@example.com");
        let keepalive = Keepalive::start(handle, Duration::from_secs(30));

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(commands.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(is_presence(commands.try_recv().unwrap()));
        assert!(commands.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(is_presence(commands.try_recv().unwrap()));
        assert!(keepalive.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_refreshes() {
        let (handle, mut commands) = SessionHandle::detached("bot@example.com");
        let keepalive = Keepalive::start(handle, Duration::from_secs(30));

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(is_presence(commands.try_recv().unwrap()));

        keepalive.cancel();
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert!(commands.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn stops_when_session_is_gone() {
        let (handle, commands) = SessionHandle::detached("bot@example.com");
        let keepalive = Keepalive::start(handle, Duration::from_secs(30));
        drop(commands);

        tokio::time::sleep(Duration::from_secs(31)).await;
        tokio::task::yield_now().await;
        assert!(!keepalive.is_running());
    }
}
