pub mod error;
pub mod iq;
pub mod keepalive;
pub mod plugin;
pub mod profile;
pub mod rooms;
pub mod router;
pub mod session;
pub mod stanza;
pub mod transport;

pub use error::{ConnectionError, IqError, PluginError, ProfileError, SessionError, StanzaError};
pub use iq::IqCorrelator;
pub use keepalive::Keepalive;
pub use plugin::{Plugin, PluginCatalog, PluginConstructor, PluginRegistry};
pub use profile::Profile;
pub use rooms::{Room, list_rooms};
pub use router::{IgnoreReason, Route, route};
pub use session::{Session, SessionHandle, SessionSettings, SessionState, outbound_message};
pub use stanza::StanzaExt;
pub use transport::{ConnectionConfig, XmppTransport};

pub use jid::Jid;
pub use minidom::Element;
