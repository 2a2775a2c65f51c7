//! Classification of inbound stanzas.

use jid::Jid;
use minidom::Element;
use tracing::{debug, trace};
use xmpp_parsers::iq::{Iq, IqType};
use xmpp_parsers::message::{Message, MessageType};

use crate::stanza::{NS_CLIENT, NS_DELAY, NS_LEGACY_DELAY};

/// Where an inbound stanza goes next.
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    /// Conversational text for the plugin registry.
    Dispatch { sender: Jid, body: String },
    /// Response to one of our queries.
    IqResult,
    Ignore(IgnoreReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    UnsupportedMessageType,
    EmptyBody,
    Delayed,
    InvalidSender,
    SelfEcho,
    IqNotResult,
    Presence,
    Malformed,
    UnknownStanza,
}

/// Classify one inbound stanza.
///
/// `display_name` is the resolved profile name; self-echo filtering only
/// applies once it is known.
pub fn route(stanza: &Element, display_name: Option<&str>) -> Route {
    let route = if stanza.is("message", NS_CLIENT) {
        match Message::try_from(stanza.clone()) {
            Ok(message) => route_message(message, display_name),
            Err(error) => {
                debug!(%error, "unparseable message stanza");
                Route::Ignore(IgnoreReason::Malformed)
            }
        }
    } else if stanza.is("iq", NS_CLIENT) {
        match Iq::try_from(stanza.clone()) {
            Ok(Iq {
                payload: IqType::Result(_),
                ..
            }) => Route::IqResult,
            Ok(_) => Route::Ignore(IgnoreReason::IqNotResult),
            Err(error) => {
                debug!(%error, "unparseable iq stanza");
                Route::Ignore(IgnoreReason::Malformed)
            }
        }
    } else if stanza.is("presence", NS_CLIENT) {
        Route::Ignore(IgnoreReason::Presence)
    } else {
        Route::Ignore(IgnoreReason::UnknownStanza)
    };

    if let Route::Ignore(reason) = &route {
        trace!(
            kind = stanza.name(),
            from = ?stanza.attr("from"),
            ?reason,
            "ignoring inbound stanza"
        );
    }
    route
}

fn route_message(message: Message, display_name: Option<&str>) -> Route {
    if !matches!(message.type_, MessageType::Chat | MessageType::Groupchat) {
        return Route::Ignore(IgnoreReason::UnsupportedMessageType);
    }

    let body = match message.get_best_body(vec![""]) {
        Some((_, body)) if !body.0.is_empty() => body.0.clone(),
        _ => return Route::Ignore(IgnoreReason::EmptyBody),
    };

    // History replay on room join.
    if message.payloads.iter().any(is_delay_marker) {
        return Route::Ignore(IgnoreReason::Delayed);
    }

    let Some(sender) = message.from else {
        return Route::Ignore(IgnoreReason::InvalidSender);
    };

    if let Some(name) = display_name {
        if sender.resource().map(|resource| resource.as_str()) == Some(name) {
            return Route::Ignore(IgnoreReason::SelfEcho);
        }
    }

    Route::Dispatch { sender, body }
}

fn is_delay_marker(payload: &Element) -> bool {
    payload.is("delay", NS_DELAY) || payload.is("x", NS_LEGACY_DELAY)
}
