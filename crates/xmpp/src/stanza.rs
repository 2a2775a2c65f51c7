//! Stanza tree helpers.
//!
//! Stanzas travel as [`minidom::Element`] trees. Classification and
//! construction go through the typed `xmpp_parsers` stanzas; these helpers
//! cover payloads it does not model, such as the room-info `<x/>` child.

use std::str::FromStr;

use jid::Jid;
use minidom::Element;
use xmpp_parsers::ns;

use crate::error::StanzaError;

pub const NS_CLIENT: &str = "jabber:client";
pub const NS_VCARD: &str = "vcard-temp";
pub const NS_DISCO_ITEMS: &str = ns::DISCO_ITEMS;
pub const NS_MUC: &str = ns::MUC;
pub const NS_DELAY: &str = ns::DELAY;
/// XEP-0091, still stamped on room history by older services.
pub const NS_LEGACY_DELAY: &str = "jabber:x:delay";
pub const NS_ROOM_INFO: &str = "http://hipchat.com/protocol/muc#room";

/// Read-only accessors used by the response parsers.
///
/// Child lookups without a namespace match any namespace.
pub trait StanzaExt {
    fn first_child(&self, name: &str, namespace: Option<&str>) -> Option<&Element>;

    fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a;

    fn has_child_named(&self, name: &str) -> bool {
        self.first_child(name, None).is_some()
    }

    /// Direct text content of the first child called `name`.
    fn child_text(&self, name: &str) -> Option<String> {
        self.first_child(name, None).map(Element::text)
    }
}

impl StanzaExt for Element {
    fn first_child(&self, name: &str, namespace: Option<&str>) -> Option<&Element> {
        self.children().find(|child| {
            child.name() == name && namespace.is_none_or(|namespace| child.ns() == namespace)
        })
    }

    fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children().filter(move |child| child.name() == name)
    }
}

pub fn parse_stanza(raw: &[u8]) -> Result<Element, StanzaError> {
    let xml = std::str::from_utf8(raw).map_err(|error| {
        StanzaError::ParseFailed(format!("invalid UTF-8 stanza bytes: {error}"))
    })?;
    let trimmed = xml.trim();
    if trimmed.is_empty() {
        return Err(StanzaError::ParseFailed(
            "stanza payload is empty".to_string(),
        ));
    }

    Element::from_str(trimmed)
        .map_err(|error| StanzaError::ParseFailed(format!("failed to parse stanza XML: {error}")))
}

pub fn to_xml(stanza: &Element) -> Result<String, StanzaError> {
    let mut payload = Vec::new();
    stanza.write_to(&mut payload).map_err(|error| {
        StanzaError::SerializeFailed(format!("failed to serialize <{}/>: {error}", stanza.name()))
    })?;
    String::from_utf8(payload).map_err(|error| StanzaError::SerializeFailed(error.to_string()))
}

pub fn parse_jid(address: &str) -> Result<Jid, StanzaError> {
    Jid::from_str(address).map_err(|error| StanzaError::InvalidAddress {
        address: address.to_string(),
        reason: error.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MESSAGE_XML: &str = "<message xmlns='jabber:client' type='groupchat' \
        from='lobby@conf.example.com/Alice' to='bot@example.com'>\
        <body>hello</body>\
        <delay xmlns='urn:xmpp:delay' stamp='2024-01-01T00:00:00Z'/>\
        </message>";

    #[test]
    fn accessors_read_attributes_and_children() {
        let stanza = parse_stanza(MESSAGE_XML.as_bytes()).unwrap();

        assert_eq!(stanza.child_text("body").as_deref(), Some("hello"));
        assert!(stanza.has_child_named("delay"));
        assert!(!stanza.has_child_named("subject"));
        assert!(stanza.first_child("delay", Some("urn:xmpp:delay")).is_some());
        assert!(stanza.first_child("delay", Some("jabber:x:delay")).is_none());
        assert!(stanza.child_text("subject").is_none());
    }

    #[test]
    fn parse_jid_keeps_resource() {
        let sender = parse_jid("lobby@conf.example.com/Alice").unwrap();
        assert_eq!(sender.resource().map(|r| r.to_string()).as_deref(), Some("Alice"));
        assert_eq!(sender.to_bare().to_string(), "lobby@conf.example.com");
    }

    #[test]
    fn children_named_returns_all_matches_in_order() {
        let stanza = parse_stanza(
            b"<query xmlns='http://jabber.org/protocol/disco#items'>\
              <item jid='a@conf'/><other/><item jid='b@conf'/></query>",
        )
        .unwrap();

        let jids: Vec<_> = stanza
            .children_named("item")
            .filter_map(|item| item.attr("jid"))
            .collect();
        assert_eq!(jids, vec!["a@conf", "b@conf"]);
    }

    #[test]
    fn parse_rejects_empty_and_invalid_payloads() {
        assert!(matches!(
            parse_stanza(b"   "),
            Err(StanzaError::ParseFailed(_))
        ));
        let error = parse_stanza(&[0xFF, 0xFE]).unwrap_err();
        assert!(error.to_string().contains("invalid UTF-8 stanza bytes"));
        assert!(parse_stanza(b"<message").is_err());
    }

    #[test]
    fn built_stanza_serializes() {
        let stanza = Element::builder("message", NS_CLIENT)
            .attr("to", "alice@example.com")
            .append(Element::builder("body", NS_CLIENT).append("hi there".to_string()))
            .build();

        let xml = to_xml(&stanza).unwrap();
        assert!(xml.starts_with("<message"));
        assert!(xml.contains("hi there"));
        assert_eq!(parse_stanza(xml.as_bytes()).unwrap(), stanza);
    }

    #[test]
    fn parse_jid_rejects_garbage() {
        assert!(parse_jid("lobby@conf.example.com").is_ok());
        assert!(matches!(
            parse_jid("@@"),
            Err(StanzaError::InvalidAddress { .. })
        ));
    }
}
