//! Room discovery and joins on the conference service.

use jid::Jid;
use minidom::Element;
use tracing::{debug, warn};
use xmpp_parsers::iq::{Iq, IqType};
use xmpp_parsers::muc::Muc;
use xmpp_parsers::presence::{Presence, Type as PresenceType};

use crate::error::StanzaError;
use crate::session::SessionHandle;
use crate::stanza::{NS_DISCO_ITEMS, NS_ROOM_INFO, StanzaExt, parse_jid};

/// One entry of a room listing. Never cached; every listing yields fresh
/// records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    pub jid: Jid,
    pub name: String,
    pub id: u64,
    pub topic: String,
    pub privacy: String,
    pub owner: String,
    pub num_participants: u32,
    pub guest_url: String,
    pub is_archived: bool,
}

/// disco#items get addressed to the conference service. The id is left for
/// the correlator to assign.
pub fn rooms_query(conference_domain: &str) -> Result<Element, StanzaError> {
    let iq = Iq {
        from: None,
        to: Some(parse_jid(conference_domain)?),
        id: String::new(),
        payload: IqType::Get(Element::builder("query", NS_DISCO_ITEMS).build()),
    };
    Ok(iq.into())
}

/// Parse a disco#items result into rooms, in document order.
///
/// Items without a usable `jid` are skipped. Missing room-info children
/// leave the corresponding field empty or zero.
pub fn parse_room_items(response: &Element) -> Vec<Room> {
    let Some(query) = response.first_child("query", Some(NS_DISCO_ITEMS)) else {
        debug!("room listing response carries no disco#items query");
        return Vec::new();
    };

    query
        .children_named("item")
        .filter_map(|item| {
            let address = item.attr("jid")?;
            match parse_jid(address) {
                Ok(jid) => Some(parse_room(jid, item)),
                Err(error) => {
                    warn!(%error, "skipping room with invalid address");
                    None
                }
            }
        })
        .collect()
}

fn parse_room(jid: Jid, item: &Element) -> Room {
    let info = item.first_child("x", Some(NS_ROOM_INFO));
    let text = |name: &str| {
        info.and_then(|x| x.child_text(name))
            .map(|value| value.trim().to_string())
            .unwrap_or_default()
    };

    Room {
        name: item.attr("name").unwrap_or_default().to_string(),
        id: text("id").parse().unwrap_or_default(),
        topic: text("topic"),
        privacy: text("privacy"),
        owner: text("owner"),
        num_participants: text("num_participants").parse().unwrap_or_default(),
        guest_url: text("guest_url"),
        is_archived: info.is_some_and(|x| x.has_child_named("is_archived")),
        jid,
    }
}

/// Presence that enters `room` under `nick`.
pub fn join_presence(room: &Jid, nick: &str) -> Result<Element, StanzaError> {
    let occupant = parse_jid(&format!("{}/{nick}", room.to_bare()))?;

    let presence = Presence {
        from: None,
        to: Some(occupant),
        id: None,
        type_: PresenceType::None,
        show: None,
        statuses: Default::default(),
        priority: 0i8,
        payloads: vec![Muc::new().into()],
    };
    Ok(presence.into())
}

/// Ask the conference service for its rooms.
///
/// Any failure degrades to an empty listing.
pub async fn list_rooms(handle: &SessionHandle, conference_domain: &str) -> Vec<Room> {
    let query = match rooms_query(conference_domain) {
        Ok(query) => query,
        Err(error) => {
            warn!(%error, "conference domain is not addressable; joining no rooms");
            return Vec::new();
        }
    };

    match handle.query(query).await {
        Ok(response) => {
            let rooms = parse_room_items(&response);
            debug!(count = rooms.len(), conference_domain, "room listing received");
            rooms
        }
        Err(error) => {
            warn!(%error, conference_domain, "room listing failed; joining no rooms");
            Vec::new()
        }
    }
}
