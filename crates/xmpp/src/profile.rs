//! Own-account vCard lookup.

use std::collections::BTreeMap;

use minidom::Element;
use xmpp_parsers::iq::{Iq, IqType};

use crate::error::ProfileError;
use crate::stanza::{NS_VCARD, StanzaExt};

/// vCard get for the account itself (no `to`).
pub fn vcard_query() -> Element {
    Iq {
        from: None,
        to: None,
        id: String::new(),
        payload: IqType::Get(Element::builder("vCard", NS_VCARD).build()),
    }
    .into()
}

/// Top-level vCard fields keyed by lower-cased element name, in document
/// order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Profile {
    fields: Vec<(String, String)>,
}

impl Profile {
    pub fn from_response(response: &Element) -> Result<Self, ProfileError> {
        let vcard = response
            .first_child("vCard", Some(NS_VCARD))
            .ok_or(ProfileError::MissingVcard)?;

        let fields = vcard
            .children()
            .map(|field| (field.name().to_lowercase(), field.text().trim().to_string()))
            .collect();
        Ok(Self { fields })
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, value)| key == name && !value.is_empty())
            .map(|(_, value)| value.as_str())
    }

    pub fn fields(&self) -> BTreeMap<&str, &str> {
        self.fields
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
            .collect()
    }

    /// `FN`, then `NICKNAME`, then the first field with text.
    pub fn display_name(&self) -> Result<&str, ProfileError> {
        self.field("fn")
            .or_else(|| self.field("nickname"))
            .or_else(|| {
                self.fields
                    .iter()
                    .map(|(_, value)| value.as_str())
                    .find(|value| !value.is_empty())
            })
            .ok_or(ProfileError::MissingName)
    }
}
