// Copyright (c) 2025 quill contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The `<presence/>` stanza (RFC 6121 §4).

use std::collections::BTreeMap;

use jid::Jid;
use minidom::Element;

use crate::error::{Error, FromElementError};
use crate::ns;

/// The type of a presence stanza.
///
/// `None` is the default on the wire: plain availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PresenceType {
    /// Signals availability.
    #[default]
    None,

    /// An error occurred processing a previously sent presence.
    Error,

    /// A request for an entity's current presence.
    Probe,

    /// A request to subscribe to the recipient's presence.
    Subscribe,

    /// The subscription request has been granted.
    Subscribed,

    /// Signals that the entity is no longer available.
    Unavailable,

    /// Unsubscription from the recipient's presence.
    Unsubscribe,

    /// The subscription has been removed.
    Unsubscribed,
}

impl PresenceType {
    fn attr(self) -> Option<&'static str> {
        match self {
            PresenceType::None => None,
            PresenceType::Error => Some("error"),
            PresenceType::Probe => Some("probe"),
            PresenceType::Subscribe => Some("subscribe"),
            PresenceType::Subscribed => Some("subscribed"),
            PresenceType::Unavailable => Some("unavailable"),
            PresenceType::Unsubscribe => Some("unsubscribe"),
            PresenceType::Unsubscribed => Some("unsubscribed"),
        }
    }

    fn parse(value: &str) -> Result<PresenceType, Error> {
        Ok(match value {
            "error" => PresenceType::Error,
            "probe" => PresenceType::Probe,
            "subscribe" => PresenceType::Subscribe,
            "subscribed" => PresenceType::Subscribed,
            "unavailable" => PresenceType::Unavailable,
            "unsubscribe" => PresenceType::Unsubscribe,
            "unsubscribed" => PresenceType::Unsubscribed,
            _ => return Err(Error::Other("Invalid 'type' attribute on presence element.")),
        })
    }
}

generate_attribute!(
    /// The availability detail shown while available.
    Show, "show", {
        /// Temporarily away.
        Away => "away",

        /// Interested in chatting.
        Chat => "chat",

        /// Busy (do not disturb).
        Dnd => "dnd",

        /// Away for an extended period.
        Xa => "xa",
    }
);

/// A presence stanza.
#[derive(Debug, Clone)]
pub struct Presence {
    /// The sender.
    pub from: Option<Jid>,

    /// The recipient; broadcast by the server when absent.
    pub to: Option<Jid>,

    /// Optional correlation token.
    pub id: Option<String>,

    /// The presence type.
    pub type_: PresenceType,

    /// Availability detail.
    pub show: Option<Show>,

    /// Free-form status lines, keyed by `xml:lang`.
    pub statuses: BTreeMap<String, String>,

    /// Routing priority in `-128..=127`.
    pub priority: i8,

    /// Extension payloads, carried unmodified.
    pub payloads: Vec<Element>,
}

impl Presence {
    /// Create a presence of the given type.
    pub fn new(type_: PresenceType) -> Presence {
        Presence {
            from: None,
            to: None,
            id: None,
            type_,
            show: None,
            statuses: BTreeMap::new(),
            priority: 0,
            payloads: Vec::new(),
        }
    }

    /// Create a plain available presence.
    pub fn available() -> Presence {
        Presence::new(PresenceType::None)
    }

    /// Create an unavailable presence, as sent when going offline.
    pub fn unavailable() -> Presence {
        Presence::new(PresenceType::Unavailable)
    }

    /// Set the availability detail.
    pub fn with_show(mut self, show: Show) -> Presence {
        self.show = Some(show);
        self
    }

    /// Set the default-language status line.
    pub fn with_status<S: Into<String>>(mut self, status: S) -> Presence {
        self.statuses.insert(String::new(), status.into());
        self
    }

    /// Set the routing priority.
    pub fn with_priority(mut self, priority: i8) -> Presence {
        self.priority = priority;
        self
    }
}

impl TryFrom<Element> for Presence {
    type Error = FromElementError;

    fn try_from(elem: Element) -> Result<Presence, FromElementError> {
        check_self!(elem, "presence", DEFAULT_NS);

        let from = get_attr!(elem, "from", Option);
        let to = get_attr!(elem, "to", Option);
        let id = get_attr!(elem, "id", Option);
        let type_ = match elem.attr("type") {
            Some(value) => PresenceType::parse(value)?,
            None => PresenceType::None,
        };

        let mut show = None;
        let mut statuses = BTreeMap::new();
        let mut priority = 0i8;
        let mut payloads = Vec::new();
        for child in elem.children() {
            if child.is("show", ns::DEFAULT_NS) {
                if show.is_some() {
                    return Err(Error::Other("Show element present twice.").into());
                }
                show = Some(
                    child
                        .text()
                        .parse()
                        .map_err(|_| Error::Other("Invalid show value."))?,
                );
            } else if child.is("status", ns::DEFAULT_NS) {
                let lang = child.attr("xml:lang").unwrap_or("").to_owned();
                if statuses.insert(lang, child.text()).is_some() {
                    return Err(Error::Other(
                        "Status element present twice for the same xml:lang.",
                    )
                    .into());
                }
            } else if child.is("priority", ns::DEFAULT_NS) {
                priority = child
                    .text()
                    .parse()
                    .map_err(Error::text_parse_error)?;
            } else {
                payloads.push(child.clone());
            }
        }

        Ok(Presence {
            from,
            to,
            id,
            type_,
            show,
            statuses,
            priority,
            payloads,
        })
    }
}

impl From<Presence> for Element {
    fn from(presence: Presence) -> Element {
        Element::builder("presence", ns::DEFAULT_NS)
            .attr("from", presence.from.map(|jid| jid.to_string()))
            .attr("to", presence.to.map(|jid| jid.to_string()))
            .attr("id", presence.id)
            .attr("type", presence.type_.attr())
            .append_all(
                presence
                    .show
                    .map(|show| Element::builder("show", ns::DEFAULT_NS).append(show.to_string())),
            )
            .append_all(presence.statuses.into_iter().map(|(lang, status)| {
                let builder = Element::builder("status", ns::DEFAULT_NS).append(status);
                if lang.is_empty() {
                    builder
                } else {
                    builder.attr("xml:lang", lang)
                }
            }))
            .append_all(if presence.priority == 0 {
                None
            } else {
                Some(
                    Element::builder("priority", ns::DEFAULT_NS)
                        .append(presence.priority.to_string()),
                )
            })
            .append_all(presence.payloads)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn available_roundtrip() {
        let presence = Presence::available()
            .with_show(Show::Away)
            .with_status("out to lunch")
            .with_priority(5);
        let elem = Element::from(presence);
        assert_eq!(elem.attr("type"), None);

        let presence = Presence::try_from(elem).unwrap();
        assert_eq!(presence.type_, PresenceType::None);
        assert_eq!(presence.show, Some(Show::Away));
        assert_eq!(presence.statuses[""], "out to lunch");
        assert_eq!(presence.priority, 5);
    }

    #[test]
    fn unavailable_roundtrip() {
        let elem = Element::from(Presence::unavailable());
        assert_eq!(elem.attr("type"), Some("unavailable"));
        let presence = Presence::try_from(elem).unwrap();
        assert_eq!(presence.type_, PresenceType::Unavailable);
    }

    #[test]
    fn negative_priority_roundtrip() {
        let presence = Presence::available().with_priority(-1);
        let elem = Element::from(presence);
        let presence = Presence::try_from(elem).unwrap();
        assert_eq!(presence.priority, -1);
    }

    #[test]
    fn invalid_type_is_rejected() {
        let elem: Element = "<presence xmlns='jabber:client' type='invalid'/>"
            .parse()
            .unwrap();
        assert!(Presence::try_from(elem).is_err());
    }
}
