// Copyright (c) 2025 quill contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The `<message/>` stanza (RFC 6121 §5).

use std::collections::BTreeMap;

use jid::Jid;
use minidom::Element;

use crate::error::FromElementError;
use crate::ns;
use crate::stanza_error::StanzaError;

generate_attribute!(
    /// The conversation context of a message.
    MessageType, "type", {
        /// Standalone chat message.
        Chat => "chat",

        /// Error response to a previously sent message.
        Error => "error",

        /// Message in a multi-user chat room.
        Groupchat => "groupchat",

        /// Automated broadcast that expects no reply.
        Headline => "headline",

        /// Default message type.
        Normal => "normal",
    }, Default = Normal
);

/// A message stanza.
#[derive(Debug, Clone)]
pub struct Message {
    /// The sender.
    pub from: Option<Jid>,

    /// The recipient.
    pub to: Option<Jid>,

    /// Optional correlation token; messages need one only when another
    /// specification requires referencing them.
    pub id: Option<String>,

    /// The conversation context.
    pub type_: MessageType,

    /// Message bodies, keyed by `xml:lang`.
    pub bodies: BTreeMap<String, String>,

    /// Message subjects, keyed by `xml:lang`.
    pub subjects: BTreeMap<String, String>,

    /// Conversation thread token.
    pub thread: Option<String>,

    /// Error payload, for type `error`.
    pub error: Option<StanzaError>,

    /// Extension payloads, carried unmodified.
    pub payloads: Vec<Element>,
}

impl Message {
    /// Create a new chat message addressed to `to`.
    pub fn chat(to: Jid) -> Message {
        Message {
            from: None,
            to: Some(to),
            id: None,
            type_: MessageType::Chat,
            bodies: BTreeMap::new(),
            subjects: BTreeMap::new(),
            thread: None,
            error: None,
            payloads: Vec::new(),
        }
    }

    /// Set the default-language body.
    pub fn with_body<S: Into<String>>(mut self, body: S) -> Message {
        self.bodies.insert(String::new(), body.into());
        self
    }
}

fn parse_localized(
    child: &Element,
    map: &mut BTreeMap<String, String>,
) -> Result<(), crate::Error> {
    let lang = child.attr("xml:lang").unwrap_or("").to_owned();
    if map.insert(lang, child.text()).is_some() {
        return Err(crate::Error::Other(
            "Element present twice for the same xml:lang.",
        ));
    }
    Ok(())
}

impl TryFrom<Element> for Message {
    type Error = FromElementError;

    fn try_from(elem: Element) -> Result<Message, FromElementError> {
        check_self!(elem, "message", DEFAULT_NS);

        let from = get_attr!(elem, "from", Option);
        let to = get_attr!(elem, "to", Option);
        let id = get_attr!(elem, "id", Option);
        let type_ = get_attr!(elem, "type", Default);

        let mut bodies = BTreeMap::new();
        let mut subjects = BTreeMap::new();
        let mut thread = None;
        let mut error = None;
        let mut payloads = Vec::new();
        for child in elem.children() {
            if child.is("body", ns::DEFAULT_NS) {
                parse_localized(child, &mut bodies)?;
            } else if child.is("subject", ns::DEFAULT_NS) {
                parse_localized(child, &mut subjects)?;
            } else if child.is("thread", ns::DEFAULT_NS) {
                if thread.is_some() {
                    return Err(crate::Error::Other("Thread element present twice.").into());
                }
                thread = Some(child.text());
            } else if child.is("error", ns::DEFAULT_NS) {
                if error.is_some() {
                    return Err(crate::Error::Other("Error element present twice.").into());
                }
                error = Some(
                    StanzaError::try_from(child.clone())
                        .map_err(FromElementError::into_invalid)?,
                );
            } else {
                payloads.push(child.clone());
            }
        }

        Ok(Message {
            from,
            to,
            id,
            type_,
            bodies,
            subjects,
            thread,
            error,
            payloads,
        })
    }
}

impl From<Message> for Element {
    fn from(message: Message) -> Element {
        Element::builder("message", ns::DEFAULT_NS)
            .attr("from", message.from.map(|jid| jid.to_string()))
            .attr("to", message.to.map(|jid| jid.to_string()))
            .attr("id", message.id)
            .attr(
                "type",
                match message.type_ {
                    MessageType::Normal => None,
                    other => Some(other),
                },
            )
            .append_all(
                message
                    .subjects
                    .into_iter()
                    .map(|(lang, subject)| localized("subject", lang, subject)),
            )
            .append_all(
                message
                    .bodies
                    .into_iter()
                    .map(|(lang, body)| localized("body", lang, body)),
            )
            .append_all(
                message
                    .thread
                    .map(|thread| Element::builder("thread", ns::DEFAULT_NS).append(thread)),
            )
            .append_all(message.error.map(Element::from))
            .append_all(message.payloads)
            .build()
    }
}

fn localized(name: &'static str, lang: String, text: String) -> Element {
    let builder = Element::builder(name, ns::DEFAULT_NS).append(text);
    if lang.is_empty() {
        builder.build()
    } else {
        builder.attr("xml:lang", lang).build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn chat_roundtrip() {
        let message = Message::chat(Jid::from_str("bob@example.org").unwrap())
            .with_body("coucou");
        let elem = Element::from(message);
        assert_eq!(elem.attr("type"), Some("chat"));

        let message = Message::try_from(elem).unwrap();
        assert_eq!(message.type_, MessageType::Chat);
        assert_eq!(message.bodies[""], "coucou");
        assert_eq!(message.id, None);
    }

    #[test]
    fn roundtrip_with_id() {
        let elem: Element =
            "<message xmlns='jabber:client' id='m1'><body>hi</body></message>"
                .parse()
                .unwrap();
        let message = Message::try_from(elem).unwrap();
        assert_eq!(message.id.as_deref(), Some("m1"));
        assert_eq!(message.type_, MessageType::Normal);

        let elem = Element::from(message);
        // type='normal' is the default and stays implicit on the wire.
        assert_eq!(elem.attr("type"), None);
        assert_eq!(elem.attr("id"), Some("m1"));
    }

    #[test]
    fn unknown_payloads_are_preserved() {
        let elem: Element = "<message xmlns='jabber:client'><x xmlns='urn:example:custom'/></message>"
            .parse()
            .unwrap();
        let message = Message::try_from(elem).unwrap();
        assert_eq!(message.payloads.len(), 1);
        assert!(message.payloads[0].is("x", "urn:example:custom"));
    }
}
