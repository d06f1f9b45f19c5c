// Copyright (c) 2025 quill contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Classification of top-level stream children.

use minidom::Element;

use crate::error::FromElementError;
use crate::iq::Iq;
use crate::message::Message;
use crate::ns;
use crate::presence::Presence;
use crate::sasl;
use crate::sm;
use crate::starttls;
use crate::stream_error::StreamError;
use crate::stream_features::StreamFeatures;

/// A semantically typed XMPP content unit.
#[derive(Debug, Clone)]
pub enum Stanza {
    /// An iq stanza.
    Iq(Iq),

    /// A message stanza.
    Message(Message),

    /// A presence stanza.
    Presence(Presence),
}

impl Stanza {
    /// The stanza's correlation id, if it has one.
    pub fn id(&self) -> Option<&str> {
        match self {
            Stanza::Iq(iq) => Some(&iq.id),
            Stanza::Message(message) => message.id.as_deref(),
            Stanza::Presence(presence) => presence.id.as_deref(),
        }
    }

    /// Assign an id produced by `make` unless one is already set.
    ///
    /// Returns the id the stanza ends up with.
    pub fn ensure_id<F: FnOnce() -> String>(&mut self, make: F) -> &str {
        match self {
            Stanza::Iq(iq) => {
                if iq.id.is_empty() {
                    iq.id = make();
                }
                &iq.id
            }
            Stanza::Message(message) => message.id.get_or_insert_with(make),
            Stanza::Presence(presence) => presence.id.get_or_insert_with(make),
        }
    }
}

impl From<Iq> for Stanza {
    fn from(iq: Iq) -> Stanza {
        Stanza::Iq(iq)
    }
}

impl From<Message> for Stanza {
    fn from(message: Message) -> Stanza {
        Stanza::Message(message)
    }
}

impl From<Presence> for Stanza {
    fn from(presence: Presence) -> Stanza {
        Stanza::Presence(presence)
    }
}

impl TryFrom<Stanza> for Iq {
    type Error = Stanza;

    fn try_from(stanza: Stanza) -> Result<Iq, Stanza> {
        match stanza {
            Stanza::Iq(iq) => Ok(iq),
            other => Err(other),
        }
    }
}

impl TryFrom<Stanza> for Message {
    type Error = Stanza;

    fn try_from(stanza: Stanza) -> Result<Message, Stanza> {
        match stanza {
            Stanza::Message(message) => Ok(message),
            other => Err(other),
        }
    }
}

impl TryFrom<Stanza> for Presence {
    type Error = Stanza;

    fn try_from(stanza: Stanza) -> Result<Presence, Stanza> {
        match stanza {
            Stanza::Presence(presence) => Ok(presence),
            other => Err(other),
        }
    }
}

impl From<Stanza> for Element {
    fn from(stanza: Stanza) -> Element {
        match stanza {
            Stanza::Iq(iq) => iq.into(),
            Stanza::Message(message) => message.into(),
            Stanza::Presence(presence) => presence.into(),
        }
    }
}

/// Any top-level child of the stream envelope.
///
/// Classification never fails: elements the engine does not recognize
/// come through as [`StreamElement::Other`] for extension modules to
/// inspect.
#[derive(Debug, Clone)]
pub enum StreamElement {
    /// A content stanza.
    Stanza(Stanza),

    /// A SASL nonza.
    Sasl(sasl::Nonza),

    /// A StartTLS nonza.
    Starttls(starttls::Nonza),

    /// A stream management nonza.
    Sm(sm::Nonza),

    /// A features advertisement.
    Features(StreamFeatures),

    /// A stream error; fatal to the stream.
    StreamError(StreamError),

    /// A top-level element this engine has no schema for.
    Other(Element),
}

impl TryFrom<Element> for StreamElement {
    type Error = crate::Error;

    fn try_from(elem: Element) -> Result<StreamElement, crate::Error> {
        let elem = match Iq::try_from(elem) {
            Ok(iq) => return Ok(StreamElement::Stanza(Stanza::Iq(iq))),
            Err(FromElementError::Invalid(e)) => return Err(e),
            Err(FromElementError::Mismatch(elem)) => *elem,
        };
        let elem = match Message::try_from(elem) {
            Ok(message) => return Ok(StreamElement::Stanza(Stanza::Message(message))),
            Err(FromElementError::Invalid(e)) => return Err(e),
            Err(FromElementError::Mismatch(elem)) => *elem,
        };
        let elem = match Presence::try_from(elem) {
            Ok(presence) => return Ok(StreamElement::Stanza(Stanza::Presence(presence))),
            Err(FromElementError::Invalid(e)) => return Err(e),
            Err(FromElementError::Mismatch(elem)) => *elem,
        };

        if elem.has_ns(ns::SASL) {
            return match sasl::Nonza::try_from(elem) {
                Ok(nonza) => Ok(StreamElement::Sasl(nonza)),
                Err(e) => Err(e.into_invalid()),
            };
        }
        if elem.has_ns(ns::TLS) {
            return match starttls::Nonza::try_from(elem) {
                Ok(nonza) => Ok(StreamElement::Starttls(nonza)),
                Err(e) => Err(e.into_invalid()),
            };
        }
        if elem.has_ns(ns::SM) {
            return match sm::Nonza::try_from(elem) {
                Ok(nonza) => Ok(StreamElement::Sm(nonza)),
                Err(e) => Err(e.into_invalid()),
            };
        }
        let elem = match StreamFeatures::try_from(elem) {
            Ok(features) => return Ok(StreamElement::Features(features)),
            Err(FromElementError::Invalid(e)) => return Err(e),
            Err(FromElementError::Mismatch(elem)) => *elem,
        };
        let elem = match StreamError::try_from(elem) {
            Ok(error) => return Ok(StreamElement::StreamError(error)),
            Err(FromElementError::Invalid(e)) => return Err(e),
            Err(FromElementError::Mismatch(elem)) => *elem,
        };

        Ok(StreamElement::Other(elem))
    }
}

impl From<StreamElement> for Element {
    fn from(element: StreamElement) -> Element {
        match element {
            StreamElement::Stanza(stanza) => stanza.into(),
            StreamElement::Sasl(nonza) => nonza.into(),
            StreamElement::Starttls(nonza) => match nonza {
                starttls::Nonza::Proceed(proceed) => proceed.into(),
                starttls::Nonza::Failure(failure) => failure.into(),
            },
            StreamElement::Sm(nonza) => nonza.into(),
            StreamElement::Features(features) => features.into(),
            StreamElement::StreamError(error) => error.into(),
            StreamElement::Other(elem) => elem,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_stanzas() {
        let elem: Element = "<message xmlns='jabber:client'><body>hi</body></message>"
            .parse()
            .unwrap();
        assert!(matches!(
            StreamElement::try_from(elem).unwrap(),
            StreamElement::Stanza(Stanza::Message(_))
        ));

        let elem: Element = "<presence xmlns='jabber:client'/>".parse().unwrap();
        assert!(matches!(
            StreamElement::try_from(elem).unwrap(),
            StreamElement::Stanza(Stanza::Presence(_))
        ));
    }

    #[test]
    fn classify_nonzas() {
        let elem: Element = "<r xmlns='urn:xmpp:sm:3'/>".parse().unwrap();
        assert!(matches!(
            StreamElement::try_from(elem).unwrap(),
            StreamElement::Sm(sm::Nonza::Req(_))
        ));

        let elem: Element =
            "<success xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>=</success>".parse().unwrap();
        assert!(matches!(
            StreamElement::try_from(elem).unwrap(),
            StreamElement::Sasl(sasl::Nonza::Success(_))
        ));
    }

    #[test]
    fn unknown_elements_are_not_an_error() {
        let elem: Element = "<frobnicate xmlns='urn:example:frob'/>".parse().unwrap();
        match StreamElement::try_from(elem).unwrap() {
            StreamElement::Other(elem) => assert!(elem.is("frobnicate", "urn:example:frob")),
            other => panic!("misclassified: {:?}", other),
        }
    }

    #[test]
    fn malformed_known_element_is_an_error() {
        // An iq without an id is recognizably an iq but invalid.
        let elem: Element = "<iq xmlns='jabber:client' type='get'><ping xmlns='urn:xmpp:ping'/></iq>"
            .parse()
            .unwrap();
        assert!(StreamElement::try_from(elem).is_err());
    }

    #[test]
    fn ensure_id_is_idempotent() {
        let mut stanza = Stanza::Message(crate::message::Message::chat(
            "bob@example.org".parse().unwrap(),
        ));
        assert_eq!(stanza.id(), None);
        stanza.ensure_id(|| "generated".to_owned());
        assert_eq!(stanza.id(), Some("generated"));
        stanza.ensure_id(|| "other".to_owned());
        assert_eq!(stanza.id(), Some("generated"));
    }
}
