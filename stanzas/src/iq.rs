// Copyright (c) 2025 quill contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The `<iq/>` request/response stanza (RFC 6120 §8.2.3).

use jid::Jid;
use minidom::Element;

use crate::error::{Error, FromElementError};
use crate::ns;
use crate::stanza_error::StanzaError;

/// Marker trait for payloads usable in a get request.
pub trait IqGetPayload: Into<Element> {}

/// Marker trait for payloads usable in a set request.
pub trait IqSetPayload: Into<Element> {}

/// Marker trait for payloads usable in a result response.
pub trait IqResultPayload: Into<Element> {}

/// The type and payload of an iq stanza.
#[derive(Debug, Clone)]
pub enum IqType {
    /// A get request, with its query payload.
    Get(Element),

    /// A set request, with its command payload.
    Set(Element),

    /// A result response, with an optional payload.
    Result(Option<Element>),

    /// An error response.
    Error(StanzaError),
}

impl IqType {
    fn name(&self) -> &'static str {
        match self {
            IqType::Get(_) => "get",
            IqType::Set(_) => "set",
            IqType::Result(_) => "result",
            IqType::Error(_) => "error",
        }
    }
}

/// An iq stanza.
///
/// Every sent get or set is matched to exactly one result or error
/// response through its `id`; the engine's outstanding-request table
/// relies on the id round-tripping byte for byte.
#[derive(Debug, Clone)]
pub struct Iq {
    /// The sender.
    pub from: Option<Jid>,

    /// The recipient; the local server when absent.
    pub to: Option<Jid>,

    /// The request-correlation token.
    pub id: String,

    /// The type and payload.
    pub payload: IqType,
}

impl Iq {
    /// Build a get request.
    pub fn from_get<S: Into<String>, P: IqGetPayload>(id: S, payload: P) -> Iq {
        Iq {
            from: None,
            to: None,
            id: id.into(),
            payload: IqType::Get(payload.into()),
        }
    }

    /// Build a set request.
    pub fn from_set<S: Into<String>, P: IqSetPayload>(id: S, payload: P) -> Iq {
        Iq {
            from: None,
            to: None,
            id: id.into(),
            payload: IqType::Set(payload.into()),
        }
    }

    /// Build a result response.
    pub fn from_result<S: Into<String>, P: IqResultPayload>(id: S, payload: Option<P>) -> Iq {
        Iq {
            from: None,
            to: None,
            id: id.into(),
            payload: IqType::Result(payload.map(Into::into)),
        }
    }

    /// Build an error response to the given request, addressed back to its
    /// sender and carrying its id.
    pub fn error_reply(request: &Iq, error: StanzaError) -> Iq {
        Iq {
            from: None,
            to: request.from.clone(),
            id: request.id.clone(),
            payload: IqType::Error(error),
        }
    }

    /// Set the recipient.
    pub fn with_to(mut self, to: Jid) -> Iq {
        self.to = Some(to);
        self
    }

    /// Set the id.
    pub fn with_id<S: Into<String>>(mut self, id: S) -> Iq {
        self.id = id.into();
        self
    }
}

impl TryFrom<Element> for Iq {
    type Error = FromElementError;

    fn try_from(elem: Element) -> Result<Iq, FromElementError> {
        check_self!(elem, "iq", DEFAULT_NS);

        let from = get_attr!(elem, "from", Option);
        let to = get_attr!(elem, "to", Option);
        let id: String = get_attr!(elem, "id", Required);
        let type_: String = get_attr!(elem, "type", Required);

        let mut payload = None;
        let mut error_payload = None;
        for child in elem.children() {
            if child.is("error", ns::DEFAULT_NS) {
                if error_payload.is_some() {
                    return Err(Error::Other("Wrong number of children in iq element.").into());
                }
                error_payload = Some(
                    StanzaError::try_from(child.clone())
                        .map_err(FromElementError::into_invalid)?,
                );
            } else if payload.is_some() {
                return Err(Error::Other("Wrong number of children in iq element.").into());
            } else {
                payload = Some(child.clone());
            }
        }

        let payload = match type_.as_str() {
            "get" => IqType::Get(
                payload.ok_or(Error::Other("Wrong number of children in iq element."))?,
            ),
            "set" => IqType::Set(
                payload.ok_or(Error::Other("Wrong number of children in iq element."))?,
            ),
            "result" => IqType::Result(payload),
            "error" => IqType::Error(
                error_payload.ok_or(Error::Other("Wrong number of children in iq element."))?,
            ),
            _ => return Err(Error::Other("Unknown iq type.").into()),
        };

        Ok(Iq {
            from,
            to,
            id,
            payload,
        })
    }
}

impl From<Iq> for Element {
    fn from(iq: Iq) -> Element {
        let mut builder = Element::builder("iq", ns::DEFAULT_NS)
            .attr("from", iq.from.map(|jid| jid.to_string()))
            .attr("to", iq.to.map(|jid| jid.to_string()))
            .attr("id", iq.id)
            .attr("type", iq.payload.name());
        builder = match iq.payload {
            IqType::Get(payload) | IqType::Set(payload) => builder.append(payload),
            IqType::Result(Some(payload)) => builder.append(payload),
            IqType::Result(None) => builder,
            IqType::Error(error) => builder.append(Element::from(error)),
        };
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stanza_error::{DefinedCondition, ErrorType};

    #[test]
    fn get_roundtrip() {
        let elem: Element =
            "<iq xmlns='jabber:client' id='q1' type='get'><ping xmlns='urn:xmpp:ping'/></iq>"
                .parse()
                .unwrap();
        let iq = Iq::try_from(elem).unwrap();
        assert_eq!(iq.id, "q1");
        let payload = match &iq.payload {
            IqType::Get(payload) => payload,
            _ => panic!("wrong iq type"),
        };
        assert!(payload.is("ping", ns::PING));

        let elem = Element::from(iq);
        let iq = Iq::try_from(elem).unwrap();
        assert!(matches!(iq.payload, IqType::Get(_)));
    }

    #[test]
    fn empty_result() {
        let elem: Element = "<iq xmlns='jabber:client' id='q2' type='result'/>"
            .parse()
            .unwrap();
        let iq = Iq::try_from(elem).unwrap();
        assert!(matches!(iq.payload, IqType::Result(None)));
    }

    #[test]
    fn error_response_keeps_id_and_addressing() {
        let elem: Element = "<iq xmlns='jabber:client' id='q3' type='get' from='alice@example.org/phone'><x xmlns='urn:example:unknown'/></iq>"
            .parse()
            .unwrap();
        let request = Iq::try_from(elem).unwrap();
        let reply = Iq::error_reply(
            &request,
            StanzaError::new(ErrorType::Cancel, DefinedCondition::ServiceUnavailable, ""),
        );
        assert_eq!(reply.id, "q3");
        assert_eq!(reply.to, request.from);

        let elem = Element::from(reply);
        assert_eq!(elem.attr("type"), Some("error"));
        assert_eq!(elem.attr("id"), Some("q3"));
        assert_eq!(elem.attr("to"), Some("alice@example.org/phone"));
    }

    #[test]
    fn missing_id_is_invalid() {
        let elem: Element = "<iq xmlns='jabber:client' type='get'><ping xmlns='urn:xmpp:ping'/></iq>"
            .parse()
            .unwrap();
        assert!(Iq::try_from(elem).is_err());
    }

    #[test]
    fn get_requires_payload() {
        let elem: Element = "<iq xmlns='jabber:client' id='q4' type='get'/>"
            .parse()
            .unwrap();
        assert!(Iq::try_from(elem).is_err());
    }
}
