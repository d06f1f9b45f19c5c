// Copyright (c) 2025 quill contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Resource binding (RFC 6120 §7).

use std::str::FromStr;

use jid::{FullJid, Jid};
use minidom::Element;

use crate::error::{Error, FromElementError};
use crate::iq::{IqResultPayload, IqSetPayload};
use crate::ns;

/// The request for resource binding, the step through which a connected
/// client obtains its full JID.
#[derive(Debug, Clone, PartialEq)]
pub struct BindQuery {
    /// The resource to request; the server assigns a random one when
    /// absent, and may override the requested one.
    resource: Option<String>,
}

impl BindQuery {
    /// Creates a resource binding request.
    pub fn new(resource: Option<String>) -> BindQuery {
        BindQuery { resource }
    }
}

impl IqSetPayload for BindQuery {}

impl TryFrom<Element> for BindQuery {
    type Error = FromElementError;

    fn try_from(elem: Element) -> Result<BindQuery, FromElementError> {
        check_self!(elem, "bind", BIND);
        check_no_attributes!(elem, "bind");

        let mut resource = None;
        for child in elem.children() {
            if resource.is_some() {
                return Err(Error::Other("Bind can only have one child.").into());
            }
            if child.is("resource", ns::BIND) {
                resource = Some(child.text());
            } else {
                return Err(Error::Other("Unknown element in bind request.").into());
            }
        }

        Ok(BindQuery { resource })
    }
}

impl From<BindQuery> for Element {
    fn from(bind: BindQuery) -> Element {
        Element::builder("bind", ns::BIND)
            .append_all(
                bind.resource
                    .map(|resource| Element::builder("resource", ns::BIND).append(resource)),
            )
            .build()
    }
}

/// The response to resource binding, containing the client's full JID.
#[derive(Debug, Clone, PartialEq)]
pub struct BindResponse {
    /// The full JID assigned by the server.
    jid: FullJid,
}

impl IqResultPayload for BindResponse {}

impl From<BindResponse> for FullJid {
    fn from(bind: BindResponse) -> FullJid {
        bind.jid
    }
}

impl From<BindResponse> for Jid {
    fn from(bind: BindResponse) -> Jid {
        Jid::from(bind.jid)
    }
}

impl TryFrom<Element> for BindResponse {
    type Error = FromElementError;

    fn try_from(elem: Element) -> Result<BindResponse, FromElementError> {
        check_self!(elem, "bind", BIND);
        check_no_attributes!(elem, "bind");

        let mut jid = None;
        for child in elem.children() {
            if jid.is_some() {
                return Err(Error::Other("Bind can only have one child.").into());
            }
            if child.is("jid", ns::BIND) {
                jid = Some(FullJid::from_str(&child.text()).map_err(Error::text_parse_error)?);
            } else {
                return Err(Error::Other("Unknown element in bind response.").into());
            }
        }

        Ok(BindResponse {
            jid: jid.ok_or(Error::Other("Bind response must contain a jid element."))?,
        })
    }
}

impl From<BindResponse> for Element {
    fn from(bind: BindResponse) -> Element {
        Element::builder("bind", ns::BIND)
            .append(Element::builder("jid", ns::BIND).append(bind.jid.to_string()))
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_roundtrip() {
        let elem: Element = "<bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'/>"
            .parse()
            .unwrap();
        let bind = BindQuery::try_from(elem).unwrap();
        assert_eq!(bind.resource, None);

        let bind = BindQuery::new(Some("phone".to_owned()));
        let elem = Element::from(bind.clone());
        assert_eq!(BindQuery::try_from(elem).unwrap(), bind);
    }

    #[test]
    fn response() {
        let elem: Element = "<bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'><jid>alice@example.org/phone</jid></bind>"
            .parse()
            .unwrap();
        let bind = BindResponse::try_from(elem).unwrap();
        assert_eq!(
            FullJid::from(bind),
            FullJid::new("alice@example.org/phone").unwrap()
        );
    }

    #[test]
    fn response_without_jid_is_invalid() {
        let elem: Element = "<bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'/>"
            .parse()
            .unwrap();
        assert!(BindResponse::try_from(elem).is_err());
    }
}
