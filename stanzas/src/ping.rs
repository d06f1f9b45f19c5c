// Copyright (c) 2025 quill contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! XMPP ping (XEP-0199), the engine's application-level keepalive.

use minidom::Element;

use crate::error::FromElementError;
use crate::iq::IqGetPayload;
use crate::ns;

/// A ping request payload. The expected reply is an empty iq result.
#[derive(Debug, Clone, PartialEq)]
pub struct Ping;

impl IqGetPayload for Ping {}

impl TryFrom<Element> for Ping {
    type Error = FromElementError;

    fn try_from(elem: Element) -> Result<Ping, FromElementError> {
        check_self!(elem, "ping", PING);
        check_no_attributes!(elem, "ping");
        check_no_children!(elem, "ping");
        Ok(Ping)
    }
}

impl From<Ping> for Element {
    fn from(_: Ping) -> Element {
        Element::builder("ping", ns::PING).build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let elem: Element = "<ping xmlns='urn:xmpp:ping'/>".parse().unwrap();
        Ping::try_from(elem).unwrap();
        assert!(Element::from(Ping).is("ping", ns::PING));
    }
}
