// Copyright (c) 2025 quill contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Legacy session establishment (RFC 3921 §3).
//!
//! Obsoleted by RFC 6121, but some servers still advertise it after bind
//! and a few even require it, so the engine performs the step when it is
//! offered.

use minidom::Element;

use crate::error::FromElementError;
use crate::iq::{IqResultPayload, IqSetPayload};
use crate::ns;

/// The session establishment request sent after resource binding to
/// legacy peers.
#[derive(Debug, Clone, PartialEq)]
pub struct Session;

impl IqSetPayload for Session {}
impl IqResultPayload for Session {}

impl TryFrom<Element> for Session {
    type Error = FromElementError;

    fn try_from(elem: Element) -> Result<Session, FromElementError> {
        check_self!(elem, "session", SESSION);
        check_no_attributes!(elem, "session");
        Ok(Session)
    }
}

impl From<Session> for Element {
    fn from(_: Session) -> Element {
        Element::builder("session", ns::SESSION).build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let elem: Element = "<session xmlns='urn:ietf:params:xml:ns:xmpp-session'/>"
            .parse()
            .unwrap();
        Session::try_from(elem).unwrap();
        assert!(Element::from(Session).is("session", ns::SESSION));
    }
}
