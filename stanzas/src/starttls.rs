// Copyright (c) 2025 quill contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! StartTLS negotiation nonzas (RFC 6120 §5).

use minidom::Element;

use crate::error::FromElementError;
use crate::ns;

macro_rules! empty_nonza {
    ($(#[$meta:meta])* $type:ident, $name:tt) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        pub struct $type;

        impl TryFrom<Element> for $type {
            type Error = FromElementError;

            fn try_from(elem: Element) -> Result<$type, FromElementError> {
                check_self!(elem, $name, TLS);
                check_no_attributes!(elem, $name);
                check_no_children!(elem, $name);
                Ok($type)
            }
        }

        impl From<$type> for Element {
            fn from(_: $type) -> Element {
                Element::builder($name, ns::TLS).build()
            }
        }
    };
}

empty_nonza!(
    /// Client request to upgrade the stream to TLS.
    Request,
    "starttls"
);
empty_nonza!(
    /// The server is ready for the TLS handshake.
    Proceed,
    "proceed"
);
empty_nonza!(
    /// The server refused the upgrade; the stream is unusable afterwards.
    Failure,
    "failure"
);

/// Any StartTLS nonza received from a server.
#[derive(Debug, Clone, PartialEq)]
pub enum Nonza {
    /// The handshake may begin.
    Proceed(Proceed),

    /// The upgrade was refused.
    Failure(Failure),
}

impl TryFrom<Element> for Nonza {
    type Error = FromElementError;

    fn try_from(elem: Element) -> Result<Nonza, FromElementError> {
        if !elem.has_ns(ns::TLS) {
            return Err(FromElementError::Mismatch(Box::new(elem)));
        }
        Ok(match elem.name() {
            "proceed" => Nonza::Proceed(Proceed::try_from(elem)?),
            "failure" => Nonza::Failure(Failure::try_from(elem)?),
            _ => return Err(FromElementError::Mismatch(Box::new(elem))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let elem = Element::from(Request);
        assert!(elem.is("starttls", ns::TLS));
        Request::try_from(elem).unwrap();

        let elem: Element = "<proceed xmlns='urn:ietf:params:xml:ns:xmpp-tls'/>"
            .parse()
            .unwrap();
        assert_eq!(Nonza::try_from(elem).unwrap(), Nonza::Proceed(Proceed));
    }
}
