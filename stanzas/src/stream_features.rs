// Copyright (c) 2025 quill contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The `<stream:features/>` advertisement, usually the very first nonza
//! of a stream. Each negotiation step reacts to what it finds here.

use minidom::Element;

use crate::error::FromElementError;
use crate::ns;

/// StartTLS is supported, and may be mandatory.
#[derive(Debug, Clone, PartialEq)]
pub struct StartTls {
    /// Whether the server requires the upgrade before anything else.
    pub required: bool,
}

/// Everything a server advertised in `<stream:features/>`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StreamFeatures {
    /// StartTLS support.
    pub starttls: Option<StartTls>,

    /// The SASL mechanism names on offer.
    pub sasl_mechanisms: Vec<String>,

    /// Resource binding support.
    pub bind: bool,

    /// Legacy session establishment offered (RFC 3921).
    pub session: bool,

    /// Stream management (XEP-0198) support.
    pub stream_management: bool,

    /// Features this engine does not negotiate itself, carried raw.
    pub others: Vec<Element>,
}

impl StreamFeatures {
    /// Can we initiate a TLS upgrade on this stream?
    pub fn can_starttls(&self) -> bool {
        self.starttls.is_some()
    }

    /// Does the server support resource binding?
    pub fn can_bind(&self) -> bool {
        self.bind
    }

    /// Does the server support stream management?
    pub fn can_manage(&self) -> bool {
        self.stream_management
    }
}

impl TryFrom<Element> for StreamFeatures {
    type Error = FromElementError;

    fn try_from(elem: Element) -> Result<StreamFeatures, FromElementError> {
        check_self!(elem, "features", STREAM);

        let mut features = StreamFeatures::default();
        for child in elem.children() {
            if child.is("starttls", ns::TLS) {
                features.starttls = Some(StartTls {
                    required: child.has_child("required", ns::TLS),
                });
            } else if child.is("mechanisms", ns::SASL) {
                for mechanism in child.children() {
                    if mechanism.is("mechanism", ns::SASL) {
                        features.sasl_mechanisms.push(mechanism.text());
                    }
                }
            } else if child.is("bind", ns::BIND) {
                features.bind = true;
            } else if child.is("session", ns::SESSION) {
                features.session = true;
            } else if child.is("sm", ns::SM) {
                features.stream_management = true;
            } else {
                features.others.push(child.clone());
            }
        }

        Ok(features)
    }
}

impl From<StreamFeatures> for Element {
    fn from(features: StreamFeatures) -> Element {
        Element::builder("features", ns::STREAM)
            .append_all(features.starttls.map(|starttls| {
                Element::builder("starttls", ns::TLS).append_all(if starttls.required {
                    Some(Element::builder("required", ns::TLS))
                } else {
                    None
                })
            }))
            .append_all(if features.sasl_mechanisms.is_empty() {
                None
            } else {
                Some(
                    Element::builder("mechanisms", ns::SASL).append_all(
                        features.sasl_mechanisms.into_iter().map(|mechanism| {
                            Element::builder("mechanism", ns::SASL).append(mechanism)
                        }),
                    ),
                )
            })
            .append_all(if features.bind {
                Some(Element::builder("bind", ns::BIND))
            } else {
                None
            })
            .append_all(if features.session {
                Some(Element::builder("session", ns::SESSION))
            } else {
                None
            })
            .append_all(if features.stream_management {
                Some(Element::builder("sm", ns::SM))
            } else {
                None
            })
            .append_all(features.others)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sasl_mechanisms() {
        let elem: Element = "<stream:features xmlns:stream='http://etherx.jabber.org/streams'>
            <mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>
                <mechanism>PLAIN</mechanism>
                <mechanism>SCRAM-SHA-1</mechanism>
            </mechanisms>
        </stream:features>"
            .parse()
            .unwrap();
        let features = StreamFeatures::try_from(elem).unwrap();
        assert_eq!(features.sasl_mechanisms, ["PLAIN", "SCRAM-SHA-1"]);
        assert!(!features.can_bind());
        assert!(!features.can_starttls());
    }

    #[test]
    fn required_starttls() {
        let elem: Element = "<stream:features xmlns:stream='http://etherx.jabber.org/streams'>
            <starttls xmlns='urn:ietf:params:xml:ns:xmpp-tls'><required/></starttls>
        </stream:features>"
            .parse()
            .unwrap();
        let features = StreamFeatures::try_from(elem).unwrap();
        assert!(features.can_starttls());
        assert!(features.starttls.unwrap().required);
    }

    #[test]
    fn bind_and_sm() {
        let elem: Element = "<stream:features xmlns:stream='http://etherx.jabber.org/streams'>
            <bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'/>
            <sm xmlns='urn:xmpp:sm:3'/>
        </stream:features>"
            .parse()
            .unwrap();
        let features = StreamFeatures::try_from(elem).unwrap();
        assert!(features.can_bind());
        assert!(features.can_manage());
        assert!(!features.session);
    }

    #[test]
    fn unknown_features_are_preserved() {
        let elem: Element = "<stream:features xmlns:stream='http://etherx.jabber.org/streams'>
            <compression xmlns='http://jabber.org/features/compress'><method>zlib</method></compression>
        </stream:features>"
            .parse()
            .unwrap();
        let features = StreamFeatures::try_from(elem).unwrap();
        assert_eq!(features.others.len(), 1);
        assert!(features.others[0].is("compression", "http://jabber.org/features/compress"));
    }

    #[test]
    fn empty_features() {
        let elem: Element = "<stream:features xmlns:stream='http://etherx.jabber.org/streams'/>"
            .parse()
            .unwrap();
        let features = StreamFeatures::try_from(elem).unwrap();
        assert!(!features.can_bind());
        assert!(!features.can_starttls());
        assert!(features.sasl_mechanisms.is_empty());
    }
}
