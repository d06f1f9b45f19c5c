// Copyright (c) 2025 quill contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! SASL negotiation nonzas (RFC 6120 §6).
//!
//! The challenge/response payloads are raw bytes; base64 framing belongs
//! to the wire format and is handled here, not by the mechanisms.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD as Base64, Engine};
use minidom::Element;

use crate::error::{Error, FromElementError};
use crate::ns;

fn text_as_base64(elem: &Element) -> Result<Vec<u8>, Error> {
    let text = elem.text();
    // A lone '=' means an explicitly empty payload.
    if text == "=" {
        return Ok(Vec::new());
    }
    Base64
        .decode(text.trim())
        .map_err(Error::text_parse_error)
}

fn base64_text(data: &[u8]) -> String {
    if data.is_empty() {
        "=".to_owned()
    } else {
        Base64.encode(data)
    }
}

/// Mechanism selection and initial response.
#[derive(Debug, Clone, PartialEq)]
pub struct Auth {
    /// The chosen mechanism name.
    pub mechanism: String,

    /// The initial response, if the mechanism has one.
    pub data: Vec<u8>,
}

impl TryFrom<Element> for Auth {
    type Error = FromElementError;

    fn try_from(elem: Element) -> Result<Auth, FromElementError> {
        check_self!(elem, "auth", SASL);
        let mechanism: String = get_attr!(elem, "mechanism", Required);
        let data = text_as_base64(&elem)?;
        Ok(Auth { mechanism, data })
    }
}

impl From<Auth> for Element {
    fn from(auth: Auth) -> Element {
        Element::builder("auth", ns::SASL)
            .attr("mechanism", auth.mechanism)
            .append(base64_text(&auth.data))
            .build()
    }
}

macro_rules! data_nonza {
    ($(#[$meta:meta])* $type:ident, $name:tt) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        pub struct $type {
            /// The payload bytes.
            pub data: Vec<u8>,
        }

        impl TryFrom<Element> for $type {
            type Error = FromElementError;

            fn try_from(elem: Element) -> Result<$type, FromElementError> {
                check_self!(elem, $name, SASL);
                let data = text_as_base64(&elem)?;
                Ok($type { data })
            }
        }

        impl From<$type> for Element {
            fn from(nonza: $type) -> Element {
                Element::builder($name, ns::SASL)
                    .append(base64_text(&nonza.data))
                    .build()
            }
        }
    };
}

data_nonza!(
    /// A server challenge.
    Challenge,
    "challenge"
);
data_nonza!(
    /// A client response to a challenge.
    Response,
    "response"
);
data_nonza!(
    /// Authentication succeeded; may carry additional data such as the
    /// SCRAM server signature.
    Success,
    "success"
);

/// Abort the exchange from the client side.
#[derive(Debug, Clone, PartialEq)]
pub struct Abort;

impl TryFrom<Element> for Abort {
    type Error = FromElementError;

    fn try_from(elem: Element) -> Result<Abort, FromElementError> {
        check_self!(elem, "abort", SASL);
        check_no_attributes!(elem, "abort");
        check_no_children!(elem, "abort");
        Ok(Abort)
    }
}

impl From<Abort> for Element {
    fn from(_: Abort) -> Element {
        Element::builder("abort", ns::SASL).build()
    }
}

generate_attribute!(
    /// The defined SASL failure conditions of RFC 6120 §6.5.
    DefinedCondition, "condition", {
        /// The client aborted the exchange.
        Aborted => "aborted",

        /// The account is disabled.
        AccountDisabled => "account-disabled",

        /// The credentials have expired.
        CredentialsExpired => "credentials-expired",

        /// Encryption is required before this mechanism may be used.
        EncryptionRequired => "encryption-required",

        /// The base64 data was malformed.
        IncorrectEncoding => "incorrect-encoding",

        /// The authzid was invalid.
        InvalidAuthzid => "invalid-authzid",

        /// The requested mechanism is invalid or unsupported.
        InvalidMechanism => "invalid-mechanism",

        /// The request was malformed.
        MalformedRequest => "malformed-request",

        /// The mechanism is weaker than server policy permits.
        MechanismTooWeak => "mechanism-too-weak",

        /// The presented credentials were rejected.
        NotAuthorized => "not-authorized",

        /// A temporary server-side failure; retrying later may work.
        TemporaryAuthFailure => "temporary-auth-failure",
    }
);

/// Authentication failed.
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    /// The failure condition.
    pub defined_condition: DefinedCondition,

    /// Human-readable explanations, keyed by `xml:lang`.
    pub texts: BTreeMap<String, String>,
}

impl TryFrom<Element> for Failure {
    type Error = FromElementError;

    fn try_from(elem: Element) -> Result<Failure, FromElementError> {
        check_self!(elem, "failure", SASL);

        let mut defined_condition = None;
        let mut texts = BTreeMap::new();
        for child in elem.children() {
            if child.is("text", ns::SASL) {
                let lang = child.attr("xml:lang").unwrap_or("").to_owned();
                if texts.insert(lang, child.text()).is_some() {
                    return Err(
                        Error::Other("Text element present twice for the same xml:lang.").into(),
                    );
                }
            } else if child.has_ns(ns::SASL) {
                if defined_condition.is_some() {
                    return Err(
                        Error::Other("Failure must not have more than one condition.").into()
                    );
                }
                defined_condition = Some(child.name().parse()?);
            }
        }

        Ok(Failure {
            defined_condition: defined_condition
                .ok_or(Error::Other("Failure must have a defined-condition."))?,
            texts,
        })
    }
}

impl From<Failure> for Element {
    fn from(failure: Failure) -> Element {
        Element::builder("failure", ns::SASL)
            .append(Element::builder(
                match failure.defined_condition {
                    DefinedCondition::Aborted => "aborted",
                    DefinedCondition::AccountDisabled => "account-disabled",
                    DefinedCondition::CredentialsExpired => "credentials-expired",
                    DefinedCondition::EncryptionRequired => "encryption-required",
                    DefinedCondition::IncorrectEncoding => "incorrect-encoding",
                    DefinedCondition::InvalidAuthzid => "invalid-authzid",
                    DefinedCondition::InvalidMechanism => "invalid-mechanism",
                    DefinedCondition::MalformedRequest => "malformed-request",
                    DefinedCondition::MechanismTooWeak => "mechanism-too-weak",
                    DefinedCondition::NotAuthorized => "not-authorized",
                    DefinedCondition::TemporaryAuthFailure => "temporary-auth-failure",
                },
                ns::SASL,
            ))
            .append_all(failure.texts.into_iter().map(|(lang, text)| {
                let builder = Element::builder("text", ns::SASL).append(text);
                if lang.is_empty() {
                    builder
                } else {
                    builder.attr("xml:lang", lang)
                }
            }))
            .build()
    }
}

/// Any SASL nonza.
#[derive(Debug, Clone, PartialEq)]
pub enum Nonza {
    /// Mechanism selection and initial response.
    Auth(Auth),

    /// A server challenge.
    Challenge(Challenge),

    /// A client response.
    Response(Response),

    /// Success notification.
    Success(Success),

    /// Failure notification.
    Failure(Failure),

    /// Abortion of the exchange.
    Abort(Abort),
}

impl TryFrom<Element> for Nonza {
    type Error = FromElementError;

    fn try_from(elem: Element) -> Result<Nonza, FromElementError> {
        if !elem.has_ns(ns::SASL) {
            return Err(FromElementError::Mismatch(Box::new(elem)));
        }
        Ok(match elem.name() {
            "auth" => Nonza::Auth(Auth::try_from(elem)?),
            "challenge" => Nonza::Challenge(Challenge::try_from(elem)?),
            "response" => Nonza::Response(Response::try_from(elem)?),
            "success" => Nonza::Success(Success::try_from(elem)?),
            "failure" => Nonza::Failure(Failure::try_from(elem)?),
            "abort" => Nonza::Abort(Abort::try_from(elem)?),
            _ => return Err(FromElementError::Mismatch(Box::new(elem))),
        })
    }
}

impl From<Nonza> for Element {
    fn from(nonza: Nonza) -> Element {
        match nonza {
            Nonza::Auth(nonza) => nonza.into(),
            Nonza::Challenge(nonza) => nonza.into(),
            Nonza::Response(nonza) => nonza.into(),
            Nonza::Success(nonza) => nonza.into(),
            Nonza::Failure(nonza) => nonza.into(),
            Nonza::Abort(nonza) => nonza.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_roundtrip() {
        let elem: Element = "<auth xmlns='urn:ietf:params:xml:ns:xmpp-sasl' mechanism='PLAIN'>AGFsaWNlAHBlbmNpbA==</auth>"
            .parse()
            .unwrap();
        let auth = Auth::try_from(elem).unwrap();
        assert_eq!(auth.mechanism, "PLAIN");
        assert_eq!(auth.data, b"\0alice\0pencil");

        let elem = Element::from(auth.clone());
        assert_eq!(Auth::try_from(elem).unwrap(), auth);
    }

    #[test]
    fn empty_payload_is_an_equals_sign() {
        let elem = Element::from(Response { data: Vec::new() });
        assert_eq!(elem.text(), "=");
        let response = Response::try_from(elem).unwrap();
        assert!(response.data.is_empty());
    }

    #[test]
    fn failure_with_condition() {
        let elem: Element =
            "<failure xmlns='urn:ietf:params:xml:ns:xmpp-sasl'><not-authorized/></failure>"
                .parse()
                .unwrap();
        let failure = Failure::try_from(elem).unwrap();
        assert_eq!(failure.defined_condition, DefinedCondition::NotAuthorized);
    }

    #[test]
    fn unknown_sasl_element_is_a_mismatch() {
        let elem: Element = "<frobnicate xmlns='urn:ietf:params:xml:ns:xmpp-sasl'/>"
            .parse()
            .unwrap();
        assert!(matches!(
            Nonza::try_from(elem),
            Err(FromElementError::Mismatch(_))
        ));
    }
}
