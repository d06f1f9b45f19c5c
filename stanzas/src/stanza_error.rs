// Copyright (c) 2025 quill contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Stanza-level errors (RFC 6120 §8.3).

use std::collections::BTreeMap;
use std::str::FromStr;

use jid::Jid;
use minidom::Element;

use crate::error::{Error, FromElementError};
use crate::ns;

generate_attribute!(
    /// The action the sender should take on this error.
    ErrorType, "type", {
        /// Retry after providing credentials.
        Auth => "auth",

        /// Do not retry, the error cannot be remedied.
        Cancel => "cancel",

        /// Proceed, the condition was only a warning.
        Continue => "continue",

        /// Retry after changing the data sent.
        Modify => "modify",

        /// Retry after waiting.
        Wait => "wait",
    }
);

/// The defined error conditions of RFC 6120 §8.3.3.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefinedCondition {
    /// The sender has sent a stanza containing XML that does not conform
    /// to the appropriate schema or that cannot be processed.
    BadRequest,
    /// Access cannot be granted because an existing resource exists with
    /// the same name or address.
    Conflict,
    /// The feature represented in the XML stanza is not implemented by the
    /// intended recipient or an intermediate server.
    FeatureNotImplemented,
    /// The requesting entity does not possess the necessary permissions to
    /// perform an action or receive data.
    Forbidden,
    /// The recipient or server can no longer be contacted at this address;
    /// the text holds the new address, if any.
    Gone(Option<String>),
    /// The server has experienced a misconfiguration or other internal
    /// error that prevents it from processing the stanza.
    InternalServerError,
    /// The addressed JID or item requested cannot be found.
    ItemNotFound,
    /// An address or aspect thereof does not adhere to the syntax defined
    /// in RFC 6122.
    JidMalformed,
    /// The recipient or server understands the request but cannot process
    /// it because it does not meet criteria defined by the recipient or
    /// server.
    NotAcceptable,
    /// The recipient or server does not allow any entity to perform the
    /// action.
    NotAllowed,
    /// The sender needs to provide credentials before being allowed to
    /// perform the action, or has provided improper credentials.
    NotAuthorized,
    /// The entity has violated some local service policy.
    PolicyViolation,
    /// The intended recipient is temporarily unavailable.
    RecipientUnavailable,
    /// The recipient or server is redirecting requests for this
    /// information to another entity, whose address is in the text.
    Redirect(Option<String>),
    /// The requesting entity is not authorized to access the requested
    /// service because prior registration is necessary.
    RegistrationRequired,
    /// A remote server or service specified as part or all of the JID of
    /// the intended recipient does not exist or cannot be resolved.
    RemoteServerNotFound,
    /// A remote server or service was resolved but communications could
    /// not be established within a reasonable amount of time.
    RemoteServerTimeout,
    /// The server or recipient is busy or lacks the system resources
    /// necessary to service the request.
    ResourceConstraint,
    /// The server or recipient does not currently provide the requested
    /// service.
    ServiceUnavailable,
    /// The requesting entity is not authorized to access the requested
    /// service because a prior subscription is necessary.
    SubscriptionRequired,
    /// The error condition is not one of those defined by the other
    /// conditions in this list.
    UndefinedCondition,
    /// The recipient or server understood the request but was not
    /// expecting it at this time.
    UnexpectedRequest,
}

impl DefinedCondition {
    fn name(&self) -> &'static str {
        match self {
            DefinedCondition::BadRequest => "bad-request",
            DefinedCondition::Conflict => "conflict",
            DefinedCondition::FeatureNotImplemented => "feature-not-implemented",
            DefinedCondition::Forbidden => "forbidden",
            DefinedCondition::Gone(_) => "gone",
            DefinedCondition::InternalServerError => "internal-server-error",
            DefinedCondition::ItemNotFound => "item-not-found",
            DefinedCondition::JidMalformed => "jid-malformed",
            DefinedCondition::NotAcceptable => "not-acceptable",
            DefinedCondition::NotAllowed => "not-allowed",
            DefinedCondition::NotAuthorized => "not-authorized",
            DefinedCondition::PolicyViolation => "policy-violation",
            DefinedCondition::RecipientUnavailable => "recipient-unavailable",
            DefinedCondition::Redirect(_) => "redirect",
            DefinedCondition::RegistrationRequired => "registration-required",
            DefinedCondition::RemoteServerNotFound => "remote-server-not-found",
            DefinedCondition::RemoteServerTimeout => "remote-server-timeout",
            DefinedCondition::ResourceConstraint => "resource-constraint",
            DefinedCondition::ServiceUnavailable => "service-unavailable",
            DefinedCondition::SubscriptionRequired => "subscription-required",
            DefinedCondition::UndefinedCondition => "undefined-condition",
            DefinedCondition::UnexpectedRequest => "unexpected-request",
        }
    }

    pub(crate) fn parse(elem: &Element) -> Option<DefinedCondition> {
        if !elem.has_ns(ns::XMPP_STANZAS) {
            return None;
        }
        let text = || {
            let text = elem.text();
            if text.is_empty() {
                None
            } else {
                Some(text)
            }
        };
        Some(match elem.name() {
            "bad-request" => DefinedCondition::BadRequest,
            "conflict" => DefinedCondition::Conflict,
            "feature-not-implemented" => DefinedCondition::FeatureNotImplemented,
            "forbidden" => DefinedCondition::Forbidden,
            "gone" => DefinedCondition::Gone(text()),
            "internal-server-error" => DefinedCondition::InternalServerError,
            "item-not-found" => DefinedCondition::ItemNotFound,
            "jid-malformed" => DefinedCondition::JidMalformed,
            "not-acceptable" => DefinedCondition::NotAcceptable,
            "not-allowed" => DefinedCondition::NotAllowed,
            "not-authorized" => DefinedCondition::NotAuthorized,
            "policy-violation" => DefinedCondition::PolicyViolation,
            "recipient-unavailable" => DefinedCondition::RecipientUnavailable,
            "redirect" => DefinedCondition::Redirect(text()),
            "registration-required" => DefinedCondition::RegistrationRequired,
            "remote-server-not-found" => DefinedCondition::RemoteServerNotFound,
            "remote-server-timeout" => DefinedCondition::RemoteServerTimeout,
            "resource-constraint" => DefinedCondition::ResourceConstraint,
            "service-unavailable" => DefinedCondition::ServiceUnavailable,
            "subscription-required" => DefinedCondition::SubscriptionRequired,
            "undefined-condition" => DefinedCondition::UndefinedCondition,
            "unexpected-request" => DefinedCondition::UnexpectedRequest,
            _ => return None,
        })
    }
}

impl From<DefinedCondition> for Element {
    fn from(condition: DefinedCondition) -> Element {
        let builder = Element::builder(condition.name(), ns::XMPP_STANZAS);
        match condition {
            DefinedCondition::Gone(Some(uri)) | DefinedCondition::Redirect(Some(uri)) => {
                builder.append(uri).build()
            }
            _ => builder.build(),
        }
    }
}

/// A stanza-level `<error/>` payload.
///
/// Not fatal to the stream; it is delivered as the resolved value of the
/// request it answers.
#[derive(Debug, Clone, PartialEq)]
pub struct StanzaError {
    /// The action the sender should take.
    pub type_: ErrorType,

    /// The entity that generated the error, when it differs from the
    /// stanza's `from`.
    pub by: Option<Jid>,

    /// The machine-readable condition.
    pub defined_condition: DefinedCondition,

    /// Human-readable descriptions, keyed by `xml:lang`.
    pub texts: BTreeMap<String, String>,
}

impl StanzaError {
    /// Create a stanza error with a single English text.
    pub fn new<T: Into<String>>(
        type_: ErrorType,
        defined_condition: DefinedCondition,
        text: T,
    ) -> StanzaError {
        let mut texts = BTreeMap::new();
        let text = text.into();
        if !text.is_empty() {
            texts.insert(String::new(), text);
        }
        StanzaError {
            type_,
            by: None,
            defined_condition,
            texts,
        }
    }
}

impl TryFrom<Element> for StanzaError {
    type Error = FromElementError;

    fn try_from(elem: Element) -> Result<StanzaError, FromElementError> {
        check_self!(elem, "error", DEFAULT_NS);

        let type_ = get_attr!(elem, "type", Required);
        let by = get_attr!(elem, "by", Option);
        let mut defined_condition = None;
        let mut texts = BTreeMap::new();

        for child in elem.children() {
            if child.is("text", ns::XMPP_STANZAS) {
                let lang = child.attr("xml:lang").unwrap_or("").to_owned();
                if texts.insert(lang, child.text()).is_some() {
                    return Err(
                        Error::Other("Text element present twice for the same xml:lang.").into(),
                    );
                }
            } else if let Some(condition) = DefinedCondition::parse(child) {
                if defined_condition.is_some() {
                    return Err(Error::Other("Error must not have more than one condition.").into());
                }
                defined_condition = Some(condition);
            }
            // Other children are application-specific payloads; skipped.
        }

        Ok(StanzaError {
            type_,
            by,
            defined_condition: defined_condition
                .ok_or(Error::Other("Error must have a defined-condition."))?,
            texts,
        })
    }
}

impl From<StanzaError> for Element {
    fn from(err: StanzaError) -> Element {
        Element::builder("error", ns::DEFAULT_NS)
            .attr("type", err.type_)
            .attr("by", err.by.map(|jid| jid.to_string()))
            .append(Element::from(err.defined_condition))
            .append_all(err.texts.into_iter().map(|(lang, text)| {
                let builder = Element::builder("text", ns::XMPP_STANZAS).append(text);
                if lang.is_empty() {
                    builder
                } else {
                    builder.attr("xml:lang", lang)
                }
            }))
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_error() {
        let elem: Element = "<error xmlns='jabber:client' type='cancel'><service-unavailable xmlns='urn:ietf:params:xml:ns:xmpp-stanzas'/></error>"
            .parse()
            .unwrap();
        let error = StanzaError::try_from(elem).unwrap();
        assert_eq!(error.type_, ErrorType::Cancel);
        assert_eq!(
            error.defined_condition,
            DefinedCondition::ServiceUnavailable
        );
        assert!(error.texts.is_empty());
    }

    #[test]
    fn error_with_text_roundtrip(){
        let error = StanzaError::new(
            ErrorType::Cancel,
            DefinedCondition::FeatureNotImplemented,
            "nobody here speaks that",
        );
        let elem = Element::from(error.clone());
        let parsed = StanzaError::try_from(elem).unwrap();
        assert_eq!(parsed, error);
    }

    #[test]
    fn missing_condition_is_invalid() {
        let elem: Element = "<error xmlns='jabber:client' type='cancel'/>".parse().unwrap();
        assert!(StanzaError::try_from(elem).is_err());
    }
}
