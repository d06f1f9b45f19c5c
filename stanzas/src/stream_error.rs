// Copyright (c) 2025 quill contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Stream-level errors (RFC 6120 §4.9). Receiving one is always fatal to
//! the current stream; whether the engine reconnects afterwards depends
//! on the condition.

use core::fmt;
use std::error::Error as StdError;

use minidom::Element;

use crate::error::{Error, FromElementError};
use crate::ns;

macro_rules! defined_conditions {
    ($($(#[$meta:meta])* $variant:ident => $name:tt,)+) => {
        /// The defined stream error conditions of RFC 6120 §4.9.3.
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum DefinedCondition {
            $(
                $(#[$meta])*
                $variant,
            )+
        }

        impl DefinedCondition {
            fn name(self) -> &'static str {
                match self {
                    $(DefinedCondition::$variant => $name,)+
                }
            }

            fn parse(name: &str) -> Option<DefinedCondition> {
                Some(match name {
                    $($name => DefinedCondition::$variant,)+
                    _ => return None,
                })
            }
        }
    };
}

defined_conditions! {
    /// XML that cannot be processed was sent.
    BadFormat => "bad-format",
    /// An unsupported namespace prefix was used.
    BadNamespacePrefix => "bad-namespace-prefix",
    /// A new stream for this entity conflicts with this one; after this
    /// condition the engine suppresses automatic reconnection, since a
    /// newer session has superseded it.
    Conflict => "conflict",
    /// The peer has not responded to traffic in a reasonable time.
    ConnectionTimeout => "connection-timeout",
    /// The 'to' FQDN is no longer serviced here.
    HostGone => "host-gone",
    /// The 'to' FQDN is not serviced here.
    HostUnknown => "host-unknown",
    /// A stanza between servers lacked proper addressing.
    ImproperAddressing => "improper-addressing",
    /// A server misconfiguration or internal error.
    InternalServerError => "internal-server-error",
    /// The 'from' attribute does not match an authorized JID.
    InvalidFrom => "invalid-from",
    /// The stream or content namespace is unsupported.
    InvalidNamespace => "invalid-namespace",
    /// Invalid XML was sent to a validating server.
    InvalidXml => "invalid-xml",
    /// The entity must authenticate before sending stanzas.
    NotAuthorized => "not-authorized",
    /// The stream is not well-formed XML.
    NotWellFormed => "not-well-formed",
    /// A local service policy was violated.
    PolicyViolation => "policy-violation",
    /// A remote connection needed to fulfil the stream failed.
    RemoteConnectionFailed => "remote-connection-failed",
    /// The server is closing the stream because of a reset.
    Reset => "reset",
    /// The server lacks the resources to service the stream.
    ResourceConstraint => "resource-constraint",
    /// The entity sent restricted XML features.
    RestrictedXml => "restricted-xml",
    /// The stream should be reopened at a different host.
    SeeOtherHost => "see-other-host",
    /// The server is being shut down.
    SystemShutdown => "system-shutdown",
    /// A condition not covered by the other conditions.
    UndefinedCondition => "undefined-condition",
    /// An unsupported encoding was used.
    UnsupportedEncoding => "unsupported-encoding",
    /// An unsupported first-level child of the stream was sent.
    UnsupportedStanzaType => "unsupported-stanza-type",
    /// An unsupported stream version was requested.
    UnsupportedVersion => "unsupported-version",
}

/// A `<stream:error/>`, fatal to the stream that carried it.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamError {
    /// The machine-readable condition.
    pub condition: DefinedCondition,

    /// An optional human-readable description.
    pub text: Option<String>,

    /// Application-specific children, carried raw.
    pub application_specific: Vec<Element>,
}

impl StreamError {
    /// Create a stream error from a bare condition.
    pub fn new(condition: DefinedCondition) -> StreamError {
        StreamError {
            condition,
            text: None,
            application_specific: Vec::new(),
        }
    }

    /// Attach a human-readable description.
    pub fn with_text<T: Into<String>>(mut self, text: T) -> StreamError {
        self.text = Some(text.into());
        self
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "stream error: {}", self.condition.name())?;
        if let Some(text) = &self.text {
            write!(fmt, " ({})", text)?;
        }
        Ok(())
    }
}

impl StdError for StreamError {}

impl TryFrom<Element> for StreamError {
    type Error = FromElementError;

    fn try_from(elem: Element) -> Result<StreamError, FromElementError> {
        check_self!(elem, "error", STREAM);

        let mut condition = None;
        let mut text = None;
        let mut application_specific = Vec::new();
        for child in elem.children() {
            if child.is("text", ns::XMPP_STREAMS) {
                text = Some(child.text());
            } else if child.has_ns(ns::XMPP_STREAMS) {
                if condition.is_some() {
                    return Err(Error::Other(
                        "Stream error must not have more than one condition.",
                    )
                    .into());
                }
                match DefinedCondition::parse(child.name()) {
                    Some(parsed) => condition = Some(parsed),
                    // RFC 6120 requires tolerating unknown conditions.
                    None => condition = Some(DefinedCondition::UndefinedCondition),
                }
            } else {
                application_specific.push(child.clone());
            }
        }

        Ok(StreamError {
            condition: condition
                .ok_or(Error::Other("Stream error must have a defined-condition."))?,
            text,
            application_specific,
        })
    }
}

impl From<StreamError> for Element {
    fn from(error: StreamError) -> Element {
        Element::builder("error", ns::STREAM)
            .append(Element::builder(error.condition.name(), ns::XMPP_STREAMS))
            .append_all(
                error
                    .text
                    .map(|text| Element::builder("text", ns::XMPP_STREAMS).append(text)),
            )
            .append_all(error.application_specific)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict() {
        let elem: Element = "<stream:error xmlns:stream='http://etherx.jabber.org/streams'>
            <conflict xmlns='urn:ietf:params:xml:ns:xmpp-streams'/>
            <text xmlns='urn:ietf:params:xml:ns:xmpp-streams'>replaced by new connection</text>
        </stream:error>"
            .parse()
            .unwrap();
        let error = StreamError::try_from(elem).unwrap();
        assert_eq!(error.condition, DefinedCondition::Conflict);
        assert_eq!(error.text.as_deref(), Some("replaced by new connection"));
    }

    #[test]
    fn roundtrip() {
        let error = StreamError::new(DefinedCondition::ConnectionTimeout).with_text("ping timeout");
        let elem = Element::from(error.clone());
        assert_eq!(StreamError::try_from(elem).unwrap(), error);
    }

    #[test]
    fn unknown_condition_is_tolerated() {
        let elem: Element = "<stream:error xmlns:stream='http://etherx.jabber.org/streams'>
            <brand-new-condition xmlns='urn:ietf:params:xml:ns:xmpp-streams'/>
        </stream:error>"
            .parse()
            .unwrap();
        let error = StreamError::try_from(elem).unwrap();
        assert_eq!(error.condition, DefinedCondition::UndefinedCondition);
    }
}
