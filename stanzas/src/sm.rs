// Copyright (c) 2025 quill contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Stream management nonzas (XEP-0198): acknowledged delivery and stream
//! resumption.

use minidom::Element;

use crate::error::{Error, FromElementError};
use crate::ns;
use crate::stanza_error::DefinedCondition;

/// A random identifier issued on `<enabled/>` and used for resumption.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamId(pub String);

/// Acknowledgement of the stanzas received so far.
#[derive(Debug, Clone, PartialEq)]
pub struct A {
    /// The count of handled stanzas, mod 2³².
    pub h: u32,
}

impl A {
    /// Generates a new `<a/>` element.
    pub fn new(h: u32) -> A {
        A { h }
    }
}

impl TryFrom<Element> for A {
    type Error = FromElementError;

    fn try_from(elem: Element) -> Result<A, FromElementError> {
        check_self!(elem, "a", SM);
        let h = get_attr!(elem, "h", Required);
        Ok(A { h })
    }
}

impl From<A> for Element {
    fn from(a: A) -> Element {
        Element::builder("a", ns::SM).attr("h", a.h).build()
    }
}

/// Request for the peer's current acknowledgement counter.
#[derive(Debug, Clone, PartialEq)]
pub struct R;

impl TryFrom<Element> for R {
    type Error = FromElementError;

    fn try_from(elem: Element) -> Result<R, FromElementError> {
        check_self!(elem, "r", SM);
        Ok(R)
    }
}

impl From<R> for Element {
    fn from(_: R) -> Element {
        Element::builder("r", ns::SM).build()
    }
}

/// Client request for enabling stream management.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Enable {
    /// The client's preferred maximum resumption time in seconds.
    pub max: Option<u32>,

    /// Whether the client wants the stream to be resumable.
    pub resume: bool,
}

impl Enable {
    /// Generates a new `<enable/>` element.
    pub fn new() -> Enable {
        Enable::default()
    }

    /// Asks for resumption to be possible.
    pub fn with_resume(mut self) -> Enable {
        self.resume = true;
        self
    }
}

fn parse_bool_attr(value: &str) -> Result<bool, Error> {
    match value {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(Error::Other("Invalid boolean attribute.")),
    }
}

impl TryFrom<Element> for Enable {
    type Error = FromElementError;

    fn try_from(elem: Element) -> Result<Enable, FromElementError> {
        check_self!(elem, "enable", SM);
        let max = get_attr!(elem, "max", Option);
        let resume = match elem.attr("resume") {
            Some(value) => parse_bool_attr(value)?,
            None => false,
        };
        Ok(Enable { max, resume })
    }
}

impl From<Enable> for Element {
    fn from(enable: Enable) -> Element {
        Element::builder("enable", ns::SM)
            .attr("max", enable.max)
            .attr("resume", if enable.resume { Some("true") } else { None })
            .build()
    }
}

/// Server response once stream management is enabled.
#[derive(Debug, Clone, PartialEq)]
pub struct Enabled {
    /// The stream identifier to present when resuming.
    pub id: Option<StreamId>,

    /// The preferred address for reconnection, as `host` or `host:port`.
    pub location: Option<String>,

    /// The server's maximum resumption time in seconds.
    pub max: Option<u32>,

    /// Whether the stream can be resumed.
    pub resume: bool,
}

impl TryFrom<Element> for Enabled {
    type Error = FromElementError;

    fn try_from(elem: Element) -> Result<Enabled, FromElementError> {
        check_self!(elem, "enabled", SM);
        let id = elem.attr("id").map(|id| StreamId(id.to_owned()));
        let location = get_attr!(elem, "location", Option);
        let max = get_attr!(elem, "max", Option);
        let resume = match elem.attr("resume") {
            Some(value) => parse_bool_attr(value)?,
            None => false,
        };
        Ok(Enabled {
            id,
            location,
            max,
            resume,
        })
    }
}

impl From<Enabled> for Element {
    fn from(enabled: Enabled) -> Element {
        Element::builder("enabled", ns::SM)
            .attr("id", enabled.id.map(|id| id.0))
            .attr("location", enabled.location)
            .attr("max", enabled.max)
            .attr("resume", if enabled.resume { Some("true") } else { None })
            .build()
    }
}

/// Request to resume a previous stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Resume {
    /// Our count of handled inbound stanzas on the previous stream.
    pub h: u32,

    /// The identifier issued on `<enabled/>`.
    pub previd: StreamId,
}

/// The server accepted a resumption.
#[derive(Debug, Clone, PartialEq)]
pub struct Resumed {
    /// The server's count of handled stanzas from us.
    pub h: u32,

    /// The identifier issued on `<enabled/>`.
    pub previd: StreamId,
}

macro_rules! resume_nonza {
    ($type:ident, $name:tt) => {
        impl TryFrom<Element> for $type {
            type Error = FromElementError;

            fn try_from(elem: Element) -> Result<$type, FromElementError> {
                check_self!(elem, $name, SM);
                let h = get_attr!(elem, "h", Required);
                let previd: String = get_attr!(elem, "previd", Required);
                Ok($type {
                    h,
                    previd: StreamId(previd),
                })
            }
        }

        impl From<$type> for Element {
            fn from(nonza: $type) -> Element {
                Element::builder($name, ns::SM)
                    .attr("h", nonza.h)
                    .attr("previd", nonza.previd.0)
                    .build()
            }
        }
    };
}

resume_nonza!(Resume, "resume");
resume_nonza!(Resumed, "resumed");

/// The enable or resume request failed.
#[derive(Debug, Clone, PartialEq)]
pub struct Failed {
    /// The server's count of handled stanzas, when it knows one.
    pub h: Option<u32>,

    /// The error condition.
    pub condition: Option<DefinedCondition>,
}

impl TryFrom<Element> for Failed {
    type Error = FromElementError;

    fn try_from(elem: Element) -> Result<Failed, FromElementError> {
        check_self!(elem, "failed", SM);
        let h = get_attr!(elem, "h", Option);
        let condition = elem.children().find_map(DefinedCondition::parse);
        Ok(Failed { h, condition })
    }
}

impl From<Failed> for Element {
    fn from(failed: Failed) -> Element {
        Element::builder("failed", ns::SM)
            .attr("h", failed.h)
            .append_all(failed.condition.map(Element::from))
            .build()
    }
}

/// Availability of stream management in `<stream:features/>`.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamManagement;

impl TryFrom<Element> for StreamManagement {
    type Error = FromElementError;

    fn try_from(elem: Element) -> Result<StreamManagement, FromElementError> {
        check_self!(elem, "sm", SM);
        Ok(StreamManagement)
    }
}

impl From<StreamManagement> for Element {
    fn from(_: StreamManagement) -> Element {
        Element::builder("sm", ns::SM).build()
    }
}

/// Any stream management nonza.
#[derive(Debug, Clone, PartialEq)]
pub enum Nonza {
    /// Request to enable stream management.
    Enable(Enable),

    /// Stream management is now enabled.
    Enabled(Enabled),

    /// Request to resume a previous stream.
    Resume(Resume),

    /// A previous stream was resumed.
    Resumed(Resumed),

    /// The enable or resume request failed.
    Failed(Failed),

    /// Acknowledgement of received stanzas.
    Ack(A),

    /// Request for an acknowledgement.
    Req(R),
}

impl TryFrom<Element> for Nonza {
    type Error = FromElementError;

    fn try_from(elem: Element) -> Result<Nonza, FromElementError> {
        if !elem.has_ns(ns::SM) {
            return Err(FromElementError::Mismatch(Box::new(elem)));
        }
        Ok(match elem.name() {
            "enable" => Nonza::Enable(Enable::try_from(elem)?),
            "enabled" => Nonza::Enabled(Enabled::try_from(elem)?),
            "resume" => Nonza::Resume(Resume::try_from(elem)?),
            "resumed" => Nonza::Resumed(Resumed::try_from(elem)?),
            "failed" => Nonza::Failed(Failed::try_from(elem)?),
            "a" => Nonza::Ack(A::try_from(elem)?),
            "r" => Nonza::Req(R::try_from(elem)?),
            _ => return Err(FromElementError::Mismatch(Box::new(elem))),
        })
    }
}

impl From<Nonza> for Element {
    fn from(nonza: Nonza) -> Element {
        match nonza {
            Nonza::Enable(nonza) => nonza.into(),
            Nonza::Enabled(nonza) => nonza.into(),
            Nonza::Resume(nonza) => nonza.into(),
            Nonza::Resumed(nonza) => nonza.into(),
            Nonza::Failed(nonza) => nonza.into(),
            Nonza::Ack(nonza) => nonza.into(),
            Nonza::Req(nonza) => nonza.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack() {
        let elem: Element = "<a xmlns='urn:xmpp:sm:3' h='5'/>".parse().unwrap();
        let a = A::try_from(elem).unwrap();
        assert_eq!(a.h, 5);
    }

    #[test]
    fn stream_feature() {
        let elem: Element = "<sm xmlns='urn:xmpp:sm:3'/>".parse().unwrap();
        StreamManagement::try_from(elem).unwrap();
    }

    #[test]
    fn resume_roundtrip() {
        let elem: Element = "<enabled xmlns='urn:xmpp:sm:3' resume='true' id='coucou' max='600'/>"
            .parse()
            .unwrap();
        let enabled = Enabled::try_from(elem).unwrap();
        let previd = enabled.id.clone().unwrap();
        assert!(enabled.resume);
        assert_eq!(previd, StreamId(String::from("coucou")));
        assert_eq!(enabled.max, Some(600));
        assert_eq!(enabled.location, None);

        let elem: Element = "<resume xmlns='urn:xmpp:sm:3' h='5' previd='coucou'/>"
            .parse()
            .unwrap();
        let resume = Resume::try_from(elem).unwrap();
        assert_eq!(resume.h, 5);
        assert_eq!(resume.previd, previd);

        let elem = Element::from(resume.clone());
        assert_eq!(Resume::try_from(elem).unwrap(), resume);
    }

    #[test]
    fn enable_defaults() {
        let enable = Enable::new().with_resume();
        let elem = Element::from(enable);
        assert_eq!(elem.attr("resume"), Some("true"));
        assert_eq!(elem.attr("max"), None);
    }
}
