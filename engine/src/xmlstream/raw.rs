// Copyright (c) 2025 quill contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, BufMut, BytesMut};
use minidom::Element;
use tokio::io::{AsyncBufRead, AsyncWrite};
use tokio::time::{Instant, Sleep};

use stanzas::ns;

use super::{StreamHeader, Timeouts};

/// One event read off the raw stream.
#[derive(Debug)]
pub(super) enum RawEvent {
    /// The peer's `<stream:stream>` header.
    Header(StreamHeader),

    /// A complete top-level child element of the stream envelope.
    Element(Element),

    /// The peer's `</stream:stream>` footer.
    Footer,

    /// Nothing was received for [`Timeouts::read_timeout`]; the caller
    /// should provoke peer traffic (ack request or ping) before the hard
    /// timeout hits.
    SoftTimeout,
}

/// Byte-level XML stream: an incremental parser turning the inner I/O
/// into stream events, plus a buffered writer for serialized elements.
///
/// The parser side builds [`minidom::Element`] trees from `rxml` events
/// with explicit depth tracking; text at stream level is only legal when
/// it is whitespace (keepalives). The writer side appends to an internal
/// buffer which `poll_write_progress` drains into the socket; poll_ready
/// applies a high-water mark so senders see backpressure when the socket
/// stalls.
pub(super) struct RawXmlStream<Io> {
    parser: rxml::AsyncReader<Io>,

    // Read deadline state. `soft_armed` means the next expiry is the
    // soft one; after it fires we re-arm for the hard timeout.
    deadline: Pin<Box<Sleep>>,
    soft_armed: bool,
    timeouts: Timeouts,

    // Partially built elements, outermost first. Depth 0 (the stream
    // envelope itself) is never on this stack.
    stack: Vec<Element>,

    tx_buffer: BytesMut,
    tx_high_water_mark: usize,
}

impl<Io> RawXmlStream<Io> {
    pub(super) fn get_inner(&self) -> &Io {
        self.parser.inner()
    }

    pub(super) fn into_inner(self) -> Io {
        self.parser.into_inner().0
    }
}

impl<Io: AsyncBufRead + AsyncWrite + Unpin> RawXmlStream<Io> {
    pub(super) fn new(io: Io, timeouts: Timeouts) -> Self {
        Self {
            parser: rxml::AsyncReader::wrap(io, rxml::Parser::default()),
            deadline: Box::pin(tokio::time::sleep(timeouts.read_timeout)),
            soft_armed: true,
            timeouts,
            stack: Vec::new(),
            tx_buffer: BytesMut::new(),
            // If 2 kiB are already waiting, do not accept more data.
            tx_high_water_mark: 2048,
        }
    }

    /// Replace the XML parser state for a stream restart.
    ///
    /// Mandatory after StartTLS and after SASL success: both restart the
    /// stream with a fresh header on the same connection.
    pub(super) fn reset_state(&mut self) {
        *Pin::new(&mut self.parser).parser_pinned() = rxml::Parser::default();
        self.stack.clear();
        self.rearm_deadline();
    }

    fn rearm_deadline(&mut self) {
        self.soft_armed = true;
        self.deadline
            .as_mut()
            .reset(Instant::now() + self.timeouts.read_timeout);
    }

    pub(super) fn poll_next(
        &mut self,
        cx: &mut Context<'_>,
    ) -> Poll<Option<io::Result<RawEvent>>> {
        loop {
            // Only buffer text inside elements; at stream level this
            // would accumulate whitespace keepalives forever.
            let buffering = !self.stack.is_empty();
            Pin::new(&mut self.parser)
                .parser_pinned()
                .set_text_buffering(buffering);

            let event = match Pin::new(&mut self.parser).poll_read(cx) {
                Poll::Ready(Ok(Some(event))) => event,
                Poll::Ready(Ok(None)) => return Poll::Ready(None),
                Poll::Ready(Err(e)) => return Poll::Ready(Some(Err(e))),
                Poll::Pending => match self.deadline.as_mut().poll(cx) {
                    Poll::Ready(()) => {
                        if self.soft_armed {
                            self.soft_armed = false;
                            self.deadline
                                .as_mut()
                                .reset(Instant::now() + self.timeouts.response_timeout);
                            return Poll::Ready(Some(Ok(RawEvent::SoftTimeout)));
                        }
                        return Poll::Ready(Some(Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            "no traffic from peer within the keepalive window",
                        ))));
                    }
                    Poll::Pending => return Poll::Pending,
                },
            };

            // Any parsed event counts as peer activity, whitespace
            // keepalives included.
            self.rearm_deadline();

            match event {
                rxml::Event::XmlDeclaration(_, _) => (),
                rxml::Event::StartElement(_, (elem_ns, name), attrs) => {
                    if self.stack.is_empty() && elem_ns == ns::STREAM && name == "stream" {
                        return Poll::Ready(Some(parse_stream_header(attrs).map(RawEvent::Header)));
                    }
                    let element = element_from_head(elem_ns, name, attrs);
                    self.stack.push(element);
                }
                rxml::Event::Text(_, text) => {
                    if let Some(top) = self.stack.last_mut() {
                        top.append_text_node(text.to_string());
                    } else if !text.as_bytes().iter().all(u8::is_ascii_whitespace) {
                        return Poll::Ready(Some(Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            "non-whitespace text at stream level",
                        ))));
                    }
                }
                rxml::Event::EndElement(_) => match self.stack.pop() {
                    None => return Poll::Ready(Some(Ok(RawEvent::Footer))),
                    Some(element) => match self.stack.last_mut() {
                        None => return Poll::Ready(Some(Ok(RawEvent::Element(element)))),
                        Some(parent) => {
                            parent.append_child(element);
                        }
                    },
                },
            }
        }
    }

    /// Queue the opening `<stream:stream>` header.
    pub(super) fn queue_header(&mut self, stream_ns: &str, header: &StreamHeader) {
        let mut out = String::from("<?xml version='1.0'?><stream:stream");
        push_attr(&mut out, "xmlns", stream_ns);
        push_attr(&mut out, "xmlns:stream", ns::STREAM);
        if let Some(from) = &header.from {
            push_attr(&mut out, "from", from);
        }
        if let Some(to) = &header.to {
            push_attr(&mut out, "to", to);
        }
        if let Some(id) = &header.id {
            push_attr(&mut out, "id", id);
        }
        push_attr(&mut out, "version", "1.0");
        out.push('>');
        self.tx_buffer.extend_from_slice(out.as_bytes());
    }

    /// Queue one serialized element.
    pub(super) fn queue_element(&mut self, element: &Element) -> io::Result<()> {
        let mut writer = (&mut self.tx_buffer).writer();
        element
            .write_to(&mut writer)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
    }

    /// Queue the closing `</stream:stream>` footer.
    pub(super) fn queue_footer(&mut self) {
        self.tx_buffer.extend_from_slice(b"</stream:stream>");
    }

    fn poll_write_progress(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        while !self.tx_buffer.is_empty() {
            let written = match Pin::new(&mut self.parser)
                .inner_pinned()
                .poll_write(cx, &self.tx_buffer)
            {
                Poll::Ready(Ok(n)) => n,
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => return Poll::Pending,
            };
            self.tx_buffer.advance(written);
        }
        Poll::Ready(Ok(()))
    }

    pub(super) fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.poll_write_progress(cx) {
            // No write progress, but enough room in the buffer is fine
            // too.
            Poll::Pending => (),
            Poll::Ready(Ok(())) => (),
            Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
        }
        if self.tx_buffer.len() < self.tx_high_water_mark {
            Poll::Ready(Ok(()))
        } else {
            Poll::Pending
        }
    }

    pub(super) fn poll_flush(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.poll_write_progress(cx) {
            Poll::Ready(Ok(())) => (),
            other => return other,
        }
        Pin::new(&mut self.parser).inner_pinned().poll_flush(cx)
    }

    pub(super) fn poll_close(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.poll_write_progress(cx) {
            Poll::Ready(Ok(())) => (),
            other => return other,
        }
        Pin::new(&mut self.parser).inner_pinned().poll_shutdown(cx)
    }
}

fn push_attr(out: &mut String, name: &str, value: &str) {
    out.push(' ');
    out.push_str(name);
    out.push_str("='");
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\'' => out.push_str("&apos;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out.push('\'');
}

fn parse_stream_header(mut attrs: rxml::AttrMap) -> io::Result<StreamHeader> {
    match attrs.remove(rxml::Namespace::none(), "version") {
        Some(v) => {
            if v != "1.0" {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unsupported stream version: {}", v),
                ));
            }
        }
        None => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "required `version` attribute missing from stream header",
            ))
        }
    }
    Ok(StreamHeader {
        from: attrs.remove(rxml::Namespace::none(), "from"),
        to: attrs.remove(rxml::Namespace::none(), "to"),
        id: attrs.remove(rxml::Namespace::none(), "id"),
    })
}

fn element_from_head(elem_ns: rxml::Namespace, name: rxml::NcName, attrs: rxml::AttrMap) -> Element {
    let mut builder = Element::builder(name.to_string(), elem_ns.to_string());
    for ((attr_ns, attr_name), value) in attrs.into_iter() {
        if attr_ns == *rxml::Namespace::none() {
            builder = builder.attr(attr_name.to_string(), value);
        } else if attr_ns == *rxml::Namespace::xml() {
            builder = builder.attr(format!("xml:{}", attr_name), value);
        } else {
            log::trace!(
                "dropping attribute {{{}}}{} in unsupported namespace",
                attr_ns,
                attr_name
            );
        }
    }
    builder.build()
}
