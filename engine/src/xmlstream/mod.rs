// Copyright (c) 2025 quill contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! # RFC 6120 XML streams
//!
//! The XML element stream: an incremental parser turning a byte stream
//! into the sequence of top-level child elements of the
//! `<stream:stream>` envelope, and the matching buffered writer.
//!
//! Establishing a stream is a multi-step process:
//!
//! 1. Call [`initiate_stream`] to send the local header and receive the
//!    peer's; this yields a [`PendingFeaturesRecv`].
//! 2. Call [`PendingFeaturesRecv::recv_features`] to obtain the
//!    [`XmlStream`] plus the peer's `<stream:features/>`.
//!
//! After StartTLS and after SASL the stream must be restarted:
//! [`XmlStream::initiate_reset`] rewinds the parser state in place so the
//! exchange can start over on the same (possibly upgraded) connection.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{ready, Sink, SinkExt, Stream, StreamExt};
use minidom::Element;
use tokio::io::{AsyncBufRead, AsyncWrite};

use stanzas::stream_features::StreamFeatures;

mod raw;
#[cfg(test)]
mod tests;

use self::raw::{RawEvent, RawXmlStream};

/// Read-side liveness configuration for one stream.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    /// Silence duration after which a [`ReadError::SoftTimeout`] is
    /// emitted so the session can provoke peer traffic (ack request or
    /// ping).
    pub read_timeout: Duration,

    /// Additional silence tolerated after the soft timeout before the
    /// connection is declared dead.
    pub response_timeout: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            read_timeout: Duration::from_secs(60),
            response_timeout: Duration::from_secs(20),
        }
    }
}

impl Timeouts {
    /// Tight timeouts for tests.
    #[cfg(test)]
    pub(crate) fn tight() -> Self {
        Timeouts {
            read_timeout: Duration::from_millis(100),
            response_timeout: Duration::from_millis(50),
        }
    }
}

/// Contents of a `<stream:stream>` header.
#[derive(Debug, Clone, Default)]
pub struct StreamHeader {
    /// The optional `from` attribute.
    pub from: Option<String>,

    /// The optional `to` attribute.
    pub to: Option<String>,

    /// The optional `id` attribute.
    pub id: Option<String>,
}

impl StreamHeader {
    /// A client-side header addressed to `domain`.
    pub fn to_server(domain: &str) -> StreamHeader {
        StreamHeader {
            from: None,
            to: Some(domain.to_owned()),
            id: None,
        }
    }
}

/// A non-success outcome while reading from an [`XmlStream`].
#[derive(Debug)]
pub enum ReadError {
    /// The soft timeout of the stream tripped.
    ///
    /// Not fatal: the caller should send something which causes the peer
    /// to produce traffic before the hard timeout trips as well.
    SoftTimeout,

    /// An I/O or XML well-formedness error. Fatal to the stream.
    HardError(io::Error),

    /// The peer closed the stream envelope. Every further read attempt
    /// returns this again.
    StreamFooterReceived,
}

/// Initiate a new stream over `io`.
///
/// Sends the local stream header and waits for the peer's. The content
/// namespace `stream_ns` is declared as the default namespace on the
/// header.
pub async fn initiate_stream<Io: AsyncBufRead + AsyncWrite + Unpin>(
    io: Io,
    stream_ns: &'static str,
    header: StreamHeader,
    timeouts: Timeouts,
) -> io::Result<PendingFeaturesRecv<Io>> {
    InitiatingStream {
        stream: RawXmlStream::new(io, timeouts),
        stream_ns,
    }
    .send_header(header)
    .await
}

/// Type state for an initiator stream which has not yet sent its stream
/// header.
pub struct InitiatingStream<Io> {
    stream: RawXmlStream<Io>,
    stream_ns: &'static str,
}

impl<Io: AsyncBufRead + AsyncWrite + Unpin> InitiatingStream<Io> {
    /// Send the local stream header, then receive the peer's.
    pub async fn send_header(self, header: StreamHeader) -> io::Result<PendingFeaturesRecv<Io>> {
        let Self {
            mut stream,
            stream_ns,
        } = self;

        stream.queue_header(stream_ns, &header);
        futures::future::poll_fn(|cx| stream.poll_flush(cx)).await?;

        let peer_header = loop {
            match futures::future::poll_fn(|cx| stream.poll_next(cx)).await {
                Some(Ok(RawEvent::Header(header))) => break header,
                Some(Ok(RawEvent::SoftTimeout)) => continue,
                Some(Ok(_)) => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "unexpected content before stream header",
                    ))
                }
                Some(Err(e)) => return Err(e),
                None => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "eof before stream header",
                    ))
                }
            }
        };

        Ok(PendingFeaturesRecv {
            stream,
            stream_ns,
            header: peer_header,
        })
    }
}

/// Type state for an initiator stream which has exchanged stream headers
/// but not yet received the peer's features.
pub struct PendingFeaturesRecv<Io> {
    stream: RawXmlStream<Io>,
    stream_ns: &'static str,
    header: StreamHeader,
}

impl<Io> PendingFeaturesRecv<Io> {
    /// The stream header contents as sent by the peer.
    pub fn header(&self) -> &StreamHeader {
        &self.header
    }
}

impl<Io: AsyncBufRead + AsyncWrite + Unpin> PendingFeaturesRecv<Io> {
    /// Receive the peer's `<stream:features/>`.
    pub async fn recv_features(self) -> Result<(StreamFeatures, XmlStream<Io>), crate::Error> {
        let Self {
            stream,
            stream_ns,
            header,
        } = self;
        let mut stream = XmlStream {
            inner: stream,
            stream_ns,
            header,
            footer_received: false,
            footer_queued: false,
        };
        loop {
            match stream.next().await {
                Some(Ok(element)) => {
                    let features = StreamFeatures::try_from(element)
                        .map_err(|e| crate::Error::from(e.into_invalid()))?;
                    return Ok((features, stream));
                }
                Some(Err(ReadError::SoftTimeout)) => continue,
                Some(Err(ReadError::HardError(e))) => return Err(e.into()),
                Some(Err(ReadError::StreamFooterReceived)) | None => {
                    return Err(crate::Error::Disconnected)
                }
            }
        }
    }
}

/// Accept a new XML stream as responder.
///
/// Waits for the initiator's stream header. The returned object holds
/// that header for inspection; call
/// [`send_header`][`AcceptedStream::send_header`] to answer it.
pub async fn accept_stream<Io: AsyncBufRead + AsyncWrite + Unpin>(
    io: Io,
    stream_ns: &'static str,
    timeouts: Timeouts,
) -> io::Result<AcceptedStream<Io>> {
    let mut stream = RawXmlStream::new(io, timeouts);
    let header = recv_header(&mut stream).await?;
    Ok(AcceptedStream {
        stream,
        stream_ns,
        header,
    })
}

async fn recv_header<Io: AsyncBufRead + AsyncWrite + Unpin>(
    stream: &mut RawXmlStream<Io>,
) -> io::Result<StreamHeader> {
    loop {
        match futures::future::poll_fn(|cx| stream.poll_next(cx)).await {
            Some(Ok(RawEvent::Header(header))) => return Ok(header),
            Some(Ok(RawEvent::SoftTimeout)) => continue,
            Some(Ok(_)) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "unexpected content before stream header",
                ))
            }
            Some(Err(e)) => return Err(e),
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "eof before stream header",
                ))
            }
        }
    }
}

/// Type state for a responder stream which has received the initiator's
/// header but not answered it yet.
pub struct AcceptedStream<Io> {
    stream: RawXmlStream<Io>,
    stream_ns: &'static str,
    header: StreamHeader,
}

impl<Io> AcceptedStream<Io> {
    /// The stream header contents as sent by the peer.
    pub fn header(&self) -> &StreamHeader {
        &self.header
    }
}

impl<Io: AsyncBufRead + AsyncWrite + Unpin> AcceptedStream<Io> {
    /// Send our side of the stream header.
    pub async fn send_header(self, header: StreamHeader) -> io::Result<PendingFeaturesSend<Io>> {
        let Self {
            mut stream,
            stream_ns,
            header: peer_header,
        } = self;
        stream.queue_header(stream_ns, &header);
        futures::future::poll_fn(|cx| stream.poll_flush(cx)).await?;
        Ok(PendingFeaturesSend {
            stream,
            stream_ns,
            header: peer_header,
        })
    }
}

/// Type state for a responder stream which has exchanged headers but not
/// sent its features yet.
pub struct PendingFeaturesSend<Io> {
    stream: RawXmlStream<Io>,
    stream_ns: &'static str,
    header: StreamHeader,
}

impl<Io: AsyncBufRead + AsyncWrite + Unpin> PendingFeaturesSend<Io> {
    /// Send the feature advertisement and start exchanging elements.
    pub async fn send_features(
        self,
        features: StreamFeatures,
    ) -> io::Result<XmlStream<Io>> {
        let Self {
            stream,
            stream_ns,
            header,
        } = self;
        let mut stream = XmlStream {
            inner: stream,
            stream_ns,
            header,
            footer_received: false,
            footer_queued: false,
        };
        stream.send(&Element::from(features)).await?;
        Ok(stream)
    }
}

/// An established XML stream, exchanging [`Element`]s.
///
/// Implements [`Stream`](futures::Stream) for reading and
/// [`Sink`](futures::Sink)`<&Element>` for writing.
pub struct XmlStream<Io> {
    inner: RawXmlStream<Io>,
    stream_ns: &'static str,
    header: StreamHeader,
    footer_received: bool,
    footer_queued: bool,
}

impl<Io> XmlStream<Io> {
    /// The stream header the peer sent at negotiation time.
    pub fn header(&self) -> &StreamHeader {
        &self.header
    }

    /// The stream id the peer assigned, if any.
    pub fn stream_id(&self) -> Option<&str> {
        self.header.id.as_deref()
    }

    /// Access the inner I/O object.
    pub fn get_inner(&self) -> &Io {
        self.inner.get_inner()
    }
}

impl<Io: AsyncBufRead + AsyncWrite + Unpin> XmlStream<Io> {
    /// Extract the inner I/O object, dropping all stream state.
    ///
    /// Used by StartTLS to run the TLS handshake on the raw connection
    /// after `<proceed/>`.
    pub fn into_inner(self) -> Io {
        self.inner.into_inner()
    }

    /// Begin a stream restart on the same connection.
    pub fn initiate_reset(mut self) -> InitiatingStream<Io> {
        self.inner.reset_state();
        InitiatingStream {
            stream: self.inner,
            stream_ns: self.stream_ns,
        }
    }

    /// Anticipate a stream restart by the initiator.
    ///
    /// The responder-side counterpart to
    /// [`initiate_reset`][`Self::initiate_reset`].
    pub async fn accept_reset(mut self) -> io::Result<AcceptedStream<Io>> {
        self.inner.reset_state();
        let header = recv_header(&mut self.inner).await?;
        Ok(AcceptedStream {
            stream: self.inner,
            stream_ns: self.stream_ns,
            header,
        })
    }
}

impl<Io: AsyncBufRead + Unpin + AsyncWrite> Stream for XmlStream<Io> {
    type Item = Result<Element, ReadError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.footer_received {
            return Poll::Ready(Some(Err(ReadError::StreamFooterReceived)));
        }
        Poll::Ready(match ready!(this.inner.poll_next(cx)) {
            Some(Ok(RawEvent::Element(element))) => {
                if log::log_enabled!(target: "quill::xml", log::Level::Trace) {
                    log::trace!(target: "quill::xml", "RECV {}", String::from(&element));
                }
                Some(Ok(element))
            }
            Some(Ok(RawEvent::SoftTimeout)) => Some(Err(ReadError::SoftTimeout)),
            Some(Ok(RawEvent::Footer)) => {
                this.footer_received = true;
                Some(Err(ReadError::StreamFooterReceived))
            }
            Some(Ok(RawEvent::Header(_))) => Some(Err(ReadError::HardError(io::Error::new(
                io::ErrorKind::InvalidData,
                "unexpected stream header",
            )))),
            Some(Err(e)) => Some(Err(ReadError::HardError(e))),
            None => None,
        })
    }
}

impl<'x, Io: AsyncBufRead + AsyncWrite + Unpin> Sink<&'x Element> for XmlStream<Io> {
    type Error = io::Error;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().inner.poll_ready(cx)
    }

    fn start_send(self: Pin<&mut Self>, item: &'x Element) -> io::Result<()> {
        let this = self.get_mut();
        if this.footer_queued {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "stream footer already sent",
            ));
        }
        if log::log_enabled!(target: "quill::xml", log::Level::Trace) {
            log::trace!(target: "quill::xml", "SEND {}", String::from(item));
        }
        this.inner.queue_element(item)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().inner.poll_flush(cx)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.footer_queued {
            this.inner.queue_footer();
            this.footer_queued = true;
        }
        this.inner.poll_close(cx)
    }
}

impl<Io: AsyncBufRead + AsyncWrite + Unpin> XmlStream<Io> {
    /// Send a single element and flush it.
    pub async fn send(&mut self, element: &Element) -> io::Result<()> {
        SinkExt::send(self, element).await
    }
}
