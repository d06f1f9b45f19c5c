// Copyright (c) 2025 quill contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! # Session worker
//!
//! One spawned task per [`Client`][`crate::Client`] owns everything a
//! stream consists of: the socket, the negotiation sequence, the
//! transmit queue, the stream-management counters and the reconnect
//! policy. All state transitions for one stream happen on this single
//! logical thread of control; nothing here is shared mutably.
//!
//! The frontend talks to the worker through channels only: a bounded
//! channel of [`QueueEntry`]s in (providing send backpressure), an
//! unbounded control channel for engine-generated stanzas, and a bounded
//! event channel out.

use std::ops::ControlFlow;
use std::sync::Arc;

use minidom::Element;
use tokio::sync::mpsc;

use stanzas::jid::Jid;
use stanzas::sm;
use stanzas::stream_features::StreamFeatures;
use stanzas::{Stanza, StreamElement};

use crate::client::iq::IqResponseTracker;
use crate::client::login::client_auth;
use crate::connect::ServerConnector;
use crate::error::{Error, ProtocolError};
use crate::xmlstream::{ReadError, Timeouts, XmlStream};

mod negotiation;
mod queue;
mod reconnect;
mod sm_state;

#[cfg(test)]
mod tests;

pub use queue::{SharedIoError, StanzaStage, StanzaState, StanzaToken};
pub(crate) use queue::{QueueEntry, TransmitQueue};

use negotiation::{negotiate, Negotiated};
use reconnect::{ReconnectPolicy, KEEPALIVE_RETRY_DELAY};
use sm_state::SmState;

/// Queue depth of the frontend channels.
const QUEUE_DEPTH: usize = 16;

/// What the worker reports to the frontend.
#[derive(Debug)]
pub(crate) enum SessionEvent {
    /// A stream finished negotiation.
    Online {
        /// The JID the server bound the stream to.
        bound_jid: Jid,
        /// The features of the negotiated stream.
        features: Box<StreamFeatures>,
        /// Whether the previous session was resumed without loss.
        resumed: bool,
    },

    /// A stanza arrived which the worker did not consume itself.
    Stanza(Stanza),

    /// A top-level element the engine has no schema for.
    Element(Element),

    /// The stream is gone for good and no reconnection will happen.
    Disconnected(Error),
}

/// Per-session configuration, assembled by the [`Client`][`crate::Client`]
/// builder methods.
#[derive(Clone)]
pub(crate) struct SessionConfig {
    pub(crate) jid: Jid,
    pub(crate) password: String,
    pub(crate) timeouts: Timeouts,
    pub(crate) reconnect: bool,
}

pub(crate) struct SessionHandle {
    pub(crate) sends: mpsc::Sender<QueueEntry>,
    pub(crate) control: mpsc::UnboundedSender<QueueEntry>,
    pub(crate) events: mpsc::Receiver<SessionEvent>,
}

/// Spawn the worker for one session.
pub(crate) fn spawn<C: ServerConnector>(
    connector: C,
    config: SessionConfig,
    tracker: Arc<IqResponseTracker>,
) -> SessionHandle {
    let (send_tx, send_rx) = mpsc::channel(QUEUE_DEPTH);
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::channel(QUEUE_DEPTH);

    let reconnects = ReconnectPolicy::new(config.reconnect);
    let worker = SessionWorker {
        connector,
        config,
        tracker,
        events: event_tx,
        queue: TransmitQueue::new(send_rx, control_rx),
        reconnects,
    };
    tokio::spawn(worker.run());

    SessionHandle {
        sends: send_tx,
        control: control_tx,
        events: event_rx,
    }
}

enum DriveOutcome {
    /// The frontend hung up; shut the stream down cleanly.
    LocalClose,

    /// The stream broke.
    Lost(Error),
}

struct SessionWorker<C: ServerConnector> {
    connector: C,
    config: SessionConfig,
    tracker: Arc<IqResponseTracker>,
    events: mpsc::Sender<SessionEvent>,
    queue: TransmitQueue,
    reconnects: ReconnectPolicy,
}

impl<C: ServerConnector> SessionWorker<C> {
    async fn run(mut self) {
        let mut sm: Option<SmState> = None;

        loop {
            // Establish an authenticated stream, retrying with backoff
            // as the policy allows.
            let (features, mut stream) = match self.connect_with_backoff().await {
                Ok(connected) => connected,
                Err(error) => {
                    self.fail_session(error).await;
                    return;
                }
            };

            let negotiated = match negotiate(
                &mut stream,
                &self.config.jid,
                &features,
                sm.take(),
                &mut self.queue,
            )
            .await
            {
                Ok(negotiated) => negotiated,
                Err(error) => {
                    if error.suppresses_reconnect() || !self.reconnects.should_reconnect() {
                        self.fail_session(error).await;
                        return;
                    }
                    let delay = self.reconnects.next_delay();
                    log::warn!("session negotiation failed: {}. Retrying in {:?}.", error, delay);
                    tokio::time::sleep(delay).await;
                    continue;
                }
            };
            self.reconnects.record_success();

            let early = match negotiated {
                Negotiated::Reset {
                    bound_jid,
                    sm: new_sm,
                    early,
                } => {
                    sm = new_sm;
                    self.emit(SessionEvent::Online {
                        bound_jid,
                        features: Box::new(features),
                        resumed: false,
                    })
                    .await;
                    early
                }
                Negotiated::Resumed { sm: resumed_sm, early } => {
                    let bound_jid = self.config.jid.clone();
                    sm = Some(resumed_sm);
                    self.emit(SessionEvent::Online {
                        bound_jid,
                        features: Box::new(features),
                        resumed: true,
                    })
                    .await;
                    early
                }
            };

            // Elements which slipped in during negotiation: processed
            // normally, but outside the stream-management counters.
            let mut failed = None;
            for element in early {
                if let Err(error) = self.handle_element(element, &mut stream, &mut sm, false).await
                {
                    failed = Some(error);
                    break;
                }
            }

            let outcome = match failed {
                Some(error) => DriveOutcome::Lost(error),
                None => self.drive(&mut stream, &mut sm).await,
            };

            match outcome {
                DriveOutcome::LocalClose => {
                    log::debug!("frontend gone, closing stream");
                    if let Err(e) = self.close_stream(stream).await {
                        log::debug!("stream closure failed: {}", e);
                    }
                    self.tracker.fail_all();
                    return;
                }
                DriveOutcome::Lost(error) => {
                    // Resumable state survives the disconnect; anything
                    // else is gone.
                    match sm.as_mut() {
                        Some(state) if state.resume_info().is_some() => (),
                        Some(state) => {
                            state.drop_unacked();
                            sm = None;
                        }
                        None => (),
                    }

                    if error.suppresses_reconnect() || !self.reconnects.should_reconnect() {
                        self.fail_session(error).await;
                        return;
                    }

                    let delay = if error.is_keepalive_timeout() {
                        KEEPALIVE_RETRY_DELAY
                    } else {
                        self.reconnects.next_delay()
                    };
                    log::debug!("stream lost: {}. Reconnecting in {:?}.", error, delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Keep attempting to connect and authenticate until one attempt
    /// succeeds or the policy gives up.
    async fn connect_with_backoff(
        &mut self,
    ) -> Result<(StreamFeatures, XmlStream<C::Stream>), Error> {
        loop {
            if self.events.is_closed() && self.queue.is_closed() {
                return Err(Error::Disconnected);
            }
            log::debug!("connecting as {}", self.config.jid);
            match client_auth(
                self.connector.clone(),
                self.config.jid.clone(),
                self.config.password.clone(),
                self.config.timeouts,
            )
            .await
            {
                Ok(connected) => return Ok(connected),
                Err(error) => {
                    if error.suppresses_reconnect() || !self.reconnects.should_reconnect() {
                        return Err(error);
                    }
                    let delay = self.reconnects.next_delay();
                    log::error!("failed to connect: {}. Retrying in {:?}.", error, delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Multiplex the negotiated stream until it breaks or the frontend
    /// hangs up.
    async fn drive(
        &mut self,
        stream: &mut XmlStream<C::Stream>,
        sm: &mut Option<SmState>,
    ) -> DriveOutcome {
        enum Input {
            Send(Option<QueueEntry>),
            Read(Option<Result<Element, ReadError>>),
        }

        loop {
            let input = tokio::select! {
                entry = self.queue.next() => Input::Send(entry),
                element = futures::StreamExt::next(&mut *stream) => Input::Read(element),
            };
            let step = match input {
                Input::Send(None) => return DriveOutcome::LocalClose,
                Input::Send(Some(entry)) => self.send_entry(entry, stream, sm).await,
                Input::Read(Some(Ok(element))) => {
                    self.handle_element(element, stream, sm, true).await
                }
                Input::Read(Some(Err(ReadError::SoftTimeout))) => {
                    self.keepalive(stream, sm).await
                }
                Input::Read(Some(Err(ReadError::HardError(error)))) => {
                    return DriveOutcome::Lost(error.into())
                }
                Input::Read(Some(Err(ReadError::StreamFooterReceived))) | Input::Read(None) => {
                    return DriveOutcome::Lost(Error::Disconnected)
                }
            };
            if let Err(error) = step {
                return DriveOutcome::Lost(error);
            }
        }
    }

    /// Serialize and transmit one queue entry.
    async fn send_entry(
        &mut self,
        entry: QueueEntry,
        stream: &mut XmlStream<C::Stream>,
        sm: &mut Option<SmState>,
    ) -> Result<(), Error> {
        let element = Element::from((*entry.stanza).clone());
        match stream.send(&element).await {
            Ok(()) => {
                entry.set_state(StanzaState::Sent);
                if let Some(sm) = sm.as_mut() {
                    sm.enqueue(entry);
                    // Ask for an ack right away so delivery confirmation
                    // does not have to wait for the next timeout.
                    stream.send(&Element::from(sm::Nonza::Req(sm::R))).await?;
                }
                Ok(())
            }
            Err(error) => {
                entry.set_state(StanzaState::Failed {
                    error: SharedIoError::from(&error),
                });
                Err(error.into())
            }
        }
    }

    /// Provoke traffic from a silent peer before the hard timeout hits.
    async fn keepalive(
        &mut self,
        stream: &mut XmlStream<C::Stream>,
        sm: &mut Option<SmState>,
    ) -> Result<(), Error> {
        if sm.is_some() {
            log::debug!("soft timeout, requesting ack");
            stream.send(&Element::from(sm::Nonza::Req(sm::R))).await?;
        } else {
            log::debug!("soft timeout, enqueueing ping");
            let iq = stanzas::iq::Iq::from_get(
                format!("{}{}", PING_PROBE_ID_PREFIX, crate::event::make_id()),
                stanzas::ping::Ping,
            );
            self.queue
                .push_internal(QueueEntry::untracked(Box::new(Stanza::Iq(iq))));
        }
        Ok(())
    }

    /// Process one received top-level element.
    ///
    /// `count` is false for elements received during negotiation, which
    /// the stream-management counters must not cover.
    async fn handle_element(
        &mut self,
        element: Element,
        stream: &mut XmlStream<C::Stream>,
        sm: &mut Option<SmState>,
        count: bool,
    ) -> Result<(), Error> {
        let element = match StreamElement::try_from(element) {
            Ok(element) => element,
            Err(error) => {
                // Well-formed XML, but a recognized element violating
                // its schema. Fatal per RFC 6120: report and tear down.
                log::error!("failed to decode stream element: {}", error);
                let stream_error = stanzas::stream_error::StreamError::new(
                    stanzas::stream_error::DefinedCondition::InvalidXml,
                )
                .with_text(error.to_string());
                let _ = stream.send(&Element::from(stream_error)).await;
                return Err(error.into());
            }
        };

        match element {
            StreamElement::Stanza(stanza) => {
                if count {
                    if let Some(sm) = sm.as_mut() {
                        sm.count_inbound();
                    }
                }
                let stanza = match stanza {
                    Stanza::Iq(iq) => match self.tracker.handle_iq(iq) {
                        ControlFlow::Break(()) => return Ok(()),
                        ControlFlow::Continue(iq) => Stanza::Iq(iq),
                    },
                    other => other,
                };
                self.emit(SessionEvent::Stanza(stanza)).await;
                Ok(())
            }

            StreamElement::Sm(sm::Nonza::Req(_)) => match sm.as_ref() {
                Some(state) => {
                    stream
                        .send(&Element::from(sm::Nonza::Ack(sm::A::new(
                            state.inbound_ctr(),
                        ))))
                        .await?;
                    Ok(())
                }
                None => {
                    log::warn!("peer requested an ack but stream management is off");
                    Ok(())
                }
            },

            StreamElement::Sm(sm::Nonza::Ack(ack)) => match sm.as_mut() {
                Some(state) => {
                    state.remote_acked(ack.h)?;
                    Ok(())
                }
                None => {
                    log::warn!("peer sent an ack but stream management is off");
                    Ok(())
                }
            },

            StreamElement::Sm(other) => {
                log::warn!("ignoring out-of-phase stream management nonza: {:?}", other);
                Ok(())
            }

            StreamElement::StreamError(error) => {
                log::debug!("received {}", error);
                Err(error.into())
            }

            StreamElement::Features(_)
            | StreamElement::Sasl(_)
            | StreamElement::Starttls(_) => Err(ProtocolError::UnexpectedElement.into()),

            StreamElement::Other(element) => {
                self.emit(SessionEvent::Element(element)).await;
                Ok(())
            }
        }
    }

    async fn emit(&mut self, event: SessionEvent) {
        if self.events.send(event).await.is_err() {
            log::trace!("frontend gone, discarding event");
        }
    }

    /// Terminal failure: report it, then reject everything still
    /// pending.
    async fn fail_session(&mut self, error: Error) {
        log::debug!("session failed terminally: {}", error);
        let shared = SharedIoError::from(&std::io::Error::new(
            std::io::ErrorKind::NotConnected,
            error.to_string(),
        ));
        self.queue.fail_all(&shared);
        self.tracker.fail_all();
        self.emit(SessionEvent::Disconnected(error)).await;
    }

    /// Orderly shutdown: flush the queue, send the footer, wait briefly
    /// for the peer's.
    async fn close_stream(&mut self, mut stream: XmlStream<C::Stream>) -> Result<(), Error> {
        use futures::SinkExt;
        while let Some(entry) = next_if_ready(&mut self.queue).await {
            let element = Element::from((*entry.stanza).clone());
            stream.send(&element).await?;
            entry.set_state(StanzaState::Sent);
        }
        <XmlStream<C::Stream> as SinkExt<&Element>>::close(&mut stream).await?;
        Ok(())
    }
}

/// Pop a queue entry only if one is already available.
async fn next_if_ready(queue: &mut TransmitQueue) -> Option<QueueEntry> {
    tokio::select! {
        biased;
        entry = queue.next() => entry,
        _ = std::future::ready(()) => None,
    }
}

pub(super) static PING_PROBE_ID_PREFIX: &str = "quill-liveness-probe-";
