// Copyright (c) 2025 quill contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use futures::Stream;
use minidom::Element;
use tokio::sync::mpsc;

use stanzas::iq::{Iq, IqType};
use stanzas::jid::Jid;
use stanzas::presence::Presence;
use stanzas::stanza_error::{DefinedCondition, ErrorType, StanzaError};
use stanzas::stream_features::StreamFeatures;
use stanzas::Stanza;

use crate::connect::ServerConnector;
use crate::dispatch::{Dispatcher, ExtensionModule};
use crate::event::{make_id, Event};
use crate::session::{
    self, QueueEntry, SessionConfig, SessionEvent, StanzaStage, StanzaState, StanzaToken,
};
use crate::xmlstream::Timeouts;

pub(crate) mod auth;
pub(crate) mod iq;
pub(crate) mod login;

pub use iq::{IqFailure, IqRequest, IqResponse, IqResponseToken};

#[cfg(feature = "starttls")]
use crate::connect::{DnsConfig, StartTlsServerConnector};
#[cfg(feature = "insecure-tcp")]
use crate::connect::TcpServerConnector;

/// Cheap cloneable handle through which extension modules and the
/// dispatch layer inject stanzas into the send queue.
///
/// Stanzas sent this way are untracked; use
/// [`Client::send_stanza`] when delivery feedback is needed.
#[derive(Clone)]
pub struct StanzaSender {
    tx: mpsc::UnboundedSender<QueueEntry>,
}

impl StanzaSender {
    pub(crate) fn new(tx: mpsc::UnboundedSender<QueueEntry>) -> Self {
        Self { tx }
    }

    /// Queue a stanza for transmission.
    ///
    /// Fails only when the stream has been closed for good.
    pub fn send<S: Into<Stanza>>(&self, stanza: S) -> Result<(), crate::Error> {
        let mut stanza = stanza.into();
        stanza.ensure_id(make_id);
        self.tx
            .send(QueueEntry::untracked(Box::new(stanza)))
            .map_err(|_| crate::Error::Disconnected)
    }
}

/// XMPP client connection and state.
///
/// Owns a background worker which keeps the stream alive (reconnecting
/// with backoff, resuming via stream management where possible) and
/// multiplexes stanzas over it.
///
/// This implements [`Stream`](#impl-Stream) to deliver stream state
/// changes and incoming stanzas; sending goes through
/// [`send_stanza`][`Client::send_stanza`] and
/// [`send_request`][`Client::send_request`].
pub struct Client {
    sends: mpsc::Sender<QueueEntry>,
    sender: StanzaSender,
    events: mpsc::Receiver<SessionEvent>,
    tracker: Arc<iq::IqResponseTracker>,
    dispatcher: Dispatcher,
    bound_jid: Option<Jid>,
    features: Option<StreamFeatures>,
}

#[cfg(feature = "starttls")]
impl Client {
    /// Start a new XMPP client over StartTLS with SRV resolution and
    /// automatic reconnection.
    ///
    /// Start polling the returned instance so that it will connect and
    /// yield events.
    pub fn new<P: Into<String>>(jid: Jid, password: P) -> Self {
        let dns_config = DnsConfig::srv_default_client(jid.domain());
        Self::new_with_connector(
            jid,
            password,
            StartTlsServerConnector::from(dns_config),
            Timeouts::default(),
            true,
        )
    }
}

#[cfg(feature = "insecure-tcp")]
impl Client {
    /// Start a new XMPP client over plaintext TCP.
    ///
    /// Only sensible against localhost or inside a test harness.
    pub fn new_plaintext<P: Into<String>>(
        jid: Jid,
        password: P,
        dns_config: crate::connect::DnsConfig,
        timeouts: Timeouts,
    ) -> Self {
        Self::new_with_connector(
            jid,
            password,
            TcpServerConnector::from(dns_config),
            timeouts,
            true,
        )
    }
}

impl Client {
    /// Start a new client on a custom connector.
    ///
    /// `auto_reconnect` controls whether unexpected disconnects schedule
    /// a reconnection attempt; user-initiated
    /// [`disconnect`][`Client::disconnect`] never does.
    pub fn new_with_connector<P: Into<String>, C: ServerConnector>(
        jid: Jid,
        password: P,
        connector: C,
        timeouts: Timeouts,
        auto_reconnect: bool,
    ) -> Self {
        let tracker = Arc::new(iq::IqResponseTracker::new());
        let config = SessionConfig {
            jid,
            password: password.into(),
            timeouts,
            reconnect: auto_reconnect,
        };
        let handle = session::spawn(connector, config, tracker.clone());
        Self {
            sends: handle.sends,
            sender: StanzaSender::new(handle.control),
            events: handle.events,
            tracker,
            dispatcher: Dispatcher::new(),
            bound_jid: None,
            features: None,
        }
    }

    /// Get the client's bound JID (the one reported by the XMPP
    /// server).
    pub fn bound_jid(&self) -> Option<&Jid> {
        self.bound_jid.as_ref()
    }

    /// Get the features of the current stream, once online.
    pub fn get_stream_features(&self) -> Option<&StreamFeatures> {
        self.features.as_ref()
    }

    /// A cloneable sender for fire-and-forget stanzas.
    pub fn stanza_sender(&self) -> StanzaSender {
        self.sender.clone()
    }

    /// Register an extension module.
    ///
    /// Higher `priority` runs earlier; modules with equal priority run
    /// in registration order.
    pub fn register_extension(&mut self, priority: i32, module: Box<dyn ExtensionModule>) {
        self.dispatcher.register(priority, module);
    }

    /// The union of all registered extensions' advertised disco#info
    /// features.
    pub fn discovery_features(&self) -> Vec<&'static str> {
        self.dispatcher.discovery_features()
    }

    /// Send a stanza, assigning an id when none is set.
    ///
    /// Completion means the stanza was written to the transport, not
    /// that the peer received it. With stream management active, the
    /// returned token can further be awaited up to
    /// [`StanzaStage::Acked`] for delivery confirmation; without it,
    /// `Acked` is never reached.
    ///
    /// # Panics
    ///
    /// Panics if the stream worker has crashed, which only a bug can
    /// cause.
    pub async fn send_stanza<S: Into<Stanza>>(
        &mut self,
        stanza: S,
    ) -> Result<StanzaToken, std::io::Error> {
        let mut stanza = stanza.into();
        stanza.ensure_id(make_id);
        let (entry, mut token) = QueueEntry::tracked(Box::new(stanza));
        self.sends
            .send(entry)
            .await
            .expect("stream worker has crashed");
        match token.wait_for(StanzaStage::Sent).await {
            None | Some(StanzaState::Dropped) => Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "stream disconnected fatally before the stanza could be sent",
            )),
            Some(StanzaState::Failed { error }) => Err(error.into_io_error()),
            // Queued < Sent, so wait_for cannot return it.
            Some(_) => Ok(token),
        }
    }

    /// Send an iq get or set and track its response.
    ///
    /// The returned token resolves exactly once: with the matching
    /// result or error response, or with an [`IqFailure`] when the
    /// request can no longer be answered. There is no built-in timeout.
    ///
    /// # Panics
    ///
    /// Panics if the stream worker has crashed, which only a bug can
    /// cause.
    pub async fn send_request(
        &mut self,
        to: Option<Jid>,
        request: IqRequest,
    ) -> IqResponseToken {
        let (iq, mut token) = self.tracker.allocate_iq_handle(None, to, request);
        let (entry, stanza_token) = QueueEntry::tracked(Box::new(Stanza::Iq(iq)));
        self.sends
            .send(entry)
            .await
            .expect("stream worker has crashed");
        token.set_stanza_token(stanza_token);
        token
    }

    /// Close the session cleanly.
    ///
    /// Sends an unavailable presence when the stream is up, closes the
    /// stream envelope and stops any reconnection. Outstanding requests
    /// are rejected with a connection-closed error.
    pub async fn disconnect(self) {
        if self.bound_jid.is_some() {
            // The worker drains the queue before it sends the stream
            // footer, so the unavailable presence goes out first.
            let entry =
                QueueEntry::untracked(Box::new(Stanza::Presence(Presence::unavailable())));
            let _ = self.sends.send(entry).await;
        }
        let Client { mut events, .. } = self;
        // Dropping the send sides tells the worker to shut down; drain
        // its remaining events so it is not blocked on us meanwhile.
        while let Some(event) = events.recv().await {
            log::trace!("discarding event {:?} after disconnect", event);
        }
    }
}

/// Incoming XMPP events.
///
/// In an `async fn` you may want to use this with `use
/// futures::stream::StreamExt;`.
impl Stream for Client {
    type Item = Event;

    /// Low-level read on the XMPP stream, allowing the underlying
    /// machinery to:
    ///
    /// * connect,
    /// * starttls,
    /// * authenticate,
    /// * bind a session, and finally
    /// * receive stanzas
    ///
    /// ...for your client.
    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            let event = match ready!(this.events.poll_recv(cx)) {
                Some(event) => event,
                None => return Poll::Ready(None),
            };
            match event {
                SessionEvent::Online {
                    bound_jid,
                    features,
                    resumed,
                } => {
                    this.features = Some(*features);
                    // On resumption the worker does not re-bind; the JID
                    // from the previous negotiation stays authoritative.
                    let bound_jid = if resumed {
                        this.bound_jid.clone().unwrap_or(bound_jid)
                    } else {
                        bound_jid
                    };
                    this.bound_jid = Some(bound_jid.clone());
                    return Poll::Ready(Some(Event::Online { bound_jid, resumed }));
                }

                SessionEvent::Disconnected(error) => {
                    return Poll::Ready(Some(Event::Disconnected(error)));
                }

                SessionEvent::Stanza(stanza) => {
                    if !this.dispatcher.is_empty() {
                        let element = Element::from(stanza.clone());
                        if this.dispatcher.dispatch(&this.sender, &element) {
                            continue;
                        }
                    }
                    if let Stanza::Iq(iq) = &stanza {
                        if matches!(iq.payload, IqType::Get(_) | IqType::Set(_)) {
                            // Nobody claimed the request; it must still
                            // be answered.
                            let reply = Iq::error_reply(
                                iq,
                                StanzaError::new(
                                    ErrorType::Cancel,
                                    DefinedCondition::ServiceUnavailable,
                                    "",
                                ),
                            );
                            if let Err(e) = this.sender.send(Stanza::Iq(reply)) {
                                log::debug!("could not send fallback error reply: {}", e);
                            }
                            continue;
                        }
                    }
                    return Poll::Ready(Some(Event::Stanza(stanza)));
                }

                SessionEvent::Element(element) => {
                    if this.dispatcher.dispatch(&this.sender, &element) {
                        continue;
                    }
                    return Poll::Ready(Some(Event::Element(element)));
                }
            }
        }
    }
}
