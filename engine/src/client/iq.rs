// Copyright (c) 2025 quill contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The outstanding-request table: correlation of iq requests with their
//! responses.

use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::io;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::sync::{Arc, Mutex, Weak};
use std::task::{ready, Context, Poll};

use futures::Stream;
use minidom::Element;
use tokio::sync::oneshot;

use stanzas::iq::{Iq, IqType};
use stanzas::jid::Jid;
use stanzas::stanza_error::StanzaError;

use crate::event::make_id;
use crate::session::{StanzaState, StanzaToken};

/// An iq request payload.
pub enum IqRequest {
    /// Payload for a `type="get"` request.
    Get(Element),

    /// Payload for a `type="set"` request.
    Set(Element),
}

impl From<IqRequest> for IqType {
    fn from(request: IqRequest) -> IqType {
        match request {
            IqRequest::Get(payload) => IqType::Get(payload),
            IqRequest::Set(payload) => IqType::Set(payload),
        }
    }
}

/// An iq response payload.
///
/// Note that a stanza-level error response is a *successful* outcome of
/// the request future: the request was delivered and answered.
#[derive(Debug)]
pub enum IqResponse {
    /// Payload for a `type="result"` response.
    Result(Option<Element>),

    /// Payload for a `type="error"` response.
    Error(StanzaError),
}

/// Why an iq request will never get its response.
#[derive(Debug)]
pub enum IqFailure {
    /// The engine's stream worker went away before the response arrived
    /// and the stream is not coming back.
    LostWorker,

    /// The request could not be sent.
    SendError(io::Error),
}

impl fmt::Display for IqFailure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            IqFailure::LostWorker => {
                f.write_str("stream closed before the iq response arrived")
            }
            IqFailure::SendError(e) => write!(f, "send error: {}", e),
        }
    }
}

impl StdError for IqFailure {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            IqFailure::SendError(e) => Some(e),
            IqFailure::LostWorker => None,
        }
    }
}

/// Key of one outstanding request: the id we sent, plus the peer it was
/// addressed to (`None` targets our own server).
type IqKey = String;

struct PendingEntry {
    /// Where the request was addressed; a response must come from there
    /// (or from nowhere/our own account, for server-addressed requests).
    to: Option<Jid>,
    sink: oneshot::Sender<Result<IqResponse, IqFailure>>,
}

type IqMap = BTreeMap<IqKey, PendingEntry>;

struct IqMapEntryHandle {
    key: IqKey,
    map: Weak<Mutex<IqMap>>,
}

impl Drop for IqMapEntryHandle {
    fn drop(&mut self) {
        let Some(map) = self.map.upgrade() else {
            return;
        };
        let Ok(mut map) = map.lock() else {
            return;
        };
        map.remove(&self.key);
    }
}

pin_project_lite::pin_project! {
    /// Handle for awaiting an iq response.
    ///
    /// Resolves exactly once: with [`IqResponse`] when the matching
    /// result or error stanza arrives, or with [`IqFailure`] when it
    /// never can. There is no built-in timeout; combine with
    /// [`tokio::time::timeout`] when one is wanted.
    ///
    /// Dropping the token cancels the correlation entry: a response
    /// arriving later is treated like any other unsolicited iq.
    pub struct IqResponseToken {
        entry: Option<IqMapEntryHandle>,
        #[pin]
        stanza_token: Option<tokio_stream::wrappers::WatchStream<StanzaState>>,
        #[pin]
        inner: oneshot::Receiver<Result<IqResponse, IqFailure>>,
    }
}

impl IqResponseToken {
    /// Tie the transmission token of the iq *request* to this response
    /// token, so send failures surface here.
    pub(crate) fn set_stanza_token(&mut self, token: StanzaToken) {
        assert!(self.stanza_token.is_none());
        self.stanza_token = Some(token.into_stream());
    }
}

impl Future for IqResponseToken {
    type Output = Result<IqResponse, IqFailure>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut this = self.project();
        match this.inner.poll(cx) {
            Poll::Ready(Ok(result)) => {
                this.entry.take();
                return Poll::Ready(result);
            }
            Poll::Ready(Err(_)) => {
                // The sink can only disappear together with the map.
                this.entry.take();
                return Poll::Ready(Err(IqFailure::LostWorker));
            }
            Poll::Pending => (),
        }

        loop {
            match this.stanza_token.as_mut().as_pin_mut() {
                Some(stream) => match ready!(stream.poll_next(cx)) {
                    Some(StanzaState::Queued) => (),

                    Some(StanzaState::Sent) | Some(StanzaState::Acked) => {
                        // On the wire; from here only the oneshot
                        // matters.
                        this.stanza_token.set(None);
                        return Poll::Pending;
                    }

                    Some(StanzaState::Failed { error }) => {
                        this.entry.take();
                        return Poll::Ready(Err(IqFailure::SendError(error.into_io_error())));
                    }

                    Some(StanzaState::Dropped) | None => {
                        this.entry.take();
                        return Poll::Ready(Err(IqFailure::LostWorker));
                    }
                },
                None => return Poll::Pending,
            }
        }
    }
}

/// The set of requests whose responses have not arrived yet.
///
/// Shared between the frontend (which allocates entries) and the stream
/// worker (which matches incoming iqs against them).
pub(crate) struct IqResponseTracker {
    map: Arc<Mutex<IqMap>>,
}

impl IqResponseTracker {
    pub(crate) fn new() -> Self {
        Self {
            map: Arc::new(Mutex::new(IqMap::new())),
        }
    }

    /// Whether this response may answer an entry addressed to `to`.
    fn response_matches(expected: &Option<Jid>, from: &Option<Jid>) -> bool {
        match (expected, from) {
            // Addressed requests must be answered by exactly that peer.
            (Some(expected), Some(from)) => expected == from,
            (Some(_), None) => false,
            // Server-addressed requests are answered without a from, or
            // from the server/our own account; we cannot distinguish
            // those here, so any origin is accepted.
            (None, _) => true,
        }
    }

    /// Attempt to treat an incoming iq as a tracked response.
    ///
    /// Returns the iq unharmed if no entry matches. A matching entry is
    /// removed before its sink resolves, so a duplicate response cannot
    /// resolve anything twice.
    pub(crate) fn handle_iq(&self, iq: Iq) -> ControlFlow<(), Iq> {
        let payload = match iq.payload {
            IqType::Result(result) => IqResponse::Result(result),
            IqType::Error(error) => IqResponse::Error(error),
            _ => return ControlFlow::Continue(iq),
        };
        let mut map = self.map.lock().unwrap();
        let matched = map
            .get(&iq.id)
            .map(|entry| Self::response_matches(&entry.to, &iq.from))
            .unwrap_or(false);
        if matched {
            if let Some(entry) = map.remove(&iq.id) {
                let _ = entry.sink.send(Ok(payload));
            }
            return ControlFlow::Break(());
        }
        log::trace!(
            "iq response from {:?} with id {:?} matches no outstanding request",
            iq.from,
            iq.id
        );
        ControlFlow::Continue(Iq {
            from: iq.from,
            to: iq.to,
            id: iq.id,
            payload: match payload {
                IqResponse::Result(result) => IqType::Result(result),
                IqResponse::Error(error) => IqType::Error(error),
            },
        })
    }

    /// Allocate a fresh entry, assigning the request a unique id.
    pub(crate) fn allocate_iq_handle(
        &self,
        from: Option<Jid>,
        to: Option<Jid>,
        request: IqRequest,
    ) -> (Iq, IqResponseToken) {
        let id = make_id();
        let (tx, rx) = oneshot::channel();
        let mut map = self.map.lock().unwrap();
        // make_id is random over u64; a collision here is a bug, not bad
        // luck.
        assert!(map.get(&id).is_none());
        let token = IqResponseToken {
            entry: Some(IqMapEntryHandle {
                key: id.clone(),
                map: Arc::downgrade(&self.map),
            }),
            stanza_token: None,
            inner: rx,
        };
        map.insert(
            id.clone(),
            PendingEntry {
                to: to.clone(),
                sink: tx,
            },
        );
        (
            Iq {
                from,
                to,
                id,
                payload: request.into(),
            },
            token,
        )
    }

    /// Fail every outstanding request; used when the stream ends for
    /// good.
    pub(crate) fn fail_all(&self) {
        let mut map = self.map.lock().unwrap();
        for (_, entry) in std::mem::take(&mut *map) {
            let _ = entry.sink.send(Err(IqFailure::LostWorker));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn response(id: &str, from: Option<&str>) -> Iq {
        Iq {
            from: from.map(|jid| Jid::from_str(jid).unwrap()),
            to: None,
            id: id.to_owned(),
            payload: IqType::Result(None),
        }
    }

    #[tokio::test]
    async fn resolves_exactly_once() {
        let tracker = IqResponseTracker::new();
        let (iq, token) = tracker.allocate_iq_handle(
            None,
            Some(Jid::from_str("peer@example.org/hall").unwrap()),
            IqRequest::Get(Element::builder("ping", "urn:xmpp:ping").build()),
        );

        assert!(matches!(
            tracker.handle_iq(response(&iq.id, Some("peer@example.org/hall"))),
            ControlFlow::Break(())
        ));
        // The duplicate is not consumed.
        assert!(matches!(
            tracker.handle_iq(response(&iq.id, Some("peer@example.org/hall"))),
            ControlFlow::Continue(_)
        ));

        match token.await {
            Ok(IqResponse::Result(None)) => (),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn response_from_wrong_sender_is_not_matched() {
        let tracker = IqResponseTracker::new();
        let (iq, _token) = tracker.allocate_iq_handle(
            None,
            Some(Jid::from_str("peer@example.org/hall").unwrap()),
            IqRequest::Get(Element::builder("ping", "urn:xmpp:ping").build()),
        );

        assert!(matches!(
            tracker.handle_iq(response(&iq.id, Some("mallory@example.org/x"))),
            ControlFlow::Continue(_)
        ));
    }

    #[tokio::test]
    async fn dropping_the_token_cancels_tracking() {
        let tracker = IqResponseTracker::new();
        let (iq, token) = tracker.allocate_iq_handle(
            None,
            None,
            IqRequest::Get(Element::builder("ping", "urn:xmpp:ping").build()),
        );
        drop(token);
        assert!(matches!(
            tracker.handle_iq(response(&iq.id, None)),
            ControlFlow::Continue(_)
        ));
    }

    #[tokio::test]
    async fn fail_all_rejects_pending_requests() {
        let tracker = IqResponseTracker::new();
        let (_iq, token) = tracker.allocate_iq_handle(
            None,
            None,
            IqRequest::Set(Element::builder("x", "urn:example").build()),
        );
        tracker.fail_all();
        match token.await {
            Err(IqFailure::LostWorker) => (),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}
