// Copyright (c) 2025 quill contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::collections::VecDeque;
use std::fmt;
use std::io;

use tokio::sync::{mpsc, watch};

use stanzas::Stanza;

/// A cloneable snapshot of an [`io::Error`].
///
/// Send failures must be reported to every queued stanza, so the error
/// needs to fan out; `io::Error` itself is not `Clone`.
#[derive(Debug, Clone)]
pub struct SharedIoError {
    kind: io::ErrorKind,
    message: String,
}

impl SharedIoError {
    /// The original error kind.
    pub fn kind(&self) -> io::ErrorKind {
        self.kind
    }

    /// Convert back into an [`io::Error`].
    pub fn into_io_error(self) -> io::Error {
        io::Error::new(self.kind, self.message)
    }
}

impl From<&io::Error> for SharedIoError {
    fn from(e: &io::Error) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

impl fmt::Display for SharedIoError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for SharedIoError {}

/// The stages of stanza transmission, in order.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub enum StanzaStage {
    /// In the transmit queue, not on the wire yet.
    Queued,

    /// Serialized and handed to the transport.
    Sent,

    /// Confirmed received by the peer via stream management.
    ///
    /// Only ever reached on streams where XEP-0198 was negotiated.
    Acked,

    /// Transmission failed.
    Failed,

    /// Dropped from the queue before it could be sent, e.g. because the
    /// stream ended for good.
    Dropped,
}

/// State of one stanza in transit to the peer.
#[derive(Debug, Clone)]
pub enum StanzaState {
    /// In the transmit queue.
    Queued,

    /// Written to the transport; receipt unconfirmed.
    Sent,

    /// Receipt confirmed by the peer's acknowledgement counter.
    Acked,

    /// Transmission failed for good.
    Failed {
        /// What went wrong.
        error: SharedIoError,
    },

    /// Dropped from the queue before transmission.
    Dropped,
}

impl From<&StanzaState> for StanzaStage {
    fn from(state: &StanzaState) -> StanzaStage {
        match state {
            StanzaState::Queued => StanzaStage::Queued,
            StanzaState::Sent => StanzaStage::Sent,
            StanzaState::Acked => StanzaStage::Acked,
            StanzaState::Failed { .. } => StanzaStage::Failed,
            StanzaState::Dropped => StanzaStage::Dropped,
        }
    }
}

/// Tracks one stanza's transmission progress.
///
/// Obtained from [`Client::send_stanza`][`crate::Client::send_stanza`].
#[derive(Clone)]
pub struct StanzaToken {
    inner: watch::Receiver<StanzaState>,
}

impl StanzaToken {
    /// Wait until transmission reaches the given stage.
    ///
    /// Returns `None` if the stanza is dropped from tracking before that
    /// stage can be reached.
    pub async fn wait_for(&mut self, stage: StanzaStage) -> Option<StanzaState> {
        self.inner
            .wait_for(|state| StanzaStage::from(state) >= stage)
            .await
            .map(|state| state.clone())
            .ok()
    }

    /// Read the current transmission state.
    pub fn state(&self) -> StanzaState {
        self.inner.borrow().clone()
    }

    pub(crate) fn into_stream(self) -> tokio_stream::wrappers::WatchStream<StanzaState> {
        tokio_stream::wrappers::WatchStream::new(self.inner)
    }
}

/// One stanza on its way out, with its progress reporter.
pub(crate) struct QueueEntry {
    pub(crate) stanza: Box<Stanza>,
    pub(crate) token: watch::Sender<StanzaState>,
}

impl QueueEntry {
    /// Wrap a stanza without anyone watching its progress.
    pub(crate) fn untracked(stanza: Box<Stanza>) -> Self {
        Self::tracked(stanza).0
    }

    /// Wrap a stanza and hand out a token watching its progress.
    pub(crate) fn tracked(stanza: Box<Stanza>) -> (Self, StanzaToken) {
        let (tx, rx) = watch::channel(StanzaState::Queued);
        (
            QueueEntry { stanza, token: tx },
            StanzaToken { inner: rx },
        )
    }

    pub(crate) fn set_state(&self, state: StanzaState) {
        // Nobody watching is fine; send_replace does not error on a
        // closed channel.
        self.token.send_replace(state);
    }
}

/// The outbound stanza queue of one session.
///
/// User sends arrive through a bounded channel (that bound is the
/// backpressure the frontend sees); internally generated stanzas (acks,
/// automatic error replies) go through an unbounded control channel so
/// the worker never deadlocks against its own sends. Retransmissions are
/// prepended, keeping the original send order.
pub(crate) struct TransmitQueue {
    user: mpsc::Receiver<QueueEntry>,
    control: mpsc::UnboundedReceiver<QueueEntry>,
    head: VecDeque<QueueEntry>,
}

impl TransmitQueue {
    pub(crate) fn new(
        user: mpsc::Receiver<QueueEntry>,
        control: mpsc::UnboundedReceiver<QueueEntry>,
    ) -> Self {
        Self {
            user,
            control,
            head: VecDeque::new(),
        }
    }

    /// Next stanza to put on the wire.
    ///
    /// Resolves to `None` once both senders are gone and everything
    /// local has drained: that is the clean-shutdown signal.
    ///
    /// Cancellation-safe: an entry is only taken out of a channel in the
    /// same poll that returns it.
    pub(crate) async fn next(&mut self) -> Option<QueueEntry> {
        if let Some(entry) = self.head.pop_front() {
            return Some(entry);
        }
        tokio::select! {
            entry = self.control.recv() => match entry {
                Some(entry) => Some(entry),
                // Control channel gone; keep serving user sends.
                None => self.user.recv().await,
            },
            entry = self.user.recv() => match entry {
                Some(entry) => Some(entry),
                // User side gone; drain any late control traffic.
                None => self.control.recv().await,
            },
        }
    }

    /// Put retransmissions back at the front, preserving their order.
    pub(crate) fn requeue_all<I: IntoIterator<Item = QueueEntry>>(&mut self, entries: I) {
        let mut tail: VecDeque<QueueEntry> = std::mem::take(&mut self.head);
        self.head = entries.into_iter().collect();
        self.head.append(&mut tail);
    }

    /// Enqueue a worker-generated stanza behind any local entries but
    /// ahead of everything still in the channels.
    pub(crate) fn push_internal(&mut self, entry: QueueEntry) {
        self.head.push_back(entry);
    }

    /// True when the user side has hung up.
    pub(crate) fn is_closed(&self) -> bool {
        self.user.is_closed()
    }

    /// Fail everything currently queued. Future sends are unaffected.
    pub(crate) fn fail_all(&mut self, error: &SharedIoError) {
        for entry in self.head.drain(..) {
            entry.set_state(StanzaState::Failed {
                error: error.clone(),
            });
        }
        while let Ok(entry) = self.user.try_recv() {
            entry.set_state(StanzaState::Failed {
                error: error.clone(),
            });
        }
        while let Ok(entry) = self.control.try_recv() {
            entry.set_state(StanzaState::Failed {
                error: error.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use stanzas::iq::{Iq, IqType};
    use stanzas::ping::Ping;

    fn entry(id: &str) -> QueueEntry {
        QueueEntry::untracked(Box::new(Stanza::Iq(Iq::from_get(id, Ping))))
    }

    fn id_of(entry: &QueueEntry) -> String {
        match &*entry.stanza {
            Stanza::Iq(Iq { id, .. }) => id.clone(),
            _ => panic!("not an iq"),
        }
    }

    #[tokio::test]
    async fn requeue_preserves_order() {
        let (_user_tx, user_rx) = mpsc::channel(4);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let mut queue = TransmitQueue::new(user_rx, control_rx);

        queue.requeue_all([entry("a"), entry("b")]);
        control_tx.send(entry("c")).unwrap();

        assert_eq!(id_of(&queue.next().await.unwrap()), "a");
        assert_eq!(id_of(&queue.next().await.unwrap()), "b");
        assert_eq!(id_of(&queue.next().await.unwrap()), "c");
    }

    #[tokio::test]
    async fn closes_after_both_senders_drop() {
        let (user_tx, user_rx) = mpsc::channel(4);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let mut queue = TransmitQueue::new(user_rx, control_rx);

        user_tx.send(entry("x")).await.unwrap();
        drop(user_tx);
        drop(control_tx);

        assert_eq!(id_of(&queue.next().await.unwrap()), "x");
        assert!(queue.next().await.is_none());
    }

    #[tokio::test]
    async fn fail_all_reports_to_tokens() {
        let (user_tx, user_rx) = mpsc::channel(4);
        let (_control_tx, control_rx) = mpsc::unbounded_channel();
        let mut queue = TransmitQueue::new(user_rx, control_rx);

        let (entry, mut token) =
            QueueEntry::tracked(Box::new(Stanza::Iq(Iq::from_get("y", Ping))));
        user_tx.send(entry).await.unwrap();

        let error = SharedIoError::from(&io::Error::new(io::ErrorKind::NotConnected, "gone"));
        queue.fail_all(&error);

        match token.wait_for(StanzaStage::Failed).await {
            Some(StanzaState::Failed { error }) => {
                assert_eq!(error.kind(), io::ErrorKind::NotConnected)
            }
            other => panic!("unexpected state: {:?}", other.map(|s| StanzaStage::from(&s))),
        }
    }

    #[test]
    fn iq_type_is_preserved_through_the_queue() {
        let entry = entry("z");
        match &*entry.stanza {
            Stanza::Iq(Iq {
                payload: IqType::Get(_),
                ..
            }) => (),
            _ => panic!("payload type lost"),
        }
    }
}
