// Copyright (c) 2025 quill contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::collections::{vec_deque, VecDeque};
use std::fmt;

use stanzas::sm;

use crate::error::ProtocolError;

use super::queue::{QueueEntry, StanzaState};

/// Stream management state (XEP-0198) for one logical stream.
///
/// Survives TCP reconnections when the peer allows resumption; the
/// unacknowledged queue and both counters carry over, which is exactly
/// what makes resumption lossless.
pub(crate) struct SmState {
    /// The peer's counter value covering everything already acked.
    outbound_base: u32,

    /// Count of stanzas we have received and handled.
    inbound: u32,

    /// Resumption coordinates, when the peer granted them.
    resumption: Option<Resumption>,

    /// Sent but unacknowledged stanzas, oldest first.
    unacked: VecDeque<QueueEntry>,
}

struct Resumption {
    id: sm::StreamId,
    /// Preferred reconnection address indicated by the peer.
    location: Option<String>,
}

impl fmt::Debug for SmState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SmState")
            .field("outbound_base", &self.outbound_base)
            .field("inbound", &self.inbound)
            .field("resumable", &self.resumption.is_some())
            .field("len(unacked)", &self.unacked.len())
            .finish()
    }
}

impl From<sm::Enabled> for SmState {
    fn from(enabled: sm::Enabled) -> SmState {
        let resumption = if enabled.resume {
            match enabled.id {
                Some(id) => Some(Resumption {
                    id,
                    location: enabled.location,
                }),
                None => {
                    log::warn!(
                        "peer sent <enabled resume='true'/> without an id; \
                         stream will not be resumable"
                    );
                    None
                }
            }
        } else {
            None
        };
        SmState {
            outbound_base: 0,
            inbound: 0,
            resumption,
            unacked: VecDeque::new(),
        }
    }
}

impl SmState {
    /// Record a stanza as sent-but-unacknowledged.
    pub(crate) fn enqueue(&mut self, entry: QueueEntry) {
        self.unacked.push_back(entry);
        log::trace!("{} unacked stanzas", self.unacked.len());
    }

    /// Count one received stanza.
    pub(crate) fn count_inbound(&mut self) {
        self.inbound = self.inbound.wrapping_add(1);
    }

    /// The inbound counter, as sent in `<a/>` and `<resume/>`.
    pub(crate) fn inbound_ctr(&self) -> u32 {
        self.inbound
    }

    /// Process an acknowledgement counter from the peer.
    ///
    /// Counters are mod 2³² (which `u32` gives us for free) and must
    /// never move backwards. Following RFC 1982 serial arithmetic, a
    /// wrapped difference of more than half the number space reads as a
    /// regression; both that and overshooting the sent count are
    /// protocol violations fatal to the stream.
    pub(crate) fn remote_acked(&mut self, h: u32) -> Result<(), ProtocolError> {
        let to_drop = h.wrapping_sub(self.outbound_base) as usize;
        if to_drop == 0 {
            return Ok(());
        }
        if to_drop > self.unacked.len() {
            if to_drop as u32 > u32::MAX / 2 {
                return Err(ProtocolError::AckWentBackwards {
                    remote: h,
                    local: self.outbound_base,
                });
            }
            return Err(ProtocolError::AckedMoreThanSent {
                remote: h,
                limit: self
                    .outbound_base
                    .wrapping_add(self.unacked.len() as u32),
            });
        }
        for entry in self.unacked.drain(..to_drop) {
            entry.set_state(StanzaState::Acked);
        }
        self.outbound_base = h;
        log::debug!("peer acked {} stanzas", to_drop);
        Ok(())
    }

    /// Process a successful resumption.
    ///
    /// Applies the peer's counter, then hands back everything still
    /// unacknowledged for retransmission: the peer never saw those, they
    /// were lost with the previous connection.
    pub(crate) fn resume(
        &mut self,
        h: u32,
    ) -> Result<vec_deque::Drain<'_, QueueEntry>, ProtocolError> {
        self.remote_acked(h)?;
        Ok(self.unacked.drain(..))
    }

    /// The id and inbound counter needed for a resume request, if the
    /// stream is resumable.
    pub(crate) fn resume_info(&self) -> Option<(&sm::StreamId, u32)> {
        self.resumption
            .as_ref()
            .map(|resumption| (&resumption.id, self.inbound))
    }

    /// The peer's preferred reconnection address, if any.
    #[allow(dead_code)]
    pub(crate) fn location(&self) -> Option<&str> {
        self.resumption
            .as_ref()
            .and_then(|resumption| resumption.location.as_deref())
    }

    /// Mark every unacknowledged stanza as dropped, e.g. when a
    /// resumption attempt is refused and the session starts over.
    pub(crate) fn drop_unacked(&mut self) {
        for entry in self.unacked.drain(..) {
            entry.set_state(StanzaState::Dropped);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use stanzas::iq::Iq;
    use stanzas::ping::Ping;
    use stanzas::Stanza;

    use crate::session::queue::{StanzaStage, StanzaToken};

    fn enabled_state() -> SmState {
        SmState::from(sm::Enabled {
            id: Some(sm::StreamId("deadbeef".to_owned())),
            location: None,
            max: None,
            resume: true,
        })
    }

    fn push(state: &mut SmState, id: &str) -> StanzaToken {
        let (entry, token) =
            QueueEntry::tracked(Box::new(Stanza::Iq(Iq::from_get(id, Ping))));
        entry.set_state(StanzaState::Sent);
        state.enqueue(entry);
        token
    }

    fn stage(token: &StanzaToken) -> StanzaStage {
        StanzaStage::from(&token.state())
    }

    #[test]
    fn acks_are_monotonic() {
        let mut state = enabled_state();
        let tokens: Vec<_> = (0..9).map(|i| push(&mut state, &format!("i{}", i))).collect();

        state.remote_acked(2).unwrap();
        assert!(tokens[..2].iter().all(|t| stage(t) == StanzaStage::Acked));
        assert!(tokens[2..].iter().all(|t| stage(t) == StanzaStage::Sent));

        state.remote_acked(5).unwrap();
        assert!(tokens[..5].iter().all(|t| stage(t) == StanzaStage::Acked));

        // Repeating the same value is a no-op.
        state.remote_acked(5).unwrap();
        assert!(tokens[5..].iter().all(|t| stage(t) == StanzaStage::Sent));

        state.remote_acked(9).unwrap();
        assert!(tokens.iter().all(|t| stage(t) == StanzaStage::Acked));
    }

    #[test]
    fn regressing_ack_is_a_protocol_violation() {
        let mut state = enabled_state();
        for i in 0..9 {
            push(&mut state, &format!("i{}", i));
        }
        state.remote_acked(9).unwrap();
        match state.remote_acked(3) {
            Err(ProtocolError::AckWentBackwards { remote: 3, local: 9 }) => (),
            other => panic!("expected AckWentBackwards, got {:?}", other.err()),
        }
    }

    #[test]
    fn overshooting_ack_is_a_protocol_violation() {
        let mut state = enabled_state();
        push(&mut state, "only");
        match state.remote_acked(2) {
            Err(ProtocolError::AckedMoreThanSent { remote: 2, limit: 1 }) => (),
            other => panic!("expected AckedMoreThanSent, got {:?}", other.err()),
        }
    }

    #[test]
    fn resume_retransmits_exactly_the_unacked_tail() {
        let mut state = enabled_state();
        let tokens: Vec<_> = (0..3).map(|i| push(&mut state, &format!("i{}", i))).collect();

        // The peer saw two of the three stanzas before the link died.
        let retransmit: Vec<_> = state.resume(2).unwrap().collect();
        assert_eq!(retransmit.len(), 1);
        match &*retransmit[0].stanza {
            Stanza::Iq(iq) => assert_eq!(iq.id, "i2"),
            other => panic!("wrong stanza: {:?}", other),
        }
        assert_eq!(stage(&tokens[0]), StanzaStage::Acked);
        assert_eq!(stage(&tokens[1]), StanzaStage::Acked);
        assert_eq!(stage(&tokens[2]), StanzaStage::Sent);
    }

    #[test]
    fn counters_wrap_mod_2_32() {
        let mut state = enabled_state();
        state.outbound_base = u32::MAX - 1;
        let _t1 = push(&mut state, "a");
        let _t2 = push(&mut state, "b");
        // Acking past the wrap point covers both stanzas.
        state.remote_acked(0).unwrap();
        assert_eq!(state.outbound_base, 0);
        assert_eq!(state.unacked.len(), 0);
    }

    #[test]
    fn inbound_counter_counts_stanzas() {
        let mut state = enabled_state();
        assert_eq!(state.inbound_ctr(), 0);
        state.count_inbound();
        state.count_inbound();
        assert_eq!(state.inbound_ctr(), 2);
        let (id, h) = state.resume_info().unwrap();
        assert_eq!(id.0, "deadbeef");
        assert_eq!(h, 2);
    }
}
