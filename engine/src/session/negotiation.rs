// Copyright (c) 2025 quill contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Per-connection session negotiation, entered on an authenticated
//! stream: either resume the previous stream-management session, or bind
//! a resource (plus legacy session establishment) and enable stream
//! management afresh.
//!
//! Any step the peer rejects ends the attempt with an error; whether a
//! new attempt is made is the reconnect policy's decision, not ours.

use futures::StreamExt;
use minidom::Element;
use tokio::io::{AsyncBufRead, AsyncWrite};

use stanzas::bind::{BindQuery, BindResponse};
use stanzas::iq::{Iq, IqType};
use stanzas::jid::Jid;
use stanzas::ns;
use stanzas::session::Session;
use stanzas::sm;
use stanzas::stream_error::StreamError;
use stanzas::stream_features::StreamFeatures;

use crate::error::{Error, ProtocolError};
use crate::xmlstream::{ReadError, XmlStream};

use super::queue::TransmitQueue;
use super::sm_state::SmState;

static BIND_REQ_ID: &str = "bind-resource";
static SESSION_REQ_ID: &str = "establish-session";

/// The outcome of a successful negotiation.
pub(super) enum Negotiated {
    /// A fresh session: all previous state is gone.
    Reset {
        /// The JID the server bound us to.
        bound_jid: Jid,
        /// Stream management state, if it was enabled.
        sm: Option<SmState>,
        /// Elements the peer sent before negotiation completed.
        early: Vec<Element>,
    },

    /// The previous session was resumed without loss.
    Resumed {
        /// The carried-over stream management state.
        sm: SmState,
        /// Elements the peer sent before negotiation completed.
        early: Vec<Element>,
    },
}

/// Read the next element, looping over soft timeouts and failing the
/// negotiation on anything terminal.
async fn next_element<Io: AsyncBufRead + AsyncWrite + Unpin>(
    stream: &mut XmlStream<Io>,
) -> Result<Element, Error> {
    loop {
        match stream.next().await {
            Some(Ok(element)) => {
                if element.is("error", ns::STREAM) {
                    let error = StreamError::try_from(element)
                        .map_err(|e| Error::from(e.into_invalid()))?;
                    return Err(error.into());
                }
                return Ok(element);
            }
            Some(Err(ReadError::SoftTimeout)) => continue,
            Some(Err(ReadError::HardError(e))) => return Err(e.into()),
            Some(Err(ReadError::StreamFooterReceived)) | None => {
                return Err(Error::Disconnected)
            }
        }
    }
}

pub(super) async fn negotiate<Io: AsyncBufRead + AsyncWrite + Unpin>(
    stream: &mut XmlStream<Io>,
    jid: &Jid,
    features: &StreamFeatures,
    sm: Option<SmState>,
    queue: &mut TransmitQueue,
) -> Result<Negotiated, Error> {
    let mut early = Vec::new();

    if let Some(mut sm) = sm {
        if features.can_manage() && sm.resume_info().is_some() {
            match try_resume(stream, &mut sm, queue, &mut early).await? {
                true => return Ok(Negotiated::Resumed { sm, early }),
                false => {
                    // The peer refused; the stanzas it never acked are
                    // gone with the old session.
                    sm.drop_unacked();
                }
            }
        } else {
            log::warn!("peer no longer offers stream management; dropping session state");
            sm.drop_unacked();
        }
    }

    let bound_jid = bind(stream, jid, features, &mut early).await?;

    if features.session {
        establish_session(stream, &mut early).await?;
    }

    let sm = if features.can_manage() {
        enable_sm(stream, &mut early).await?
    } else {
        None
    };

    Ok(Negotiated::Reset {
        bound_jid,
        sm,
        early,
    })
}

/// Attempt resumption. `Ok(true)` means the peer accepted and the
/// retransmissions are queued; `Ok(false)` means it refused and a fresh
/// session must be negotiated.
async fn try_resume<Io: AsyncBufRead + AsyncWrite + Unpin>(
    stream: &mut XmlStream<Io>,
    sm: &mut SmState,
    queue: &mut TransmitQueue,
    early: &mut Vec<Element>,
) -> Result<bool, Error> {
    let (id, h) = match sm.resume_info() {
        Some((id, h)) => (id.clone(), h),
        None => return Ok(false),
    };
    log::debug!("attempting stream resumption with h={}", h);
    stream
        .send(&Element::from(sm::Nonza::Resume(sm::Resume { h, previd: id })))
        .await?;

    loop {
        let element = next_element(stream).await?;
        if element.is("resumed", ns::SM) {
            let resumed =
                sm::Resumed::try_from(element).map_err(|e| Error::from(e.into_invalid()))?;
            let retransmit: Vec<_> = sm.resume(resumed.h)?.collect();
            log::debug!(
                "stream resumed, retransmitting {} stanzas",
                retransmit.len()
            );
            queue.requeue_all(retransmit);
            return Ok(true);
        } else if element.is("failed", ns::SM) {
            let failed =
                sm::Failed::try_from(element).map_err(|e| Error::from(e.into_invalid()))?;
            log::debug!("resumption refused: {:?}", failed.condition);
            if let Some(h) = failed.h {
                // Best effort: whatever the peer did see counts as
                // delivered.
                let _ = sm.remote_acked(h);
            }
            return Ok(false);
        } else if is_stanza(&element) {
            // Not counted: the counters only run once SM negotiation is
            // over.
            early.push(element);
        } else {
            return Err(ProtocolError::UnexpectedElement.into());
        }
    }
}

async fn bind<Io: AsyncBufRead + AsyncWrite + Unpin>(
    stream: &mut XmlStream<Io>,
    jid: &Jid,
    features: &StreamFeatures,
    early: &mut Vec<Element>,
) -> Result<Jid, Error> {
    if !features.can_bind() {
        return Err(ProtocolError::NoBind.into());
    }

    let resource = jid.resource().map(str::to_owned);
    let request = Iq::from_set(BIND_REQ_ID, BindQuery::new(resource));
    stream.send(&Element::from(request)).await?;

    loop {
        let element = next_element(stream).await?;
        if element.is("iq", ns::DEFAULT_NS) {
            let iq = Iq::try_from(element).map_err(|e| Error::from(e.into_invalid()))?;
            if iq.id != BIND_REQ_ID {
                log::trace!("dropping iq received during resource binding");
                continue;
            }
            match iq.payload {
                IqType::Result(Some(payload)) => {
                    let response = BindResponse::try_from(payload)
                        .map_err(|_| ProtocolError::InvalidBindResponse)?;
                    let bound_jid = Jid::from(response);
                    log::debug!("bound to {}", bound_jid);
                    return Ok(bound_jid);
                }
                _ => return Err(ProtocolError::InvalidBindResponse.into()),
            }
        } else if is_stanza(&element) {
            early.push(element);
        } else {
            return Err(ProtocolError::UnexpectedElement.into());
        }
    }
}

async fn establish_session<Io: AsyncBufRead + AsyncWrite + Unpin>(
    stream: &mut XmlStream<Io>,
    early: &mut Vec<Element>,
) -> Result<(), Error> {
    let request = Iq::from_set(SESSION_REQ_ID, Session);
    stream.send(&Element::from(request)).await?;

    loop {
        let element = next_element(stream).await?;
        if element.is("iq", ns::DEFAULT_NS) {
            let iq = Iq::try_from(element).map_err(|e| Error::from(e.into_invalid()))?;
            if iq.id != SESSION_REQ_ID {
                log::trace!("dropping iq received during session establishment");
                continue;
            }
            match iq.payload {
                IqType::Result(_) => return Ok(()),
                IqType::Error(error) => {
                    // RFC 6121 dropped the session step; servers which
                    // still advertise it usually accept, but a refusal
                    // is not worth failing the whole stream over.
                    log::warn!("legacy session establishment refused: {:?}", error);
                    return Ok(());
                }
                _ => return Err(ProtocolError::UnexpectedElement.into()),
            }
        } else if is_stanza(&element) {
            early.push(element);
        } else {
            return Err(ProtocolError::UnexpectedElement.into());
        }
    }
}

async fn enable_sm<Io: AsyncBufRead + AsyncWrite + Unpin>(
    stream: &mut XmlStream<Io>,
    early: &mut Vec<Element>,
) -> Result<Option<SmState>, Error> {
    stream
        .send(&Element::from(sm::Nonza::Enable(
            sm::Enable::new().with_resume(),
        )))
        .await?;

    loop {
        let element = next_element(stream).await?;
        if element.is("enabled", ns::SM) {
            let enabled =
                sm::Enabled::try_from(element).map_err(|e| Error::from(e.into_invalid()))?;
            log::debug!(
                "stream management enabled (resumable: {})",
                enabled.resume
            );
            return Ok(Some(SmState::from(enabled)));
        } else if element.is("failed", ns::SM) {
            log::warn!("peer refused to enable stream management; continuing without");
            return Ok(None);
        } else if is_stanza(&element) {
            early.push(element);
        } else {
            return Err(ProtocolError::UnexpectedElement.into());
        }
    }
}

fn is_stanza(element: &Element) -> bool {
    element.is("iq", ns::DEFAULT_NS)
        || element.is("message", ns::DEFAULT_NS)
        || element.is("presence", ns::DEFAULT_NS)
}
