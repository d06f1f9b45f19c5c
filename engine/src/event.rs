// Copyright (c) 2025 quill contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use minidom::Element;
use rand::{thread_rng, Rng};
use stanzas::jid::Jid;
use stanzas::Stanza;

use crate::Error;

/// Generate an opaque stanza id, unique within this process for all
/// practical purposes.
pub(crate) fn make_id() -> String {
    let id: u64 = thread_rng().gen();
    format!("{}", id)
}

/// High-level event yielded by a [`Client`][`crate::Client`].
#[derive(Debug)]
pub enum Event {
    /// Stream is connected and negotiated.
    Online {
        /// The JID the server bound this session to.
        ///
        /// This may carry a different resource than requested; use this
        /// one, not the configured JID.
        bound_jid: Jid,
        /// Whether this is a stream-management resumption of the
        /// previous session (no state was lost) rather than a fresh
        /// session.
        resumed: bool,
    },
    /// The stream ended and no further reconnection will be attempted.
    Disconnected(Error),
    /// A stanza no registered extension module claimed.
    Stanza(Stanza),
    /// A top-level element the engine has no schema for and no extension
    /// module claimed.
    Element(Element),
}

impl Event {
    /// `Online` event?
    pub fn is_online(&self) -> bool {
        matches!(self, Event::Online { .. })
    }

    /// Get the server-assigned JID for the `Online` event.
    pub fn get_jid(&self) -> Option<&Jid> {
        match self {
            Event::Online { bound_jid, .. } => Some(bound_jid),
            _ => None,
        }
    }

    /// If this is a `Stanza` event, unwrap into its data.
    pub fn into_stanza(self) -> Option<Stanza> {
        match self {
            Event::Stanza(stanza) => Some(stanza),
            _ => None,
        }
    }
}
