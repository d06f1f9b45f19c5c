// Copyright (c) 2025 quill contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Typed XMPP stanzas and nonzas.
//!
//! This crate is the stanza codec of the quill engine: a stateless,
//! side-effect-free mapping between [`minidom::Element`] trees and typed
//! protocol units. Every type converts both ways with `TryFrom<Element>`
//! and `From<T> for Element`; the contract is semantic equivalence, not a
//! byte-stable attribute order.
//!
//! Top-level elements the codec does not recognize are *not* an error:
//! [`StreamElement::try_from`] carries them through unmodified so that
//! extension modules get a chance to consume them.

#![deny(unsafe_code, missing_docs, bare_trait_objects)]

#[macro_use]
mod util;

pub mod bind;
pub mod error;
pub mod iq;
pub mod message;
pub mod ns;
pub mod ping;
pub mod presence;
pub mod sasl;
pub mod session;
pub mod sm;
pub mod stanza_error;
pub mod starttls;
pub mod stream_element;
pub mod stream_error;
pub mod stream_features;

pub use crate::error::{Error, FromElementError};
pub use crate::stream_element::{Stanza, StreamElement};

// Re-exports of the element and address types this codec is written
// against.
pub use jid;
pub use minidom;
