// Copyright (c) 2025 quill contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Asynchronous [XMPP](https://xmpp.org/) stream engine built on
//! [tokio](https://tokio.rs/).
//!
//! The entry point is the [`Client`]: it owns the TCP/TLS socket,
//! negotiates the stream (StartTLS, SASL, resource binding, stream
//! management), reconnects with backoff when the connection breaks, and
//! multiplexes stanzas over the resulting stream. Drive it by polling it
//! as a [`futures::Stream`] of [`Event`]s and by calling
//! [`Client::send_stanza`] / [`Client::send_request`].
//!
//! Reliability comes from [XEP-0198 Stream
//! Management](https://xmpp.org/extensions/xep-0198.html) when the peer
//! supports it: acknowledged delivery, and transparent session resumption
//! over a fresh TCP connection. Without it, reconnects still happen, with
//! correspondingly less delivery insight.
//!
//! Logging goes through the [`log`] facade; the application installs the
//! sink. Wire traffic is traced under the `quill::xml` target.

#![deny(unsafe_code, missing_docs, bare_trait_objects)]

mod event;
pub use event::Event;

pub mod connect;
pub mod xmlstream;

mod client;
pub use client::{Client, IqFailure, IqRequest, IqResponse, IqResponseToken, StanzaSender};

pub mod dispatch;
pub use dispatch::ExtensionModule;

mod session;
pub use session::{SharedIoError, StanzaStage, StanzaState, StanzaToken};

/// Detailed error types
pub mod error;

#[doc(inline)]
pub use crate::error::Error;

// Re-exports
pub use minidom;
pub use sasl;
pub use stanzas;
pub use stanzas::jid;
