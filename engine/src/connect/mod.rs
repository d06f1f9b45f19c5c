// Copyright (c) 2025 quill contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! `ServerConnector` produces negotiable streams for XMPP clients.
//!
//! A connector owns transport policy: how the peer address is resolved,
//! whether and how TLS is established, and which channel binding data the
//! transport can offer to SASL. It hands back a stream on which headers
//! have been exchanged, ready for feature negotiation; resource binding
//! and everything above it belong to the session layer, not here.

use sasl::common::ChannelBinding;
use stanzas::jid::Jid;
use tokio::io::{AsyncBufRead, AsyncWrite};

use crate::xmlstream::{PendingFeaturesRecv, Timeouts};
use crate::Error;

#[cfg(feature = "starttls")]
pub mod starttls;
#[cfg(feature = "starttls")]
pub use starttls::StartTlsServerConnector;

#[cfg(feature = "insecure-tcp")]
pub mod tcp;
#[cfg(feature = "insecure-tcp")]
pub use tcp::TcpServerConnector;

#[cfg(feature = "dns")]
mod dns;
#[cfg(feature = "dns")]
pub use dns::DnsConfig;

/// Transport trait object produced by a [`ServerConnector`].
pub trait AsyncReadAndWrite: AsyncBufRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncBufRead + AsyncWrite + Unpin + Send> AsyncReadAndWrite for T {}

/// Marker trait for errors specific to a [`ServerConnector`]
/// implementation.
pub trait ServerConnectorError: std::error::Error + Sync + Send {}

/// Called to connect to an XMPP server, possibly multiple times over a
/// session's lifetime (reconnects).
pub trait ServerConnector: Clone + core::fmt::Debug + Send + Unpin + 'static {
    /// The type of stream this connector produces.
    type Stream: AsyncReadAndWrite;

    /// Open a transport to the server responsible for `jid`, secured as
    /// the connector's policy demands, with stream headers exchanged and
    /// features not yet received.
    fn connect(
        &self,
        jid: &Jid,
        ns: &'static str,
        timeouts: Timeouts,
    ) -> impl core::future::Future<Output = Result<PendingFeaturesRecv<Self::Stream>, Error>> + Send;

    /// The channel binding data this transport can offer to SASL.
    fn channel_binding(_stream: &Self::Stream) -> Result<ChannelBinding, Error> {
        Ok(ChannelBinding::None)
    }
}
