// Copyright (c) 2025 quill contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Plaintext TCP connector.

use tokio::{io::BufStream, net::TcpStream};

use stanzas::jid::Jid;

use crate::connect::{DnsConfig, ServerConnector};
use crate::xmlstream::{initiate_stream, PendingFeaturesRecv, StreamHeader, Timeouts};
use crate::Error;

/// Connect via insecure plaintext TCP to an XMPP server.
///
/// Only appropriate over localhost or when an outer layer already
/// protects the connection; there is no TLS anywhere in this path.
#[derive(Debug, Clone)]
pub struct TcpServerConnector(pub DnsConfig);

impl From<DnsConfig> for TcpServerConnector {
    fn from(dns_config: DnsConfig) -> TcpServerConnector {
        Self(dns_config)
    }
}

impl ServerConnector for TcpServerConnector {
    type Stream = BufStream<TcpStream>;

    async fn connect(
        &self,
        jid: &Jid,
        ns: &'static str,
        timeouts: Timeouts,
    ) -> Result<PendingFeaturesRecv<Self::Stream>, Error> {
        let stream = BufStream::new(self.0.resolve().await?);
        Ok(initiate_stream(
            stream,
            ns,
            StreamHeader::to_server(jid.domain()),
            timeouts,
        )
        .await?)
    }
}
