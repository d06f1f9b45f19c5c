// Copyright (c) 2025 quill contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Connection establishment: transport, TLS, SASL, stream restart.

use sasl::common::Credentials;
use stanzas::jid::Jid;
use stanzas::ns;
use stanzas::stream_features::StreamFeatures;

use crate::connect::ServerConnector;
use crate::error::Error;
use crate::xmlstream::{initiate_stream, StreamHeader, Timeouts, XmlStream};

/// Open a transport to the server of `jid` and authenticate on it.
///
/// The connector secures the transport as its policy demands (including
/// the mandatory post-StartTLS stream restart); this function performs
/// SASL and the post-SASL restart, and hands back the freshly restarted
/// stream together with its features, ready for binding or resumption.
pub(crate) async fn client_auth<C: ServerConnector>(
    server: C,
    jid: Jid,
    password: String,
    timeouts: Timeouts,
) -> Result<(StreamFeatures, XmlStream<C::Stream>), Error> {
    let pending = server.connect(&jid, ns::JABBER_CLIENT, timeouts).await?;
    let (features, stream) = pending.recv_features().await?;

    let channel_binding = C::channel_binding(stream.get_inner())?;
    // A JID without a node part authenticates anonymously.
    let creds = match jid.node() {
        Some(node) => Credentials::default()
            .with_username(node.to_owned())
            .with_password(password),
        None => Credentials::default(),
    }
    .with_channel_binding(channel_binding)
    .with_host(jid.domain());

    // Authenticated raw connection.
    let io = crate::client::auth::auth(stream, &features, creds).await?;

    // The stream restarts from scratch after SASL.
    let pending = initiate_stream(
        io,
        ns::JABBER_CLIENT,
        StreamHeader::to_server(jid.domain()),
        timeouts,
    )
    .await?;
    pending.recv_features().await
}
