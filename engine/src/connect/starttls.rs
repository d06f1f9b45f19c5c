// Copyright (c) 2025 quill contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! TCP + StartTLS connector (RFC 6120 §5), built on rustls.

use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::sync::Arc;

use futures::StreamExt;
use minidom::Element;
use tokio::io::BufStream;
use tokio::net::TcpStream;
use tokio_rustls::{
    client::TlsStream,
    rustls::pki_types::{InvalidDnsNameError, ServerName},
    rustls::{ClientConfig, RootCertStore},
    TlsConnector,
};

use sasl::common::ChannelBinding;
use stanzas::{jid::Jid, ns, starttls};

use crate::connect::{DnsConfig, ServerConnector, ServerConnectorError};
use crate::error::{Error, ProtocolError};
use crate::xmlstream::{initiate_stream, PendingFeaturesRecv, ReadError, StreamHeader, Timeouts, XmlStream};

/// Connect via TCP and upgrade in place to TLS via StartTLS.
///
/// TLS is treated as required: a peer that does not advertise StartTLS
/// is a protocol error, never a silent downgrade.
#[derive(Debug, Clone)]
pub struct StartTlsServerConnector(pub DnsConfig);

impl From<DnsConfig> for StartTlsServerConnector {
    fn from(dns_config: DnsConfig) -> StartTlsServerConnector {
        Self(dns_config)
    }
}

impl ServerConnector for StartTlsServerConnector {
    type Stream = BufStream<TlsStream<TcpStream>>;

    async fn connect(
        &self,
        jid: &Jid,
        ns: &'static str,
        timeouts: Timeouts,
    ) -> Result<PendingFeaturesRecv<Self::Stream>, Error> {
        let tcp_stream = tokio::io::BufStream::new(self.0.resolve().await?);

        // Unencrypted stream, used only to negotiate the upgrade.
        let pending = initiate_stream(
            tcp_stream,
            ns,
            StreamHeader::to_server(jid.domain()),
            timeouts,
        )
        .await?;
        let (features, xml_stream) = pending.recv_features().await?;

        if !features.can_starttls() {
            return Err(ProtocolError::NoTls.into());
        }

        let tls_stream = starttls_upgrade(xml_stream, jid.domain()).await?;
        Ok(initiate_stream(
            tokio::io::BufStream::new(tls_stream),
            ns,
            StreamHeader::to_server(jid.domain()),
            timeouts,
        )
        .await?)
    }

    fn channel_binding(stream: &Self::Stream) -> Result<ChannelBinding, Error> {
        let (_, connection) = stream.get_ref().get_ref();
        Ok(match connection.protocol_version() {
            Some(tokio_rustls::rustls::ProtocolVersion::TLSv1_3) => {
                let data = vec![0u8; 32];
                let data = connection
                    .export_keying_material(data, b"EXPORTER-Channel-Binding", None)
                    .map_err(StartTlsError::Tls)?;
                ChannelBinding::TlsExporter(data)
            }
            _ => ChannelBinding::None,
        })
    }
}

/// Send `<starttls/>`, wait for `<proceed/>` and perform the TLS
/// handshake on the underlying connection.
async fn starttls_upgrade<Io>(
    mut stream: XmlStream<BufStream<Io>>,
    domain: &str,
) -> Result<TlsStream<Io>, Error>
where
    Io: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    stream
        .send(&Element::from(starttls::Request))
        .await?;

    loop {
        match stream.next().await {
            Some(Ok(element)) => {
                if element.is("proceed", ns::TLS) {
                    break;
                } else if element.is("failure", ns::TLS) {
                    return Err(ProtocolError::NoTls.into());
                }
                // Anything else before proceed is out of order; skip it
                // like other negotiation noise.
            }
            Some(Err(ReadError::SoftTimeout)) => (),
            Some(Err(ReadError::HardError(e))) => return Err(e.into()),
            Some(Err(ReadError::StreamFooterReceived)) | None => {
                return Err(Error::Disconnected)
            }
        }
    }

    let io = stream.into_inner().into_inner();
    let domain = ServerName::try_from(domain.to_owned()).map_err(StartTlsError::DnsNameError)?;

    let mut root_store = RootCertStore::empty();
    #[cfg(feature = "tls-webpki-roots")]
    {
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }
    #[cfg(feature = "tls-native-certs")]
    {
        root_store.add_parsable_certificates(
            rustls_native_certs::load_native_certs()
                .map_err(|e| Error::Io(io::Error::new(io::ErrorKind::Other, e)))?,
        );
    }
    let config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    let tls_stream = TlsConnector::from(Arc::new(config))
        .connect(domain, io)
        .await
        .map_err(Error::Io)?;
    Ok(tls_stream)
}

/// StartTLS connector errors.
#[derive(Debug)]
pub enum StartTlsError {
    /// TLS error.
    Tls(tokio_rustls::rustls::Error),
    /// The domain is not usable as a TLS server name.
    DnsNameError(InvalidDnsNameError),
}

impl ServerConnectorError for StartTlsError {}

impl fmt::Display for StartTlsError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Tls(e) => write!(fmt, "TLS error: {}", e),
            Self::DnsNameError(e) => write!(fmt, "DNS name error: {}", e),
        }
    }
}

impl StdError for StartTlsError {}
