// Copyright (c) 2025 quill contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::net::SocketAddr;

use futures::{future::select_ok, FutureExt};
use hickory_resolver::{
    config::LookupIpStrategy, name_server::TokioConnectionProvider, IntoName, TokioAsyncResolver,
};
use log::debug;
use tokio::net::TcpStream;

use crate::Error;

/// How to locate the server to connect to.
#[derive(Clone, Debug)]
pub enum DnsConfig {
    /// Use a SRV record lookup, falling back to the bare host name with
    /// `fallback_port` when no SRV records exist.
    UseSrv {
        /// Hostname to resolve.
        host: String,
        /// SRV service label, e.g. `_xmpp-client._tcp`.
        srv: String,
        /// Port used when SRV resolution yields nothing.
        fallback_port: u16,
    },

    /// Skip SRV and connect to a known host and port.
    NoSrv {
        /// Server host name.
        host: String,
        /// Server port.
        port: u16,
    },

    /// Connect to a literal `ip:port` address.
    Addr {
        /// The `ip:port` string.
        addr: String,
    },
}

impl std::fmt::Display for DnsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UseSrv { host, .. } => write!(f, "{}", host),
            Self::NoSrv { host, port } => write!(f, "{}:{}", host, port),
            Self::Addr { addr } => write!(f, "{}", addr),
        }
    }
}

impl DnsConfig {
    /// Constructor for the `UseSrv` variant.
    pub fn srv(host: &str, srv: &str, fallback_port: u16) -> Self {
        Self::UseSrv {
            host: host.to_string(),
            srv: srv.to_string(),
            fallback_port,
        }
    }

    /// The default SRV resolution strategy for clients.
    pub fn srv_default_client(host: &str) -> Self {
        Self::srv(host, "_xmpp-client._tcp", 5222)
    }

    /// Constructor for the `NoSrv` variant.
    pub fn no_srv(host: &str, port: u16) -> Self {
        Self::NoSrv {
            host: host.to_string(),
            port,
        }
    }

    /// Constructor for the `Addr` variant.
    pub fn addr(addr: &str) -> Self {
        Self::Addr {
            addr: addr.to_string(),
        }
    }

    /// Resolve to a connected [`TcpStream`].
    pub async fn resolve(&self) -> Result<TcpStream, Error> {
        match self {
            Self::UseSrv {
                host,
                srv,
                fallback_port,
            } => Self::resolve_srv(host, srv, *fallback_port).await,
            Self::NoSrv { host, port } => Self::resolve_no_srv(host, *port).await,
            Self::Addr { addr } => {
                let addr: SocketAddr = addr.parse()?;
                Ok(TcpStream::connect(&addr).await?)
            }
        }
    }

    async fn resolve_srv(host: &str, srv: &str, fallback_port: u16) -> Result<TcpStream, Error> {
        let ascii_domain = idna::domain_to_ascii(host)?;

        if let Ok(ip) = ascii_domain.parse() {
            debug!("Attempting connection to {ip}:{fallback_port}");
            return Ok(TcpStream::connect(&SocketAddr::new(ip, fallback_port)).await?);
        }

        let resolver = TokioAsyncResolver::tokio_from_system_conf()
            .map_err(hickory_resolver::error::ResolveError::from)?;

        let srv_domain = format!("{}.{}.", srv, ascii_domain)
            .into_name()
            .map_err(hickory_resolver::error::ResolveError::from)?;

        match resolver.srv_lookup(srv_domain.clone()).await.ok() {
            Some(lookup) => {
                for srv in lookup.iter() {
                    debug!("Attempting connection to {srv_domain} {srv}");
                    if let Ok(stream) =
                        Self::resolve_no_srv(&srv.target().to_ascii(), srv.port()).await
                    {
                        return Ok(stream);
                    }
                }
                Err(Error::Disconnected)
            }
            None => {
                // No SRV records; retry with the bare host name.
                debug!("Attempting connection to {host}:{fallback_port}");
                Self::resolve_no_srv(host, fallback_port).await
            }
        }
    }

    async fn resolve_no_srv(host: &str, port: u16) -> Result<TcpStream, Error> {
        let ascii_domain = idna::domain_to_ascii(host)?;

        if let Ok(ip) = ascii_domain.parse() {
            return Ok(TcpStream::connect(&SocketAddr::new(ip, port)).await?);
        }

        let (config, mut options) = hickory_resolver::system_conf::read_system_conf()
            .map_err(hickory_resolver::error::ResolveError::from)?;
        options.ip_strategy = LookupIpStrategy::Ipv4AndIpv6;
        let resolver = TokioAsyncResolver::new(config, options, TokioConnectionProvider::default());

        let ips = resolver.lookup_ip(ascii_domain).await?;

        // Happy eyeballs: race all candidate addresses, first success
        // wins.
        select_ok(
            ips.into_iter()
                .map(|ip| TcpStream::connect(SocketAddr::new(ip, port)).boxed()),
        )
        .await
        .map(|(stream, _)| stream)
        .map_err(|_| Error::Disconnected)
    }
}
