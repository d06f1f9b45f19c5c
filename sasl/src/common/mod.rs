// Copyright (c) 2025 quill contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Value types shared between the client and server sides.

use core::fmt;

#[cfg(feature = "scram")]
pub mod scram;

/// The identity an authentication exchange establishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// No particular identity (for example ANONYMOUS).
    None,
    /// A username.
    Username(String),
}

impl From<String> for Identity {
    fn from(username: String) -> Identity {
        Identity::Username(username)
    }
}

impl From<&str> for Identity {
    fn from(username: &str) -> Identity {
        Identity::Username(username.to_owned())
    }
}

/// The secret presented to prove an identity.
#[derive(Clone, PartialEq, Eq)]
pub enum Secret {
    /// No secret (for example ANONYMOUS).
    None,
    /// A plaintext password.
    Password(String),
    /// An OAuth2 bearer token.
    Token(String),
}

impl fmt::Debug for Secret {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        // Never print secret material.
        match self {
            Secret::None => fmt.write_str("Secret::None"),
            Secret::Password(_) => fmt.write_str("Secret::Password(…)"),
            Secret::Token(_) => fmt.write_str("Secret::Token(…)"),
        }
    }
}

/// TLS channel binding data, used by the `-PLUS` SCRAM variants and mixed
/// into the gs2 header of the plain variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelBinding {
    /// No channel binding data is available.
    None,
    /// The client supports channel binding but believes the server does
    /// not.
    Unsupported,
    /// RFC 9266 `tls-exporter` keying material.
    TlsExporter(Vec<u8>),
}

impl ChannelBinding {
    /// The gs2 header corresponding to this binding.
    pub fn header(&self) -> &[u8] {
        match self {
            ChannelBinding::None => b"n,,",
            ChannelBinding::Unsupported => b"y,,",
            ChannelBinding::TlsExporter(_) => b"p=tls-exporter,,",
        }
    }

    /// The raw binding data mixed into the `c=` attribute.
    pub fn data(&self) -> &[u8] {
        match self {
            ChannelBinding::TlsExporter(data) => data,
            _ => &[],
        }
    }
}

/// Credential material for one authentication attempt.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Who we authenticate as.
    pub identity: Identity,
    /// What proves it.
    pub secret: Secret,
    /// TLS channel binding, if the transport provides any.
    pub channel_binding: ChannelBinding,
    /// The host we authenticate against, used by DIGEST-MD5 for the
    /// digest-uri and default realm.
    pub host: Option<String>,
}

impl Default for Credentials {
    fn default() -> Credentials {
        Credentials {
            identity: Identity::None,
            secret: Secret::None,
            channel_binding: ChannelBinding::None,
            host: None,
        }
    }
}

impl Credentials {
    /// Set the username.
    pub fn with_username<S: Into<String>>(mut self, username: S) -> Credentials {
        self.identity = Identity::Username(username.into());
        self
    }

    /// Set a plaintext password.
    pub fn with_password<S: Into<String>>(mut self, password: S) -> Credentials {
        self.secret = Secret::Password(password.into());
        self
    }

    /// Set an OAuth2 bearer token.
    pub fn with_token<S: Into<String>>(mut self, token: S) -> Credentials {
        self.secret = Secret::Token(token.into());
        self
    }

    /// Set the channel binding data.
    pub fn with_channel_binding(mut self, channel_binding: ChannelBinding) -> Credentials {
        self.channel_binding = channel_binding;
        self
    }

    /// Set the target host.
    pub fn with_host<S: Into<String>>(mut self, host: S) -> Credentials {
        self.host = Some(host.into());
        self
    }
}

/// Generate `len` bytes of cryptographically secure random data, encoded
/// as a printable nonce.
#[cfg(any(feature = "scram", feature = "anonymous", feature = "digest-md5"))]
pub(crate) fn generate_nonce(len: usize) -> Result<String, getrandom::Error> {
    let mut data = vec![0u8; len];
    getrandom::getrandom(&mut data)?;
    // Map to the RFC 5802 printable set, excluding ','.
    Ok(data
        .into_iter()
        .map(|b| {
            let b = b % 62;
            (match b {
                0..=25 => b'a' + b,
                26..=51 => b'A' + b - 26,
                _ => b'0' + b - 52,
            }) as char
        })
        .collect())
}
