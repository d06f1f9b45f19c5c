// Copyright (c) 2025 quill contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Error taxonomy of the engine.
//!
//! Transport errors feed the reconnection policy; protocol and stream
//! errors are fatal to the current stream; authentication errors are
//! terminal for the connection attempt; stanza-level errors are values
//! delivered to the caller that triggered them, never stream failures.

use std::error::Error as StdError;
use std::fmt;
use std::io::Error as IoError;
use std::net::AddrParseError;

use sasl::client::MechanismError as SaslMechanismError;
use stanzas::sasl::DefinedCondition as SaslDefinedCondition;
use stanzas::stream_error::StreamError;

use crate::connect::ServerConnectorError;
use crate::jid;

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// I/O error
    Io(IoError),
    /// Error parsing a Jabber-Id
    JidParse(jid::Error),
    /// Protocol-level error
    Protocol(ProtocolError),
    /// Authentication error
    Auth(AuthError),
    /// Connection closed
    Disconnected,
    /// An operation was attempted in a connection state that does not
    /// support it
    InvalidState,
    /// Error specific to the ServerConnector in use
    Connection(Box<dyn ServerConnectorError>),
    /// DNS resolution error
    #[cfg(feature = "dns")]
    Resolve(hickory_resolver::error::ResolveError),
    /// DNS label conversion error, no details available from module
    /// `idna`
    #[cfg(feature = "dns")]
    Idna,
    /// Invalid IP/port address
    Addr(AddrParseError),
}

impl Error {
    /// Whether automatic reconnection after this error is pointless or
    /// actively harmful.
    ///
    /// A `conflict` stream error means a newer session superseded this
    /// one; authentication failures will not get better by retrying with
    /// the same credentials.
    pub fn suppresses_reconnect(&self) -> bool {
        match self {
            Error::Auth(_) => true,
            Error::Protocol(ProtocolError::StreamError(error)) => {
                error.condition == stanzas::stream_error::DefinedCondition::Conflict
            }
            _ => false,
        }
    }

    /// Whether this error is the keepalive timeout, which gets the short
    /// reconnect delay.
    pub(crate) fn is_keepalive_timeout(&self) -> bool {
        match self {
            Error::Io(e) => e.kind() == std::io::ErrorKind::TimedOut,
            _ => false,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(e) => write!(fmt, "IO error: {}", e),
            Error::JidParse(e) => write!(fmt, "jid parse error: {}", e),
            Error::Protocol(e) => write!(fmt, "protocol error: {}", e),
            Error::Auth(e) => write!(fmt, "authentication error: {}", e),
            Error::Disconnected => write!(fmt, "disconnected"),
            Error::InvalidState => write!(fmt, "invalid state"),
            Error::Connection(e) => write!(fmt, "connection error: {}", e),
            #[cfg(feature = "dns")]
            Error::Resolve(e) => write!(fmt, "{:?}", e),
            #[cfg(feature = "dns")]
            Error::Idna => write!(fmt, "IDNA error"),
            Error::Addr(e) => write!(fmt, "wrong network address: {}", e),
        }
    }
}

impl StdError for Error {}

impl From<IoError> for Error {
    fn from(e: IoError) -> Self {
        Error::Io(e)
    }
}

impl From<jid::Error> for Error {
    fn from(e: jid::Error) -> Self {
        Error::JidParse(e)
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Error::Protocol(e)
    }
}

impl From<AuthError> for Error {
    fn from(e: AuthError) -> Self {
        Error::Auth(e)
    }
}

impl<T: ServerConnectorError + 'static> From<T> for Error {
    fn from(e: T) -> Self {
        Error::Connection(Box::new(e))
    }
}

#[cfg(feature = "dns")]
impl From<hickory_resolver::error::ResolveError> for Error {
    fn from(e: hickory_resolver::error::ResolveError) -> Error {
        Error::Resolve(e)
    }
}

#[cfg(feature = "dns")]
impl From<idna::Errors> for Error {
    fn from(_e: idna::Errors) -> Self {
        Error::Idna
    }
}

impl From<AddrParseError> for Error {
    fn from(e: AddrParseError) -> Error {
        Error::Addr(e)
    }
}

/// XMPP protocol-level error
#[derive(Debug)]
pub enum ProtocolError {
    /// A received element did not match its schema
    Codec(stanzas::Error),
    /// The policy requires TLS but the peer does not offer StartTLS
    NoTls,
    /// The peer's features omit SASL even though we are not yet
    /// authenticated
    NoSasl,
    /// The peer's features omit resource binding on a fresh stream
    NoBind,
    /// Invalid response to resource binding
    InvalidBindResponse,
    /// A negotiation step received an element that does not belong there
    UnexpectedElement,
    /// The peer closed the stream envelope mid-negotiation
    UnexpectedStreamFooter,
    /// The peer sent a `<stream:error/>`
    StreamError(StreamError),
    /// The peer's stream management counter moved backwards
    AckWentBackwards {
        /// The counter value the peer sent.
        remote: u32,
        /// Our base counter, covering everything already acked.
        local: u32,
    },
    /// The peer acked more stanzas than we ever sent
    AckedMoreThanSent {
        /// The counter value the peer sent.
        remote: u32,
        /// The highest counter value we could justify.
        limit: u32,
    },
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ProtocolError::Codec(e) => write!(fmt, "codec error: {}", e),
            ProtocolError::NoTls => write!(fmt, "no TLS available"),
            ProtocolError::NoSasl => {
                write!(fmt, "peer offers no SASL mechanisms on an unauthenticated stream")
            }
            ProtocolError::NoBind => write!(fmt, "peer does not offer resource binding"),
            ProtocolError::InvalidBindResponse => {
                write!(fmt, "invalid response to resource binding")
            }
            ProtocolError::UnexpectedElement => {
                write!(fmt, "unexpected element during stream negotiation")
            }
            ProtocolError::UnexpectedStreamFooter => {
                write!(fmt, "stream footer received during negotiation")
            }
            ProtocolError::StreamError(e) => write!(fmt, "{}", e),
            ProtocolError::AckWentBackwards { remote, local } => write!(
                fmt,
                "remote acked less stanzas than before: remote counter = {}, local base = {}",
                remote, local
            ),
            ProtocolError::AckedMoreThanSent { remote, limit } => write!(
                fmt,
                "remote acked more stanzas than we sent: remote counter = {}, sent = {}",
                remote, limit
            ),
        }
    }
}

impl StdError for ProtocolError {}

impl From<stanzas::Error> for ProtocolError {
    fn from(e: stanzas::Error) -> Self {
        ProtocolError::Codec(e)
    }
}

impl From<stanzas::Error> for Error {
    fn from(e: stanzas::Error) -> Self {
        ProtocolError::Codec(e).into()
    }
}

impl From<StreamError> for Error {
    fn from(e: StreamError) -> Self {
        ProtocolError::StreamError(e).into()
    }
}

/// Authentication error
#[derive(Debug)]
pub enum AuthError {
    /// No matching SASL mechanism available
    NoMechanism,
    /// Local SASL mechanism error
    Sasl(SaslMechanismError),
    /// Failure reported by the server
    Fail(SaslDefinedCondition),
}

impl fmt::Display for AuthError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AuthError::NoMechanism => write!(fmt, "no matching SASL mechanism available"),
            AuthError::Sasl(e) => write!(fmt, "local SASL mechanism error: {}", e),
            AuthError::Fail(c) => write!(fmt, "failure from the server: {}", c),
        }
    }
}

impl StdError for AuthError {}

impl From<SaslMechanismError> for AuthError {
    fn from(e: SaslMechanismError) -> Self {
        AuthError::Sasl(e)
    }
}
