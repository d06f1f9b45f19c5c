// Copyright (c) 2025 quill contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Initiator-side SASL mechanisms.

use core::fmt;
use std::error::Error as StdError;

use crate::common::Credentials;

pub mod mechanisms;

/// An error inside a mechanism.
///
/// Any such error is terminal for the current authentication attempt; a
/// mechanism is never retried with the same state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MechanismError {
    /// Random nonce generation failed.
    CannotGenerateNonce,
    /// The credentials are missing a username.
    NoUsername,
    /// The credentials are missing a password.
    NoPassword,
    /// The credentials are missing a token.
    NoToken,
    /// The credentials are missing the target host.
    NoHost,
    /// The mechanism received a challenge it cannot parse.
    CannotDecodeChallenge,
    /// The server nonce does not extend the client nonce.
    InvalidServerNonce,
    /// A required attribute was missing from the challenge.
    MissingAttribute(&'static str),
    /// The iteration count or another numeric field was malformed.
    InvalidField(&'static str),
    /// Key derivation failed.
    CannotDeriveKeys,
    /// The server signature in `<success/>` did not verify.
    ServerSignatureMismatch,
    /// A challenge arrived after the exchange was already complete.
    SessionAlreadyOver,
}

impl fmt::Display for MechanismError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MechanismError::CannotGenerateNonce => write!(fmt, "unable to generate a nonce"),
            MechanismError::NoUsername => write!(fmt, "no username provided"),
            MechanismError::NoPassword => write!(fmt, "no password provided"),
            MechanismError::NoToken => write!(fmt, "no token provided"),
            MechanismError::NoHost => write!(fmt, "no target host provided"),
            MechanismError::CannotDecodeChallenge => write!(fmt, "cannot decode challenge"),
            MechanismError::InvalidServerNonce => {
                write!(fmt, "server nonce does not extend the client nonce")
            }
            MechanismError::MissingAttribute(attr) => {
                write!(fmt, "attribute '{}' missing from challenge", attr)
            }
            MechanismError::InvalidField(field) => {
                write!(fmt, "malformed field '{}' in challenge", field)
            }
            MechanismError::CannotDeriveKeys => write!(fmt, "key derivation failed"),
            MechanismError::ServerSignatureMismatch => {
                write!(fmt, "server signature verification failed")
            }
            MechanismError::SessionAlreadyOver => {
                write!(fmt, "challenge received after the exchange completed")
            }
        }
    }
}

impl StdError for MechanismError {}

/// One SASL mechanism, driven by the stream negotiator.
pub trait Mechanism {
    /// The IANA-registered mechanism name.
    fn name(&self) -> &str;

    /// Construct this mechanism from credential material.
    fn from_credentials(credentials: Credentials) -> Result<Self, MechanismError>
    where
        Self: Sized;

    /// The initial response to send along with the mechanism selection.
    ///
    /// Empty for mechanisms without an initial response.
    fn initial(&mut self) -> Vec<u8> {
        Vec::new()
    }

    /// Answer a server challenge.
    fn response(&mut self, _challenge: &[u8]) -> Result<Vec<u8>, MechanismError> {
        Err(MechanismError::SessionAlreadyOver)
    }

    /// Verify the additional data carried on `<success/>`.
    fn success(&mut self, _data: &[u8]) -> Result<(), MechanismError> {
        Ok(())
    }
}
