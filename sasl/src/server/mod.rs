// Copyright (c) 2025 quill contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Responder-side SASL.
//!
//! A server owns a set of [`Mechanism`]s and feeds each client payload to
//! [`Mechanism::respond`] until it yields [`Response::Success`] or an
//! error. Credential checking happens exclusively through the
//! [`Validator`] seam; this crate never stores or compares secrets itself.

use core::fmt;
use std::error::Error as StdError;

use crate::common::Identity;

pub mod mechanisms;

/// An error inside a responder-side mechanism.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MechanismError {
    /// The payload could not be decoded.
    FailedToDecodeMessage,
    /// Random generation failed.
    CannotGenerateNonce,
    /// The presented credentials were rejected by the validator.
    AuthenticationFailed,
}

impl fmt::Display for MechanismError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MechanismError::FailedToDecodeMessage => write!(fmt, "can't decode message"),
            MechanismError::CannotGenerateNonce => write!(fmt, "unable to generate a nonce"),
            MechanismError::AuthenticationFailed => write!(fmt, "authentication failed"),
        }
    }
}

impl StdError for MechanismError {}

#[cfg(any(feature = "anonymous", feature = "scram"))]
impl From<getrandom::Error> for MechanismError {
    fn from(_: getrandom::Error) -> MechanismError {
        MechanismError::CannotGenerateNonce
    }
}

/// The credential checker a server plugs into password-based mechanisms.
///
/// Implementations look the username up in whatever store the application
/// uses and verify the presented password against it.
pub trait Validator: Send {
    /// Check the presented password for the given username.
    fn validate(&self, username: &str, password: &str) -> Result<(), MechanismError>;
}

/// The outcome of feeding one client payload to a mechanism.
pub enum Response {
    /// Authentication succeeded as the contained identity; the data is
    /// sent back with the success notification.
    Success(Identity, Vec<u8>),
    /// The exchange continues with this challenge.
    Challenge(Vec<u8>),
}

/// One responder-side SASL mechanism.
pub trait Mechanism {
    /// The IANA-registered mechanism name.
    fn name(&self) -> &str;

    /// Process one payload from the client.
    fn respond(&mut self, payload: &[u8]) -> Result<Response, MechanismError>;
}
