// Copyright (c) 2025 quill contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use crate::common::Identity;
use crate::server::{Mechanism, MechanismError, Response, Validator};

/// Responder side of PLAIN (RFC 4616), checking the presented password
/// through a [`Validator`].
pub struct Plain<V: Validator> {
    validator: V,
}

impl<V: Validator> Plain<V> {
    /// Construct the mechanism around a credential checker.
    pub fn new(validator: V) -> Plain<V> {
        Plain { validator }
    }
}

impl<V: Validator> Mechanism for Plain<V> {
    fn name(&self) -> &str {
        "PLAIN"
    }

    fn respond(&mut self, payload: &[u8]) -> Result<Response, MechanismError> {
        let mut parts = payload.split(|&b| b == 0);
        let _authzid = parts.next().ok_or(MechanismError::FailedToDecodeMessage)?;
        let username = parts.next().ok_or(MechanismError::FailedToDecodeMessage)?;
        let password = parts.next().ok_or(MechanismError::FailedToDecodeMessage)?;
        if parts.next().is_some() {
            return Err(MechanismError::FailedToDecodeMessage);
        }
        let username = core::str::from_utf8(username)
            .map_err(|_| MechanismError::FailedToDecodeMessage)?;
        let password = core::str::from_utf8(password)
            .map_err(|_| MechanismError::FailedToDecodeMessage)?;
        self.validator.validate(username, password)?;
        Ok(Response::Success(
            Identity::Username(username.to_owned()),
            Vec::new(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SingleUser;

    impl Validator for SingleUser {
        fn validate(&self, username: &str, password: &str) -> Result<(), MechanismError> {
            if username == "alice" && password == "pencil" {
                Ok(())
            } else {
                Err(MechanismError::AuthenticationFailed)
            }
        }
    }

    #[test]
    fn accepts_valid_credentials() {
        let mut mech = Plain::new(SingleUser);
        match mech.respond(b"\0alice\0pencil").unwrap() {
            Response::Success(Identity::Username(username), _) => assert_eq!(username, "alice"),
            _ => panic!("expected success"),
        }
    }

    #[test]
    fn rejects_bad_password() {
        let mut mech = Plain::new(SingleUser);
        assert_eq!(
            mech.respond(b"\0alice\0wrong").err(),
            Some(MechanismError::AuthenticationFailed)
        );
    }
}
