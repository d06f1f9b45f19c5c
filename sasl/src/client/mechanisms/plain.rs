// Copyright (c) 2025 quill contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use crate::client::{Mechanism, MechanismError};
use crate::common::{Credentials, Identity, Secret};

/// The PLAIN mechanism (RFC 4616): the password travels in the clear
/// inside the (hopefully TLS-protected) stream, in a single step.
pub struct Plain {
    username: String,
    password: String,
}

impl Plain {
    /// Construct from a username and password.
    pub fn new<U: Into<String>, P: Into<String>>(username: U, password: P) -> Plain {
        Plain {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl Mechanism for Plain {
    fn name(&self) -> &str {
        "PLAIN"
    }

    fn from_credentials(credentials: Credentials) -> Result<Plain, MechanismError> {
        let Identity::Username(username) = credentials.identity else {
            return Err(MechanismError::NoUsername);
        };
        let Secret::Password(password) = credentials.secret else {
            return Err(MechanismError::NoPassword);
        };
        Ok(Plain { username, password })
    }

    fn initial(&mut self) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.username.len() + self.password.len() + 2);
        data.push(0);
        data.extend_from_slice(self.username.as_bytes());
        data.push(0);
        data.extend_from_slice(self.password.as_bytes());
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_response_layout() {
        let mut mech = Plain::new("alice", "pencil");
        assert_eq!(mech.initial(), b"\0alice\0pencil");
        assert_eq!(mech.name(), "PLAIN");
    }
}
