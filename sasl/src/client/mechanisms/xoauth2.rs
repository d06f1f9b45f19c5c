// Copyright (c) 2025 quill contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use crate::client::{Mechanism, MechanismError};
use crate::common::{Credentials, Identity, Secret};

/// The X-OAUTH2 mechanism: a bearer token instead of a password, in a
/// single step. Used by a handful of large providers.
pub struct XOAuth2 {
    username: String,
    token: String,
}

impl XOAuth2 {
    /// Construct from a username and an access token.
    pub fn new<U: Into<String>, T: Into<String>>(username: U, token: T) -> XOAuth2 {
        XOAuth2 {
            username: username.into(),
            token: token.into(),
        }
    }
}

impl Mechanism for XOAuth2 {
    fn name(&self) -> &str {
        "X-OAUTH2"
    }

    fn from_credentials(credentials: Credentials) -> Result<XOAuth2, MechanismError> {
        let Identity::Username(username) = credentials.identity else {
            return Err(MechanismError::NoUsername);
        };
        let Secret::Token(token) = credentials.secret else {
            return Err(MechanismError::NoToken);
        };
        Ok(XOAuth2 { username, token })
    }

    fn initial(&mut self) -> Vec<u8> {
        let mut data = Vec::new();
        data.push(0);
        data.extend_from_slice(self.username.as_bytes());
        data.push(0);
        data.extend_from_slice(self.token.as_bytes());
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_response_layout() {
        let mut mech = XOAuth2::new("alice", "ya29.token");
        assert_eq!(mech.initial(), b"\0alice\0ya29.token");
    }
}
