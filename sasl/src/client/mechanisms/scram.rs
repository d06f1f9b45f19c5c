// Copyright (c) 2025 quill contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use core::marker::PhantomData;

use base64::{engine::general_purpose::STANDARD as Base64, Engine};

use crate::client::{Mechanism, MechanismError};
use crate::common::scram::ScramProvider;
use crate::common::{generate_nonce, ChannelBinding, Credentials, Identity, Secret};

/// The SCRAM mechanism family (RFC 5802), parameterized over the hash
/// through a [`ScramProvider`].
///
/// Both sides prove knowledge of the salted password without ever putting
/// it on the wire, and the server signature received on `<success/>` is
/// verified so a password-oblivious server cannot fake a success.
pub struct Scram<P: ScramProvider> {
    username: String,
    password: String,
    channel_binding: ChannelBinding,
    state: State,
    _marker: PhantomData<P>,
}

enum State {
    /// Nothing sent yet.
    Fresh { client_nonce: String },
    /// Initial response sent, waiting for server-first.
    SentInitial {
        client_nonce: String,
        client_first_bare: Vec<u8>,
    },
    /// Final response sent, waiting for `<success/>`.
    AwaitingSuccess { server_signature: Vec<u8> },
    /// Exchange complete.
    Done,
}

impl<P: ScramProvider> Scram<P> {
    /// Construct from a username and password with a random nonce.
    pub fn new<U: Into<String>, W: Into<String>>(
        username: U,
        password: W,
        channel_binding: ChannelBinding,
    ) -> Result<Scram<P>, MechanismError> {
        let client_nonce =
            generate_nonce(32).map_err(|_| MechanismError::CannotGenerateNonce)?;
        Ok(Scram::with_nonce(
            username,
            password,
            channel_binding,
            client_nonce,
        ))
    }

    fn with_nonce<U: Into<String>, W: Into<String>>(
        username: U,
        password: W,
        channel_binding: ChannelBinding,
        client_nonce: String,
    ) -> Scram<P> {
        Scram {
            username: username.into(),
            password: password.into(),
            channel_binding,
            state: State::Fresh { client_nonce },
            _marker: PhantomData,
        }
    }
}

/// Split a SCRAM message into its single-letter attributes.
fn attribute<'a>(message: &'a [u8], name: u8) -> Option<&'a [u8]> {
    message.split(|&b| b == b',').find_map(|part| {
        if part.len() >= 2 && part[0] == name && part[1] == b'=' {
            Some(&part[2..])
        } else {
            None
        }
    })
}

impl<P: ScramProvider> Mechanism for Scram<P> {
    fn name(&self) -> &str {
        P::name()
    }

    fn from_credentials(credentials: Credentials) -> Result<Scram<P>, MechanismError> {
        let Identity::Username(username) = credentials.identity else {
            return Err(MechanismError::NoUsername);
        };
        let Secret::Password(password) = credentials.secret else {
            return Err(MechanismError::NoPassword);
        };
        Scram::new(username, password, credentials.channel_binding)
    }

    fn initial(&mut self) -> Vec<u8> {
        let client_nonce = match &self.state {
            State::Fresh { client_nonce } => client_nonce.clone(),
            // initial() is only ever called first; any other state is a
            // bug in the caller, answered with an empty response which the
            // server will reject.
            _ => return Vec::new(),
        };

        let mut client_first_bare = Vec::new();
        client_first_bare.extend_from_slice(b"n=");
        client_first_bare.extend_from_slice(self.username.as_bytes());
        client_first_bare.extend_from_slice(b",r=");
        client_first_bare.extend_from_slice(client_nonce.as_bytes());

        let mut message = self.channel_binding.header().to_vec();
        message.extend_from_slice(&client_first_bare);

        self.state = State::SentInitial {
            client_nonce,
            client_first_bare,
        };
        message
    }

    fn response(&mut self, challenge: &[u8]) -> Result<Vec<u8>, MechanismError> {
        let (client_nonce, client_first_bare) =
            match core::mem::replace(&mut self.state, State::Done) {
                State::SentInitial {
                    client_nonce,
                    client_first_bare,
                } => (client_nonce, client_first_bare),
                _ => return Err(MechanismError::SessionAlreadyOver),
            };

        let server_nonce =
            attribute(challenge, b'r').ok_or(MechanismError::MissingAttribute("r"))?;
        let salt = attribute(challenge, b's').ok_or(MechanismError::MissingAttribute("s"))?;
        let iterations =
            attribute(challenge, b'i').ok_or(MechanismError::MissingAttribute("i"))?;

        if !server_nonce.starts_with(client_nonce.as_bytes()) {
            return Err(MechanismError::InvalidServerNonce);
        }
        let salt = Base64
            .decode(salt)
            .map_err(|_| MechanismError::InvalidField("s"))?;
        let iterations: u32 = core::str::from_utf8(iterations)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(MechanismError::InvalidField("i"))?;

        // c= carries the gs2 header and any channel binding data.
        let mut cb_input = self.channel_binding.header().to_vec();
        cb_input.extend_from_slice(self.channel_binding.data());

        let mut client_final_bare = Vec::new();
        client_final_bare.extend_from_slice(b"c=");
        client_final_bare.extend_from_slice(Base64.encode(&cb_input).as_bytes());
        client_final_bare.extend_from_slice(b",r=");
        client_final_bare.extend_from_slice(server_nonce);

        let salted_password = P::derive(self.password.as_bytes(), &salt, iterations)
            .map_err(|_| MechanismError::CannotDeriveKeys)?;
        let client_key = P::hmac(b"Client Key", &salted_password)
            .map_err(|_| MechanismError::CannotDeriveKeys)?;
        let stored_key = P::hash(&client_key);

        let mut auth_message = client_first_bare;
        auth_message.push(b',');
        auth_message.extend_from_slice(challenge);
        auth_message.push(b',');
        auth_message.extend_from_slice(&client_final_bare);

        let client_signature =
            P::hmac(&auth_message, &stored_key).map_err(|_| MechanismError::CannotDeriveKeys)?;
        let client_proof: Vec<u8> = client_key
            .iter()
            .zip(client_signature.iter())
            .map(|(key, sig)| key ^ sig)
            .collect();

        let server_key = P::hmac(b"Server Key", &salted_password)
            .map_err(|_| MechanismError::CannotDeriveKeys)?;
        let server_signature =
            P::hmac(&auth_message, &server_key).map_err(|_| MechanismError::CannotDeriveKeys)?;

        let mut message = client_final_bare;
        message.extend_from_slice(b",p=");
        message.extend_from_slice(Base64.encode(&client_proof).as_bytes());

        self.state = State::AwaitingSuccess { server_signature };
        Ok(message)
    }

    fn success(&mut self, data: &[u8]) -> Result<(), MechanismError> {
        let server_signature = match core::mem::replace(&mut self.state, State::Done) {
            State::AwaitingSuccess { server_signature } => server_signature,
            _ => return Err(MechanismError::SessionAlreadyOver),
        };
        let verifier =
            attribute(data, b'v').ok_or(MechanismError::MissingAttribute("v"))?;
        let verifier = Base64
            .decode(verifier)
            .map_err(|_| MechanismError::InvalidField("v"))?;
        if verifier == server_signature {
            Ok(())
        } else {
            Err(MechanismError::ServerSignatureMismatch)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::scram::Sha1;

    /// The worked example from RFC 5802 §5.
    #[test]
    fn rfc5802_sha1_exchange() {
        let mut mech: Scram<Sha1> = Scram::with_nonce(
            "user",
            "pencil",
            ChannelBinding::None,
            "fyko+d2lbbFgONRv9qkxdawL".to_owned(),
        );
        assert_eq!(mech.name(), "SCRAM-SHA-1");
        assert_eq!(
            mech.initial(),
            b"n,,n=user,r=fyko+d2lbbFgONRv9qkxdawL".to_vec()
        );

        let response = mech
            .response(b"r=fyko+d2lbbFgONRv9qkxdawL3rfcNHYJY1ZVvWVs7j,s=QSXCR+Q6sek8bf92,i=4096")
            .unwrap();
        assert_eq!(
            response,
            b"c=biws,r=fyko+d2lbbFgONRv9qkxdawL3rfcNHYJY1ZVvWVs7j,p=v0X8v3Bz2T0CJGbJQyF0X+HI4Ts="
                .to_vec()
        );

        mech.success(b"v=rmF9pqV8S7suAoZWja4dJRkFsKQ=").unwrap();
    }

    #[test]
    fn bad_server_signature_is_rejected() {
        let mut mech: Scram<Sha1> = Scram::with_nonce(
            "user",
            "pencil",
            ChannelBinding::None,
            "fyko+d2lbbFgONRv9qkxdawL".to_owned(),
        );
        let _ = mech.initial();
        let _ = mech
            .response(b"r=fyko+d2lbbFgONRv9qkxdawL3rfcNHYJY1ZVvWVs7j,s=QSXCR+Q6sek8bf92,i=4096")
            .unwrap();
        assert_eq!(
            mech.success(b"v=AAAAAAAAAAAAAAAAAAAAAAAAAAA="),
            Err(MechanismError::ServerSignatureMismatch)
        );
    }

    #[test]
    fn nonce_must_extend_ours() {
        let mut mech: Scram<Sha1> = Scram::with_nonce(
            "user",
            "pencil",
            ChannelBinding::None,
            "abcdef".to_owned(),
        );
        let _ = mech.initial();
        assert_eq!(
            mech.response(b"r=somebody-else,s=QSXCR+Q6sek8bf92,i=4096"),
            Err(MechanismError::InvalidServerNonce)
        );
    }
}
