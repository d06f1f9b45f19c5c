// Copyright (c) 2025 quill contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::collections::BTreeMap;

use md5::{Digest, Md5};

use crate::client::{Mechanism, MechanismError};
use crate::common::{generate_nonce, Credentials, Identity, Secret};

/// The DIGEST-MD5 mechanism (RFC 2831).
///
/// Obsolete on today's network but still advertised by long-lived server
/// deployments, so the engine keeps it below the SCRAM family in its
/// preference order.
pub struct DigestMd5 {
    username: String,
    password: String,
    host: String,
    service: &'static str,
    cnonce: String,
    state: State,
}

enum State {
    AwaitingChallenge,
    /// Final response sent; the follow-up challenge must carry a matching
    /// `rspauth`.
    AwaitingRspauth { expected: String },
    Done,
}

impl DigestMd5 {
    /// Construct from a username, password and target host.
    pub fn new<U: Into<String>, W: Into<String>, H: Into<String>>(
        username: U,
        password: W,
        host: H,
    ) -> Result<DigestMd5, MechanismError> {
        Ok(DigestMd5 {
            username: username.into(),
            password: password.into(),
            host: host.into(),
            service: "xmpp",
            cnonce: generate_nonce(30).map_err(|_| MechanismError::CannotGenerateNonce)?,
            state: State::AwaitingChallenge,
        })
    }
}

/// Parse a digest challenge into its `key=value` pairs, unquoting values.
fn parse_message(data: &[u8]) -> Option<BTreeMap<String, String>> {
    let mut map = BTreeMap::new();
    let mut rest = data;
    while !rest.is_empty() {
        let eq = rest.iter().position(|&b| b == b'=')?;
        let key = core::str::from_utf8(&rest[..eq]).ok()?.trim().to_owned();
        rest = &rest[eq + 1..];
        let value;
        if rest.first() == Some(&b'"') {
            rest = &rest[1..];
            let mut out = Vec::new();
            let mut escaped = false;
            let mut end = None;
            for (i, &b) in rest.iter().enumerate() {
                if escaped {
                    out.push(b);
                    escaped = false;
                } else if b == b'\\' {
                    escaped = true;
                } else if b == b'"' {
                    end = Some(i);
                    break;
                } else {
                    out.push(b);
                }
            }
            let end = end?;
            value = String::from_utf8(out).ok()?;
            rest = &rest[end + 1..];
            // Skip a trailing comma after the closing quote.
            if rest.first() == Some(&b',') {
                rest = &rest[1..];
            }
        } else {
            let end = rest
                .iter()
                .position(|&b| b == b',')
                .unwrap_or(rest.len());
            value = core::str::from_utf8(&rest[..end]).ok()?.trim().to_owned();
            rest = &rest[(end + 1).min(rest.len())..];
        }
        map.insert(key, value);
    }
    Some(map)
}

fn hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{:02x}", b)).collect()
}

fn md5(data: &[u8]) -> Vec<u8> {
    Md5::digest(data).to_vec()
}

impl DigestMd5 {
    /// The RFC 2831 response hash, parameterized over the A2 prefix so it
    /// covers both `response` and `rspauth`.
    fn response_hash(
        &self,
        realm: &str,
        nonce: &str,
        nc: &str,
        digest_uri: &str,
        a2_prefix: &str,
    ) -> String {
        let mut a1 = md5(format!("{}:{}:{}", self.username, realm, self.password).as_bytes());
        a1.extend_from_slice(format!(":{}:{}", nonce, self.cnonce).as_bytes());
        let ha1 = hex(&md5(&a1));
        let ha2 = hex(&md5(format!("{}:{}", a2_prefix, digest_uri).as_bytes()));
        hex(&md5(
            format!("{}:{}:{}:{}:auth:{}", ha1, nonce, nc, self.cnonce, ha2).as_bytes(),
        ))
    }
}

impl Mechanism for DigestMd5 {
    fn name(&self) -> &str {
        "DIGEST-MD5"
    }

    fn from_credentials(credentials: Credentials) -> Result<DigestMd5, MechanismError> {
        let Identity::Username(username) = credentials.identity else {
            return Err(MechanismError::NoUsername);
        };
        let Secret::Password(password) = credentials.secret else {
            return Err(MechanismError::NoPassword);
        };
        let host = credentials.host.ok_or(MechanismError::NoHost)?;
        DigestMd5::new(username, password, host)
    }

    fn response(&mut self, challenge: &[u8]) -> Result<Vec<u8>, MechanismError> {
        match core::mem::replace(&mut self.state, State::Done) {
            State::AwaitingChallenge => {
                let fields =
                    parse_message(challenge).ok_or(MechanismError::CannotDecodeChallenge)?;
                if fields.contains_key("rspauth") {
                    return Err(MechanismError::CannotDecodeChallenge);
                }
                let nonce = fields
                    .get("nonce")
                    .ok_or(MechanismError::MissingAttribute("nonce"))?;
                let realm = fields
                    .get("realm")
                    .map(String::as_str)
                    .unwrap_or(&self.host);
                let digest_uri = format!("{}/{}", self.service, self.host);
                let nc = "00000001";

                let response =
                    self.response_hash(realm, nonce, nc, &digest_uri, "AUTHENTICATE");
                let expected = self.response_hash(realm, nonce, nc, &digest_uri, "");

                let message = format!(
                    "username=\"{}\",realm=\"{}\",nonce=\"{}\",cnonce=\"{}\",nc={},\
                     qop=auth,digest-uri=\"{}\",response={},charset=utf-8",
                    self.username, realm, nonce, self.cnonce, nc, digest_uri, response,
                );
                self.state = State::AwaitingRspauth { expected };
                Ok(message.into_bytes())
            }
            State::AwaitingRspauth { expected } => {
                let fields =
                    parse_message(challenge).ok_or(MechanismError::CannotDecodeChallenge)?;
                let rspauth = fields
                    .get("rspauth")
                    .ok_or(MechanismError::MissingAttribute("rspauth"))?;
                if *rspauth != expected {
                    return Err(MechanismError::ServerSignatureMismatch);
                }
                Ok(Vec::new())
            }
            State::Done => Err(MechanismError::SessionAlreadyOver),
        }
    }

    fn success(&mut self, data: &[u8]) -> Result<(), MechanismError> {
        // Some servers skip the empty third round-trip and put rspauth
        // into <success/> directly.
        match core::mem::replace(&mut self.state, State::Done) {
            State::AwaitingRspauth { expected } if !data.is_empty() => {
                let fields = parse_message(data).ok_or(MechanismError::CannotDecodeChallenge)?;
                let rspauth = fields
                    .get("rspauth")
                    .ok_or(MechanismError::MissingAttribute("rspauth"))?;
                if *rspauth != expected {
                    return Err(MechanismError::ServerSignatureMismatch);
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rfc2831_mechanism() -> DigestMd5 {
        // The worked example from RFC 2831 §4.
        DigestMd5 {
            username: "chris".to_owned(),
            password: "secret".to_owned(),
            host: "elwood.innosoft.com".to_owned(),
            service: "imap",
            cnonce: "OA6MHXh6VqTrRk".to_owned(),
            state: State::AwaitingChallenge,
        }
    }

    #[test]
    fn rfc2831_response() {
        let mut mech = rfc2831_mechanism();
        let response = mech
            .response(
                b"realm=\"elwood.innosoft.com\",nonce=\"OA6MG9tEQGm2hh\",qop=\"auth\",\
                  algorithm=md5-sess,charset=utf-8",
            )
            .unwrap();
        let response = String::from_utf8(response).unwrap();
        assert!(
            response.contains("response=d388dad90d4bbd760a152321f2143af7"),
            "unexpected response: {}",
            response
        );
        assert!(response.contains("digest-uri=\"imap/elwood.innosoft.com\""));

        // Step two: the server proves knowledge of the password too.
        let done = mech.response(b"rspauth=ea40f60335c427b5527b84dbabcdfffd").unwrap();
        assert!(done.is_empty());
    }

    #[test]
    fn wrong_rspauth_is_rejected() {
        let mut mech = rfc2831_mechanism();
        let _ = mech
            .response(
                b"realm=\"elwood.innosoft.com\",nonce=\"OA6MG9tEQGm2hh\",qop=\"auth\",\
                  algorithm=md5-sess,charset=utf-8",
            )
            .unwrap();
        assert_eq!(
            mech.response(b"rspauth=00000000000000000000000000000000"),
            Err(MechanismError::ServerSignatureMismatch)
        );
    }

    #[test]
    fn quoted_values_are_unescaped() {
        let fields = parse_message(b"realm=\"a\\\"b\",nonce=plain,qop=\"auth\"").unwrap();
        assert_eq!(fields["realm"], "a\"b");
        assert_eq!(fields["nonce"], "plain");
        assert_eq!(fields["qop"], "auth");
    }
}
