// Copyright (c) 2025 quill contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use crate::common::{generate_nonce, Identity};
use crate::server::{Mechanism, MechanismError, Response};

/// Responder side of ANONYMOUS (RFC 4505): assign a throwaway identity.
pub struct Anonymous;

impl Anonymous {
    /// Construct the mechanism.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Anonymous {
        Anonymous
    }
}

impl Mechanism for Anonymous {
    fn name(&self) -> &str {
        "ANONYMOUS"
    }

    fn respond(&mut self, payload: &[u8]) -> Result<Response, MechanismError> {
        // The trace string, if any, is ignored but must be valid UTF-8.
        if core::str::from_utf8(payload).is_err() {
            return Err(MechanismError::FailedToDecodeMessage);
        }
        let username = generate_nonce(16)?;
        Ok(Response::Success(Identity::Username(username), Vec::new()))
    }
}
