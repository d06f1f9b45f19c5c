// Copyright (c) 2025 quill contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use crate::client::{Mechanism, MechanismError};
use crate::common::{generate_nonce, Credentials};

/// The ANONYMOUS mechanism (RFC 4505): obtain a temporary identity that
/// lives as long as the session.
pub struct Anonymous {
    trace: String,
}

impl Anonymous {
    /// Construct a new anonymous exchange with a random trace string.
    pub fn new() -> Result<Anonymous, MechanismError> {
        Ok(Anonymous {
            trace: generate_nonce(16).map_err(|_| MechanismError::CannotGenerateNonce)?,
        })
    }
}

impl Mechanism for Anonymous {
    fn name(&self) -> &str {
        "ANONYMOUS"
    }

    fn from_credentials(_credentials: Credentials) -> Result<Anonymous, MechanismError> {
        Anonymous::new()
    }

    fn initial(&mut self) -> Vec<u8> {
        self.trace.as_bytes().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_is_printable() {
        let mut mech = Anonymous::new().unwrap();
        let initial = mech.initial();
        assert_eq!(initial.len(), 16);
        assert!(initial.iter().all(|b| b.is_ascii_alphanumeric()));
    }
}
