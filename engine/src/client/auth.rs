// Copyright (c) 2025 quill contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! SASL authentication on a fresh stream.

use futures::StreamExt;
use minidom::Element;
use tokio::io::{AsyncBufRead, AsyncWrite};

use sasl::client::mechanisms::{Anonymous, DigestMd5, Plain, Scram, XOAuth2};
use sasl::client::Mechanism;
use sasl::common::scram::{Sha1, Sha256};
use sasl::common::{Credentials, Secret};
use stanzas::ns;
use stanzas::sasl::{Auth, Nonza, Response};
use stanzas::stream_features::StreamFeatures;

use crate::error::{AuthError, Error, ProtocolError};
use crate::xmlstream::{ReadError, XmlStream};

/// All mechanisms these credentials can drive, strongest first.
///
/// The order is the engine's fixed preference list; when two mechanisms
/// of similar strength are both on offer (the SCRAM variants), the
/// earlier entry wins deterministically.
fn local_mechanisms(creds: &Credentials) -> Vec<Box<dyn Mechanism + Send>> {
    let mut mechanisms: Vec<Box<dyn Mechanism + Send>> = Vec::new();
    if let Ok(mechanism) = Scram::<Sha256>::from_credentials(creds.clone()) {
        mechanisms.push(Box::new(mechanism));
    }
    if let Ok(mechanism) = Scram::<Sha1>::from_credentials(creds.clone()) {
        mechanisms.push(Box::new(mechanism));
    }
    if let Ok(mechanism) = DigestMd5::from_credentials(creds.clone()) {
        mechanisms.push(Box::new(mechanism));
    }
    if let Ok(mechanism) = Plain::from_credentials(creds.clone()) {
        mechanisms.push(Box::new(mechanism));
    }
    if let Ok(mechanism) = XOAuth2::from_credentials(creds.clone()) {
        mechanisms.push(Box::new(mechanism));
    }
    if matches!(creds.secret, Secret::None) {
        if let Ok(mechanism) = Anonymous::from_credentials(creds.clone()) {
            mechanisms.push(Box::new(mechanism));
        }
    }
    mechanisms
}

/// Select a mechanism and drive the challenge/response exchange to
/// completion.
///
/// On success the stream must be restarted by the caller; on failure the
/// error is terminal for this connection attempt and nothing is retried
/// here.
pub(crate) async fn auth<Io: AsyncBufRead + AsyncWrite + Unpin>(
    mut stream: XmlStream<Io>,
    features: &StreamFeatures,
    creds: Credentials,
) -> Result<Io, Error> {
    if features.sasl_mechanisms.is_empty() {
        return Err(ProtocolError::NoSasl.into());
    }

    let mut mechanism = local_mechanisms(&creds)
        .into_iter()
        .find(|mechanism| {
            features
                .sasl_mechanisms
                .iter()
                .any(|offered| offered == mechanism.name())
        })
        .ok_or(AuthError::NoMechanism)?;

    log::debug!("authenticating via {}", mechanism.name());
    stream
        .send(&Element::from(Nonza::Auth(Auth {
            mechanism: mechanism.name().to_owned(),
            data: mechanism.initial(),
        })))
        .await?;

    loop {
        let element = match stream.next().await {
            Some(Ok(element)) => element,
            Some(Err(ReadError::SoftTimeout)) => continue,
            Some(Err(ReadError::HardError(e))) => return Err(e.into()),
            Some(Err(ReadError::StreamFooterReceived)) | None => {
                return Err(Error::Disconnected)
            }
        };
        if !element.has_ns(ns::SASL) {
            if element.is("error", ns::STREAM) {
                let error = stanzas::stream_error::StreamError::try_from(element)
                    .map_err(|e| Error::from(e.into_invalid()))?;
                return Err(error.into());
            }
            log::trace!("ignoring non-SASL element during authentication");
            continue;
        }
        match Nonza::try_from(element).map_err(|e| Error::from(e.into_invalid()))? {
            Nonza::Challenge(challenge) => {
                let response = mechanism
                    .response(&challenge.data)
                    .map_err(AuthError::Sasl)?;
                stream
                    .send(&Element::from(Nonza::Response(Response { data: response })))
                    .await?;
            }
            Nonza::Success(success) => {
                mechanism.success(&success.data).map_err(AuthError::Sasl)?;
                log::debug!("authentication succeeded");
                return Ok(stream.into_inner());
            }
            Nonza::Failure(failure) => {
                return Err(AuthError::Fail(failure.defined_condition).into());
            }
            _ => return Err(ProtocolError::UnexpectedElement.into()),
        }
    }
}
