// Copyright (c) 2025 quill contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Error types for the stanza codec.

use core::fmt;
use std::error::Error as StdError;

use minidom::Element;

/// A decoding error: the element matched the expected type but its
/// contents are invalid.
#[derive(Debug)]
pub enum Error {
    /// Generic, unspecified other error.
    Other(&'static str),

    /// Attempt to parse text data failed with the provided nested error.
    TextParseError(Box<dyn StdError + Send + Sync + 'static>),
}

impl Error {
    /// Convenience constructor for the
    /// [`TextParseError`][`Self::TextParseError`] variant.
    pub fn text_parse_error<T: StdError + Send + Sync + 'static>(e: T) -> Error {
        Error::TextParseError(Box::new(e))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Other(msg) => fmt.write_str(msg),
            Error::TextParseError(e) => write!(fmt, "text parse error: {}", e),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::TextParseError(e) => Some(&**e),
            _ => None,
        }
    }
}

/// The error type of every `TryFrom<Element>` in this crate.
///
/// The `Mismatch` variant hands the element back untouched, which is what
/// lets callers probe an element against several types in sequence.
#[derive(Debug)]
pub enum FromElementError {
    /// The element is of the expected type but its contents are invalid.
    Invalid(Error),

    /// The element is not of the expected type; here it is back.
    Mismatch(Box<Element>),
}

impl fmt::Display for FromElementError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FromElementError::Invalid(e) => write!(fmt, "{}", e),
            FromElementError::Mismatch(e) => {
                write!(fmt, "unexpected element <{} xmlns='{}'/>", e.name(), e.ns())
            }
        }
    }
}

impl StdError for FromElementError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            FromElementError::Invalid(e) => Some(e),
            FromElementError::Mismatch(_) => None,
        }
    }
}

impl From<Error> for FromElementError {
    fn from(e: Error) -> FromElementError {
        FromElementError::Invalid(e)
    }
}

impl FromElementError {
    /// Convert into the inner [`Error`], mapping `Mismatch` to a generic
    /// type-mismatch error.
    pub fn into_invalid(self) -> Error {
        match self {
            FromElementError::Invalid(e) => e,
            FromElementError::Mismatch(_) => {
                Error::Other("mismatch between expected and actual XML data")
            }
        }
    }
}
