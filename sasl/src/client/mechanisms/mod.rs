// Copyright (c) 2025 quill contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Provided client mechanisms.
//!
//! When several mechanisms are mutually supported, the engine selects the
//! strongest one by the fixed preference order `SCRAM-SHA-256` >
//! `SCRAM-SHA-1` > `DIGEST-MD5` > `PLAIN` > `X-OAUTH2` > `ANONYMOUS`.
//! Equal-strength variants are deliberately ordered by this list rather
//! than by whatever order the server advertises.

#[cfg(feature = "anonymous")]
mod anonymous;
#[cfg(feature = "digest-md5")]
mod digest_md5;
mod plain;
#[cfg(feature = "scram")]
mod scram;
mod xoauth2;

#[cfg(feature = "anonymous")]
pub use self::anonymous::Anonymous;
#[cfg(feature = "digest-md5")]
pub use self::digest_md5::DigestMd5;
pub use self::plain::Plain;
#[cfg(feature = "scram")]
pub use self::scram::Scram;
pub use self::xoauth2::XOAuth2;
