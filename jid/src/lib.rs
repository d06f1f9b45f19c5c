// Copyright (c) 2025 quill contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Jabber ID (JID) address types.
//!
//! A JID is the `node@domain/resource` address format used throughout XMPP.
//! [`Jid`] can hold any valid JID; [`BareJid`] and [`FullJid`] are proofs
//! that the resource part is respectively absent and present.
//!
//! All parts are stringprep'd on construction, so two JIDs which only
//! differ in case or Unicode normalization compare equal.

use core::fmt;
use core::hash::{Hash, Hasher};
use core::num::NonZeroU16;
use core::str::FromStr;
use std::borrow::Cow;
use std::error::Error as StdError;

use memchr::memchr;

/// An error that can occur when parsing a JID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The domain part is missing or empty.
    DomainEmpty,
    /// The node part is present but empty (`@domain`).
    NodeEmpty,
    /// The resource part is present but empty (`domain/`).
    ResourceEmpty,
    /// A full JID was required but no resource part was present.
    ResourceMissingInFullJid,
    /// A bare JID was required but a resource part was present.
    ResourceInBareJid,
    /// The node part failed nodeprep.
    NodePrep,
    /// The domain part failed nameprep.
    NamePrep,
    /// The resource part failed resourceprep.
    ResourcePrep,
    /// A part exceeded the 1023 byte limit of RFC 7622.
    TooLong,
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str(match self {
            Error::DomainEmpty => "domain part is empty",
            Error::NodeEmpty => "node part is empty",
            Error::ResourceEmpty => "resource part is empty",
            Error::ResourceMissingInFullJid => "no resource part in this full JID",
            Error::ResourceInBareJid => "resource part found in this bare JID",
            Error::NodePrep => "node part violates nodeprep",
            Error::NamePrep => "domain part violates nameprep",
            Error::ResourcePrep => "resource part violates resourceprep",
            Error::TooLong => "JID part is longer than 1023 bytes",
        })
    }
}

impl StdError for Error {}

const MAX_PART_LEN: usize = 1023;

fn length_check(len: usize, error_empty: Error) -> Result<(), Error> {
    if len == 0 {
        Err(error_empty)
    } else if len > MAX_PART_LEN {
        Err(Error::TooLong)
    } else {
        Ok(())
    }
}

fn node_prep(s: &str) -> Result<Cow<'_, str>, Error> {
    length_check(s.len(), Error::NodeEmpty)?;
    let node = stringprep::nodeprep(s).map_err(|_| Error::NodePrep)?;
    length_check(node.len(), Error::NodeEmpty)?;
    Ok(node)
}

fn name_prep(s: &str) -> Result<Cow<'_, str>, Error> {
    length_check(s.len(), Error::DomainEmpty)?;
    // Trailing dots are allowed in DNS but carry no meaning in a JID.
    let s = s.strip_suffix('.').unwrap_or(s);
    let domain = stringprep::nameprep(s).map_err(|_| Error::NamePrep)?;
    length_check(domain.len(), Error::DomainEmpty)?;
    Ok(domain)
}

fn resource_prep(s: &str) -> Result<Cow<'_, str>, Error> {
    length_check(s.len(), Error::ResourceEmpty)?;
    let resource = stringprep::resourceprep(s).map_err(|_| Error::ResourcePrep)?;
    length_check(resource.len(), Error::ResourceEmpty)?;
    Ok(resource)
}

/// A Jabber ID, bare or full.
///
/// The inner representation is a single normalized string with the
/// separator offsets, so cloning and comparing are cheap.
#[derive(Clone, Eq)]
pub struct Jid {
    normalized: String,
    // Offset of the '@', if any. Offsets fit in u16 because every part is
    // limited to 1023 bytes.
    at: Option<NonZeroU16>,
    // Offset of the '/', if any.
    slash: Option<NonZeroU16>,
}

impl fmt::Debug for Jid {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "Jid({})", self.normalized)
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str(&self.normalized)
    }
}

impl PartialEq for Jid {
    fn eq(&self, other: &Jid) -> bool {
        self.normalized == other.normalized
    }
}

impl Hash for Jid {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized.hash(state)
    }
}

impl PartialOrd for Jid {
    fn partial_cmp(&self, other: &Jid) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Jid {
    fn cmp(&self, other: &Jid) -> core::cmp::Ordering {
        self.normalized.cmp(&other.normalized)
    }
}

impl Jid {
    /// Parse and normalize a JID from its string representation.
    pub fn new(unnormalized: &str) -> Result<Jid, Error> {
        let (node, rest) = match memchr(b'@', unnormalized.as_bytes()) {
            Some(at) => (Some(&unnormalized[..at]), &unnormalized[at + 1..]),
            None => (None, unnormalized),
        };
        let (domain, resource) = match memchr(b'/', rest.as_bytes()) {
            Some(slash) => (&rest[..slash], Some(&rest[slash + 1..])),
            None => (rest, None),
        };

        let mut normalized = String::with_capacity(unnormalized.len());
        let mut at = None;
        if let Some(node) = node {
            normalized.push_str(&node_prep(node)?);
            at = NonZeroU16::new(normalized.len() as u16);
            normalized.push('@');
        }
        normalized.push_str(&name_prep(domain)?);
        let mut slash = None;
        if let Some(resource) = resource {
            slash = NonZeroU16::new(normalized.len() as u16);
            normalized.push('/');
            normalized.push_str(&resource_prep(resource)?);
        }

        Ok(Jid {
            normalized,
            at,
            slash,
        })
    }

    /// The node part (the part before the `@`), if any.
    pub fn node(&self) -> Option<&str> {
        self.at.map(|at| &self.normalized[..at.get() as usize])
    }

    /// The domain part. Always present.
    pub fn domain(&self) -> &str {
        let start = self.at.map(|at| at.get() as usize + 1).unwrap_or(0);
        match self.slash {
            Some(slash) => &self.normalized[start..slash.get() as usize],
            None => &self.normalized[start..],
        }
    }

    /// The resource part (the part after the `/`), if any.
    pub fn resource(&self) -> Option<&str> {
        self.slash
            .map(|slash| &self.normalized[slash.get() as usize + 1..])
    }

    /// Whether this JID has a resource part.
    pub fn is_full(&self) -> bool {
        self.slash.is_some()
    }

    /// Strip the resource part, if any.
    pub fn to_bare(&self) -> BareJid {
        match self.slash {
            None => BareJid {
                inner: self.clone(),
            },
            Some(slash) => BareJid {
                inner: Jid {
                    normalized: self.normalized[..slash.get() as usize].to_owned(),
                    at: self.at,
                    slash: None,
                },
            },
        }
    }

    /// Convert into a full JID; fails if no resource part is present.
    pub fn try_into_full(self) -> Result<FullJid, Error> {
        if self.is_full() {
            Ok(FullJid { inner: self })
        } else {
            Err(Error::ResourceMissingInFullJid)
        }
    }

    /// The normalized string representation.
    pub fn as_str(&self) -> &str {
        &self.normalized
    }
}

impl FromStr for Jid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Jid, Error> {
        Jid::new(s)
    }
}

/// A JID without a resource part (`node@domain` or `domain`).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BareJid {
    inner: Jid,
}

/// A JID with a resource part (`node@domain/resource` or
/// `domain/resource`).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FullJid {
    inner: Jid,
}

macro_rules! forward_jid_api {
    ($t:ident) => {
        impl $t {
            /// The node part (the part before the `@`), if any.
            pub fn node(&self) -> Option<&str> {
                self.inner.node()
            }

            /// The domain part. Always present.
            pub fn domain(&self) -> &str {
                self.inner.domain()
            }

            /// The normalized string representation.
            pub fn as_str(&self) -> &str {
                self.inner.as_str()
            }
        }

        impl fmt::Debug for $t {
            fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
                write!(fmt, "{}({})", stringify!($t), self.inner.normalized)
            }
        }

        impl fmt::Display for $t {
            fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
                fmt.write_str(&self.inner.normalized)
            }
        }

        impl From<$t> for Jid {
            fn from(jid: $t) -> Jid {
                jid.inner
            }
        }
    };
}

forward_jid_api!(BareJid);
forward_jid_api!(FullJid);

impl BareJid {
    /// Parse a bare JID; fails if a resource part is present.
    pub fn new(unnormalized: &str) -> Result<BareJid, Error> {
        let inner = Jid::new(unnormalized)?;
        if inner.is_full() {
            return Err(Error::ResourceInBareJid);
        }
        Ok(BareJid { inner })
    }

    /// Attach a resource part, yielding a full JID.
    pub fn with_resource(&self, resource: &str) -> Result<FullJid, Error> {
        let resource = resource_prep(resource)?;
        let slash = NonZeroU16::new(self.inner.normalized.len() as u16);
        let mut normalized = self.inner.normalized.clone();
        normalized.push('/');
        normalized.push_str(&resource);
        Ok(FullJid {
            inner: Jid {
                normalized,
                at: self.inner.at,
                slash,
            },
        })
    }
}

impl FullJid {
    /// Parse a full JID; fails if no resource part is present.
    pub fn new(unnormalized: &str) -> Result<FullJid, Error> {
        let inner = Jid::new(unnormalized)?;
        if !inner.is_full() {
            return Err(Error::ResourceMissingInFullJid);
        }
        Ok(FullJid { inner })
    }

    /// The resource part.
    pub fn resource(&self) -> &str {
        // Invariant: a FullJid always has a resource.
        self.inner.resource().unwrap()
    }

    /// Strip the resource part.
    pub fn to_bare(&self) -> BareJid {
        self.inner.to_bare()
    }
}

impl FromStr for BareJid {
    type Err = Error;

    fn from_str(s: &str) -> Result<BareJid, Error> {
        BareJid::new(s)
    }
}

impl FromStr for FullJid {
    type Err = Error;

    fn from_str(s: &str) -> Result<FullJid, Error> {
        FullJid::new(s)
    }
}

impl PartialEq<Jid> for FullJid {
    fn eq(&self, other: &Jid) -> bool {
        self.inner == *other
    }
}

impl PartialEq<Jid> for BareJid {
    fn eq(&self, other: &Jid) -> bool {
        self.inner == *other
    }
}

impl PartialEq<FullJid> for Jid {
    fn eq(&self, other: &FullJid) -> bool {
        *self == other.inner
    }
}

impl PartialEq<BareJid> for Jid {
    fn eq(&self, other: &BareJid) -> bool {
        *self == other.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_parts() {
        let jid = Jid::new("alice@example.org/phone").unwrap();
        assert_eq!(jid.node(), Some("alice"));
        assert_eq!(jid.domain(), "example.org");
        assert_eq!(jid.resource(), Some("phone"));
        assert!(jid.is_full());

        let jid = Jid::new("example.org").unwrap();
        assert_eq!(jid.node(), None);
        assert_eq!(jid.domain(), "example.org");
        assert_eq!(jid.resource(), None);
    }

    #[test]
    fn normalization() {
        let jid = Jid::new("Alice@Example.Org/Phone").unwrap();
        assert_eq!(jid.as_str(), "alice@example.org/Phone");
        assert_eq!(jid, Jid::new("alice@example.org/Phone").unwrap());
    }

    #[test]
    fn errors() {
        assert_eq!(Jid::new("@example.org"), Err(Error::NodeEmpty));
        assert_eq!(Jid::new("alice@"), Err(Error::DomainEmpty));
        assert_eq!(Jid::new(""), Err(Error::DomainEmpty));
        assert_eq!(Jid::new("example.org/"), Err(Error::ResourceEmpty));
        assert_eq!(
            FullJid::new("alice@example.org"),
            Err(Error::ResourceMissingInFullJid)
        );
        assert_eq!(
            BareJid::new("alice@example.org/phone"),
            Err(Error::ResourceInBareJid)
        );
    }

    #[test]
    fn bare_and_full() {
        let full = FullJid::new("alice@example.org/phone").unwrap();
        assert_eq!(full.resource(), "phone");
        let bare = full.to_bare();
        assert_eq!(bare.as_str(), "alice@example.org");
        let full2 = bare.with_resource("phone").unwrap();
        assert_eq!(full, full2);
    }

    #[test]
    fn domain_with_trailing_dot() {
        let jid = Jid::new("alice@example.org.").unwrap();
        assert_eq!(jid.domain(), "example.org");
    }
}
