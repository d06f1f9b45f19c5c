// Copyright (c) 2025 quill contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The fixed registry of XMPP namespace URIs used by the engine.
//!
//! These string constants are a stable external contract and must not be
//! altered.

/// RFC 6120: the stream envelope namespace.
pub const STREAM: &str = "http://etherx.jabber.org/streams";

/// RFC 6120: client-to-server content namespace.
pub const JABBER_CLIENT: &str = "jabber:client";

/// RFC 6120: server-to-server content namespace.
pub const JABBER_SERVER: &str = "jabber:server";

/// The content namespace this build of the codec speaks.
pub const DEFAULT_NS: &str = JABBER_CLIENT;

/// RFC 6120: StartTLS negotiation.
pub const TLS: &str = "urn:ietf:params:xml:ns:xmpp-tls";

/// RFC 6120: SASL negotiation.
pub const SASL: &str = "urn:ietf:params:xml:ns:xmpp-sasl";

/// RFC 6120: resource binding.
pub const BIND: &str = "urn:ietf:params:xml:ns:xmpp-bind";

/// RFC 3921: legacy session establishment.
pub const SESSION: &str = "urn:ietf:params:xml:ns:xmpp-session";

/// RFC 6120: stanza error conditions.
pub const XMPP_STANZAS: &str = "urn:ietf:params:xml:ns:xmpp-stanzas";

/// RFC 6120: stream error conditions.
pub const XMPP_STREAMS: &str = "urn:ietf:params:xml:ns:xmpp-streams";

/// XEP-0198: stream management.
pub const SM: &str = "urn:xmpp:sm:3";

/// XEP-0199: XMPP ping.
pub const PING: &str = "urn:xmpp:ping";

/// XML 1.0 namespace, for `xml:lang`.
pub const XML: &str = "http://www.w3.org/XML/1998/namespace";
