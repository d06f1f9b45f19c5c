// Copyright (c) 2025 quill contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! SASL authentication for XMPP streams.
//!
//! The [`client::Mechanism`] trait drives one authentication attempt:
//! `initial()` produces the optional initial response, `response()` answers
//! each server challenge and `success()` verifies the data carried on
//! `<success/>`. A failed mechanism is terminal; whether to fall back to
//! another mechanism is the caller's decision.
//!
//! The [`server`] module holds the responder-side counterpart, together
//! with the [`server::Validator`] seam through which credentials are
//! checked — this crate never stores credentials itself.

#![deny(unsafe_code, missing_docs, bare_trait_objects)]

pub mod client;
pub mod common;
pub mod server;
