// Copyright (c) 2025 quill contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Extension module dispatch.
//!
//! Incoming elements that the engine core does not consume itself are
//! offered to registered extension modules in deterministic order:
//! highest declared priority first, ties broken by registration order.
//! The first module that reports the element as handled stops the
//! dispatch.

use minidom::Element;

use crate::client::StanzaSender;

/// One protocol extension plugged into a [`Client`][`crate::Client`].
///
/// Extensions never touch the socket; everything they send goes through
/// the [`StanzaSender`] they are handed.
pub trait ExtensionModule: Send {
    /// The disco#info feature namespaces this extension makes the client
    /// advertise.
    fn discovery_features(&self) -> Vec<&'static str> {
        Vec::new()
    }

    /// Offer an incoming element to this extension.
    ///
    /// Returns true when the element was consumed, which stops further
    /// dispatch.
    fn handle_stanza(&mut self, sender: &StanzaSender, element: &Element) -> bool;
}

pub(crate) struct Dispatcher {
    /// Modules with their sort key: declared priority (higher runs
    /// first) and registration sequence number.
    modules: Vec<(i32, usize, Box<dyn ExtensionModule>)>,
}

impl Dispatcher {
    pub(crate) fn new() -> Self {
        Self {
            modules: Vec::new(),
        }
    }

    /// Register an extension with the given priority.
    pub(crate) fn register(&mut self, priority: i32, module: Box<dyn ExtensionModule>) {
        let seq = self.modules.len();
        self.modules.push((priority, seq, module));
        // Stable ordering: by descending priority, then registration
        // order.
        self.modules
            .sort_by(|(pa, sa, _), (pb, sb, _)| pb.cmp(pa).then(sa.cmp(sb)));
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Offer an element to every module in order; true if one consumed
    /// it.
    pub(crate) fn dispatch(&mut self, sender: &StanzaSender, element: &Element) -> bool {
        for (_, _, module) in self.modules.iter_mut() {
            if module.handle_stanza(sender, element) {
                return true;
            }
        }
        false
    }

    /// The union of all registered extensions' advertised features.
    pub(crate) fn discovery_features(&self) -> Vec<&'static str> {
        let mut features: Vec<&'static str> = self
            .modules
            .iter()
            .flat_map(|(_, _, module)| module.discovery_features())
            .collect();
        features.sort_unstable();
        features.dedup();
        features
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use tokio::sync::mpsc;

    struct Recorder {
        tag: usize,
        claims: bool,
        order: Arc<OrderLog>,
    }

    struct OrderLog {
        next: AtomicUsize,
        seen: std::sync::Mutex<Vec<usize>>,
    }

    impl OrderLog {
        fn new() -> Arc<Self> {
            Arc::new(OrderLog {
                next: AtomicUsize::new(0),
                seen: std::sync::Mutex::new(Vec::new()),
            })
        }
    }

    impl ExtensionModule for Recorder {
        fn discovery_features(&self) -> Vec<&'static str> {
            vec!["urn:example:recorder"]
        }

        fn handle_stanza(&mut self, _sender: &StanzaSender, _element: &Element) -> bool {
            self.order.next.fetch_add(1, Ordering::SeqCst);
            self.order.seen.lock().unwrap().push(self.tag);
            self.claims
        }
    }

    fn sender() -> StanzaSender {
        let (tx, _rx) = mpsc::unbounded_channel();
        StanzaSender::new(tx)
    }

    fn element() -> Element {
        Element::builder("x", "urn:example").build()
    }

    #[test]
    fn priority_order_with_stable_ties() {
        let order = OrderLog::new();
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(
            0,
            Box::new(Recorder {
                tag: 1,
                claims: false,
                order: order.clone(),
            }),
        );
        dispatcher.register(
            10,
            Box::new(Recorder {
                tag: 2,
                claims: false,
                order: order.clone(),
            }),
        );
        dispatcher.register(
            0,
            Box::new(Recorder {
                tag: 3,
                claims: false,
                order: order.clone(),
            }),
        );

        assert!(!dispatcher.dispatch(&sender(), &element()));
        assert_eq!(*order.seen.lock().unwrap(), [2, 1, 3]);
    }

    #[test]
    fn first_claim_stops_dispatch() {
        let order = OrderLog::new();
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(
            1,
            Box::new(Recorder {
                tag: 1,
                claims: true,
                order: order.clone(),
            }),
        );
        dispatcher.register(
            0,
            Box::new(Recorder {
                tag: 2,
                claims: true,
                order: order.clone(),
            }),
        );

        assert!(dispatcher.dispatch(&sender(), &element()));
        assert_eq!(*order.seen.lock().unwrap(), [1]);
    }

    #[test]
    fn features_are_aggregated() {
        let order = OrderLog::new();
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(
            0,
            Box::new(Recorder {
                tag: 1,
                claims: false,
                order,
            }),
        );
        assert_eq!(dispatcher.discovery_features(), ["urn:example:recorder"]);
    }
}
