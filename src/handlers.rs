// SPDX-License-Identifier: GPL-3.0-only

//! Handler registry (C3): `message_kind -> ordered handlers`, plus a default list.
//!
//! The original keys handlers by the address of a bound `std::function`, which
//! has no clean Rust equivalent once handlers are boxed closures. Per the
//! design note this resolves that by keying on a small integer token returned
//! from `add`/`add_default`, which `remove`/`remove_default` take back.

use std::collections::HashMap;

use tracing::{error, warn};

use crate::protocol::MessageKind;

/// A handler invoked with the raw `kind` ordinal and the message body.
pub type Handler = Box<dyn Fn(u32, &[u8]) + Send>;

/// Opaque identity for a registered handler, returned by `add`/`add_default`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerToken(u64);

/// Routes inbound messages to zero or more registered handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<MessageKind, Vec<(HandlerToken, Handler)>>,
    default_handlers: Vec<(HandlerToken, Handler)>,
    next_token: u64,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn fresh_token(&mut self) -> HandlerToken {
        let token = HandlerToken(self.next_token);
        self.next_token += 1;
        token
    }

    /// Registers `handler` for `kind`, returning a token that uniquely
    /// identifies this registration for later removal.
    pub fn add(&mut self, kind: MessageKind, handler: Handler) -> HandlerToken {
        let token = self.fresh_token();
        self.handlers.entry(kind).or_default().push((token, handler));
        token
    }

    /// Registers a fallback handler invoked when no kind-specific handler matches.
    pub fn add_default(&mut self, handler: Handler) -> HandlerToken {
        let token = self.fresh_token();
        self.default_handlers.push((token, handler));
        token
    }

    /// Removes the handler identified by `token` from `kind`'s list. A no-op
    /// if the token isn't present (including a second call for the same token).
    /// Erases `kind`'s entry entirely once its list becomes empty.
    pub fn remove(&mut self, kind: MessageKind, token: HandlerToken) {
        if let Some(list) = self.handlers.get_mut(&kind) {
            list.retain(|(t, _)| *t != token);
            if list.is_empty() {
                self.handlers.remove(&kind);
            }
        }
    }

    pub fn remove_default(&mut self, token: HandlerToken) {
        self.default_handlers.retain(|(t, _)| *t != token);
    }

    pub fn has_handlers_for(&self, kind: MessageKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Invokes the handlers registered for `kind` in insertion order, or the
    /// default handlers if none are registered. A handler that panics is
    /// caught and logged; the remaining handlers in the list still run.
    pub fn dispatch(&self, raw_kind: u32, body: &[u8]) {
        let list = match MessageKind::from_u32(raw_kind) {
            Some(kind) => self.handlers.get(&kind),
            None => None,
        };

        let list = match list {
            Some(list) => list,
            None => &self.default_handlers,
        };

        for (_, handler) in list {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                handler(raw_kind, body)
            }));
            if let Err(panic) = outcome {
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "handler panicked with a non-string payload".to_string());
                error!(kind = raw_kind, error = %msg, "handler panicked, continuing with remaining handlers");
            }
        }

        if list.is_empty() {
            warn!(kind = raw_kind, "no handler registered for this message kind");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn dispatch_invokes_the_matching_kind_handler() {
        let mut registry = HandlerRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        registry.add(
            MessageKind::GetWebcamStatus,
            Box::new(move |_, _| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        registry.dispatch(MessageKind::GetWebcamStatus.as_u32(), &[]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dispatch_falls_back_to_default_when_no_kind_handler_registered() {
        let mut registry = HandlerRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        registry.add_default(Box::new(move |_, _| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        }));

        registry.dispatch(0xDEAD_BEEF, &[]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn remove_once_makes_the_handler_absent_and_erases_the_key() {
        let mut registry = HandlerRegistry::new();
        let token = registry.add(MessageKind::StartStream, Box::new(|_, _| {}));
        assert!(registry.has_handlers_for(MessageKind::StartStream));

        registry.remove(MessageKind::StartStream, token);
        assert!(!registry.has_handlers_for(MessageKind::StartStream));
    }

    #[test]
    fn removing_twice_is_a_no_op() {
        let mut registry = HandlerRegistry::new();
        let token = registry.add(MessageKind::StartStream, Box::new(|_, _| {}));
        registry.remove(MessageKind::StartStream, token);
        registry.remove(MessageKind::StartStream, token); // must not panic
        assert!(!registry.has_handlers_for(MessageKind::StartStream));
    }

    #[test]
    fn handlers_for_a_kind_run_in_insertion_order() {
        let mut registry = HandlerRegistry::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        for i in 0..3 {
            let order = order.clone();
            registry.add(
                MessageKind::GetStreamStatus,
                Box::new(move |_, _| order.lock().unwrap().push(i)),
            );
        }

        registry.dispatch(MessageKind::GetStreamStatus.as_u32(), &[]);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn a_panicking_handler_does_not_stop_later_handlers_in_the_same_list() {
        let mut registry = HandlerRegistry::new();
        let ran = Arc::new(AtomicUsize::new(0));

        registry.add(MessageKind::CloseWebcam, Box::new(|_, _| panic!("boom")));
        let ran_clone = ran.clone();
        registry.add(
            MessageKind::CloseWebcam,
            Box::new(move |_, _| {
                ran_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        registry.dispatch(MessageKind::CloseWebcam.as_u32(), &[]);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
