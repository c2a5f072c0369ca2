//! Named-event registry with wildcard propagation.
//!
//! Every model and collection embeds an [`EventEmitter`]. Handlers are
//! registered per event name and receive the name being dispatched together
//! with a shared reference to the payload. After the handlers of a name have
//! run, the same payload is dispatched to the wildcard event [`WILDCARD`]
//! with the original name, which is how "listen to everything" works.
//!
//! Dispatch takes a snapshot of the handler list and releases the lock
//! before calling anything, so handlers may freely call `on`/`off` or
//! trigger further events:
//!   - a handler removed during dispatch is skipped if it has not run yet,
//!   - a handler added during dispatch runs from the next trigger on.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Event name that receives every other event.
pub const WILDCARD: &str = "*";

pub const CHANGE: &str = "change";
pub const SYNC: &str = "sync";
pub const DESTROY: &str = "destroy";
pub const ADD: &str = "add";
pub const REMOVE: &str = "remove";
pub const RESET: &str = "reset";

/// Name of the per-field change event, e.g. `change:name`.
pub fn change_event(field: &str) -> String {
    format!("{CHANGE}:{field}")
}

/// Identifies a registered handler; pass it to [`EventEmitter::off`].
pub type ListenerId = u64;

/// Handler signature: `(event_name, payload)`.
pub type HandlerFn<A> = dyn Fn(&str, &A) + Send + Sync;

struct Listener<A> {
    id: ListenerId,
    once: bool,
    handler: Arc<HandlerFn<A>>,
}

/// Synchronous named-event emitter carrying payloads of type `A`.
pub struct EventEmitter<A> {
    events: Mutex<HashMap<String, Vec<Listener<A>>>>,
    next_id: AtomicU64,
}

impl<A> EventEmitter<A> {
    /// Create an emitter with no handlers.
    pub fn new() -> Self {
        Self {
            events: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register `handler` for `name`.
    pub fn on(
        &self,
        name: impl Into<String>,
        handler: impl Fn(&str, &A) + Send + Sync + 'static,
    ) -> ListenerId {
        self.register(name.into(), Arc::new(handler), false)
    }

    /// Register `handler` for `name`, removing it after its first invocation.
    pub fn once(
        &self,
        name: impl Into<String>,
        handler: impl Fn(&str, &A) + Send + Sync + 'static,
    ) -> ListenerId {
        self.register(name.into(), Arc::new(handler), true)
    }

    fn register(&self, name: String, handler: Arc<HandlerFn<A>>, once: bool) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.events
            .lock()
            .entry(name)
            .or_default()
            .push(Listener { id, once, handler });
        id
    }

    /// Remove one handler. Returns `false` if it was not registered for `name`.
    pub fn off(&self, name: &str, id: ListenerId) -> bool {
        let mut events = self.events.lock();
        let Some(listeners) = events.get_mut(name) else {
            return false;
        };
        match listeners.iter().position(|l| l.id == id) {
            Some(index) => {
                listeners.remove(index);
                true
            }
            None => false,
        }
    }

    /// Remove every handler of `name`. Returns `false` if the name was never
    /// registered.
    pub fn off_event(&self, name: &str) -> bool {
        match self.events.lock().get_mut(name) {
            Some(listeners) => {
                listeners.clear();
                true
            }
            None => false,
        }
    }

    /// Remove every handler of every event.
    pub fn off_all(&self) {
        self.events.lock().clear();
    }

    /// Number of handlers currently registered for `name`.
    pub fn listener_count(&self, name: &str) -> usize {
        self.events.lock().get(name).map_or(0, Vec::len)
    }

    /// Dispatch `args` to the handlers of `name`, then to the wildcard
    /// handlers (unless `name` is the wildcard itself).
    pub fn trigger(&self, name: &str, args: &A) {
        self.dispatch(name, name, args);
        if name != WILDCARD {
            self.dispatch(WILDCARD, name, args);
        }
    }

    fn dispatch(&self, key: &str, name: &str, args: &A) {
        let snapshot: Vec<(ListenerId, Arc<HandlerFn<A>>)> = {
            let events = self.events.lock();
            match events.get(key) {
                Some(listeners) => listeners
                    .iter()
                    .map(|l| (l.id, Arc::clone(&l.handler)))
                    .collect(),
                None => return,
            }
        };

        if snapshot.is_empty() {
            return;
        }
        tracing::trace!(event = name, listeners = snapshot.len(), "Dispatching event");

        for (id, handler) in snapshot {
            if self.claim(key, id) {
                handler(name, args);
            }
        }
    }

    /// Check that a snapshotted handler is still registered, dropping it
    /// first if it was registered with `once`.
    fn claim(&self, key: &str, id: ListenerId) -> bool {
        let mut events = self.events.lock();
        let Some(listeners) = events.get_mut(key) else {
            return false;
        };
        match listeners.iter().position(|l| l.id == id) {
            Some(index) => {
                if listeners[index].once {
                    listeners.remove(index);
                }
                true
            }
            None => false,
        }
    }
}

impl<A> Default for EventEmitter<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> fmt::Debug for EventEmitter<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let events = self.events.lock();
        let mut map = f.debug_map();
        for (name, listeners) in events.iter() {
            map.entry(name, &listeners.len());
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn make_log() -> Arc<StdMutex<Vec<String>>> {
        Arc::new(StdMutex::new(Vec::new()))
    }

    fn push(log: &Arc<StdMutex<Vec<String>>>, entry: impl Into<String>) {
        log.lock().unwrap().push(entry.into());
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let emitter: EventEmitter<i32> = EventEmitter::new();
        let log = make_log();

        for tag in ["a", "b", "c"] {
            let log = Arc::clone(&log);
            emitter.on("ping", move |_, n| push(&log, format!("{tag}:{n}")));
        }

        emitter.trigger("ping", &1);

        assert_eq!(*log.lock().unwrap(), vec!["a:1", "b:1", "c:1"]);
    }

    #[test]
    fn unrelated_events_are_not_dispatched() {
        let emitter: EventEmitter<i32> = EventEmitter::new();
        let log = make_log();
        {
            let log = Arc::clone(&log);
            emitter.on("ping", move |name, _| push(&log, name));
        }

        emitter.trigger("pong", &1);

        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn wildcard_receives_original_name() {
        let emitter: EventEmitter<i32> = EventEmitter::new();
        let log = make_log();
        {
            let log = Arc::clone(&log);
            emitter.on("change", move |name, n| push(&log, format!("direct {name} {n}")));
        }
        {
            let log = Arc::clone(&log);
            emitter.on(WILDCARD, move |name, n| push(&log, format!("any {name} {n}")));
        }

        emitter.trigger("change", &7);
        emitter.trigger("other", &8);

        assert_eq!(
            *log.lock().unwrap(),
            vec!["direct change 7", "any change 7", "any other 8"]
        );
    }

    #[test]
    fn triggering_wildcard_does_not_recurse() {
        let emitter: EventEmitter<()> = EventEmitter::new();
        let log = make_log();
        {
            let log = Arc::clone(&log);
            emitter.on(WILDCARD, move |name, _| push(&log, name));
        }

        emitter.trigger(WILDCARD, &());

        assert_eq!(*log.lock().unwrap(), vec!["*"]);
    }

    #[test]
    fn once_runs_a_single_time() {
        let emitter: EventEmitter<()> = EventEmitter::new();
        let log = make_log();
        {
            let log = Arc::clone(&log);
            emitter.once("destroy", move |name, _| push(&log, name));
        }

        emitter.trigger("destroy", &());
        emitter.trigger("destroy", &());

        assert_eq!(log.lock().unwrap().len(), 1);
        assert_eq!(emitter.listener_count("destroy"), 0);
    }

    #[test]
    fn off_variants() {
        let emitter: EventEmitter<()> = EventEmitter::new();
        let a = emitter.on("a", |_, _| {});
        emitter.on("a", |_, _| {});
        emitter.on("b", |_, _| {});

        assert!(emitter.off("a", a));
        assert!(!emitter.off("a", a));
        assert!(!emitter.off("missing", a));
        assert_eq!(emitter.listener_count("a"), 1);

        assert!(emitter.off_event("a"));
        assert!(!emitter.off_event("missing"));
        assert_eq!(emitter.listener_count("a"), 0);
        assert_eq!(emitter.listener_count("b"), 1);

        emitter.off_all();
        assert_eq!(emitter.listener_count("b"), 0);
    }

    #[test]
    fn removing_a_pending_handler_mid_trigger_skips_it() {
        let emitter: Arc<EventEmitter<()>> = Arc::new(EventEmitter::new());
        let log = make_log();
        let second = Arc::new(StdMutex::new(0));

        {
            let emitter_ref = Arc::clone(&emitter);
            let second = Arc::clone(&second);
            let log = Arc::clone(&log);
            emitter.on("tick", move |_, _| {
                push(&log, "first");
                let id = *second.lock().unwrap();
                emitter_ref.off("tick", id);
            });
        }
        {
            let log = Arc::clone(&log);
            let id = emitter.on("tick", move |_, _| push(&log, "second"));
            *second.lock().unwrap() = id;
        }

        emitter.trigger("tick", &());

        assert_eq!(*log.lock().unwrap(), vec!["first"]);
    }

    #[test]
    fn handler_added_mid_trigger_waits_for_next_round() {
        let emitter: Arc<EventEmitter<()>> = Arc::new(EventEmitter::new());
        let log = make_log();

        {
            let emitter_ref = Arc::clone(&emitter);
            let log = Arc::clone(&log);
            emitter.once("tick", move |_, _| {
                let log = Arc::clone(&log);
                emitter_ref.on("tick", move |_, _| push(&log, "late"));
            });
        }

        emitter.trigger("tick", &());
        assert!(log.lock().unwrap().is_empty());

        emitter.trigger("tick", &());
        assert_eq!(*log.lock().unwrap(), vec!["late"]);
    }
}
