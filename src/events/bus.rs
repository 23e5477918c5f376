/// Snapshot-based event bus
/// 
/// The handler table lives behind an ArcSwap. Registration and removal build a
/// new table and swap it in, while `emit` iterates over the snapshot it loaded
/// before the first handler ran. A handler that registers or removes handlers
/// (including itself) therefore never disturbs the dispatch in progress.

use arc_swap::ArcSwap;
use serde_json::Value;
use std::{
    collections::HashMap,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
};

/// A bus callback. Identity (the Arc allocation) is what `off` matches on.
pub type Handler = Arc<dyn Fn(&Value) -> anyhow::Result<()> + Send + Sync>;

/// Wrap a closure as a bus handler
pub fn handler<F>(f: F) -> Handler
where
    F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Process-wide synchronous event bus
/// 
/// Handlers for one event name are invoked in registration order. A failing
/// handler (returned error or panic) is logged and skipped; the bus itself
/// never fails.
pub struct EventBus {
    /// Event name -> handlers in registration order
    handlers: ArcSwap<HashMap<String, Vec<Handler>>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.handlers.load();
        let counts: HashMap<&str, usize> = table.iter().map(|(k, v)| (k.as_str(), v.len())).collect();
        f.debug_struct("EventBus").field("handlers", &counts).finish()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self {
            handlers: ArcSwap::new(Arc::new(HashMap::new())),
        }
    }

    /// Register `handler` for `event`
    pub fn on(&self, event: &str, handler: Handler) {
        self.handlers.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.entry(event.to_string())
                .or_insert_with(Vec::new)
                .push(Arc::clone(&handler));
            next
        });
    }

    /// Remove the first registration of `handler` for `event`
    /// 
    /// Matching is by identity. Removing a handler that is not registered is
    /// a no-op.
    pub fn off(&self, event: &str, handler: &Handler) {
        self.handlers.rcu(|current| {
            let mut next = HashMap::clone(current);
            if let Some(list) = next.get_mut(event) {
                if let Some(pos) = list.iter().position(|h| same_handler(h, handler)) {
                    list.remove(pos);
                }
                if list.is_empty() {
                    next.remove(event);
                }
            }
            next
        });
    }

    /// Deliver `payload` to every handler currently registered for `event`
    pub fn emit(&self, event: &str, payload: &Value) {
        let table = self.handlers.load_full();
        let Some(list) = table.get(event) else {
            return;
        };

        for (index, h) in list.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| h(payload))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(event, index, "event handler failed: {:#}", e);
                }
                Err(_) => {
                    tracing::error!(event, index, "event handler panicked");
                }
            }
        }
    }

    /// Number of handlers registered for `event`
    pub fn listener_count(&self, event: &str) -> usize {
        self.handlers.load().get(event).map_or(0, Vec::len)
    }
}

fn same_handler(a: &Handler, b: &Handler) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &'static str) -> Handler {
        let log = Arc::clone(log);
        handler(move |p| {
            log.lock().unwrap().push(format!("{}:{}", tag, p));
            Ok(())
        })
    }

    #[test]
    fn delivers_in_registration_order() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.on("e", recorder(&log, "h1"));
        bus.on("e", recorder(&log, "h2"));
        bus.on("e", recorder(&log, "h3"));

        bus.emit("e", &json!(7));

        assert_eq!(*log.lock().unwrap(), vec!["h1:7", "h2:7", "h3:7"]);
    }

    #[test]
    fn failing_handlers_do_not_stop_dispatch() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.on("e", recorder(&log, "h1"));
        bus.on("e", handler(|_| Err(anyhow::anyhow!("boom"))));
        bus.on("e", handler(|_| panic!("worse")));
        bus.on("e", recorder(&log, "h4"));

        bus.emit("e", &json!("x"));

        assert_eq!(*log.lock().unwrap(), vec!["h1:\"x\"", "h4:\"x\""]);
    }

    #[test]
    fn emit_without_handlers_is_noop() {
        let bus = EventBus::new();
        bus.emit("nobody", &Value::Null);
        assert_eq!(bus.listener_count("nobody"), 0);
    }

    #[test]
    fn off_removes_only_first_identical_registration() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let h = recorder(&log, "dup");
        let other = recorder(&log, "other");
        bus.on("e", Arc::clone(&h));
        bus.on("e", Arc::clone(&other));
        bus.on("e", Arc::clone(&h));

        bus.off("e", &h);
        bus.emit("e", &json!(1));

        assert_eq!(*log.lock().unwrap(), vec!["other:1", "dup:1"]);

        // unknown handler and unknown event are both fine
        bus.off("e", &recorder(&log, "never"));
        bus.off("missing", &h);
        assert_eq!(bus.listener_count("e"), 2);
    }

    #[test]
    fn removing_self_during_dispatch_keeps_current_emit_intact() {
        let bus = Arc::new(EventBus::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let slot: Arc<Mutex<Option<Handler>>> = Arc::new(Mutex::new(None));
        let self_removing = {
            let bus = Arc::clone(&bus);
            let slot = Arc::clone(&slot);
            let log = Arc::clone(&log);
            handler(move |_| {
                log.lock().unwrap().push("once".to_string());
                if let Some(me) = slot.lock().unwrap().take() {
                    bus.off("e", &me);
                }
                Ok(())
            })
        };
        *slot.lock().unwrap() = Some(Arc::clone(&self_removing));

        bus.on("e", recorder(&log, "before"));
        bus.on("e", self_removing);
        bus.on("e", recorder(&log, "after"));

        bus.emit("e", &json!(1));
        bus.emit("e", &json!(2));

        assert_eq!(
            *log.lock().unwrap(),
            vec!["before:1", "once", "after:1", "before:2", "after:2"]
        );
    }

    #[test]
    fn handler_registered_during_dispatch_waits_for_next_emit() {
        let bus = Arc::new(EventBus::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let adder = {
            let bus = Arc::clone(&bus);
            let log = Arc::clone(&log);
            handler(move |_| {
                bus.on("e", recorder(&log, "late"));
                Ok(())
            })
        };
        bus.on("e", adder);

        bus.emit("e", &json!(1));
        assert!(log.lock().unwrap().is_empty());

        bus.emit("e", &json!(2));
        assert_eq!(*log.lock().unwrap(), vec!["late:2"]);
    }
}
