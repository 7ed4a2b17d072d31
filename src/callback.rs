//! Callback registration and dispatch for `Controller`, `Resource`, and
//! `Tasker` handles.
//!
//! Grounded on the teacher's `callback.rs`: `event_callback_trampoline` and
//! `event_sink_trampoline` both wrap the user's code in
//! `std::panic::catch_unwind` and log instead of unwinding across the FFI
//! boundary. There is no FFI boundary here, but the same containment still
//! matters — a panicking sink must not take down the worker thread that is
//! mid-dispatch for every other registered sink.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use tracing::error;

use crate::notification::{Event, EventSink};

/// A raw callback: `(message, details_json)`, matching §6's callback
/// contract verbatim.
pub type RawSink = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Holds every sink registered on one object (a `Controller`, `Resource`, or
/// `Tasker`) and dispatches to all of them in registration order.
#[derive(Clone)]
pub struct CallbackRegistry {
    source_id: u64,
    raw: Arc<Mutex<Vec<RawSink>>>,
    typed: Arc<Mutex<Vec<Arc<dyn EventSink>>>>,
}

impl CallbackRegistry {
    pub fn new(source_id: u64) -> Self {
        Self {
            source_id,
            raw: Arc::new(Mutex::new(Vec::new())),
            typed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn register_raw(&self, sink: RawSink) {
        self.raw.lock().unwrap().push(sink);
    }

    pub fn register_typed(&self, sink: Arc<dyn EventSink>) {
        self.typed.lock().unwrap().push(sink);
    }

    /// Dispatch one lifecycle message to every registered sink, raw sinks
    /// first then typed sinks, both in registration order. A panic inside
    /// any sink is caught, logged, and does not stop the remaining sinks
    /// from running.
    pub fn dispatch(&self, message: &str, details_json: &str) {
        let raw_sinks = self.raw.lock().unwrap().clone();
        for sink in raw_sinks.iter() {
            let sink = sink.clone();
            let message = message.to_string();
            let details = details_json.to_string();
            let result = panic::catch_unwind(AssertUnwindSafe(|| sink(&message, &details)));
            if result.is_err() {
                error!(source_id = self.source_id, message = %message, "callback sink panicked");
            }
        }

        let typed_sinks = self.typed.lock().unwrap().clone();
        if typed_sinks.is_empty() {
            return;
        }
        let event = Event::parse(message, details_json);
        for sink in typed_sinks.iter() {
            let sink = sink.clone();
            let event = event.clone();
            let source_id = self.source_id;
            let result = panic::catch_unwind(AssertUnwindSafe(|| sink.on_event(source_id, &event)));
            if result.is_err() {
                error!(source_id = self.source_id, ?event, "event sink panicked");
            }
        }
    }
}
