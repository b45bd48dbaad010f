//! Process-wide fault observers.
//!
//! A single panic hook is installed the first time any client starts. It
//! chains to whatever hook was installed before it, and fans every panic out
//! to all registered observers. Observers are held weakly so a dropped client
//! never keeps itself alive through the hook.

use crate::domain::{EventLevel, Fault, StructuredFault, Value};
use parking_lot::RwLock;
use std::backtrace::Backtrace;
use std::cell::Cell;
use std::fmt;
use std::panic::PanicHookInfo;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Once, Weak};
use tracing::field::{Field, Visit};
use tracing::{Event as TracingEvent, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

pub const SOURCE_UNCAUGHT_PANIC: &str = "uncaughtPanic";
pub const SOURCE_UNOBSERVED_PANIC: &str = "unobservedPanic";
pub const SOURCE_WARNING: &str = "warning";

const MAIN_THREAD: &str = "main";
const OWN_TARGET_PREFIX: &str = "error_tracker";

/// Receives faults the process reports outside normal call paths.
pub trait FaultObserver: Send + Sync {
    fn observe(&self, fault: Fault, level: EventLevel, source: &'static str);
}

struct Registration {
    id: u64,
    observer: Weak<dyn FaultObserver>,
}

static OBSERVERS: LazyLock<RwLock<Vec<Registration>>> = LazyLock::new(|| RwLock::new(Vec::new()));
static NEXT_ID: AtomicU64 = AtomicU64::new(1);
static PANIC_HOOK: Once = Once::new();

thread_local! {
    static NOTIFYING: Cell<bool> = const { Cell::new(false) };
}

/// Keeps an observer registered; dropping it deregisters.
#[must_use = "dropping the guard deregisters the observer"]
pub struct ObserverGuard {
    id: u64,
}

impl fmt::Debug for ObserverGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverGuard").field("id", &self.id).finish()
    }
}

impl Drop for ObserverGuard {
    fn drop(&mut self) {
        OBSERVERS.write().retain(|registration| registration.id != self.id);
    }
}

/// Registers `observer` and makes sure the panic hook is in place.
pub fn register(observer: Weak<dyn FaultObserver>) -> ObserverGuard {
    install_panic_hook();

    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    let mut observers = OBSERVERS.write();
    observers.retain(|registration| registration.observer.strong_count() > 0);
    observers.push(Registration { id, observer });

    ObserverGuard { id }
}

/// Number of live registered observers.
pub fn observer_count() -> usize {
    OBSERVERS
        .read()
        .iter()
        .filter(|registration| registration.observer.strong_count() > 0)
        .count()
}

/// Hands `fault` to every live observer.
///
/// Re-entrant calls on the same thread (an observer that itself panics or
/// warns) are ignored.
pub fn notify(fault: &Fault, level: EventLevel, source: &'static str) {
    if NOTIFYING.with(Cell::get) {
        return;
    }

    let observers: Vec<Arc<dyn FaultObserver>> = OBSERVERS
        .read()
        .iter()
        .filter_map(|registration| registration.observer.upgrade())
        .collect();
    if observers.is_empty() {
        return;
    }

    let _reentry = ReentryGuard::enter();
    for observer in observers {
        observer.observe(fault.clone(), level, source);
    }
}

struct ReentryGuard;

impl ReentryGuard {
    fn enter() -> Self {
        NOTIFYING.with(|flag| flag.set(true));
        Self
    }
}

impl Drop for ReentryGuard {
    fn drop(&mut self) {
        NOTIFYING.with(|flag| flag.set(false));
    }
}

fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            report_panic(info);
            previous(info);
        }));
    });
}

fn report_panic(info: &PanicHookInfo<'_>) {
    if NOTIFYING.with(Cell::get) || observer_count() == 0 {
        return;
    }

    let fault = Fault::Structured(StructuredFault::from_panic(info, &Backtrace::force_capture()));
    let (level, source) = panic_severity(std::thread::current().name());

    notify(&fault, level, source);
}

/// Panics on the main thread end the process; anywhere else they are
/// merely unobserved by the code that spawned the work.
fn panic_severity(thread_name: Option<&str>) -> (EventLevel, &'static str) {
    if thread_name == Some(MAIN_THREAD) {
        (EventLevel::Fatal, SOURCE_UNCAUGHT_PANIC)
    } else {
        (EventLevel::Error, SOURCE_UNOBSERVED_PANIC)
    }
}

/// Forwards `WARN` events from other targets to fault observers.
#[derive(Debug, Clone, Copy, Default)]
pub struct WarningLayer;

impl WarningLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S: Subscriber> Layer<S> for WarningLayer {
    fn on_event(&self, event: &TracingEvent<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if *metadata.level() != Level::WARN || metadata.target().starts_with(OWN_TARGET_PREFIX) {
            return;
        }
        if observer_count() == 0 {
            return;
        }

        let mut visitor = WarningVisitor::default();
        event.record(&mut visitor);

        let mut fault = StructuredFault::new(
            "Warning",
            visitor.message.unwrap_or_else(|| metadata.name().to_string()),
        )
        .with_field("target", metadata.target());
        fault.fields.extend(visitor.fields);

        notify(&Fault::Structured(fault), EventLevel::Warning, SOURCE_WARNING);
    }
}

#[derive(Default)]
struct WarningVisitor {
    message: Option<String>,
    fields: Vec<(String, Value)>,
}

impl WarningVisitor {
    fn record(&mut self, field: &Field, value: Value) {
        if field.name() == "message" {
            self.message = value.as_str().map(str::to_string);
        } else {
            self.fields.push((field.name().to_string(), value));
        }
    }
}

impl Visit for WarningVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.record(field, Value::from(format!("{value:?}")));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.record(field, Value::from(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.record(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.record(field, Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.record(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.record(field, Value::from(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serial_test::serial;
    use tracing_subscriber::prelude::*;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(EventLevel, &'static str, Fault)>>,
    }

    impl FaultObserver for Recorder {
        fn observe(&self, fault: Fault, level: EventLevel, source: &'static str) {
            self.seen.lock().push((level, source, fault));
        }
    }

    impl Recorder {
        fn find(&self, message: &str) -> Option<(EventLevel, &'static str, Fault)> {
            self.seen
                .lock()
                .iter()
                .find(|(_, _, fault)| fault.message() == Some(message))
                .cloned()
        }
    }

    fn registered() -> (Arc<Recorder>, ObserverGuard) {
        let recorder = Arc::new(Recorder::default());
        let weak: Weak<dyn FaultObserver> = Arc::downgrade(&recorder) as Weak<dyn FaultObserver>;
        let guard = register(weak);
        (recorder, guard)
    }

    #[test]
    fn main_thread_panics_are_fatal() {
        assert_eq!(
            panic_severity(Some("main")),
            (EventLevel::Fatal, SOURCE_UNCAUGHT_PANIC)
        );
        assert_eq!(
            panic_severity(Some("tokio-runtime-worker")),
            (EventLevel::Error, SOURCE_UNOBSERVED_PANIC)
        );
        assert_eq!(
            panic_severity(None),
            (EventLevel::Error, SOURCE_UNOBSERVED_PANIC)
        );
    }

    #[test]
    #[serial]
    fn panics_reach_every_observer() {
        let (first, _first_guard) = registered();
        let (second, _second_guard) = registered();

        let result = std::thread::Builder::new()
            .name("worker".to_string())
            .spawn(|| panic!("worker exploded"))
            .unwrap()
            .join();
        assert!(result.is_err());

        for recorder in [&first, &second] {
            let (level, source, fault) = recorder.find("worker exploded").expect("panic observed");
            assert_eq!(level, EventLevel::Error);
            assert_eq!(source, SOURCE_UNOBSERVED_PANIC);
            let Fault::Structured(fault) = fault else {
                panic!("expected structured fault");
            };
            assert_eq!(fault.name, "Panic");
            assert!(fault.fields.contains_key("location"));
        }
    }

    #[test]
    #[serial]
    fn panic_on_main_named_thread_is_reported_fatal() {
        let (recorder, _guard) = registered();

        let _ = std::thread::Builder::new()
            .name(MAIN_THREAD.to_string())
            .spawn(|| panic!("main went down"))
            .unwrap()
            .join();

        let (level, source, _) = recorder.find("main went down").expect("panic observed");
        assert_eq!(level, EventLevel::Fatal);
        assert_eq!(source, SOURCE_UNCAUGHT_PANIC);
    }

    #[test]
    #[serial]
    fn dropped_guard_stops_notifications() {
        let (recorder, guard) = registered();
        drop(guard);

        let _ = std::thread::spawn(|| panic!("after deregistration")).join();

        assert!(recorder.find("after deregistration").is_none());
    }

    #[test]
    #[serial]
    fn warning_layer_forwards_foreign_warnings_only() {
        let (recorder, _guard) = registered();
        let subscriber = tracing_subscriber::registry().with(WarningLayer::new());

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(target: "host_app::storage", free_mb = 12_u64, "disk almost full");
            tracing::warn!(target: "error_tracker::diagnostics", "internal noise");
            tracing::info!(target: "host_app", "not a warning");
        });

        let (level, source, fault) = recorder.find("disk almost full").expect("warning observed");
        assert_eq!(level, EventLevel::Warning);
        assert_eq!(source, SOURCE_WARNING);
        let Fault::Structured(fault) = fault else {
            panic!("expected structured fault");
        };
        assert!(matches!(fault.fields.get("free_mb"), Some(Value::Integer(12))));
        assert!(
            matches!(fault.fields.get("target"), Some(Value::String(t)) if t == "host_app::storage")
        );
        assert!(recorder.find("internal noise").is_none());
        assert!(recorder.find("not a warning").is_none());
    }
}
