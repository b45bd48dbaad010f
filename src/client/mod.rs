pub mod hooks;

use crate::buffer::{DispatchStats, Dispatcher};
use crate::builder::EventBuilder;
use crate::config::{ClientConfig, ConfigError};
use crate::domain::{EventLevel, Fault, Metadata};
use crate::logging::DIAGNOSTICS_TARGET;
use crate::sender::{EventSink, Transport};
use hooks::{FaultObserver, ObserverGuard};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const UNKNOWN_ERROR_TITLE: &str = "Unknown error";
const FLUSH_THREAD_NAME: &str = "error-tracker-flush";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Created,
    Started,
    Shutdown,
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            ClientState::Created => "created",
            ClientState::Started => "started",
            ClientState::Shutdown => "shutdown",
        };
        f.write_str(state)
    }
}

/// Capture handle. Cheap to clone; clones share one queue, timer and transport.
///
/// Capture methods never fail and return `&Self` so calls can be chained.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    dispatcher: Arc<Dispatcher>,
    enabled: AtomicBool,
    state: Mutex<ClientState>,
    timer: Mutex<Option<CancellationToken>>,
    observer: Mutex<Option<ObserverGuard>>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("endpoint", &self.inner.config.webhook_url)
            .field("state", &self.state())
            .field("enabled", &self.is_enabled())
            .field("pending", &self.pending())
            .finish()
    }
}

impl Client {
    /// Validates `config` and builds a client posting over HTTP.
    pub fn new(config: ClientConfig) -> Result<Self, ConfigError> {
        let config = config.sanitize();
        config.validate()?;
        let transport = Transport::new(&config)?;
        Ok(Self::assemble(config, Arc::new(transport)))
    }

    /// Validates `config` and builds a client delivering through `sink`.
    pub fn with_sink(config: ClientConfig, sink: Arc<dyn EventSink>) -> Result<Self, ConfigError> {
        let config = config.sanitize();
        config.validate()?;
        Ok(Self::assemble(config, sink))
    }

    fn assemble(config: ClientConfig, sink: Arc<dyn EventSink>) -> Self {
        let builder = EventBuilder::from_config(&config);
        let dispatcher = Arc::new(Dispatcher::new(builder, sink, config.max_queue_size));

        Self {
            inner: Arc::new(ClientInner {
                enabled: AtomicBool::new(config.enabled),
                config,
                dispatcher,
                state: Mutex::new(ClientState::Created),
                timer: Mutex::new(None),
                observer: Mutex::new(None),
            }),
        }
    }

    /// Registers fault observers and starts the periodic flush. Idempotent.
    pub fn start(&self) -> &Self {
        {
            let mut state = self.inner.state.lock();
            match *state {
                ClientState::Created => *state = ClientState::Started,
                ClientState::Started => return self,
                ClientState::Shutdown => {
                    debug!("start() ignored: client already shut down");
                    return self;
                }
            }
        }

        let observer: Weak<dyn FaultObserver> = Arc::downgrade(&self.inner) as Weak<dyn FaultObserver>;
        *self.inner.observer.lock() = Some(hooks::register(observer));
        *self.inner.timer.lock() = self.spawn_timer();

        info!(
            "Error tracker started (endpoint: {}, flush every {:?}, batch size {})",
            self.inner.config.webhook_url,
            self.inner.config.flush_interval,
            self.inner.config.max_queue_size
        );
        self
    }

    fn spawn_timer(&self) -> Option<CancellationToken> {
        let Ok(runtime) = Handle::try_current() else {
            warn!(
                target: DIAGNOSTICS_TARGET,
                "No Tokio runtime available; periodic flushing is disabled"
            );
            return None;
        };

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let dispatcher = Arc::clone(&self.inner.dispatcher);
        let period = self.inner.config.flush_interval;

        // `sleep` clamps deadlines past the clock's range, so any period is safe.
        runtime.spawn(async move {
            loop {
                tokio::select! {
                    () = cancelled.cancelled() => break,
                    () = tokio::time::sleep(period) => {
                        dispatcher.process_batch().await;
                    }
                }
            }
            debug!("Periodic flush stopped");
        });

        Some(token)
    }

    /// Reports a fault at `level`. The title is the fault's message.
    pub fn capture(
        &self,
        fault: impl Into<Fault>,
        level: EventLevel,
        metadata: Option<Metadata>,
    ) -> &Self {
        self.inner.capture(fault.into(), level, metadata);
        self
    }

    pub fn error(&self, fault: impl Into<Fault>) -> &Self {
        self.capture(fault, EventLevel::Error, None)
    }

    pub fn fatal(&self, fault: impl Into<Fault>) -> &Self {
        self.capture(fault, EventLevel::Fatal, None)
    }

    /// Reports a named occurrence that is not an error.
    pub fn event(&self, title: &str, level: EventLevel, metadata: Option<Metadata>) -> &Self {
        self.inner
            .record(title, &Fault::message_only(title), level, metadata);
        self
    }

    pub fn debug(&self, title: &str, metadata: Option<Metadata>) -> &Self {
        self.event(title, EventLevel::Debug, metadata)
    }

    pub fn info(&self, title: &str, metadata: Option<Metadata>) -> &Self {
        self.event(title, EventLevel::Info, metadata)
    }

    pub fn warn(&self, title: &str, metadata: Option<Metadata>) -> &Self {
        self.event(title, EventLevel::Warning, metadata)
    }

    /// Delivers everything queued, as many batches as it takes.
    pub async fn force_flush(&self) {
        self.inner.dispatcher.force_flush().await;
    }

    pub fn pause(&self) -> &Self {
        self.inner.enabled.store(false, Ordering::SeqCst);
        self
    }

    /// Re-enables capture. Has no effect once the client is shut down.
    pub fn resume(&self) -> &Self {
        let state = self.inner.state.lock();
        if *state != ClientState::Shutdown {
            self.inner.enabled.store(true, Ordering::SeqCst);
        }
        self
    }

    /// Stops capture, flushes what is queued and closes the transport.
    /// Later calls return immediately.
    pub async fn shutdown(&self) {
        {
            let mut state = self.inner.state.lock();
            if *state == ClientState::Shutdown {
                return;
            }
            *state = ClientState::Shutdown;
        }
        self.inner.enabled.store(false, Ordering::SeqCst);

        let timer = self.inner.timer.lock().take();
        if let Some(timer) = timer {
            timer.cancel();
        }
        let observer = self.inner.observer.lock().take();
        drop(observer);

        self.inner.dispatcher.force_flush().await;
        self.inner.dispatcher.close();

        let stats = self.stats();
        info!(
            "Error tracker shut down ({} delivered, {} dropped)",
            stats.delivered, stats.failed
        );
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> ClientState {
        *self.inner.state.lock()
    }

    /// Events waiting in the queue.
    pub fn pending(&self) -> usize {
        self.inner.dispatcher.pending()
    }

    pub fn stats(&self) -> DispatchStats {
        self.inner.dispatcher.stats()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }
}

impl ClientInner {
    fn capture(&self, fault: Fault, level: EventLevel, metadata: Option<Metadata>) {
        let title = fault.message().unwrap_or(UNKNOWN_ERROR_TITLE).to_string();
        self.record(&title, &fault, level, metadata);
    }

    fn record(&self, title: &str, fault: &Fault, level: EventLevel, metadata: Option<Metadata>) {
        if !self.enabled.load(Ordering::SeqCst) {
            return;
        }

        match self.dispatcher.builder().build(title, fault, level, metadata) {
            Ok(event) => self.dispatcher.enqueue(event),
            Err(err) => {
                error!(
                    target: DIAGNOSTICS_TARGET,
                    "Failed to capture {} event '{}': {}",
                    level,
                    title,
                    err
                );
            }
        }
    }
}

impl FaultObserver for ClientInner {
    fn observe(&self, fault: Fault, level: EventLevel, source: &'static str) {
        let metadata = crate::domain::metadata([("source", source)]);
        self.capture(fault, level, Some(metadata));

        // The process is about to go down with whatever is still queued.
        if level == EventLevel::Fatal {
            self.flush_before_exit();
        }
    }
}

impl ClientInner {
    /// Blocks until the queue is delivered or `config.timeout` elapses.
    ///
    /// Runs on a helper thread with its own runtime: the caller may be the
    /// thread driving the client's runtime, which cannot make progress while
    /// it waits here.
    fn flush_before_exit(&self) {
        if self.dispatcher.pending() == 0 {
            return;
        }

        let dispatcher = Arc::clone(&self.dispatcher);
        let limit = self.config.timeout;
        let flusher = std::thread::Builder::new()
            .name(FLUSH_THREAD_NAME.to_string())
            .spawn(move || -> std::io::Result<bool> {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()?;
                Ok(runtime.block_on(async {
                    tokio::time::timeout(limit, dispatcher.force_flush())
                        .await
                        .is_ok()
                }))
            });

        match flusher.map(std::thread::JoinHandle::join) {
            Ok(Ok(Ok(true))) => debug!("Flushed pending events before exit"),
            Ok(Ok(Ok(false))) => warn!(
                target: DIAGNOSTICS_TARGET,
                "Flush before exit gave up after {:?}; {} events not delivered",
                limit,
                self.dispatcher.pending()
            ),
            Ok(Ok(Err(err))) | Err(err) => error!(
                target: DIAGNOSTICS_TARGET,
                "Could not flush before exit: {}",
                err
            ),
            Ok(Err(_)) => error!(
                target: DIAGNOSTICS_TARGET,
                "Flush thread panicked before exit"
            ),
        }
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.get_mut().take() {
            timer.cancel();
        }
    }
}
