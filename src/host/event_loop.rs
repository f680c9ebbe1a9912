//! The reference host: a single-threaded loop owned by one thread and a thread-safe handle to it.
//!
//! Scheduled tasks, virtual events and the quit request all travel through one `flume` channel,
//! which gives the FIFO ordering callers rely on.

use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, error, trace};

use crate::error::TargetPanic;
use crate::host::{validate_sequence, LoopHost, NativeEvent, Target};
use crate::{ErrorHook, LoopError, NativeHandler, Task};

enum Message {
    Task(Task),
    Event(NativeEvent),
    Quit,
}

struct Shared {
    sender: flume::Sender<Message>,
    receiver: flume::Receiver<Message>,
    /// Handlers per `(target, sequence)`, in binding order.
    bindings: DashMap<(Target, String), Vec<NativeHandler>>,
    /// Dispatchers per `(target, sequence)`. Untouched by `bind` and `unbind`.
    dispatchers: DashMap<(Target, String), Vec<NativeHandler>>,
    /// Guards the check-then-send in `push` against a concurrent close.
    closed: RwLock<bool>,
    stopped: AtomicBool,
    loop_thread: ThreadId,
    error_hook: RwLock<Option<ErrorHook>>,
}

impl Shared {
    fn push(&self, message: Message) -> Result<(), LoopError> {
        let closed = self.closed.read();
        if *closed {
            return Err(LoopError::Closed);
        }
        self.sender.send(message).map_err(|_| LoopError::Closed)
    }

    fn close(&self) -> bool {
        let mut closed = self.closed.write();
        let was_open = !*closed;
        *closed = true;
        was_open
    }

    /// Drops everything still queued. Dropped tasks release their completion channels.
    fn drain(&self) -> usize {
        self.receiver.drain().count()
    }

    fn is_loop_thread(&self) -> bool {
        thread::current().id() == self.loop_thread
    }

    fn run_once(&self, timeout: Option<Duration>) -> Result<bool, LoopError> {
        if !self.is_loop_thread() {
            return Err(LoopError::NotLoopThread);
        }
        if self.stopped.load(Ordering::SeqCst) {
            return Err(LoopError::Closed);
        }
        let message = match timeout {
            None => self.receiver.recv().map_err(|_| LoopError::Closed)?,
            Some(timeout) => match self.receiver.recv_timeout(timeout) {
                Ok(message) => message,
                Err(flume::RecvTimeoutError::Timeout) => return Ok(false),
                Err(flume::RecvTimeoutError::Disconnected) => return Err(LoopError::Closed),
            },
        };
        self.process(message);
        Ok(true)
    }

    fn try_run_once(&self) -> bool {
        match self.receiver.try_recv() {
            Ok(message) => {
                self.process(message);
                true
            }
            Err(_) => false,
        }
    }

    fn process(&self, message: Message) {
        match message {
            Message::Task(task) => {
                trace!("running scheduled callback");
                if let Err(payload) = catch_unwind(AssertUnwindSafe(task)) {
                    self.report_error("scheduled callback", &TargetPanic::from_payload(payload));
                }
            }
            Message::Event(event) => self.dispatch(&event),
            Message::Quit => {
                debug!("event loop received quit");
                self.stopped.store(true, Ordering::SeqCst);
            }
        }
    }

    fn dispatch(&self, event: &NativeEvent) {
        // Clone out of the maps so handlers may bind or unbind while running.
        let key = (event.target().clone(), event.sequence().to_string());
        let handlers: Vec<NativeHandler> = [&self.dispatchers, &self.bindings]
            .into_iter()
            .filter_map(|map| map.get(&key).map(|entry| entry.value().clone()))
            .flatten()
            .collect();

        trace!(
            sequence = event.sequence(),
            target = %event.target(),
            handlers = handlers.len(),
            "dispatching virtual event"
        );

        for handler in handlers {
            let context = format!("handler for {} on {}", event.sequence(), event.target());
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => self.report_error(&context, err.as_ref()),
                Err(payload) => self.report_error(&context, &TargetPanic::from_payload(payload)),
            }
        }
    }

    fn report_error(&self, context: &str, err: &(dyn std::error::Error + 'static)) {
        error!(context, error = %err, "unhandled error on event loop");
        let hook = self.error_hook.read().clone();
        if let Some(hook) = hook {
            hook(context, err);
        }
    }
}

/// A minimal single-threaded event loop.
///
/// Scheduled callbacks and virtual events share one FIFO queue, so an event raised after a
/// callback was scheduled is delivered after that callback runs. The loop belongs to the thread
/// that created it (it is `!Send`); other threads talk to it through a [`LoopHandle`].
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use loop_bridge::{EventLoop, LoopHost, NativeEvent, Target};
///
/// let event_loop = EventLoop::new();
/// let handle = event_loop.handle();
/// let hits = Arc::new(AtomicUsize::new(0));
///
/// let seen = hits.clone();
/// handle.bind(&Target::root(), "<<ping>>", Arc::new(move |_: &NativeEvent| {
///     seen.fetch_add(1, Ordering::SeqCst);
///     Ok(())
/// }), false).unwrap();
///
/// handle.event_generate(&Target::root(), "<<ping>>", String::new()).unwrap();
/// assert_eq!(hits.load(Ordering::SeqCst), 0);
/// event_loop.run_until_idle();
/// assert_eq!(hits.load(Ordering::SeqCst), 1);
/// ```
pub struct EventLoop {
    shared: Arc<Shared>,
    _not_send: PhantomData<Rc<()>>,
}

impl EventLoop {
    /// Creates a loop owned by the current thread.
    pub fn new() -> Self {
        let (sender, receiver) = flume::unbounded();
        Self {
            shared: Arc::new(Shared {
                sender,
                receiver,
                bindings: DashMap::new(),
                dispatchers: DashMap::new(),
                closed: RwLock::new(false),
                stopped: AtomicBool::new(false),
                loop_thread: thread::current().id(),
                error_hook: RwLock::new(None),
            }),
            _not_send: PhantomData,
        }
    }

    /// Builds a loop on a new thread named `name` and runs it until [`LoopHandle::quit`].
    ///
    /// # Example
    /// ```
    /// use loop_bridge::EventLoop;
    ///
    /// let (handle, join) = EventLoop::spawn("ui").unwrap();
    /// handle.quit();
    /// join.join().unwrap();
    /// ```
    pub fn spawn(name: &str) -> std::io::Result<(LoopHandle, JoinHandle<()>)> {
        let (handle_tx, handle_rx) = flume::bounded(1);
        let join = thread::Builder::new().name(name.to_string()).spawn(move || {
            let event_loop = EventLoop::new();
            if handle_tx.send(event_loop.handle()).is_ok() {
                event_loop.run();
            }
        })?;
        let handle = handle_rx
            .recv()
            .map_err(|_| std::io::Error::other("event loop thread exited during startup"))?;
        Ok((handle, join))
    }

    pub fn handle(&self) -> LoopHandle {
        LoopHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Installs the default error channel target for this loop.
    pub fn set_error_hook(&self, hook: ErrorHook) {
        self.handle().set_error_hook(hook);
    }

    /// Processes queued work until [`LoopHandle::quit`] is called, then drops what is left.
    pub fn run(&self) {
        debug!("event loop running");
        while !self.shared.stopped.load(Ordering::SeqCst) {
            if self.shared.run_once(None).is_err() {
                break;
            }
        }
        self.shared.close();
        let dropped = self.shared.drain();
        debug!(dropped, "event loop stopped");
    }

    /// Processes everything currently queued without blocking.
    ///
    /// Work queued by the processed items themselves is processed too.
    ///
    /// # Returns
    /// The number of items processed.
    pub fn run_until_idle(&self) -> usize {
        let mut processed = 0;
        while !self.shared.stopped.load(Ordering::SeqCst) && self.shared.try_run_once() {
            processed += 1;
        }
        processed
    }

    /// Number of queued, unprocessed items.
    pub fn queued(&self) -> usize {
        self.shared.receiver.len()
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        if self.shared.close() {
            debug!("event loop dropped while open");
        }
        self.shared.stopped.store(true, Ordering::SeqCst);
        self.shared.drain();
    }
}

/// A thread-safe handle to an [`EventLoop`].
#[derive(Clone)]
pub struct LoopHandle {
    shared: Arc<Shared>,
}

impl LoopHandle {
    /// Stops the loop after the work already queued. New work is refused from now on.
    pub fn quit(&self) {
        let mut closed = self.shared.closed.write();
        if !*closed {
            *closed = true;
            // The receiver lives in `shared`, so this send cannot fail.
            let _ = self.shared.sender.send(Message::Quit);
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.shared.closed.read()
    }

    pub fn set_error_hook(&self, hook: ErrorHook) {
        *self.shared.error_hook.write() = Some(hook);
    }

    /// Number of handlers currently bound to `sequence` on `target`.
    pub fn binding_count(&self, target: &Target, sequence: &str) -> usize {
        self.shared
            .bindings
            .get(&(target.clone(), sequence.to_string()))
            .map(|entry| entry.len())
            .unwrap_or(0)
    }

    /// Number of dispatchers installed for `sequence` on `target`.
    pub fn dispatcher_count(&self, target: &Target, sequence: &str) -> usize {
        self.shared
            .dispatchers
            .get(&(target.clone(), sequence.to_string()))
            .map(|entry| entry.len())
            .unwrap_or(0)
    }
}

impl std::fmt::Debug for LoopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopHandle")
            .field("loop_thread", &self.shared.loop_thread)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl LoopHost for LoopHandle {
    fn schedule(&self, task: Task) -> Result<(), LoopError> {
        self.shared.push(Message::Task(task))
    }

    fn is_loop_thread(&self) -> bool {
        self.shared.is_loop_thread()
    }

    fn run_once(&self, timeout: Option<Duration>) -> Result<bool, LoopError> {
        self.shared.run_once(timeout)
    }

    fn bind(
        &self,
        target: &Target,
        sequence: &str,
        handler: NativeHandler,
        add: bool,
    ) -> Result<(), LoopError> {
        validate_sequence(sequence)?;
        let mut entry = self
            .shared
            .bindings
            .entry((target.clone(), sequence.to_string()))
            .or_default();
        if !add {
            entry.clear();
        }
        entry.push(handler);
        debug!(sequence, target = %target, add, "bound virtual event");
        Ok(())
    }

    fn bind_dispatcher(&self, target: &Target, sequence: &str, dispatcher: NativeHandler) -> Result<(), LoopError> {
        validate_sequence(sequence)?;
        self.shared
            .dispatchers
            .entry((target.clone(), sequence.to_string()))
            .or_default()
            .push(dispatcher);
        debug!(sequence, target = %target, "installed dispatcher");
        Ok(())
    }

    fn unbind(&self, target: &Target, sequence: &str) -> Result<usize, LoopError> {
        validate_sequence(sequence)?;
        let removed = self
            .shared
            .bindings
            .remove(&(target.clone(), sequence.to_string()))
            .map(|(_, handlers)| handlers.len())
            .unwrap_or(0);
        debug!(sequence, target = %target, removed, "unbound virtual event");
        Ok(removed)
    }

    fn event_generate(&self, target: &Target, sequence: &str, detail: String) -> Result<(), LoopError> {
        validate_sequence(sequence)?;
        self.shared
            .push(Message::Event(NativeEvent::new(sequence, target.clone(), detail)))
    }

    fn report_error(&self, context: &str, error: &(dyn std::error::Error + 'static)) {
        self.shared.report_error(context, error);
    }
}
