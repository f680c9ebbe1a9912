//! Virtual events that carry arbitrary data.
//!
//! A virtual event only has a string `detail` slot. The registry stores the payload under a fresh
//! id, raises the event with `"<registry>:<id>"` as its detail, and on delivery swaps the id back
//! for the payload before any handler sees the event. Several registries can share one host and
//! one sequence; each only consumes the events it raised.

use std::any::type_name;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, error, trace, warn};

use crate::constants::ErasedPayload;
use crate::host::{validate_sequence, LoopHost, NativeEvent, Target};
use crate::{
    BoxError, BridgeConfig, DataCallback, EventDataError, EventPayload, LoopError, LoopHandle,
    NativeHandler,
};

/// A delivered virtual event together with the data it was generated with.
pub struct DataEvent<T> {
    sequence: String,
    target: Target,
    data: EventPayload<T>,
}

impl<T> DataEvent<T> {
    /// The virtual event name, e.g. `<<progress>>`.
    pub fn sequence(&self) -> &str {
        &self.sequence
    }

    /// The target the event was raised on.
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// The payload attached by [`EventDataRegistry::event_generate`].
    pub fn data(&self) -> &EventPayload<T> {
        &self.data
    }

    pub fn into_data(self) -> EventPayload<T> {
        self.data
    }
}

impl<T: Debug> Debug for DataEvent<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataEvent")
            .field("sequence", &self.sequence)
            .field("target", &self.target)
            .field("data", &self.data)
            .finish()
    }
}

/// Source of registry identities, unique per process.
static NEXT_REGISTRY: AtomicU64 = AtomicU64::new(0);

type ErasedHandler = Arc<dyn Fn(&NativeEvent, &ErasedPayload) -> Result<(), BoxError> + Send + Sync>;

struct Inner<H> {
    host: H,
    registry_id: u64,
    /// Pending payloads by id. Inserted by producers, removed once on the loop thread.
    payloads: DashMap<u64, ErasedPayload>,
    next_id: AtomicU64,
    /// Typed handlers per key. A key present here has a dispatcher installed on the host.
    handlers: DashMap<(Target, String), Vec<ErasedHandler>>,
    warn_unbound: bool,
}

impl<H: LoopHost> Inner<H> {
    fn dispatch(&self, event: &NativeEvent) -> Result<(), BoxError> {
        let (registry_id, id) = parse_detail(event.detail())
            .ok_or_else(|| EventDataError::MissingId(event.detail().to_string()))?;
        if registry_id != self.registry_id {
            trace!(registry_id, id, sequence = event.sequence(), "event belongs to another registry");
            return Ok(());
        }

        let payload = match self.payloads.remove(&id) {
            Some((_, payload)) => payload,
            None => {
                let err = EventDataError::PayloadLookupMiss(id);
                error!(id, sequence = event.sequence(), "{err}");
                panic!("{err}");
            }
        };

        let handlers = self
            .handlers
            .get(&(event.target().clone(), event.sequence().to_string()))
            .map(|entry| entry.value().clone())
            .unwrap_or_default();

        trace!(id, sequence = event.sequence(), handlers = handlers.len(), "delivering payload");

        for handler in handlers {
            if let Err(err) = handler(event, &payload) {
                let context = format!("data handler for {} on {}", event.sequence(), event.target());
                self.host.report_error(&context, err.as_ref());
            }
        }
        Ok(())
    }
}

fn parse_detail(detail: &str) -> Option<(u64, u64)> {
    let (registry_id, id) = detail.split_once(':')?;
    Some((registry_id.parse().ok()?, id.parse().ok()?))
}

/// Attaches data to virtual events and delivers it to typed handlers on the loop thread.
///
/// Cloning is cheap; clones share pending payloads and bindings.
///
/// Every generated payload is held until an event for it is dispatched through a binding made on
/// this registry. Generating a sequence that was never bound here therefore keeps its payload
/// alive for the registry's lifetime: always `bind` before you `event_generate`.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use loop_bridge::{EventDataRegistry, EventLoop, DataEvent, Target};
/// use parking_lot::Mutex;
///
/// let event_loop = EventLoop::new();
/// let registry = EventDataRegistry::new(event_loop.handle());
/// let received = Arc::new(Mutex::new(Vec::new()));
///
/// let sink = received.clone();
/// registry.bind(&Target::root(), "<<progress>>", false, move |event: &DataEvent<(u32, String)>| {
///     sink.lock().push(event.data().as_ref().clone());
///     Ok(())
/// }).unwrap();
///
/// registry.event_generate(&Target::root(), "<<progress>>", (40, "copying".to_string())).unwrap();
/// event_loop.run_until_idle();
///
/// assert_eq!(*received.lock(), vec![(40, "copying".to_string())]);
/// assert_eq!(registry.pending(), 0);
/// ```
pub struct EventDataRegistry<H: LoopHost = LoopHandle> {
    inner: Arc<Inner<H>>,
}

impl<H: LoopHost> Clone for EventDataRegistry<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<H: LoopHost> EventDataRegistry<H> {
    pub fn new(host: H) -> Self {
        Self::with_config(host, &BridgeConfig::default())
    }

    pub fn with_config(host: H, config: &BridgeConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                host,
                registry_id: NEXT_REGISTRY.fetch_add(1, Ordering::Relaxed),
                payloads: DashMap::new(),
                next_id: AtomicU64::new(0),
                handlers: DashMap::new(),
                warn_unbound: config.warn_unbound_generate,
            }),
        }
    }

    pub fn host(&self) -> &H {
        &self.inner.host
    }

    /// Binds `handler` to `sequence` on `target`; it receives the event with its data.
    ///
    /// # Parameters
    /// * `add` - If `true`, `handler` runs after the handlers already bound through this registry;
    ///   otherwise it replaces them.
    ///
    /// # Returns
    /// * `Err(LoopError::InvalidSequence)` if `sequence` is not of the form `<<name>>`.
    pub fn bind<T, F>(&self, target: &Target, sequence: &str, add: bool, handler: F) -> Result<(), LoopError>
    where
        T: Send + Sync + 'static,
        F: Fn(&DataEvent<T>) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.bind_callback(target, sequence, add, Arc::new(handler))
    }

    /// Same as [`bind`](Self::bind), for an already shared callback.
    pub fn bind_callback<T>(
        &self,
        target: &Target,
        sequence: &str,
        add: bool,
        callback: DataCallback<T>,
    ) -> Result<(), LoopError>
    where
        T: Send + Sync + 'static,
    {
        validate_sequence(sequence)?;

        let erased: ErasedHandler = Arc::new(move |event: &NativeEvent, payload: &ErasedPayload| {
            let data = Arc::clone(payload)
                .downcast::<T>()
                .map_err(|_| EventDataError::PayloadType {
                    sequence: event.sequence().to_string(),
                    expected: type_name::<T>(),
                })?;
            callback(&DataEvent {
                sequence: event.sequence().to_string(),
                target: event.target().clone(),
                data,
            })
        });

        let key = (target.clone(), sequence.to_string());
        let install = match self.inner.handlers.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                if !add {
                    entry.get_mut().clear();
                }
                entry.get_mut().push(erased);
                false
            }
            Entry::Vacant(entry) => {
                entry.insert(vec![erased]);
                true
            }
        };

        if install {
            let weak: Weak<Inner<H>> = Arc::downgrade(&self.inner);
            let dispatcher: NativeHandler = Arc::new(move |event: &NativeEvent| match weak.upgrade() {
                Some(inner) => inner.dispatch(event),
                None => Ok(()),
            });
            if let Err(err) = self.inner.host.bind_dispatcher(target, sequence, dispatcher) {
                self.inner.handlers.remove(&key);
                return Err(err);
            }
        }
        debug!(sequence, target = %target, add, install, "bound data handler");
        Ok(())
    }

    /// Removes the handlers bound to `sequence` on `target` through this registry.
    ///
    /// Payloads of events already queued are still consumed on delivery, just not handed to anyone.
    ///
    /// # Returns
    /// * `Ok(n)` with the number of handlers removed.
    pub fn unbind(&self, target: &Target, sequence: &str) -> Result<usize, LoopError> {
        validate_sequence(sequence)?;
        let removed = self
            .inner
            .handlers
            .get_mut(&(target.clone(), sequence.to_string()))
            .map(|mut entry| {
                let count = entry.len();
                entry.clear();
                count
            })
            .unwrap_or(0);
        debug!(sequence, target = %target, removed, "unbound data handlers");
        Ok(removed)
    }

    /// Raises `sequence` on `target` carrying `data`. Callable from any thread.
    ///
    /// Returns as soon as the event is queued; handlers run later on the loop thread.
    ///
    /// # Returns
    /// * `Err(LoopError::InvalidSequence)` if `sequence` is not of the form `<<name>>`.
    /// * `Err(LoopError::Closed)` if the loop accepts no more work. The payload is discarded.
    pub fn event_generate<T>(&self, target: &Target, sequence: &str, data: T) -> Result<(), LoopError>
    where
        T: Send + Sync + 'static,
    {
        validate_sequence(sequence)?;

        if self.inner.warn_unbound
            && !self
                .inner
                .handlers
                .contains_key(&(target.clone(), sequence.to_string()))
        {
            warn!(
                sequence,
                target = %target,
                "generating data for an unbound event; the payload is kept until a binding dispatches it"
            );
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner.payloads.insert(id, Arc::new(data));

        if let Err(err) = self.inner.host.event_generate(target, sequence, self.detail_for(id)) {
            self.inner.payloads.remove(&id);
            return Err(err);
        }
        trace!(id, sequence, target = %target, "generated event with data");
        Ok(())
    }

    /// The native event detail carrying payload `id` of this registry.
    pub(crate) fn detail_for(&self, id: u64) -> String {
        format!("{}:{id}", self.inner.registry_id)
    }

    /// Number of payloads stored and not yet delivered.
    pub fn pending(&self) -> usize {
        self.inner.payloads.len()
    }
}

impl<H: LoopHost> Debug for EventDataRegistry<H> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDataRegistry")
            .field("id", &self.inner.registry_id)
            .field("pending", &self.pending())
            .field("bindings", &self.inner.handlers.len())
            .finish()
    }
}
