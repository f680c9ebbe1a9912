use std::any::Any;
use std::sync::Arc;

use crate::event_data::DataEvent;
use crate::host::NativeEvent;

/// Boxed error used wherever a caller-supplied error crosses the loop boundary.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Type alias for an event payload pointer.
///
/// Every handler bound to the same sequence sees the same `Arc`, so a payload
/// attached at generation time is observable by identity on the loop thread.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use loop_bridge::EventPayload;
///
/// let payload: EventPayload<String> = Arc::new(String::from("progress: 40%"));
/// ```
pub type EventPayload<T> = Arc<T>;

/// Type-erased payload as stored by the registry between generation and dispatch.
pub(crate) type ErasedPayload = Arc<dyn Any + Send + Sync>;

/// A typed handler for virtual events carrying data.
///
/// Errors returned by the handler are routed to the host's error channel.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use loop_bridge::{DataCallback, DataEvent};
///
/// let callback: DataCallback<String> = Arc::new(|event: &DataEvent<String>| {
///     println!("{} on {}: {}", event.sequence(), event.target(), event.data());
///     Ok(())
/// });
/// ```
pub type DataCallback<T> = Arc<dyn Fn(&DataEvent<T>) -> Result<(), BoxError> + Send + Sync>;

/// A raw handler bound on the host, receiving the native event untouched.
pub type NativeHandler = Arc<dyn Fn(&NativeEvent) -> Result<(), BoxError> + Send + Sync>;

/// A unit of work scheduled onto the loop thread.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Receives errors that no caller is waiting for.
pub type ErrorHook = Arc<dyn Fn(&str, &(dyn std::error::Error + 'static)) + Send + Sync>;

/// Root target path, mirroring the toolkit convention of `"."` for the main window.
pub const ROOT_PATH: &str = ".";
