//! # Loop Bridge
//!
//! Lets worker threads safely talk to a single-threaded event loop, the way GUI toolkits require.
//!
//! - **EventDataRegistry**: raises virtual events from any thread carrying any `Send + Sync` data,
//!   and hands that data to typed handlers on the loop thread.
//! - **ProxyBuilder**: wraps an object in a [`Proxy`] (the caller waits for the result) or a
//!   [`MuteProxy`] (fire and forget) whose method calls always execute on the loop thread.
//! - **LoopHost**: the contract a loop must offer. [`EventLoop`] is a small reference loop
//!   implementing it through [`LoopHandle`].
//!
//! Logging goes through `tracing`; install a subscriber to see it.

mod config;
mod constants;
mod error;
pub mod event_data;
pub mod host;
pub mod proxy;

pub use config::BridgeConfig;
pub use constants::{BoxError, DataCallback, ErrorHook, EventPayload, NativeHandler, Task};
pub use error::{EventDataError, LoopError, ProxyError, TargetPanic};
pub use event_data::{DataEvent, EventDataRegistry};
pub use host::{EventLoop, LoopHandle, LoopHost, NativeEvent, Target};
pub use proxy::{Dispatch, MuteErrorHook, MuteProxy, Proxy, ProxyBuilder};

#[cfg(test)]
mod tests;
