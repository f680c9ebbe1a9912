//! The host side of the bridge: the contract a single-threaded loop offers, and a reference loop.

mod event_loop;
mod loop_host;
mod target;

pub use event_loop::{EventLoop, LoopHandle};
pub use loop_host::LoopHost;
pub use target::{validate_sequence, NativeEvent, Target};
