use std::time::Duration;

use crate::host::Target;
use crate::{LoopError, NativeHandler, Task};

/// Defines the contract a single-threaded event loop offers to worker threads.
///
/// The event data registry and proxies are written against this trait, so any loop that can
/// schedule callbacks, deliver virtual events and report orphaned errors can host them.
/// [`LoopHandle`](crate::LoopHandle) is the reference implementation.
///
/// # Thread Safety
/// Implementors must be cheap to clone and usable from any thread. Only [`run_once`](Self::run_once)
/// is restricted to the loop thread.
pub trait LoopHost: Clone + Send + Sync + 'static {
    /// Queues `task` to run on the loop thread, after everything queued before it.
    ///
    /// # Returns
    /// * `Ok(())` once the task is queued.
    /// * `Err(LoopError::Closed)` if the loop no longer accepts work.
    fn schedule(&self, task: Task) -> Result<(), LoopError>;

    /// Returns `true` when called from the thread that runs the loop.
    fn is_loop_thread(&self) -> bool;

    /// Processes at most one queued item, waiting up to `timeout` for one to arrive.
    ///
    /// Used by callers on the loop thread that must wait on queued work without blocking the loop.
    ///
    /// # Returns
    /// * `Ok(true)` if an item was processed, `Ok(false)` if the wait timed out.
    /// * `Err(LoopError::NotLoopThread)` when called from another thread.
    /// * `Err(LoopError::Closed)` once the loop has stopped.
    fn run_once(&self, timeout: Option<Duration>) -> Result<bool, LoopError>;

    /// Binds `handler` to `sequence` on `target`.
    ///
    /// # Parameters
    /// * `add` - If `true`, the handler runs after those already bound; otherwise it replaces them.
    ///
    /// # Returns
    /// * `Err(LoopError::InvalidSequence)` if `sequence` is not of the form `<<name>>`.
    fn bind(
        &self,
        target: &Target,
        sequence: &str,
        handler: NativeHandler,
        add: bool,
    ) -> Result<(), LoopError>;

    /// Installs a dispatcher for `sequence` on `target`.
    ///
    /// Dispatchers run before the handlers installed with [`bind`](Self::bind), and neither a
    /// replacing `bind` nor [`unbind`](Self::unbind) removes them.
    ///
    /// # Returns
    /// * `Err(LoopError::InvalidSequence)` if `sequence` is not of the form `<<name>>`.
    fn bind_dispatcher(&self, target: &Target, sequence: &str, dispatcher: NativeHandler) -> Result<(), LoopError>;

    /// Removes every handler bound to `sequence` on `target`. Dispatchers stay.
    ///
    /// # Returns
    /// * `Ok(n)` with the number of handlers removed.
    fn unbind(&self, target: &Target, sequence: &str) -> Result<usize, LoopError>;

    /// Raises `sequence` on `target` with `detail`, behind any events already queued.
    ///
    /// Delivery happens later, on the loop thread, even when called from the loop thread.
    fn event_generate(&self, target: &Target, sequence: &str, detail: String) -> Result<(), LoopError>;

    /// Reports an error nobody is waiting for.
    fn report_error(&self, context: &str, error: &(dyn std::error::Error + 'static));
}
