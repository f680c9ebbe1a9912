use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::TargetPanic;
use crate::{LoopError, LoopHost, ProxyError};

/// Outcome of one proxied call, sent back over the call's completion channel.
pub(crate) type Completion<R> = Result<R, ProxyError>;

thread_local! {
    /// Targets locked by calls currently on this thread's stack, innermost last.
    static HELD: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

fn target_key<T>(target: &Arc<Mutex<T>>) -> usize {
    Arc::as_ptr(target) as *const () as usize
}

/// Returns `true` if a call further up the current thread's stack holds `target`.
///
/// Only meaningful on the loop thread, the one thread that ever locks a target.
pub(crate) fn is_held<T>(target: &Arc<Mutex<T>>) -> bool {
    let key = target_key(target);
    HELD.with(|held| held.borrow().contains(&key))
}

struct HeldGuard(usize);

impl HeldGuard {
    fn enter(key: usize) -> Self {
        HELD.with(|held| held.borrow_mut().push(key));
        Self(key)
    }
}

impl Drop for HeldGuard {
    fn drop(&mut self) {
        HELD.with(|held| {
            let mut held = held.borrow_mut();
            if let Some(pos) = held.iter().rposition(|key| *key == self.0) {
                held.remove(pos);
            }
        });
    }
}

enum Attempt<F, R> {
    Done(Completion<R>),
    Busy(F),
}

/// Runs `f` against the target unless a call further up the loop stack holds it.
fn invoke<T, R, F>(target: &Arc<Mutex<T>>, f: F) -> Attempt<F, R>
where
    F: FnOnce(&mut T) -> R,
{
    let Some(mut guard) = target.try_lock() else {
        return Attempt::Busy(f);
    };
    let _held = HeldGuard::enter(target_key(target));
    Attempt::Done(
        catch_unwind(AssertUnwindSafe(|| f(&mut guard)))
            .map_err(|payload| ProxyError::TargetRaised(Box::new(TargetPanic::from_payload(payload)))),
    )
}

/// Queues `f` to run against `target` on the loop thread and hands its outcome to `deliver`.
///
/// A call that finds its target held by an outer call on the loop stack goes back to the end of
/// the queue; the outer call is pumping the queue and releases the target once it returns.
/// If the loop closes before the call can be requeued, `deliver` is dropped unrun.
pub(crate) fn submit<H, T, R, F, D>(host: &H, target: Arc<Mutex<T>>, f: F, deliver: D) -> Result<(), LoopError>
where
    H: LoopHost,
    T: Send + 'static,
    R: 'static,
    F: FnOnce(&mut T) -> R + Send + 'static,
    D: FnOnce(Completion<R>) + Send + 'static,
{
    let retry = host.clone();
    host.schedule(Box::new(move || match invoke(&target, f) {
        Attempt::Done(outcome) => deliver(outcome),
        Attempt::Busy(f) => {
            trace!("proxy target busy further up the loop stack, requeueing call");
            if let Err(err) = submit(&retry, target, f, deliver) {
                debug!(error = %err, "dropped proxy call waiting on a busy target");
            }
        }
    }))
}
