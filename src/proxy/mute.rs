use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::proxy::envelope::{self, Completion};
use crate::proxy::{Dispatch, Proxy};
use crate::{BoxError, LoopHandle, LoopHost, ProxyError};

/// Receives the errors of a mute proxy's calls, on the loop thread.
pub type MuteErrorHook = Arc<dyn Fn(&ProxyError) + Send + Sync>;

/// A fire-and-forget proxy: calls are queued for the loop thread and return immediately.
///
/// Nothing is returned to the caller. If a call fails, the error goes to the proxy's error hook
/// when one was given, otherwise to the host's error channel.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use parking_lot::Mutex;
/// use loop_bridge::{EventLoop, ProxyBuilder};
///
/// let event_loop = EventLoop::new();
/// let log = ProxyBuilder::new(event_loop.handle()).mute_proxy(Vec::<String>::new());
///
/// log.call(|lines| lines.push("started".to_string()));
/// event_loop.run_until_idle();
///
/// let lines = Arc::new(Mutex::new(Vec::new()));
/// let out = lines.clone();
/// log.call(move |log| *out.lock() = log.clone());
/// event_loop.run_until_idle();
/// assert_eq!(*lines.lock(), vec!["started".to_string()]);
/// ```
pub struct MuteProxy<T, H: LoopHost = LoopHandle> {
    host: H,
    target: Arc<Mutex<T>>,
    on_error: Option<MuteErrorHook>,
}

impl<T: Send + 'static, H: LoopHost> MuteProxy<T, H> {
    pub(crate) fn from_parts(host: H, target: Arc<Mutex<T>>, on_error: Option<MuteErrorHook>) -> Self {
        Self { host, target, on_error }
    }

    /// An ordinary proxy for the same target, without a timeout.
    pub fn to_ordinary(&self) -> Proxy<T, H> {
        Proxy::from_parts(self.host.clone(), Arc::clone(&self.target), None)
    }

    /// Queues `f` to run on the loop thread and returns without waiting.
    pub fn call<F>(&self, f: F)
    where
        F: FnOnce(&mut T) + Send + 'static,
    {
        self.submit(move |target| {
            f(target);
            Ok(())
        });
    }

    /// Like [`call`](Self::call); an `Err` from `f` is reported as `ProxyError::TargetRaised`.
    pub fn try_call<E, F>(&self, f: F)
    where
        F: FnOnce(&mut T) -> Result<(), E> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        self.submit(move |target| f(target).map_err(Into::into));
    }

    fn submit<F>(&self, f: F)
    where
        F: FnOnce(&mut T) -> Result<(), BoxError> + Send + 'static,
    {
        let target = Arc::clone(&self.target);
        let host = self.host.clone();
        let on_error = self.on_error.clone();

        let deliver = move |outcome: Completion<Result<(), BoxError>>| {
            let err = match outcome {
                Ok(Ok(())) => return,
                Ok(Err(err)) => ProxyError::TargetRaised(err),
                Err(err) => err,
            };
            match on_error {
                Some(hook) => hook(&err),
                None => host.report_error("mute proxy call", &err),
            }
        };

        let scheduled = envelope::submit(&self.host, target, f, deliver);

        match scheduled {
            Ok(()) => trace!("queued mute proxy call"),
            Err(err) => debug!(error = %err, "dropped mute proxy call"),
        }
    }
}

impl<T, H: LoopHost> Clone for MuteProxy<T, H> {
    fn clone(&self) -> Self {
        Self {
            host: self.host.clone(),
            target: Arc::clone(&self.target),
            on_error: self.on_error.clone(),
        }
    }
}

impl<T, H: LoopHost> Debug for MuteProxy<T, H> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MuteProxy")
            .field("target", &std::any::type_name::<T>())
            .field("error_hook", &self.on_error.is_some())
            .finish()
    }
}

impl<T: Send + 'static, H: LoopHost> Dispatch<T> for MuteProxy<T, H> {
    type Output<R: Send + 'static> = ();

    fn dispatch<R, F>(&self, f: F) -> Self::Output<R>
    where
        F: FnOnce(&mut T) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.call(move |target| {
            let _ = f(target);
        });
    }
}
