use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::proxy::envelope::{self, Completion};
use crate::proxy::{Dispatch, MuteProxy};
use crate::{BoxError, LoopError, LoopHandle, LoopHost, ProxyError};

/// A proxy whose calls run on the loop thread while the caller waits for the result.
///
/// Cloning is cheap and clones share the target. Calls made from the loop thread itself are
/// queued like any other; the loop thread keeps processing its queue until the call completes.
///
/// # Example
/// ```
/// use loop_bridge::{EventLoop, ProxyBuilder};
///
/// struct Spam;
/// impl Spam {
///     fn ham(&self, foo: &str, bar: &str) -> String {
///         format!("{bar}{foo}{bar}")
///     }
/// }
///
/// let (handle, join) = EventLoop::spawn("ui").unwrap();
/// let proxy = ProxyBuilder::new(handle.clone()).proxy(Spam);
///
/// let worker = std::thread::spawn(move || proxy.call(|spam| spam.ham("oof", "--")));
/// assert_eq!(worker.join().unwrap().unwrap(), "--oof--");
///
/// handle.quit();
/// join.join().unwrap();
/// ```
pub struct Proxy<T, H: LoopHost = LoopHandle> {
    host: H,
    target: Arc<Mutex<T>>,
    timeout: Option<Duration>,
}

impl<T: Send + 'static, H: LoopHost> Proxy<T, H> {
    pub(crate) fn from_parts(host: H, target: Arc<Mutex<T>>, timeout: Option<Duration>) -> Self {
        Self { host, target, timeout }
    }

    /// Returns a copy of this proxy that waits at most `timeout` per call.
    pub fn with_timeout(&self, timeout: Option<Duration>) -> Self {
        Self {
            host: self.host.clone(),
            target: Arc::clone(&self.target),
            timeout,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// A mute proxy for the same target.
    pub fn to_mute(&self) -> MuteProxy<T, H> {
        MuteProxy::from_parts(self.host.clone(), Arc::clone(&self.target), None)
    }

    /// Runs `f` on the loop thread and returns its result.
    ///
    /// # Returns
    /// * `Ok(R)` with whatever `f` returned.
    /// * `Err(ProxyError::TargetRaised)` if `f` panicked.
    /// * `Err(ProxyError::SchedulingFailed)` if the loop refused or dropped the call.
    /// * `Err(ProxyError::TimeoutExceeded)` if a timeout is set and expired first. The call may
    ///   still run later; its result is discarded.
    /// * `Err(ProxyError::Reentrant)` if called on the loop thread from inside a call on the same
    ///   target. Calls from other threads wait for the target instead.
    pub fn call<R, F>(&self, f: F) -> Result<R, ProxyError>
    where
        F: FnOnce(&mut T) -> R + Send + 'static,
        R: Send + 'static,
    {
        let completion = self.submit(f)?;
        if self.host.is_loop_thread() {
            self.wait_on_loop_thread(completion)
        } else {
            self.wait(completion)
        }
    }

    /// Like [`call`](Self::call), for methods that return a `Result`.
    ///
    /// An `Err(e)` from `f` becomes `ProxyError::TargetRaised` carrying `e`.
    pub fn try_call<V, E, F>(&self, f: F) -> Result<V, ProxyError>
    where
        F: FnOnce(&mut T) -> Result<V, E> + Send + 'static,
        V: Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        self.call(f)?.map_err(|err| ProxyError::TargetRaised(err.into()))
    }

    /// Runs `f` on the loop thread and resolves with its result, without blocking the caller.
    ///
    /// The call is queued right away. The timeout, if any, is enforced with `tokio::time`, so the
    /// future must be polled inside a Tokio runtime when a timeout is set.
    ///
    /// Polling the future on the loop thread resolves to `ProxyError::AwaitedOnLoopThread`, since
    /// the loop could never run the call while blocked on it.
    pub fn call_async<R, F>(&self, f: F) -> BoxFuture<'static, Result<R, ProxyError>>
    where
        F: FnOnce(&mut T) -> R + Send + 'static,
        R: Send + 'static,
    {
        let submitted = self.submit(f);
        let timeout = self.timeout;
        let host = self.host.clone();
        Box::pin(async move {
            let completion = submitted?;
            if host.is_loop_thread() {
                warn!("proxy future polled on the loop thread");
                return Err(ProxyError::AwaitedOnLoopThread);
            }
            let completion = completion.into_recv_async();
            let received = match timeout {
                None => completion.await,
                Some(limit) => tokio::time::timeout(limit, completion)
                    .await
                    .map_err(|_| ProxyError::TimeoutExceeded(limit))?,
            };
            received.map_err(|_| ProxyError::SchedulingFailed(LoopError::Closed))?
        })
    }

    fn submit<R, F>(&self, f: F) -> Result<flume::Receiver<Completion<R>>, ProxyError>
    where
        F: FnOnce(&mut T) -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.host.is_loop_thread() && envelope::is_held(&self.target) {
            return Err(ProxyError::Reentrant);
        }
        let (sender, receiver) = flume::bounded(1);
        envelope::submit(&self.host, Arc::clone(&self.target), f, move |outcome: Completion<R>| {
            // The caller may have timed out and dropped the receiver.
            let _ = sender.send(outcome);
        })?;
        trace!("queued proxy call");
        Ok(receiver)
    }

    fn wait<R>(&self, completion: flume::Receiver<Completion<R>>) -> Result<R, ProxyError> {
        match self.timeout {
            None => completion
                .recv()
                .map_err(|_| ProxyError::SchedulingFailed(LoopError::Closed))?,
            Some(limit) => match completion.recv_timeout(limit) {
                Ok(outcome) => outcome,
                Err(flume::RecvTimeoutError::Timeout) => {
                    warn!(?limit, "proxy call timed out");
                    Err(ProxyError::TimeoutExceeded(limit))
                }
                Err(flume::RecvTimeoutError::Disconnected) => {
                    Err(ProxyError::SchedulingFailed(LoopError::Closed))
                }
            },
        }
    }

    /// Waits by processing the loop's own queue; the call is somewhere in it.
    fn wait_on_loop_thread<R>(&self, completion: flume::Receiver<Completion<R>>) -> Result<R, ProxyError> {
        let deadline = self.timeout.map(|limit| (limit, Instant::now() + limit));
        loop {
            match completion.try_recv() {
                Ok(outcome) => return outcome,
                Err(flume::TryRecvError::Disconnected) => {
                    return Err(ProxyError::SchedulingFailed(LoopError::Closed))
                }
                Err(flume::TryRecvError::Empty) => {}
            }
            let slice = match deadline {
                None => None,
                Some((limit, deadline)) => {
                    let now = Instant::now();
                    if now >= deadline {
                        warn!(?limit, "proxy call from the loop thread timed out");
                        return Err(ProxyError::TimeoutExceeded(limit));
                    }
                    Some(deadline - now)
                }
            };
            self.host.run_once(slice)?;
        }
    }
}

impl<T, H: LoopHost> Clone for Proxy<T, H> {
    fn clone(&self) -> Self {
        Self {
            host: self.host.clone(),
            target: Arc::clone(&self.target),
            timeout: self.timeout,
        }
    }
}

impl<T, H: LoopHost> Debug for Proxy<T, H> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy")
            .field("target", &std::any::type_name::<T>())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl<T: Send + 'static, H: LoopHost> Dispatch<T> for Proxy<T, H> {
    type Output<R: Send + 'static> = Result<R, ProxyError>;

    fn dispatch<R, F>(&self, f: F) -> Self::Output<R>
    where
        F: FnOnce(&mut T) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.call(f)
    }
}
