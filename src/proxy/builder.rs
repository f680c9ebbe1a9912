use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::proxy::{MuteErrorHook, MuteProxy, Proxy};
use crate::{BridgeConfig, LoopHandle, LoopHost, ProxyError};

/// Builds proxies whose calls run on one host's loop thread.
///
/// # Example
/// ```
/// use loop_bridge::{BridgeConfig, EventLoop, ProxyBuilder};
///
/// let event_loop = EventLoop::new();
/// let config = BridgeConfig { call_timeout_ms: Some(500), ..Default::default() };
/// let builder = ProxyBuilder::with_config(event_loop.handle(), &config);
///
/// let counter = builder.proxy(0_u32);
/// assert_eq!(counter.timeout(), Some(std::time::Duration::from_millis(500)));
/// ```
#[derive(Clone, Debug)]
pub struct ProxyBuilder<H: LoopHost = LoopHandle> {
    host: H,
    call_timeout: Option<Duration>,
}

impl<H: LoopHost> ProxyBuilder<H> {
    pub fn new(host: H) -> Self {
        Self::with_config(host, &BridgeConfig::default())
    }

    pub fn with_config(host: H, config: &BridgeConfig) -> Self {
        Self {
            host,
            call_timeout: config.call_timeout(),
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    /// Wraps `target` in an ordinary proxy; callers wait for each call's result.
    pub fn proxy<T: Send + 'static>(&self, target: T) -> Proxy<T, H> {
        Proxy::from_parts(self.host.clone(), Arc::new(Mutex::new(target)), self.call_timeout)
    }

    /// Wraps `target` in a mute proxy; failed calls go to the host's error channel.
    pub fn mute_proxy<T: Send + 'static>(&self, target: T) -> MuteProxy<T, H> {
        MuteProxy::from_parts(self.host.clone(), Arc::new(Mutex::new(target)), None)
    }

    /// Wraps `target` in a mute proxy whose failed calls are passed to `on_error` instead.
    pub fn mute_proxy_with_handler<T, F>(&self, target: T, on_error: F) -> MuteProxy<T, H>
    where
        T: Send + 'static,
        F: Fn(&ProxyError) + Send + Sync + 'static,
    {
        let hook: MuteErrorHook = Arc::new(on_error);
        MuteProxy::from_parts(self.host.clone(), Arc::new(Mutex::new(target)), Some(hook))
    }
}
