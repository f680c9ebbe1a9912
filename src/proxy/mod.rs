//! Proxies that run method calls on the loop thread.
//!
//! * [`Proxy`] queues the call and blocks the caller until the result (or error) comes back.
//! * [`MuteProxy`] queues the call and returns at once; failures never reach the caller.
//!
//! A proxied type's methods are reached either with a closure (`proxy.call(|t| t.method(..))`)
//! or through a trait declared with [`proxy_methods!`](crate::proxy_methods), which gives both
//! proxy kinds the wrapped type's method names. Fields cannot be read through a proxy directly;
//! read them with a closure.

mod builder;
mod envelope;
mod mute;
mod ordinary;

pub use builder::ProxyBuilder;
pub use mute::{MuteErrorHook, MuteProxy};
pub use ordinary::Proxy;

/// Something that can run a closure against a `T` living on the loop thread.
///
/// `Output` is what a call hands back to the caller: `Result<R, ProxyError>` for [`Proxy`], and
/// `()` for [`MuteProxy`].
pub trait Dispatch<T: Send + 'static> {
    type Output<R: Send + 'static>;

    fn dispatch<R, F>(&self, f: F) -> Self::Output<R>
    where
        F: FnOnce(&mut T) -> R + Send + 'static,
        R: Send + 'static;
}

/// Declares a trait exposing a type's methods on its proxies.
///
/// Each listed method is forwarded by name with its arguments moved onto the loop thread.
/// Arguments and return values must be `Send + 'static`. On a [`Proxy`] the methods return
/// `Result<Ret, ProxyError>`; on a [`MuteProxy`] they return `()`.
///
/// # Example
/// ```
/// use loop_bridge::{proxy_methods, EventLoop, ProxyBuilder};
///
/// pub struct Spam {
///     calls: u32,
/// }
///
/// impl Spam {
///     fn ham(&mut self, foo: String, bar: String) -> String {
///         self.calls += 1;
///         format!("{bar}{foo}{bar}")
///     }
///
///     fn calls(&self) -> u32 {
///         self.calls
///     }
/// }
///
/// proxy_methods! {
///     pub trait SpamProxy for Spam {
///         fn ham(foo: String, bar: String) -> String;
///         fn calls() -> u32;
///     }
/// }
///
/// let (handle, join) = EventLoop::spawn("ui").unwrap();
/// let builder = ProxyBuilder::new(handle.clone());
/// let spam = builder.proxy(Spam { calls: 0 });
///
/// assert_eq!(spam.ham("oof".into(), "--".into()).unwrap(), "--oof--");
/// spam.to_mute().ham("x".into(), String::new());
/// assert_eq!(spam.calls().unwrap(), 2);
///
/// handle.quit();
/// join.join().unwrap();
/// ```
#[macro_export]
macro_rules! proxy_methods {
    (@output) => { () };
    (@output $ret:ty) => { $ret };
    (
        $(#[$meta:meta])*
        $vis:vis trait $name:ident for $target:ty {
            $(
                $(#[$method_meta:meta])*
                fn $method:ident($($arg:ident: $arg_ty:ty),* $(,)?) $(-> $ret:ty)?;
            )*
        }
    ) => {
        $(#[$meta])*
        $vis trait $name: $crate::Dispatch<$target> {
            $(
                $(#[$method_meta])*
                fn $method(
                    &self
                    $(, $arg: $arg_ty)*
                ) -> <Self as $crate::Dispatch<$target>>::Output<$crate::proxy_methods!(@output $($ret)?)> {
                    self.dispatch(move |target: &mut $target| target.$method($($arg),*))
                }
            )*
        }

        impl<D: $crate::Dispatch<$target>> $name for D {}
    };
}
