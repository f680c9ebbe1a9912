use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::{capture_errors, current_thread_name, LoopThread};
use crate::{
    proxy_methods, BridgeConfig, EventLoop, LoopError, LoopHost, MuteProxy, Proxy, ProxyBuilder,
    ProxyError, TargetPanic,
};

#[derive(Default)]
struct Spam {
    ran_on: Vec<String>,
}

impl Spam {
    fn ham(&mut self, foo: &str, bar: &str) -> String {
        self.ran_on.push(current_thread_name());
        format!("{bar}{foo}{bar}")
    }

    fn parse(&self, input: &str) -> Result<u32, std::num::ParseIntError> {
        input.parse()
    }

    fn boom(&self) -> u32 {
        panic!("division by zero")
    }
}

#[test]
fn ordinary_call_returns_value_from_loop_thread() {
    let looper = LoopThread::spawn();
    let proxy = ProxyBuilder::new(looper.handle.clone()).proxy(Spam::default());

    let worker_proxy = proxy.clone();
    let (result, caller) = std::thread::Builder::new()
        .name("worker".to_string())
        .spawn(move || (worker_proxy.call(|spam| spam.ham("oof", "--")), current_thread_name()))
        .unwrap()
        .join()
        .unwrap();

    assert_eq!(result.unwrap(), "--oof--");
    assert_eq!(caller, "worker");
    assert_eq!(
        proxy.call(|spam| spam.ran_on.clone()).unwrap(),
        vec!["loop-under-test".to_string()]
    );
}

/// Errors returned by the target come back to the caller with their type intact
#[test]
fn try_call_propagates_target_error() {
    let looper = LoopThread::spawn();
    let proxy = ProxyBuilder::new(looper.handle.clone()).proxy(Spam::default());

    assert_eq!(proxy.try_call(|spam| spam.parse("13")).unwrap(), 13);

    let err = proxy.try_call(|spam| spam.parse("thirteen")).unwrap_err();
    assert!(err.is_target_error());
    assert!(err.target_error::<std::num::ParseIntError>().is_some());
}

#[test]
fn target_panic_becomes_target_raised() {
    let looper = LoopThread::spawn();
    let proxy = ProxyBuilder::new(looper.handle.clone()).proxy(Spam::default());

    let err = proxy.call(|spam| spam.boom()).unwrap_err();
    assert_eq!(
        err.target_error::<TargetPanic>(),
        Some(&TargetPanic { message: "division by zero".to_string() })
    );

    // The target is still usable afterwards.
    assert_eq!(proxy.call(|spam| spam.ham("x", "")).unwrap(), "x");
}

/// A mute call returns before the target runs
#[test]
fn mute_call_does_not_wait() {
    let event_loop = EventLoop::new();
    let builder = ProxyBuilder::new(event_loop.handle());
    let counter = builder.mute_proxy(0_u32);
    let observed = Arc::new(AtomicUsize::new(0));

    counter.call(|n| *n += 1);
    counter.call(|n| *n += 1);
    let sink = observed.clone();
    counter.call(move |n| sink.store(*n as usize, Ordering::SeqCst));

    assert_eq!(event_loop.queued(), 3);
    assert_eq!(observed.load(Ordering::SeqCst), 0);

    event_loop.run_until_idle();
    assert_eq!(observed.load(Ordering::SeqCst), 2);
}

/// Mute failures go to the proxy's hook, never to the caller
#[test]
fn mute_errors_reach_the_handler() {
    let event_loop = EventLoop::new();
    let reported = capture_errors(&event_loop.handle());
    let handled = Arc::new(Mutex::new(Vec::new()));

    let sink = handled.clone();
    let proxy = ProxyBuilder::new(event_loop.handle()).mute_proxy_with_handler(
        Spam::default(),
        move |err: &ProxyError| sink.lock().push((current_thread_name(), err.to_string())),
    );

    proxy.try_call(|spam| spam.parse("nope").map(|_| ()));
    proxy.call(|spam| {
        spam.boom();
    });
    event_loop.run_until_idle();

    let handled = handled.lock();
    assert_eq!(handled.len(), 2);
    assert!(handled[0].1.starts_with("proxied call failed: invalid digit"));
    assert_eq!(handled[1].1, "proxied call failed: target panicked: division by zero");
    assert!(reported.lock().is_empty());
}

#[test]
fn mute_errors_default_to_error_channel() {
    let event_loop = EventLoop::new();
    let reported = capture_errors(&event_loop.handle());
    let proxy = ProxyBuilder::new(event_loop.handle()).mute_proxy(Spam::default());

    proxy.call(|spam| {
        spam.boom();
    });
    event_loop.run_until_idle();

    assert_eq!(
        *reported.lock(),
        vec![(
            "mute proxy call".to_string(),
            "proxied call failed: target panicked: division by zero".to_string()
        )]
    );
}

/// Calls from different workers through different proxies never overlap on the target
#[test]
fn concurrent_calls_are_serialized() {
    let looper = LoopThread::spawn();
    let builder = ProxyBuilder::new(looper.handle.clone());
    let first: Proxy<Vec<usize>> = builder.proxy(Vec::new());
    let second = first.with_timeout(Some(Duration::from_secs(10)));
    let in_flight = Arc::new(AtomicUsize::new(0));
    let overlaps = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = [first.clone(), second]
        .into_iter()
        .enumerate()
        .map(|(worker, proxy)| {
            let (in_flight, overlaps) = (in_flight.clone(), overlaps.clone());
            std::thread::spawn(move || {
                for _ in 0..25 {
                    let (in_flight, overlaps) = (in_flight.clone(), overlaps.clone());
                    proxy
                        .call(move |log| {
                            if in_flight.fetch_add(1, Ordering::SeqCst) != 0 {
                                overlaps.fetch_add(1, Ordering::SeqCst);
                            }
                            std::thread::sleep(Duration::from_micros(200));
                            log.push(worker);
                            in_flight.fetch_sub(1, Ordering::SeqCst);
                        })
                        .unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    assert_eq!(first.call(|log| log.len()).unwrap(), 50);
}

/// An ordinary call made on the loop thread waits behind work queued before it
#[test]
fn loop_thread_call_queues_behind_earlier_work() {
    let looper = LoopThread::spawn();
    let builder = ProxyBuilder::new(looper.handle.clone());
    let log = builder.proxy(Vec::<&'static str>::new());
    let (done_tx, done_rx) = flume::bounded(1);

    let (mute_log, log_on_loop) = (log.to_mute(), log.clone());
    looper
        .handle
        .schedule(Box::new(move || {
            mute_log.call(|log| log.push("queued first"));
            let snapshot = log_on_loop.call(|log| {
                log.push("called second");
                log.clone()
            });
            let _ = done_tx.send((current_thread_name(), snapshot));
        }))
        .unwrap();

    let (thread, snapshot) = done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(thread, "loop-under-test");
    assert_eq!(snapshot.unwrap(), vec!["queued first", "called second"]);
}

/// A target calling back into its own proxy gets an error, not a deadlock
#[test]
fn reentrant_call_is_rejected() {
    let looper = LoopThread::spawn();
    let proxy = ProxyBuilder::new(looper.handle.clone()).proxy(0_u32);

    let inner = proxy.clone();
    let nested = proxy
        .call(move |n| {
            *n += 1;
            inner.call(|n| *n += 1)
        })
        .unwrap();

    assert!(matches!(nested, Err(ProxyError::Reentrant)));
    assert_eq!(proxy.call(|n| *n).unwrap(), 1);
}

/// Calls reaching a target held further up the loop stack wait for it instead of failing
#[test]
fn calls_wait_for_a_target_held_up_the_stack() {
    let looper = LoopThread::spawn();
    let reported = capture_errors(&looper.handle);
    let builder = ProxyBuilder::new(looper.handle.clone());
    let counter = builder.proxy(0_u32);
    let other = builder.proxy(());
    let (gate_tx, gate_rx) = flume::bounded::<()>(1);

    // Hold the loop so every call below is queued before the first one runs.
    looper
        .handle
        .schedule(Box::new(move || {
            let _ = gate_rx.recv_timeout(Duration::from_secs(5));
        }))
        .unwrap();

    let outer = counter.call_async(move |n| {
        *n += 1;
        other.call(|_| ())
    });
    counter.to_mute().call(|n| *n += 10);
    let worker = counter.call_async(|n| *n + 100);
    gate_tx.send(()).unwrap();

    assert!(futures::executor::block_on(outer).unwrap().is_ok());
    assert_eq!(futures::executor::block_on(worker).unwrap(), 111);
    assert!(reported.lock().is_empty());
}

/// Awaiting an async call on the loop thread fails instead of hanging the loop
#[test]
fn async_call_awaited_on_loop_thread_fails() {
    let event_loop = EventLoop::new();
    let proxy = ProxyBuilder::new(event_loop.handle()).proxy(0_u32);

    let result = futures::executor::block_on(proxy.call_async(|n| *n));
    assert!(matches!(result, Err(ProxyError::AwaitedOnLoopThread)));

    // The call itself was queued and still runs.
    assert_eq!(event_loop.run_until_idle(), 1);
}

#[test]
fn calls_after_quit_fail_to_schedule() {
    let looper = LoopThread::spawn();
    let builder = ProxyBuilder::new(looper.handle.clone());
    let proxy = builder.proxy(Spam::default());
    let mute = proxy.to_mute();
    looper.stop();

    assert!(matches!(
        proxy.call(|spam| spam.ham("a", "b")),
        Err(ProxyError::SchedulingFailed(LoopError::Closed))
    ));
    // Dropped quietly.
    mute.call(|spam| {
        spam.ham("a", "b");
    });
}

/// A call still queued when the loop goes away wakes its caller
#[test]
fn call_dropped_with_loop_fails() {
    let (handle_tx, handle_rx) = flume::bounded(1);
    let (release_tx, release_rx) = flume::bounded::<()>(1);

    let loop_thread = std::thread::spawn(move || {
        let event_loop = EventLoop::new();
        handle_tx.send(event_loop.handle()).unwrap();
        while event_loop.queued() == 0 {
            std::thread::sleep(Duration::from_millis(1));
        }
        release_rx.recv().unwrap();
        drop(event_loop);
    });

    let handle = handle_rx.recv().unwrap();
    let proxy = ProxyBuilder::new(handle).proxy(Spam::default());
    release_tx.send(()).unwrap();

    assert!(matches!(
        proxy.call(|spam| spam.ham("a", "b")),
        Err(ProxyError::SchedulingFailed(LoopError::Closed))
    ));
    loop_thread.join().unwrap();
}

#[test]
fn blocked_loop_times_out() {
    let looper = LoopThread::spawn();
    let config = BridgeConfig { call_timeout_ms: Some(20), ..Default::default() };
    let proxy = ProxyBuilder::with_config(looper.handle.clone(), &config).proxy(Spam::default());
    let (release_tx, release_rx) = flume::bounded::<()>(1);

    looper
        .handle
        .schedule(Box::new(move || {
            let _ = release_rx.recv_timeout(Duration::from_secs(5));
        }))
        .unwrap();

    assert!(matches!(
        proxy.call(|spam| spam.ham("a", "b")),
        Err(ProxyError::TimeoutExceeded(limit)) if limit == Duration::from_millis(20)
    ));

    release_tx.send(()).unwrap();
    let patient = proxy.with_timeout(None);
    assert_eq!(patient.call(|spam| spam.ran_on.len()).unwrap(), 1);
}

#[test]
fn loop_thread_call_times_out() {
    let looper = LoopThread::spawn();
    let builder = ProxyBuilder::new(looper.handle.clone());
    let proxy = builder.proxy(0_u32).with_timeout(Some(Duration::from_millis(20)));
    let (done_tx, done_rx) = flume::bounded(1);

    // The gate task keeps the loop busy past the deadline.
    let nested_proxy = proxy.clone();
    let outer = builder.mute_proxy(());
    outer.call(move |_| {
        let (gate_tx, gate_rx) = flume::bounded::<()>(1);
        nested_proxy.to_mute().call(move |_| {
            let _ = gate_rx.recv_timeout(Duration::from_millis(100));
        });
        let result = nested_proxy.call(|n| *n);
        drop(gate_tx);
        let _ = done_tx.send(result);
    });

    let result = done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(matches!(result, Err(ProxyError::TimeoutExceeded(_))));
}

#[tokio::test(flavor = "multi_thread")]
async fn async_call_resolves() {
    let looper = LoopThread::spawn();
    let proxy = ProxyBuilder::new(looper.handle.clone()).proxy(Spam::default());

    let value = proxy.call_async(|spam| spam.ham("oof", "--")).await.unwrap();
    assert_eq!(value, "--oof--");

    let err = proxy.call_async(|spam| spam.boom()).await.unwrap_err();
    assert!(err.is_target_error());
}

#[tokio::test(flavor = "multi_thread")]
async fn async_call_times_out() {
    let looper = LoopThread::spawn();
    let proxy = ProxyBuilder::new(looper.handle.clone())
        .proxy(Spam::default())
        .with_timeout(Some(Duration::from_millis(20)));
    let (release_tx, release_rx) = flume::bounded::<()>(1);

    looper
        .handle
        .schedule(Box::new(move || {
            let _ = release_rx.recv_timeout(Duration::from_secs(5));
        }))
        .unwrap();

    let err = proxy.call_async(|spam| spam.ham("a", "b")).await.unwrap_err();
    assert!(matches!(err, ProxyError::TimeoutExceeded(_)));
    release_tx.send(()).unwrap();
}

mod capability_trait {
    use super::*;

    pub struct Counter {
        value: i64,
    }

    impl Counter {
        fn add(&mut self, delta: i64) -> i64 {
            self.value += delta;
            self.value
        }

        fn reset(&mut self) {
            self.value = 0;
        }

        fn describe(&self, prefix: String) -> String {
            format!("{prefix}{}", self.value)
        }
    }

    proxy_methods! {
        /// Counter methods reachable through a proxy.
        pub trait CounterProxy for Counter {
            fn add(delta: i64) -> i64;
            fn reset();
            fn describe(prefix: String,) -> String;
        }
    }

    fn bump<P: CounterProxy>(proxy: &P) -> P::Output<i64> {
        proxy.add(10)
    }

    /// Ordinary proxies return results, mute proxies return nothing
    #[test]
    fn generated_methods_on_both_proxy_kinds() {
        let looper = LoopThread::spawn();
        let builder = ProxyBuilder::new(looper.handle.clone());
        let counter: Proxy<Counter> = builder.proxy(Counter { value: 0 });
        let mute: MuteProxy<Counter> = counter.to_mute();

        assert_eq!(counter.add(5).unwrap(), 5);
        mute.add(2);
        let () = mute.reset();
        mute.add(1);
        assert_eq!(bump(&counter).unwrap(), 11);
        assert_eq!(counter.describe("value=".to_string()).unwrap(), "value=11");
        counter.reset().unwrap();
        assert_eq!(mute.to_ordinary().add(0).unwrap(), 0);
    }
}

#[test]
fn builder_applies_config_timeout() {
    let event_loop = EventLoop::new();
    let config = BridgeConfig::from_toml_str("call_timeout_ms = 1500").unwrap();
    let builder = ProxyBuilder::with_config(event_loop.handle(), &config);

    assert_eq!(builder.proxy(()).timeout(), Some(Duration::from_millis(1500)));
    assert_eq!(ProxyBuilder::new(event_loop.handle()).proxy(()).timeout(), None);
    assert!(builder.host().is_loop_thread());
}
